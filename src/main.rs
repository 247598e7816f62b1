use anyhow::Context;
use clap::Parser;
use ctx_blend::adapters::UnavailableService;
use ctx_blend::domain::ports::{ComparisonService, MergeService};
use ctx_blend::utils::{logger, validation::Validate};
use ctx_blend::{
    BlendConfig, CliConfig, HttpComparisonService, HttpMergeService, HttpServiceConfig,
    LocalStorage, MeteredServices, Orchestrator, PreferFramework, RunStatus,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.log_json {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    tracing::info!("🚀 Starting ctx-blend");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    if let Err(e) = cli.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 建議: {}", e.recovery_suggestion());
        std::process::exit(1);
    }

    // 載入 TOML 配置（可省略）
    let file = match &cli.config {
        Some(path) => {
            tracing::info!("📁 Loading configuration from: {}", path.display());
            let config = BlendConfig::from_file(path)
                .with_context(|| format!("failed to load config file '{}'", path.display()))?;
            if let Err(e) = config.validate() {
                eprintln!("❌ {}", e.user_friendly_message());
                eprintln!("💡 建議: {}", e.recovery_suggestion());
                std::process::exit(1);
            }
            config
        }
        None => BlendConfig::default(),
    };

    let resolved = match cli.resolve(&file) {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    };

    let orchestrator = Orchestrator::new(
        Arc::new(file.tables()?),
        build_services(&file),
        Arc::new(PreferFramework),
        Arc::new(LocalStorage::new()),
    )?;

    let report = orchestrator
        .run(&resolved.framework_root, &resolved.target_root, &resolved.request)
        .await;

    println!("{}", report.summary());
    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to '{}'", path.display()))?;
        tracing::info!("📄 Report saved to: {}", path.display());
    }

    // 0 完成、2 部分完成、1 中止
    let exit_code = match report.status {
        RunStatus::Completed => 0,
        RunStatus::PartiallyCompleted => 2,
        RunStatus::Aborted => 1,
    };
    if exit_code > 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// 有端點才連線，否則走離線退路
fn build_services(config: &BlendConfig) -> MeteredServices {
    let services = config.services();
    let http = |endpoint: &str| {
        HttpServiceConfig::new(endpoint)
            .with_api_key(services.api_key.clone())
            .with_timeout_seconds(services.timeout_seconds)
    };

    let cheap: Arc<dyn ComparisonService> = match &services.cheap_endpoint {
        Some(endpoint) => Arc::new(HttpComparisonService::new(http(endpoint))),
        None => {
            tracing::warn!("⚠️ No comparison service configured; similarity checks will fail open");
            Arc::new(UnavailableService)
        }
    };
    let quality: Arc<dyn MergeService> = match &services.quality_endpoint {
        Some(endpoint) => Arc::new(HttpMergeService::new(http(endpoint))),
        None => {
            tracing::warn!("⚠️ No merge service configured; merges fall back to the conflict resolver");
            Arc::new(UnavailableService)
        }
    };

    MeteredServices::new(cheap, quality, config.pricing())
}
