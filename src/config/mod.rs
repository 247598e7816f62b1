pub mod tables;
pub mod toml_config;

pub use tables::{DomainTables, SectionCategory};
pub use toml_config::BlendConfig;

#[cfg(feature = "cli")]
use crate::domain::model::{Domain, Phase};
#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "ctx-blend")]
#[command(about = "Blend a framework context tree into a project and retire its legacy layout")]
pub struct CliConfig {
    /// Framework (canonical) tree root
    #[arg(long)]
    pub framework: Option<PathBuf>,

    /// Target project root
    #[arg(long)]
    pub target: Option<PathBuf>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Phases to run (detect,classify,blend,cleanup); all when omitted
    #[arg(long, value_delimiter = ',')]
    pub phases: Vec<Phase>,

    /// Domains to blend and clean up; all when omitted
    #[arg(long, value_delimiter = ',')]
    pub domains: Vec<Domain>,

    /// Report what would change without touching the tree
    #[arg(long)]
    pub dry_run: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Write the JSON run report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// 命令列優先於設定檔；兩者都沒有時使用預設值
#[cfg(feature = "cli")]
#[derive(Debug, Clone)]
pub struct ResolvedRun {
    pub framework_root: PathBuf,
    pub target_root: PathBuf,
    pub request: crate::domain::model::RunRequest,
}

#[cfg(feature = "cli")]
impl CliConfig {
    pub fn resolve(&self, file: &BlendConfig) -> crate::utils::error::Result<ResolvedRun> {
        use crate::domain::model::RunRequest;
        use crate::utils::error::BlendError;

        let framework_root = self
            .framework
            .clone()
            .or_else(|| file.framework_root())
            .ok_or_else(|| BlendError::MissingConfigError {
                field: "framework (--framework or run.framework_root)".to_string(),
            })?;
        let target_root = self
            .target
            .clone()
            .or_else(|| file.target_root())
            .ok_or_else(|| BlendError::MissingConfigError {
                field: "target (--target or run.target_root)".to_string(),
            })?;

        let mut request = RunRequest::all(self.dry_run || file.dry_run());
        if !self.phases.is_empty() {
            request = request.with_phases(self.phases.iter().copied());
        } else if let Some(phases) = file.phases()? {
            request = request.with_phases(phases);
        }
        if !self.domains.is_empty() {
            request = request.with_domains(self.domains.iter().copied());
        } else if let Some(domains) = file.domains()? {
            request = request.with_domains(domains);
        }

        Ok(ResolvedRun {
            framework_root,
            target_root,
            request,
        })
    }
}

#[cfg(feature = "cli")]
impl crate::utils::validation::Validate for CliConfig {
    fn validate(&self) -> crate::utils::error::Result<()> {
        use crate::utils::validation::validate_path;

        for (field, path) in [("framework", &self.framework), ("target", &self.target)] {
            if let Some(path) = path {
                validate_path(field, &path.to_string_lossy())?;
            }
        }
        if let Some(report) = &self.report {
            validate_path("report", &report.to_string_lossy())?;
        }
        Ok(())
    }
}
