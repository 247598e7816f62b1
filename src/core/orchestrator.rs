//! Run-level state machine: Detect → Classify → Blend → Cleanup.
//!
//! Detection errors abort the run. Everything after detection is contained
//! per domain (or per legacy directory): a failing domain is rolled back and
//! reported, the remaining domains still run, and the run ends
//! PartiallyCompleted. Cleanup always runs last.

use crate::config::tables::DomainTables;
use crate::core::backup::BackupManager;
use crate::core::classifier::Classifier;
use crate::core::cleanup::{CleanupVerifier, MigrationLedger};
use crate::core::registry::DomainRegistry;
use crate::core::scanner::Scanner;
use crate::core::services::MeteredServices;
use crate::core::strategies::BlendContext;
use crate::domain::layout::{legacy_directories, TreeLayout};
use crate::domain::model::{
    BlendResult, CandidateFile, ClassificationResult, CleanupDecision, Domain, Phase, RunReport,
    RunRequest, RunStatus,
};
use crate::domain::ports::{ConflictResolver, Storage};
use crate::utils::error::{BlendError, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type Candidates = BTreeMap<Domain, Vec<CandidateFile>>;

pub struct Orchestrator {
    registry: DomainRegistry,
    classifier: Classifier,
    scanner: Scanner,
    verifier: CleanupVerifier,
    services: MeteredServices,
    resolver: Arc<dyn ConflictResolver>,
    storage: Arc<dyn Storage>,
}

impl Orchestrator {
    pub fn new(
        tables: Arc<DomainTables>,
        services: MeteredServices,
        resolver: Arc<dyn ConflictResolver>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        Ok(Self {
            registry: DomainRegistry::new(tables.clone())?,
            classifier: Classifier::new(tables),
            scanner: Scanner::new(),
            verifier: CleanupVerifier::new(storage.clone()),
            services,
            resolver,
            storage,
        })
    }

    pub fn services(&self) -> &MeteredServices {
        &self.services
    }

    pub async fn run(&self, framework_root: &Path, target_root: &Path, request: &RunRequest) -> RunReport {
        let run_id = Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string();
        let mut report = RunReport::new(run_id.clone(), request.dry_run);
        tracing::info!(
            "🚀 Blend run {} started{}",
            run_id,
            if request.dry_run { " (dry run)" } else { "" }
        );

        let roots = canonical(framework_root).and_then(|fw| Ok((fw, canonical(target_root)?)));
        let (framework_root, target_root) = match roots {
            Ok(roots) => roots,
            Err(e) => return abort(report, e),
        };

        let needs_detection =
            request.includes(Phase::Detect) || request.includes(Phase::Classify) || request.includes(Phase::Blend);
        let (framework, mut target) = if needs_detection {
            match self.detect(&framework_root, &target_root, request, &mut report) {
                Ok(found) => found,
                Err(e) => return abort(report, e),
            }
        } else {
            (Candidates::new(), Candidates::new())
        };

        if request.includes(Phase::Classify) {
            self.classify(&mut target, request, &mut report).await;
        }

        let mut ledger = MigrationLedger::new();
        if request.includes(Phase::Blend) {
            ledger = self
                .blend(&framework, &target, &framework_root, &target_root, &run_id, request, &mut report)
                .await;
        }

        if request.includes(Phase::Cleanup) {
            self.cleanup(&target_root, request, &ledger, &mut report);
        }

        if !report.errors.is_empty() || report.blend_results.iter().any(BlendResult::has_errors) {
            report.status = RunStatus::PartiallyCompleted;
        }
        tracing::info!(
            "🏁 Blend run {} finished: {:?} ({} cheap call(s), {} quality call(s))",
            report.run_id,
            report.status,
            report.usage.cheap_calls,
            report.usage.quality_calls
        );
        report
    }

    fn detect(
        &self,
        framework_root: &Path,
        target_root: &Path,
        request: &RunRequest,
        report: &mut RunReport,
    ) -> Result<(Candidates, Candidates)> {
        tracing::info!("🔎 Phase: detect");
        let mut framework = self.scanner.scan_framework(framework_root)?;
        let mut target = self.scanner.scan(target_root)?;
        framework.retain(|domain, _| request.domains.contains(domain));
        target.retain(|domain, _| request.domains.contains(domain));

        for (domain, items) in &target {
            report.detected.insert(*domain, items.len());
            tracing::info!(
                "📂 {}: {} in target, {} in framework",
                domain,
                items.len(),
                framework.get(domain).map_or(0, Vec::len)
            );
        }
        report.phases_run.push(Phase::Detect);
        Ok((framework, target))
    }

    /// 只分類舊版位置的目標檔；標準位置的檔案直接通過
    async fn classify(&self, target: &mut Candidates, request: &RunRequest, report: &mut RunReport) {
        tracing::info!("🏷️ Phase: classify");
        for (domain, items) in target.iter_mut() {
            if !request.domains.contains(domain) {
                continue;
            }
            let mut kept = Vec::with_capacity(items.len());
            for candidate in items.drain(..) {
                if candidate.standard {
                    kept.push(candidate);
                    continue;
                }
                let result = match self.classifier.classify(&candidate, &self.services).await {
                    Ok(result) => result,
                    Err(e) => ClassificationResult {
                        file: candidate.path.clone(),
                        domain: *domain,
                        valid: false,
                        confidence: 0.0,
                        issues: vec![e.to_string()],
                        escalated: false,
                    },
                };
                if result.valid {
                    kept.push(candidate);
                } else {
                    report.filtered.push(candidate.path.clone());
                }
                report.classifications.push(result);
            }
            *items = kept;
        }
        report.usage.add(&self.services.take_usage());
        report.phases_run.push(Phase::Classify);
    }

    /// 逐領域混合，回傳 cleanup 驗證要用的搬移紀錄
    #[allow(clippy::too_many_arguments)]
    async fn blend(
        &self,
        framework: &Candidates,
        target: &Candidates,
        framework_root: &Path,
        target_root: &Path,
        run_id: &str,
        request: &RunRequest,
        report: &mut RunReport,
    ) -> MigrationLedger {
        tracing::info!("🔀 Phase: blend");
        let layout = TreeLayout::new(target_root);
        let manager = BackupManager::new(self.storage.clone(), target_root, run_id, request.dry_run);
        let mut ledger = MigrationLedger::new();
        let empty = Vec::new();

        for domain in Domain::ALL.into_iter().filter(|d| request.domains.contains(d)) {
            let strategy = match self.registry.strategy(domain) {
                Ok(strategy) => strategy,
                Err(e) => {
                    report.errors.push(format!("{}: {}", domain, e));
                    continue;
                }
            };
            let framework_items = framework.get(&domain).unwrap_or(&empty);
            let target_items = target.get(&domain).unwrap_or(&empty);
            tracing::info!(
                "🔀 {}: {} with {} framework / {} target item(s)",
                domain,
                strategy.name(),
                framework_items.len(),
                target_items.len()
            );

            let transaction = manager.begin(domain);
            let outcome = {
                let ctx = BlendContext {
                    layout: &layout,
                    framework_root,
                    services: &self.services,
                    storage: self.storage.as_ref(),
                    resolver: self.resolver.as_ref(),
                    transaction: &transaction,
                };
                strategy.blend(framework_items, target_items, &ctx).await
            };

            let mut result = match outcome {
                Ok(result) => {
                    ledger.plan(transaction.planned_contents());
                    ledger.absorb(result.absorbed.iter().cloned());
                    if let Err(e) = transaction.commit() {
                        tracing::warn!("⚠️ {}: could not discard backups: {}", domain, e);
                    }
                    result
                }
                Err(e) => {
                    tracing::error!("❌ {}: {}; rolling back", domain, e);
                    if let Err(rollback_err) = transaction.rollback() {
                        tracing::error!("❌ {}: rollback failed: {}", domain, rollback_err);
                    }
                    let mut failed = BlendResult::new(domain);
                    failed.record_error(domain.as_str(), e.to_string());
                    failed.rolled_back = true;
                    report.errors.push(format!("{}: {}", domain, e));
                    failed
                }
            };

            result.resource_usage = self.services.take_usage();
            report.usage.add(&result.resource_usage);
            tracing::info!("✅ {}", result.summary_line(request.dry_run));
            report.blend_results.push(result);
        }

        if let Err(e) = manager.finish() {
            tracing::warn!("⚠️ could not remove backup directory: {}", e);
        }
        report.phases_run.push(Phase::Blend);
        ledger
    }

    fn cleanup(&self, target_root: &Path, request: &RunRequest, ledger: &MigrationLedger, report: &mut RunReport) {
        tracing::info!("🧹 Phase: cleanup");
        if request.dry_run {
            tracing::debug!("🧹 verifying against {} planned write(s)", ledger.planned_count());
        }
        for location in legacy_directories().filter(|l| request.domains.contains(&l.domain)) {
            match self
                .verifier
                .cleanup_dir_with(location, target_root, request.dry_run, ledger)
            {
                Ok(decision) => report.cleanup.push(decision),
                Err(BlendError::CleanupVerificationError { legacy_dir, unmigrated }) => {
                    let err = BlendError::CleanupVerificationError {
                        legacy_dir: legacy_dir.clone(),
                        unmigrated: unmigrated.clone(),
                    };
                    tracing::warn!("⚠️ {}", err.user_friendly_message());
                    report.errors.push(err.to_string());
                    report.cleanup.push(CleanupDecision {
                        legacy_dir,
                        verified: false,
                        unmigrated_files: unmigrated,
                        removed: false,
                    });
                }
                Err(e) => report.errors.push(format!("{}: {}", location.search_path, e)),
            }
        }
        if !request.dry_run {
            if let Err(e) = self.verifier.prune_nested_root(target_root) {
                report.errors.push(e.to_string());
            }
        }
        report.phases_run.push(Phase::Cleanup);
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| BlendError::DetectionError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn abort(mut report: RunReport, error: BlendError) -> RunReport {
    tracing::error!("❌ {}", error.user_friendly_message());
    report.status = RunStatus::Aborted;
    report.errors.push(error.to_string());
    report
}
