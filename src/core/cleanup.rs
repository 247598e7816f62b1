use crate::core::strategies::carries;
use crate::domain::layout::{is_standard_path, legacy_directories, LegacyLocation, TreeLayout, NESTED_LEGACY_ROOT};
use crate::domain::model::{CleanupDecision, Domain};
use crate::domain::ports::Storage;
use crate::utils::error::{BlendError, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 本次混合留下的紀錄：dry-run 中預定寫入的內容，以及內容已被合併吸收的舊檔
#[derive(Debug, Default, Clone)]
pub struct MigrationLedger {
    planned: BTreeMap<PathBuf, Vec<u8>>,
    absorbed: HashSet<PathBuf>,
}

impl MigrationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&mut self, writes: impl IntoIterator<Item = (PathBuf, Vec<u8>)>) {
        self.planned.extend(writes);
    }

    pub fn absorb(&mut self, legacy_paths: impl IntoIterator<Item = PathBuf>) {
        self.absorbed.extend(legacy_paths);
    }

    pub fn planned_count(&self) -> usize {
        self.planned.len()
    }
}

/// 舊目錄只有在每個檔案的內容都能在統一樹找到時才會刪除
pub struct CleanupVerifier {
    storage: Arc<dyn Storage>,
}

impl CleanupVerifier {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn verify(&self, location: &LegacyLocation, target_root: &Path) -> Result<CleanupDecision> {
        self.verify_with(location, target_root, &MigrationLedger::new())
    }

    /// 舊檔算已搬移：被合併吸收，或某個可接受的目的地保有它的全部本文
    pub fn verify_with(
        &self,
        location: &LegacyLocation,
        target_root: &Path,
        ledger: &MigrationLedger,
    ) -> Result<CleanupDecision> {
        let legacy_dir = target_root.join(location.search_path);
        let mut decision = CleanupDecision {
            legacy_dir: PathBuf::from(location.search_path),
            verified: true,
            unmigrated_files: Vec::new(),
            removed: false,
        };
        if !self.storage.exists(&legacy_dir) {
            return Ok(decision);
        }

        let layout = TreeLayout::new(target_root);
        for file in self.storage.list_files(&legacy_dir)? {
            if ledger.absorbed.contains(&file) {
                continue;
            }
            let relative = file.strip_prefix(&legacy_dir).unwrap_or(&file);
            let content = String::from_utf8_lossy(&self.storage.read(&file)?).into_owned();
            let landed = layout
                .accepted_destinations(location.domain, relative, &content)
                .iter()
                .filter_map(|p| self.current(p, ledger))
                .any(|unified| carries(&unified, &content));
            if !landed {
                decision
                    .unmigrated_files
                    .push(file.strip_prefix(target_root).unwrap_or(&file).to_path_buf());
            }
        }
        decision.verified = decision.unmigrated_files.is_empty();
        Ok(decision)
    }

    /// 目的地目前的內容；dry-run 的預定寫入優先
    fn current(&self, path: &Path, ledger: &MigrationLedger) -> Option<String> {
        if let Some(planned) = ledger.planned.get(path) {
            return Some(String::from_utf8_lossy(planned).into_owned());
        }
        if !self.storage.exists(path) {
            return None;
        }
        match self.storage.read(path) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                tracing::debug!("cannot read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// 驗證並（非 dry-run 時）刪除單一舊目錄；有未搬移檔案時回報錯誤且不刪除
    pub fn cleanup_dir(&self, location: &LegacyLocation, target_root: &Path, dry_run: bool) -> Result<CleanupDecision> {
        self.cleanup_dir_with(location, target_root, dry_run, &MigrationLedger::new())
    }

    pub fn cleanup_dir_with(
        &self,
        location: &LegacyLocation,
        target_root: &Path,
        dry_run: bool,
        ledger: &MigrationLedger,
    ) -> Result<CleanupDecision> {
        if !location.is_legacy() || is_standard_path(Path::new(location.search_path)) {
            return Err(BlendError::ConfigError {
                message: format!("{} is a standard location and is never removed", location.search_path),
            });
        }

        let mut decision = self.verify_with(location, target_root, ledger)?;
        let legacy_dir = target_root.join(location.search_path);
        if dry_run || !self.storage.exists(&legacy_dir) {
            return Ok(decision);
        }
        if !decision.verified {
            return Err(BlendError::CleanupVerificationError {
                legacy_dir: decision.legacy_dir,
                unmigrated: decision.unmigrated_files,
            });
        }

        self.storage.remove_dir_all(&legacy_dir)?;
        decision.removed = true;
        tracing::info!("🧹 removed legacy directory {}", location.search_path);
        Ok(decision)
    }

    /// 依序處理所有舊目錄；遇到第一個未通過驗證的目錄即停止
    pub fn cleanup(&self, target_root: &Path, domains: &BTreeSet<Domain>, dry_run: bool) -> Result<Vec<CleanupDecision>> {
        let mut decisions = Vec::new();
        for location in legacy_directories().filter(|l| domains.contains(&l.domain)) {
            decisions.push(self.cleanup_dir(location, target_root, dry_run)?);
        }
        if !dry_run {
            self.prune_nested_root(target_root)?;
        }
        Ok(decisions)
    }

    /// 舊的 `context-engineering/` 清空後一併移除
    pub fn prune_nested_root(&self, target_root: &Path) -> Result<bool> {
        let nested = target_root.join(NESTED_LEGACY_ROOT);
        if !self.storage.exists(&nested) || !self.storage.list_files(&nested)?.is_empty() {
            return Ok(false);
        }
        self.storage.remove_dir_all(&nested)?;
        tracing::info!("🧹 removed empty {}", NESTED_LEGACY_ROOT);
        Ok(true)
    }
}
