//! Per-domain reconciliation algorithms.
//!
//! Every strategy receives the framework-side and target-side candidates for
//! its domain and writes only through the [`BlendContext`], so each write is
//! backed up by the domain transaction and suppressed in dry-run.

pub mod hash_dedupe;
pub mod move_all;
pub mod overwrite;
pub mod rule_merge;
pub mod section_merge;
pub mod tiered_merge;

pub use hash_dedupe::HashDedupeStrategy;
pub use move_all::MoveAllStrategy;
pub use overwrite::OverwriteStrategy;
pub use rule_merge::RuleMergeStrategy;
pub use section_merge::SectionMergeStrategy;
pub use tiered_merge::TieredMergeStrategy;

use crate::config::tables::DomainTables;
use crate::core::backup::Transaction;
use crate::core::markdown::split_front_matter;
use crate::core::services::MeteredServices;
use crate::domain::layout::{disambiguated, TreeLayout};
use crate::domain::model::{BlendResult, CandidateFile, Conflict, Domain, Resolution};
use crate::domain::ports::{ConflictResolver, Storage};
use crate::utils::error::{BlendError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[async_trait]
pub trait BlendStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, domain: Domain) -> bool;

    /// 混合一個領域；結構錯誤回傳 Err，單一項目的問題記在結果裡
    async fn blend(
        &self,
        framework: &[CandidateFile],
        target: &[CandidateFile],
        ctx: &BlendContext<'_>,
    ) -> Result<BlendResult>;

    /// 檢查混合後的內容；違反結構時回傳 ValidationError
    fn validate(&self, content: &str) -> Result<()>;
}

/// 策略執行時可用的環境
pub struct BlendContext<'a> {
    pub layout: &'a TreeLayout,
    pub framework_root: &'a Path,
    pub services: &'a MeteredServices,
    pub storage: &'a dyn Storage,
    pub resolver: &'a dyn ConflictResolver,
    pub transaction: &'a Transaction<'a>,
}

impl<'a> BlendContext<'a> {
    pub fn dry_run(&self) -> bool {
        self.transaction.is_dry_run()
    }

    /// 目前的內容；dry-run 時包含尚未落地的寫入
    pub fn existing(&self, path: &Path) -> Option<String> {
        if let Some(pending) = self.transaction.pending(path) {
            return String::from_utf8(pending).ok();
        }
        if !self.storage.exists(path) {
            return None;
        }
        match self.storage.read_to_string(path) {
            Ok(content) => Some(content),
            Err(e) => {
                tracing::debug!("cannot read {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn write(&self, path: &Path, content: &str) -> Result<()> {
        self.transaction.write(path, content.as_bytes())
    }

    /// 內容不同（或檔案不存在）時才寫入；回傳是否寫入
    pub fn place(&self, path: &Path, content: &str) -> Result<bool> {
        if self.existing(path).as_deref() == Some(content) {
            return Ok(false);
        }
        self.write(path, content)?;
        Ok(true)
    }

    /// 寫到 `primary`；那裡已有不同內容時改寫到以 `source` 雜湊命名的旁路檔。
    /// 回傳內容所在位置，以及這次是否真的寫入
    pub fn place_beside(&self, primary: &Path, content: &str, source: &str) -> Result<(PathBuf, bool)> {
        match self.existing(primary) {
            None => {
                self.write(primary, content)?;
                Ok((primary.to_path_buf(), true))
            }
            Some(current) if current == content => Ok((primary.to_path_buf(), false)),
            Some(_) => {
                let alternate = disambiguated(primary, source);
                let written = self.place(&alternate, content)?;
                Ok((alternate, written))
            }
        }
    }

    /// 被取代的使用者版本保留在 `.ce/backups/<domain>/`，回傳實際位置
    pub fn keep_superseded(&self, domain: Domain, relative: &Path, content: &str) -> Result<PathBuf> {
        let primary = self.layout.superseded_path(domain, relative).ok_or_else(|| {
            BlendError::strategy(domain, "domain has no place for superseded versions")
        })?;
        let destination = match self.existing(&primary) {
            Some(current) if current != content => disambiguated(&primary, content),
            _ => primary,
        };
        self.place(&destination, content)?;
        Ok(destination)
    }

    pub fn resolve(&self, conflict: &Conflict) -> Resolution {
        self.resolver.resolve(conflict)
    }

    /// 報告用的相對路徑
    pub fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(self.layout.root())
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// 框架樹中的檔案（例如規則文件）
    pub fn framework_file(&self, relative: &Path) -> Option<String> {
        let path: PathBuf = self.framework_root.join(relative);
        self.storage
            .exists(&path)
            .then(|| self.storage.read_to_string(&path).ok())
            .flatten()
    }
}

/// 六種策略的總和型別，於建立 DomainRegistry 時選定
pub enum StrategyKind {
    RuleMerge(RuleMergeStrategy),
    SectionMerge(SectionMergeStrategy),
    TieredMerge(TieredMergeStrategy),
    HashDedupe(HashDedupeStrategy),
    MoveAll(MoveAllStrategy),
    Overwrite(OverwriteStrategy),
}

impl StrategyKind {
    pub fn for_domain(domain: Domain, tables: Arc<DomainTables>) -> Self {
        match domain {
            Domain::Settings => StrategyKind::RuleMerge(RuleMergeStrategy::new(tables)),
            Domain::Doc => StrategyKind::SectionMerge(SectionMergeStrategy::new(tables)),
            Domain::Memories => StrategyKind::TieredMerge(TieredMergeStrategy::new(tables)),
            Domain::Examples => StrategyKind::HashDedupe(HashDedupeStrategy::new(tables)),
            Domain::Prps => StrategyKind::MoveAll(MoveAllStrategy::new()),
            Domain::Commands => StrategyKind::Overwrite(OverwriteStrategy::new()),
        }
    }

    pub fn as_strategy(&self) -> &dyn BlendStrategy {
        match self {
            StrategyKind::RuleMerge(s) => s,
            StrategyKind::SectionMerge(s) => s,
            StrategyKind::TieredMerge(s) => s,
            StrategyKind::HashDedupe(s) => s,
            StrategyKind::MoveAll(s) => s,
            StrategyKind::Overwrite(s) => s,
        }
    }
}

/// 統一樹中已存在者優先，其次才是舊版位置
pub(crate) fn prefer_standard<'c>(items: &[&'c CandidateFile]) -> Option<&'c CandidateFile> {
    items
        .iter()
        .find(|c| c.standard)
        .or_else(|| items.first())
        .copied()
}

/// `target` 是否已包含 `framework` 的每一行非空內容
pub(crate) fn incorporates(target: &str, framework: &str) -> bool {
    let lines: std::collections::HashSet<&str> = target.lines().map(str::trim).collect();
    framework
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .all(|l| lines.contains(l))
}

/// 統一樹的內容是否保有舊版檔案的每一行本文（忽略 front matter 與來源註記）
pub(crate) fn carries(unified: &str, legacy: &str) -> bool {
    let (_, unified_body) = split_front_matter(unified);
    let (_, legacy_body) = split_front_matter(legacy);
    incorporates(unified_body, legacy_body)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for strategy tests: a temp target tree with a live
    //! transaction and in-process services.

    use super::*;
    use crate::adapters::LocalStorage;
    use crate::core::backup::BackupManager;
    use crate::domain::ports::PreferFramework;
    use tempfile::TempDir;

    pub struct Fixture {
        pub framework: TempDir,
        pub target: TempDir,
        pub layout: TreeLayout,
        pub storage: LocalStorage,
        pub manager: BackupManager,
    }

    impl Fixture {
        pub fn new(dry_run: bool) -> Self {
            let framework = TempDir::new().unwrap();
            let target = TempDir::new().unwrap();
            let layout = TreeLayout::new(target.path());
            let manager = BackupManager::new(
                Arc::new(LocalStorage::new()),
                target.path(),
                "test-run",
                dry_run,
            );
            Self {
                framework,
                target,
                layout,
                storage: LocalStorage::new(),
                manager,
            }
        }

        pub fn context<'a>(
            &'a self,
            services: &'a MeteredServices,
            transaction: &'a Transaction<'a>,
        ) -> BlendContext<'a> {
            BlendContext {
                layout: &self.layout,
                framework_root: self.framework.path(),
                services,
                storage: &self.storage,
                resolver: &PreferFramework,
                transaction,
            }
        }

        pub fn write_target(&self, rel: &str, content: &str) {
            let path = self.target.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        pub fn read_target(&self, rel: &str) -> Option<String> {
            std::fs::read_to_string(self.target.path().join(rel)).ok()
        }
    }

    pub fn candidate(
        domain: Domain,
        path: impl Into<PathBuf>,
        relative: &str,
        content: &str,
        standard: bool,
    ) -> CandidateFile {
        CandidateFile {
            path: path.into(),
            relative: PathBuf::from(relative),
            domain,
            content: content.to_string(),
            standard,
        }
    }
}
