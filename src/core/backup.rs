use crate::domain::model::{BackupRecord, Domain};
use crate::domain::ports::Storage;
use crate::utils::error::Result;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// 備份根目錄（相對於目標樹）
pub const BACKUP_DIR: &str = ".ce/.blend-backups";

/// 每個可變操作都先備份；成功刪備份，失敗還原
pub struct BackupManager {
    storage: Arc<dyn Storage>,
    target_root: PathBuf,
    backup_root: PathBuf,
    dry_run: bool,
    counter: AtomicUsize,
}

impl BackupManager {
    pub fn new(storage: Arc<dyn Storage>, target_root: &Path, run_id: &str, dry_run: bool) -> Self {
        Self {
            storage,
            target_root: target_root.to_path_buf(),
            backup_root: target_root.join(BACKUP_DIR).join(run_id),
            dry_run,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// 單一操作版本：`op` 失敗時 `path` 逐位元組還原
    pub fn with_backup<T>(&self, path: &Path, op: impl FnOnce() -> Result<T>) -> Result<T> {
        if self.dry_run {
            return op();
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let backup_path = self.backup_root.join("single").join(format!(
            "{:04}-{}",
            n,
            path.file_name().map(|f| f.to_string_lossy()).unwrap_or_default()
        ));
        let record = self.snapshot(path, backup_path)?;

        match op() {
            Ok(value) => {
                if let Some(record) = record {
                    self.storage.remove_file(&record.backup_path)?;
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(restore_err) = self.restore(path, record.as_ref()) {
                    tracing::error!(
                        "❌ Failed to restore {} after error: {}",
                        path.display(),
                        restore_err
                    );
                }
                if let Some(record) = record {
                    if let Err(remove_err) = self.storage.remove_file(&record.backup_path) {
                        tracing::warn!(
                            "⚠️ Failed to remove backup {}: {}",
                            record.backup_path.display(),
                            remove_err
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// 開始一個領域的交易
    pub fn begin(&self, domain: Domain) -> Transaction<'_> {
        Transaction {
            manager: self,
            domain,
            state: Mutex::new(TxState::default()),
        }
    }

    /// 移除空的備份目錄
    pub fn finish(&self) -> Result<()> {
        for dir in [self.backup_root.clone(), self.target_root.join(BACKUP_DIR)] {
            if self.storage.exists(&dir) && self.storage.list_files(&dir)?.is_empty() {
                self.storage.remove_dir_all(&dir)?;
            }
        }
        Ok(())
    }

    fn snapshot(&self, path: &Path, backup_path: PathBuf) -> Result<Option<BackupRecord>> {
        if !self.storage.exists(path) {
            return Ok(None);
        }
        self.storage.copy(path, &backup_path)?;
        tracing::trace!("backed up {} to {}", path.display(), backup_path.display());
        Ok(Some(BackupRecord {
            original_path: path.to_path_buf(),
            backup_path,
            created_at: Utc::now(),
        }))
    }

    fn restore(&self, path: &Path, record: Option<&BackupRecord>) -> Result<()> {
        match record {
            Some(record) => self.storage.copy(&record.backup_path, path),
            None if self.storage.exists(path) => self.storage.remove_file(path),
            None => Ok(()),
        }
    }

    fn backup_path_for(&self, domain: Domain, path: &Path) -> PathBuf {
        let relative = path
            .strip_prefix(&self.target_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                PathBuf::from(format!(
                    "{:04}-{}",
                    n,
                    path.file_name().map(|f| f.to_string_lossy()).unwrap_or_default()
                ))
            });
        self.backup_root.join(domain.as_str()).join(relative)
    }
}

#[derive(Default)]
struct TxState {
    backups: Vec<BackupRecord>,
    created: Vec<PathBuf>,
    touched: HashSet<PathBuf>,
    /// dry-run 時記下預定寫入的內容
    planned: BTreeMap<PathBuf, Vec<u8>>,
    finished: bool,
}

/// 一個領域的寫入交易；未 commit 就被丟棄時自動 rollback
pub struct Transaction<'a> {
    manager: &'a BackupManager,
    domain: Domain,
    state: Mutex<TxState>,
}

impl<'a> Transaction<'a> {
    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn is_dry_run(&self) -> bool {
        self.manager.dry_run
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 寫入檔案；第一次碰到的既有檔案先備份
    pub fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let mut state = self.state();
        if self.manager.dry_run {
            tracing::debug!("📝 {}: would write {}", self.domain, path.display());
            state.planned.insert(path.to_path_buf(), data.to_vec());
            return Ok(());
        }

        let storage = &self.manager.storage;
        if state.touched.insert(path.to_path_buf()) {
            let backup_path = self.manager.backup_path_for(self.domain, path);
            match self.manager.snapshot(path, backup_path)? {
                Some(record) => state.backups.push(record),
                None => state.created.push(path.to_path_buf()),
            }
        }

        if let Err(e) = storage.write(path, data) {
            let record = state.backups.iter().find(|r| r.original_path == path);
            if let Err(restore_err) = self.manager.restore(path, record) {
                tracing::error!(
                    "❌ Failed to restore {} after write error: {}",
                    path.display(),
                    restore_err
                );
            }
            return Err(e);
        }
        tracing::debug!("📝 {}: wrote {}", self.domain, path.display());
        Ok(())
    }

    /// dry-run 中尚未落地的內容
    pub fn pending(&self, path: &Path) -> Option<Vec<u8>> {
        self.state().planned.get(path).cloned()
    }

    /// dry-run 中預定寫入的路徑與內容
    pub fn planned_contents(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        self.state().planned.clone()
    }

    pub fn backups(&self) -> Vec<BackupRecord> {
        self.state().backups.clone()
    }

    pub fn created_files(&self) -> Vec<PathBuf> {
        self.state().created.clone()
    }

    /// 成功：刪除所有備份
    pub fn commit(self) -> Result<()> {
        let mut state = self.state();
        state.finished = true;
        for record in &state.backups {
            self.manager.storage.remove_file(&record.backup_path)?;
        }
        Ok(())
    }

    /// 失敗：還原所有原始檔案並移除新建的檔案
    pub fn rollback(self) -> Result<()> {
        self.rollback_inner()
    }

    fn rollback_inner(&self) -> Result<()> {
        let mut state = self.state();
        if state.finished {
            return Ok(());
        }
        state.finished = true;
        if self.manager.dry_run {
            state.planned.clear();
            return Ok(());
        }

        let storage = &self.manager.storage;
        let mut first_error = None;
        for record in state.backups.iter().rev() {
            let restored = storage
                .copy(&record.backup_path, &record.original_path)
                .and_then(|_| storage.remove_file(&record.backup_path));
            if let Err(e) = restored {
                tracing::error!("❌ {}: restore {} failed: {}", self.domain, record.original_path.display(), e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        for path in state.created.iter().rev() {
            if storage.exists(path) {
                if let Err(e) = storage.remove_file(path) {
                    tracing::error!("❌ {}: remove {} failed: {}", self.domain, path.display(), e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        tracing::info!(
            "↩️ {}: rolled back ({} restored, {} removed)",
            self.domain,
            state.backups.len(),
            state.created.len()
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.rollback_inner() {
            tracing::error!("❌ {}: rollback on drop failed: {}", self.domain, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::LocalStorage;
    use crate::utils::error::BlendError;
    use std::fs;
    use tempfile::TempDir;

    fn manager(root: &Path, dry_run: bool) -> BackupManager {
        BackupManager::new(Arc::new(LocalStorage::new()), root, "run-1", dry_run)
    }

    #[test]
    fn test_with_backup_restores_on_failure() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        fs::write(&path, b"{\"original\": true}\n").unwrap();
        let manager = manager(temp.path(), false);

        let result: Result<()> = manager.with_backup(&path, || {
            fs::write(&path, b"{\"half")?;
            Err(BlendError::strategy(Domain::Settings, "boom"))
        });

        assert!(result.is_err());
        assert_eq!(fs::read(&path).unwrap(), b"{\"original\": true}\n");
        manager.finish().unwrap();
        assert!(!temp.path().join(BACKUP_DIR).exists());
    }

    /// 備份檔刪不掉的儲存層
    struct StickyBackups {
        inner: LocalStorage,
        backups: PathBuf,
    }

    impl Storage for StickyBackups {
        fn read(&self, path: &Path) -> Result<Vec<u8>> {
            self.inner.read(path)
        }
        fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
            self.inner.write(path, data)
        }
        fn copy(&self, from: &Path, to: &Path) -> Result<()> {
            self.inner.copy(from, to)
        }
        fn remove_file(&self, path: &Path) -> Result<()> {
            if path.starts_with(&self.backups) {
                return Err(BlendError::ConfigError {
                    message: "backup directory is read-only".to_string(),
                });
            }
            self.inner.remove_file(path)
        }
        fn remove_dir_all(&self, path: &Path) -> Result<()> {
            self.inner.remove_dir_all(path)
        }
        fn exists(&self, path: &Path) -> bool {
            self.inner.exists(path)
        }
        fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
            self.inner.list_files(dir)
        }
    }

    #[test]
    fn test_failed_op_error_wins_when_backup_cannot_be_removed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("CLAUDE.md");
        fs::write(&path, b"original\n").unwrap();
        let storage = StickyBackups {
            inner: LocalStorage::new(),
            backups: temp.path().join(BACKUP_DIR),
        };
        let manager = BackupManager::new(Arc::new(storage), temp.path(), "run-1", false);

        let result: Result<()> = manager.with_backup(&path, || {
            fs::write(&path, b"half")?;
            Err(BlendError::strategy(Domain::Doc, "boom"))
        });

        assert!(matches!(result, Err(BlendError::StrategyError { .. })));
        assert_eq!(fs::read(&path).unwrap(), b"original\n");
    }

    #[test]
    fn test_with_backup_removes_new_file_on_failure() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("new.md");
        let manager = manager(temp.path(), false);

        let result: Result<()> = manager.with_backup(&path, || {
            fs::write(&path, b"partial")?;
            Err(BlendError::strategy(Domain::Examples, "boom"))
        });

        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_with_backup_keeps_result_on_success() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.md");
        fs::write(&path, b"old").unwrap();
        let manager = manager(temp.path(), false);

        manager
            .with_backup(&path, || {
                fs::write(&path, b"new")?;
                Ok(())
            })
            .unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(LocalStorage::new()
            .list_files(manager.backup_root())
            .map(|f| f.is_empty())
            .unwrap_or(true));
    }

    #[test]
    fn test_transaction_rollback_restores_everything() {
        let temp = TempDir::new().unwrap();
        let existing = temp.path().join(".ce/examples/a.md");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"before").unwrap();
        let created = temp.path().join(".ce/examples/b.md");
        let manager = manager(temp.path(), false);

        let tx = manager.begin(Domain::Examples);
        tx.write(&existing, b"after").unwrap();
        tx.write(&existing, b"after again").unwrap();
        tx.write(&created, b"fresh").unwrap();
        assert_eq!(tx.backups().len(), 1);
        tx.rollback().unwrap();

        assert_eq!(fs::read(&existing).unwrap(), b"before");
        assert!(!created.exists());
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("CLAUDE.md");
        fs::write(&path, b"# Original\n").unwrap();
        let manager = manager(temp.path(), false);

        {
            let tx = manager.begin(Domain::Doc);
            tx.write(&path, b"# Changed\n").unwrap();
        }

        assert_eq!(fs::read(&path).unwrap(), b"# Original\n");
    }

    #[test]
    fn test_commit_keeps_writes_and_drops_backups() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("CLAUDE.md");
        fs::write(&path, b"# Original\n").unwrap();
        let manager = manager(temp.path(), false);

        let tx = manager.begin(Domain::Doc);
        tx.write(&path, b"# Changed\n").unwrap();
        tx.commit().unwrap();
        manager.finish().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"# Changed\n");
        assert!(!temp.path().join(BACKUP_DIR).exists());
    }

    #[test]
    fn test_dry_run_transaction_touches_nothing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".ce/examples/a.md");
        let manager = manager(temp.path(), true);

        let tx = manager.begin(Domain::Examples);
        tx.write(&path, b"content").unwrap();

        assert!(!path.exists());
        assert_eq!(tx.pending(&path), Some(b"content".to_vec()));
        assert_eq!(tx.planned_contents().into_iter().collect::<Vec<_>>(), vec![(path, b"content".to_vec())]);
        tx.commit().unwrap();
        assert!(!temp.path().join(".ce").exists());
    }
}
