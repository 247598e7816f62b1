use crate::domain::layout::{LegacyLocation, LOCATIONS};
use crate::domain::model::{CandidateFile, Domain};
use crate::utils::error::{BlendError, Result};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 名稱含這些字樣（不分大小寫）的檔案不是內容檔
pub const DENYLIST: &[&str] = &[
    "report", "summary", "analysis", "plan", "initial", "backup", "tmp", "log",
];

pub const CONTENT_EXTENSIONS: &[&str] = &[
    "md", "markdown", "txt", "json", "yaml", "yml", "toml", "py", "rs", "ts", "js", "sh",
];

const MAX_LINK_HOPS: usize = 40;

/// 走訪舊版與標準位置，收集各領域的候選檔案；唯讀
#[derive(Debug, Clone)]
pub struct Scanner {
    locations: Vec<LegacyLocation>,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    pub fn new() -> Self {
        Self {
            locations: LOCATIONS.to_vec(),
        }
    }

    pub fn with_locations(locations: Vec<LegacyLocation>) -> Self {
        Self { locations }
    }

    /// 掃描目標樹（舊版 + 標準位置，套用黑名單）
    pub fn scan(&self, target_root: &Path) -> Result<BTreeMap<Domain, Vec<CandidateFile>>> {
        self.scan_with(target_root, |_| true, true)
    }

    /// 掃描框架樹：只看標準位置，不套用黑名單
    pub fn scan_framework(&self, framework_root: &Path) -> Result<BTreeMap<Domain, Vec<CandidateFile>>> {
        self.scan_with(framework_root, |l| !l.is_legacy(), false)
    }

    fn scan_with(
        &self,
        root: &Path,
        include: impl Fn(&LegacyLocation) -> bool,
        apply_denylist: bool,
    ) -> Result<BTreeMap<Domain, Vec<CandidateFile>>> {
        let mut found: BTreeMap<Domain, Vec<CandidateFile>> =
            Domain::ALL.into_iter().map(|d| (d, Vec::new())).collect();
        let mut seen = HashSet::new();

        for location in self.locations.iter().filter(|l| include(l)) {
            let candidates = self.scan_location(root, location, apply_denylist, &mut seen)?;
            if !candidates.is_empty() {
                tracing::debug!(
                    "🔎 {}: {} candidate(s) in {}",
                    location.domain,
                    candidates.len(),
                    location.search_path
                );
            }
            found.entry(location.domain).or_default().extend(candidates);
        }

        Ok(found)
    }

    fn scan_location(
        &self,
        root: &Path,
        location: &LegacyLocation,
        apply_denylist: bool,
        seen: &mut HashSet<PathBuf>,
    ) -> Result<Vec<CandidateFile>> {
        let path = root.join(location.search_path);
        if fs::symlink_metadata(&path).is_err() {
            return Ok(Vec::new());
        }

        let resolved = resolve_symlinks(&path)?;
        let standard = !location.is_legacy();
        let mut candidates = Vec::new();

        if resolved.is_file() {
            let relative = PathBuf::from(path.file_name().unwrap_or(path.as_os_str()));
            if let Some(candidate) =
                self.read_candidate(&resolved, relative, location.domain, standard, apply_denylist, seen)?
            {
                candidates.push(candidate);
            }
            return Ok(candidates);
        }

        for entry in WalkDir::new(&resolved).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| match e.loop_ancestor() {
                Some(_) => BlendError::SymlinkCycleError {
                    path: e.path().map(Path::to_path_buf).unwrap_or_else(|| resolved.clone()),
                },
                None => BlendError::DetectionError {
                    path: e.path().map(Path::to_path_buf).unwrap_or_else(|| resolved.clone()),
                    reason: e.to_string(),
                },
            })?;

            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&resolved)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| PathBuf::from(entry.file_name()));

            if let Some(candidate) = self.read_candidate(
                entry.path(),
                relative,
                location.domain,
                standard,
                apply_denylist,
                seen,
            )? {
                candidates.push(candidate);
            }
        }

        Ok(candidates)
    }

    fn read_candidate(
        &self,
        path: &Path,
        relative: PathBuf,
        domain: Domain,
        standard: bool,
        apply_denylist: bool,
        seen: &mut HashSet<PathBuf>,
    ) -> Result<Option<CandidateFile>> {
        if !is_content_file(&relative) {
            tracing::trace!("skip non-content file {}", path.display());
            return Ok(None);
        }
        if apply_denylist && is_denylisted(&relative) {
            tracing::debug!("🚫 {}: denylisted {}", domain, relative.display());
            return Ok(None);
        }

        let canonical = fs::canonicalize(path).map_err(|e| BlendError::DetectionError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !seen.insert(canonical.clone()) {
            return Ok(None);
        }

        let bytes = fs::read(&canonical).map_err(|e| BlendError::DetectionError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let Ok(content) = String::from_utf8(bytes) else {
            tracing::debug!("skip non-text file {}", path.display());
            return Ok(None);
        };

        Ok(Some(CandidateFile {
            path: canonical,
            relative,
            domain,
            content,
            standard,
        }))
    }
}

/// 解析 symlink 鏈；循環時回傳 SymlinkCycleError
pub fn resolve_symlinks(path: &Path) -> Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(resolved) => Ok(resolved),
        Err(e) => {
            let mut visited = HashSet::new();
            let mut current = path.to_path_buf();
            for _ in 0..MAX_LINK_HOPS {
                if !visited.insert(current.clone()) {
                    return Err(BlendError::SymlinkCycleError {
                        path: path.to_path_buf(),
                    });
                }
                match fs::read_link(&current) {
                    Ok(next) => {
                        current = match current.parent() {
                            Some(parent) if next.is_relative() => parent.join(next),
                            _ => next,
                        };
                    }
                    Err(_) => break,
                }
            }
            if visited.len() >= MAX_LINK_HOPS {
                return Err(BlendError::SymlinkCycleError {
                    path: path.to_path_buf(),
                });
            }
            Err(BlendError::DetectionError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    }
}

fn is_content_file(relative: &Path) -> bool {
    let hidden = relative
        .file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    if hidden {
        return false;
    }
    relative
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| CONTENT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn is_denylisted(relative: &Path) -> bool {
    let name = relative.to_string_lossy().to_lowercase();
    DENYLIST.iter().any(|word| name.contains(word))
}
