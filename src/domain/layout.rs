//! Where each domain lives, before and after migration.
//!
//! Legacy locations come in two generations: a flat layout at the project
//! root and an older layout nested under `context-engineering/`. The unified
//! tree keeps one standard location per domain. The per-domain path mapping
//! here is shared by the blend strategies (where to write) and the cleanup
//! verifier (where a legacy file is expected to have landed).

use crate::domain::model::Domain;
use crate::utils::hashing::short_hash;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    FlatLegacy,
    NestedLegacy,
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyLocation {
    pub domain: Domain,
    pub search_path: &'static str,
    pub kind: LocationKind,
}

impl LegacyLocation {
    const fn new(domain: Domain, search_path: &'static str, kind: LocationKind) -> Self {
        Self {
            domain,
            search_path,
            kind,
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.kind != LocationKind::Standard
    }
}

pub const NESTED_LEGACY_ROOT: &str = "context-engineering";

pub const LOCATIONS: &[LegacyLocation] = &[
    LegacyLocation::new(Domain::Prps, "PRPs", LocationKind::FlatLegacy),
    LegacyLocation::new(Domain::Prps, "context-engineering/PRPs", LocationKind::NestedLegacy),
    LegacyLocation::new(Domain::Prps, ".ce/PRPs", LocationKind::Standard),
    LegacyLocation::new(Domain::Examples, "examples", LocationKind::FlatLegacy),
    LegacyLocation::new(Domain::Examples, "context-engineering/examples", LocationKind::NestedLegacy),
    LegacyLocation::new(Domain::Examples, ".ce/examples", LocationKind::Standard),
    LegacyLocation::new(Domain::Memories, "memories", LocationKind::FlatLegacy),
    LegacyLocation::new(Domain::Memories, "context-engineering/memories", LocationKind::NestedLegacy),
    LegacyLocation::new(Domain::Memories, ".serena/memories", LocationKind::Standard),
    LegacyLocation::new(Domain::Commands, "commands", LocationKind::FlatLegacy),
    LegacyLocation::new(Domain::Commands, "context-engineering/commands", LocationKind::NestedLegacy),
    LegacyLocation::new(Domain::Commands, ".claude/commands", LocationKind::Standard),
    LegacyLocation::new(Domain::Settings, ".claude/settings.local.json", LocationKind::Standard),
    LegacyLocation::new(Domain::Doc, "context-engineering/CLAUDE.md", LocationKind::NestedLegacy),
    LegacyLocation::new(Domain::Doc, "CLAUDE.md", LocationKind::Standard),
];

pub fn locations_for(domain: Domain) -> impl Iterator<Item = &'static LegacyLocation> {
    LOCATIONS.iter().filter(move |l| l.domain == domain)
}

pub fn standard_location(domain: Domain) -> &'static LegacyLocation {
    LOCATIONS
        .iter()
        .find(|l| l.domain == domain && l.kind == LocationKind::Standard)
        .unwrap_or_else(|| unreachable!("every domain has a standard location"))
}

/// 統一樹中的標準位置永遠不是刪除對象
pub fn is_standard_path(relative: &Path) -> bool {
    LOCATIONS
        .iter()
        .filter(|l| l.kind == LocationKind::Standard)
        .any(|l| Path::new(l.search_path) == relative)
}

/// Cleanup 會考慮的舊目錄（只含目錄型位置）
pub fn legacy_directories() -> impl Iterator<Item = &'static LegacyLocation> {
    LOCATIONS
        .iter()
        .filter(|l| l.is_legacy() && !l.search_path.ends_with(".md"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMapping {
    /// `<standard>/<status>/<file name>`
    StatusSubfolder,
    /// `<standard>/user/<relative>`
    UserSubfolder,
    /// `<standard>/<file name>`
    ByFileName,
    /// `<standard>/<relative>`
    ByRelativePath,
    /// the standard location is itself the file
    SingleFile,
}

impl PathMapping {
    pub fn for_domain(domain: Domain) -> Self {
        match domain {
            Domain::Prps => PathMapping::StatusSubfolder,
            Domain::Examples => PathMapping::UserSubfolder,
            Domain::Memories => PathMapping::ByFileName,
            Domain::Commands => PathMapping::ByRelativePath,
            Domain::Settings | Domain::Doc => PathMapping::SingleFile,
        }
    }
}

pub const USER_SUBFOLDER: &str = "user";

/// 被取代的版本保留在這裡，不隨交易刪除
pub const SUPERSEDED_ROOT: &str = ".ce/backups";

#[derive(Debug, Clone)]
pub struct TreeLayout {
    root: PathBuf,
}

impl TreeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn standard_path(&self, domain: Domain) -> PathBuf {
        self.root.join(standard_location(domain).search_path)
    }

    /// 框架內容的目的地：保留相對路徑，PRP 依狀態分資料夾
    pub fn framework_destination(&self, domain: Domain, relative: &Path, content: &str) -> PathBuf {
        match PathMapping::for_domain(domain) {
            PathMapping::StatusSubfolder => self.status_destination(relative, content),
            PathMapping::SingleFile => self.standard_path(domain),
            _ => self.standard_path(domain).join(relative),
        }
    }

    /// 目標（使用者）內容的主要目的地
    pub fn target_destination(&self, domain: Domain, relative: &Path, content: &str) -> PathBuf {
        let standard = self.standard_path(domain);
        match PathMapping::for_domain(domain) {
            PathMapping::StatusSubfolder => self.status_destination(relative, content),
            PathMapping::UserSubfolder => standard.join(USER_SUBFOLDER).join(relative),
            PathMapping::ByFileName => standard.join(file_name_of(relative)),
            PathMapping::ByRelativePath => standard.join(relative),
            PathMapping::SingleFile => standard,
        }
    }

    /// 驗證時接受的位置：主要目的地、同名衝突時加上內容雜湊的版本，以及被取代版本的保留處
    pub fn accepted_destinations(&self, domain: Domain, relative: &Path, content: &str) -> Vec<PathBuf> {
        let primary = self.target_destination(domain, relative, content);
        let alternate = disambiguated(&primary, content);
        let mut accepted = vec![primary, alternate];
        if let Some(kept) = self.superseded_path(domain, relative) {
            accepted.push(disambiguated(&kept, content));
            accepted.push(kept);
        }
        accepted
    }

    /// 被框架或統一樹版本取代的使用者內容保留在 `.ce/backups/<domain>/`
    pub fn superseded_path(&self, domain: Domain, relative: &Path) -> Option<PathBuf> {
        let kept = self.root.join(SUPERSEDED_ROOT).join(domain.as_str());
        match PathMapping::for_domain(domain) {
            PathMapping::ByFileName => Some(kept.join(file_name_of(relative))),
            PathMapping::ByRelativePath => Some(kept.join(relative)),
            _ => None,
        }
    }

    fn status_destination(&self, relative: &Path, content: &str) -> PathBuf {
        self.standard_path(Domain::Prps)
            .join(prp_status(content))
            .join(file_name_of(relative))
    }
}

fn file_name_of(relative: &Path) -> PathBuf {
    relative
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| relative.to_path_buf())
}

/// `name.md` → `name-<hash8>.md`，雜湊取自來源內容
pub fn disambiguated(path: &Path, content: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let hash = short_hash(content.as_bytes());
    let file_name = match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, hash, ext.to_string_lossy()),
        None => format!("{}-{}", stem, hash),
    };
    path.with_file_name(file_name)
}

fn status_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?im)^[\s>*-]*(?:\*\*)?status(?:\*\*)?\s*:\s*(?:\*\*)?\s*([A-Za-z][A-Za-z_-]*)")
            .unwrap_or_else(|e| unreachable!("static status pattern: {}", e))
    })
}

/// 從 PRP 內容推斷狀態資料夾
pub fn prp_status(content: &str) -> &'static str {
    let status = status_pattern()
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_default();

    match status.as_str() {
        "completed" | "complete" | "executed" | "done" | "implemented" => "executed",
        "archived" | "deprecated" | "superseded" | "obsolete" => "archived",
        _ => "feature-requests",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prp_status_inference() {
        assert_eq!(prp_status("---\nstatus: completed\n---\n# PRP-1"), "executed");
        assert_eq!(prp_status("# PRP-2\n\n**Status**: Archived\n"), "archived");
        assert_eq!(prp_status("# PRP-3\nNo status here"), "feature-requests");
        assert_eq!(prp_status("status: in-progress"), "feature-requests");
    }

    #[test]
    fn test_target_destinations_per_mapping() {
        let layout = TreeLayout::new("/proj");
        assert_eq!(
            layout.target_destination(Domain::Examples, Path::new("api/client.md"), ""),
            PathBuf::from("/proj/.ce/examples/user/api/client.md")
        );
        assert_eq!(
            layout.target_destination(Domain::Memories, Path::new("nested/notes.md"), ""),
            PathBuf::from("/proj/.serena/memories/notes.md")
        );
        assert_eq!(
            layout.target_destination(Domain::Prps, Path::new("PRP-7.md"), "status: done"),
            PathBuf::from("/proj/.ce/PRPs/executed/PRP-7.md")
        );
        assert_eq!(
            layout.target_destination(Domain::Doc, Path::new("CLAUDE.md"), ""),
            PathBuf::from("/proj/CLAUDE.md")
        );
    }

    #[test]
    fn test_accepted_destinations_include_side_copies() {
        let layout = TreeLayout::new("/proj");
        let memories = layout.accepted_destinations(Domain::Memories, Path::new("team.md"), "abc");
        assert_eq!(
            memories,
            vec![
                PathBuf::from("/proj/.serena/memories/team.md"),
                PathBuf::from("/proj/.serena/memories/team-ba7816bf.md"),
                PathBuf::from("/proj/.ce/backups/memories/team-ba7816bf.md"),
                PathBuf::from("/proj/.ce/backups/memories/team.md"),
            ]
        );
        let examples = layout.accepted_destinations(Domain::Examples, Path::new("client.md"), "abc");
        assert_eq!(examples[1], PathBuf::from("/proj/.ce/examples/user/client-ba7816bf.md"));
        assert_eq!(examples.len(), 2);
        assert_eq!(
            layout.superseded_path(Domain::Commands, Path::new("ops/deploy.md")),
            Some(PathBuf::from("/proj/.ce/backups/commands/ops/deploy.md"))
        );
        assert!(layout.superseded_path(Domain::Prps, Path::new("PRP-1.md")).is_none());
    }

    #[test]
    fn test_disambiguated_keeps_extension() {
        let path = disambiguated(Path::new("/x/PRP-1.md"), "abc");
        assert_eq!(path, PathBuf::from("/x/PRP-1-ba7816bf.md"));
    }

    #[test]
    fn test_legacy_directories_exclude_standard_locations() {
        for location in legacy_directories() {
            assert!(!is_standard_path(Path::new(location.search_path)));
        }
        assert!(is_standard_path(Path::new(".ce/PRPs")));
    }
}
