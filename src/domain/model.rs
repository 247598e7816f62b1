use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// 六種內容領域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Prps,
    Examples,
    Doc,
    Settings,
    Commands,
    Memories,
}

impl Domain {
    pub const ALL: [Domain; 6] = [
        Domain::Settings,
        Domain::Doc,
        Domain::Memories,
        Domain::Examples,
        Domain::Prps,
        Domain::Commands,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Prps => "prps",
            Domain::Examples => "examples",
            Domain::Doc => "doc",
            Domain::Settings => "settings",
            Domain::Commands => "commands",
            Domain::Memories => "memories",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prps" | "prp" => Ok(Domain::Prps),
            "examples" => Ok(Domain::Examples),
            "doc" | "claude.md" => Ok(Domain::Doc),
            "settings" => Ok(Domain::Settings),
            "commands" => Ok(Domain::Commands),
            "memories" => Ok(Domain::Memories),
            other => Err(format!(
                "unknown domain '{}', expected one of: prps, examples, doc, settings, commands, memories",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Detect,
    Classify,
    Blend,
    Cleanup,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Detect, Phase::Classify, Phase::Blend, Phase::Cleanup];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Detect => "detect",
            Phase::Classify => "classify",
            Phase::Blend => "blend",
            Phase::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "detect" => Ok(Phase::Detect),
            "classify" => Ok(Phase::Classify),
            "blend" => Ok(Phase::Blend),
            "cleanup" => Ok(Phase::Cleanup),
            other => Err(format!(
                "unknown phase '{}', expected one of: detect, classify, blend, cleanup",
                other
            )),
        }
    }
}

/// 掃描到的候選檔案
#[derive(Debug, Clone)]
pub struct CandidateFile {
    /// 實際路徑（已解析 symlink）
    pub path: PathBuf,
    /// 相對於所屬搜尋位置的路徑；單檔位置則為檔名
    pub relative: PathBuf,
    pub domain: Domain,
    pub content: String,
    /// 是否來自統一樹中的標準位置
    pub standard: bool,
}

impl CandidateFile {
    /// 領域內的識別鍵（相對路徑，使用 `/` 分隔）
    pub fn key(&self) -> String {
        self.relative.to_string_lossy().replace('\\', "/")
    }

    pub fn file_name(&self) -> String {
        self.relative
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.key())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub file: PathBuf,
    pub domain: Domain,
    pub valid: bool,
    pub confidence: f64,
    pub issues: Vec<String>,
    /// 是否使用了生成式分類結果
    pub escalated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cheap_calls: u64,
    pub quality_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl ResourceUsage {
    pub fn add(&mut self, other: &ResourceUsage) {
        self.cheap_calls += other.cheap_calls;
        self.quality_calls += other.quality_calls;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.estimated_cost_usd += other.estimated_cost_usd;
    }

    pub fn total_calls(&self) -> u64 {
        self.cheap_calls + self.quality_calls
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub item: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub item: String,
    pub message: String,
}

/// 單一領域的混合結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlendResult {
    pub domain: Domain,
    pub copied: Vec<String>,
    pub skipped: Vec<SkippedItem>,
    pub merged: Vec<String>,
    pub errors: Vec<ItemError>,
    pub warnings: Vec<String>,
    pub resource_usage: ResourceUsage,
    pub rolled_back: bool,
    /// 內容已被合併進統一樹的舊版檔案（cleanup 視為已搬移）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub absorbed: Vec<PathBuf>,
}

impl BlendResult {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            copied: Vec::new(),
            skipped: Vec::new(),
            merged: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            resource_usage: ResourceUsage::default(),
            rolled_back: false,
            absorbed: Vec::new(),
        }
    }

    pub fn record_copy(&mut self, item: impl Into<String>) {
        self.copied.push(item.into());
    }

    pub fn record_skip(&mut self, item: impl Into<String>, reason: impl Into<String>) {
        let item = item.into();
        let reason = reason.into();
        tracing::debug!("⏭️ {}: skip {} ({})", self.domain, item, reason);
        self.skipped.push(SkippedItem { item, reason });
    }

    pub fn record_merge(&mut self, item: impl Into<String>) {
        self.merged.push(item.into());
    }

    pub fn record_absorbed(&mut self, legacy_path: impl Into<PathBuf>) {
        self.absorbed.push(legacy_path.into());
    }

    pub fn record_error(&mut self, item: impl Into<String>, message: impl Into<String>) {
        let item = item.into();
        let message = message.into();
        tracing::warn!("⚠️ {}: {} failed: {}", self.domain, item, message);
        self.errors.push(ItemError { item, message });
    }

    pub fn record_warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("⚠️ {}: {}", self.domain, message);
        self.warnings.push(message);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_skipped(&self, item: &str) -> bool {
        self.skipped.iter().any(|s| s.item == item)
    }

    pub fn summary_line(&self, dry_run: bool) -> String {
        let (copy_verb, merge_verb) = if dry_run {
            ("would copy", "would merge")
        } else {
            ("copied", "merged")
        };
        format!(
            "{}: {} {}, {} {}, {} skipped, {} error(s)",
            self.domain,
            self.copied.len(),
            copy_verb,
            self.merged.len(),
            merge_verb,
            self.skipped.len(),
            self.errors.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupDecision {
    pub legacy_dir: PathBuf,
    pub verified: bool,
    pub unmigrated_files: Vec<PathBuf>,
    pub removed: bool,
}

impl CleanupDecision {
    /// removed ⇒ verified ∧ unmigrated 為空
    pub fn is_consistent(&self) -> bool {
        !self.removed || (self.verified && self.unmigrated_files.is_empty())
    }
}

/// 交給 ConflictResolver 的衝突描述
#[derive(Debug, Clone)]
pub struct Conflict {
    pub domain: Domain,
    pub item: String,
    pub framework: String,
    pub target: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    KeepFramework,
    KeepTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    PartiallyCompleted,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub phases: BTreeSet<Phase>,
    pub domains: BTreeSet<Domain>,
    pub dry_run: bool,
}

impl RunRequest {
    pub fn all(dry_run: bool) -> Self {
        Self {
            phases: Phase::ALL.into_iter().collect(),
            domains: Domain::ALL.into_iter().collect(),
            dry_run,
        }
    }

    pub fn with_phases(mut self, phases: impl IntoIterator<Item = Phase>) -> Self {
        self.phases = phases.into_iter().collect();
        self
    }

    pub fn with_domains(mut self, domains: impl IntoIterator<Item = Domain>) -> Self {
        self.domains = domains.into_iter().collect();
        self
    }

    pub fn includes(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub dry_run: bool,
    pub status: RunStatus,
    pub phases_run: Vec<Phase>,
    pub detected: BTreeMap<Domain, usize>,
    pub classifications: Vec<ClassificationResult>,
    pub filtered: Vec<PathBuf>,
    pub blend_results: Vec<BlendResult>,
    pub cleanup: Vec<CleanupDecision>,
    pub usage: ResourceUsage,
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn new(run_id: String, dry_run: bool) -> Self {
        Self {
            run_id,
            dry_run,
            status: RunStatus::Completed,
            phases_run: Vec::new(),
            detected: BTreeMap::new(),
            classifications: Vec::new(),
            filtered: Vec::new(),
            blend_results: Vec::new(),
            cleanup: Vec::new(),
            usage: ResourceUsage::default(),
            errors: Vec::new(),
        }
    }

    pub fn blend_result(&self, domain: Domain) -> Option<&BlendResult> {
        self.blend_results.iter().find(|r| r.domain == domain)
    }

    /// 給人看的摘要
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Run {} {:?}{}",
            self.run_id,
            self.status,
            if self.dry_run { " (dry run)" } else { "" }
        )];
        for result in &self.blend_results {
            lines.push(format!("  {}", result.summary_line(self.dry_run)));
        }
        for decision in &self.cleanup {
            let state = match (decision.removed, decision.verified) {
                (true, _) => "removed".to_string(),
                (false, true) if self.dry_run => "would remove".to_string(),
                (false, true) => "verified".to_string(),
                (false, false) => format!("{} unmigrated", decision.unmigrated_files.len()),
            };
            lines.push(format!("  cleanup {}: {}", decision.legacy_dir.display(), state));
        }
        lines.push(format!(
            "  usage: {} cheap call(s), {} quality call(s), ~${:.4}",
            self.usage.cheap_calls, self.usage.quality_calls, self.usage.estimated_cost_usd
        ));
        for error in &self.errors {
            lines.push(format!("  error: {}", error));
        }
        lines.join("\n")
    }
}
