use crate::domain::model::{Conflict, Domain, Resolution, TokenUsage};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 檔案系統抽象
pub trait Storage: Send + Sync {
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
    /// 寫入檔案，必要時建立上層目錄
    fn write(&self, path: &Path, data: &[u8]) -> Result<()>;
    fn copy(&self, from: &Path, to: &Path) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn remove_dir_all(&self, path: &Path) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    /// 遞迴列出目錄下所有檔案
    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} is not UTF-8: {}", path.display(), e),
            )
            .into()
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityReply {
    /// 0.0 ~ 1.0
    pub score: f64,
    #[serde(default)]
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionReply {
    pub contradicts: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifyRequest<'a> {
    pub domain: Domain,
    pub rules: &'a str,
    pub excerpt: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyReply {
    pub valid: bool,
    pub confidence: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeRequest<'a> {
    pub framework: &'a str,
    pub target: &'a str,
    pub instructions: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReply {
    pub merged: String,
    #[serde(default)]
    pub usage: TokenUsage,
}

/// 便宜、快速的比對與分類服務
#[async_trait]
pub trait ComparisonService: Send + Sync {
    async fn similarity(&self, left: &str, right: &str) -> Result<SimilarityReply>;
    async fn contradiction(
        &self,
        left: &str,
        right: &str,
        rules: Option<&str>,
    ) -> Result<ContradictionReply>;
    async fn classify(&self, request: ClassifyRequest<'_>) -> Result<ClassifyReply>;
}

/// 高品質合併服務
#[async_trait]
pub trait MergeService: Send + Sync {
    async fn merge(&self, request: MergeRequest<'_>) -> Result<MergeReply>;
}

/// 衝突時的決策點；互動式實作可在外層替換
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, conflict: &Conflict) -> Resolution;
}

/// 預設：框架版本優先
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferFramework;

impl ConflictResolver for PreferFramework {
    fn resolve(&self, conflict: &Conflict) -> Resolution {
        tracing::debug!(
            "🤝 {}: resolving conflict on {} in favour of framework ({})",
            conflict.domain,
            conflict.item,
            conflict.reason
        );
        Resolution::KeepFramework
    }
}
