use crate::domain::model::Domain;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlendError {
    #[error("Detection failed at {path}: {reason}")]
    DetectionError { path: PathBuf, reason: String },

    #[error("Symlink cycle detected at {path}")]
    SymlinkCycleError { path: PathBuf },

    #[error("Cannot classify {path}: {message}")]
    ClassificationError { path: PathBuf, message: String },

    #[error("Malformed {domain} content: {message}")]
    StrategyError { domain: Domain, message: String },

    #[error("Validation failed for {domain}: {}", issues.join("; "))]
    ValidationError { domain: Domain, issues: Vec<String> },

    #[error("{service} service call failed: {message}")]
    ComparisonServiceError { service: String, message: String },

    #[error(
        "Legacy directory {} still has {} unmigrated file(s): {}",
        legacy_dir.display(),
        unmigrated.len(),
        unmigrated.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
    )]
    CleanupVerificationError {
        legacy_dir: PathBuf,
        unmigrated: Vec<PathBuf>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

pub type Result<T> = std::result::Result<T, BlendError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Detection,
    Classification,
    Blend,
    Service,
    Cleanup,
    Io,
    Configuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl BlendError {
    pub fn strategy(domain: Domain, message: impl Into<String>) -> Self {
        BlendError::StrategyError {
            domain,
            message: message.into(),
        }
    }

    pub fn validation(domain: Domain, issues: Vec<String>) -> Self {
        BlendError::ValidationError { domain, issues }
    }

    pub fn service(service: &str, message: impl Into<String>) -> Self {
        BlendError::ComparisonServiceError {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            BlendError::DetectionError { .. } | BlendError::SymlinkCycleError { .. } => {
                ErrorCategory::Detection
            }
            BlendError::ClassificationError { .. } => ErrorCategory::Classification,
            BlendError::StrategyError { .. } | BlendError::ValidationError { .. } => {
                ErrorCategory::Blend
            }
            BlendError::ComparisonServiceError { .. } | BlendError::HttpError(_) => {
                ErrorCategory::Service
            }
            BlendError::CleanupVerificationError { .. } => ErrorCategory::Cleanup,
            BlendError::IoError(_) | BlendError::SerializationError(_) => ErrorCategory::Io,
            BlendError::ConfigError { .. }
            | BlendError::InvalidConfigValueError { .. }
            | BlendError::MissingConfigError { .. } => ErrorCategory::Configuration,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Classification | ErrorCategory::Service => ErrorSeverity::Low,
            ErrorCategory::Blend | ErrorCategory::Io => ErrorSeverity::Medium,
            ErrorCategory::Cleanup => ErrorSeverity::High,
            ErrorCategory::Detection | ErrorCategory::Configuration => ErrorSeverity::Critical,
        }
    }

    /// 只有偵測階段的錯誤會中止整個執行
    pub fn is_fatal_for_run(&self) -> bool {
        self.category() == ErrorCategory::Detection
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Detection => {
                "Check that the target tree is readable and remove symlink loops under the legacy directories"
            }
            ErrorCategory::Classification => {
                "Inspect the listed file; it was left in place and excluded from blending"
            }
            ErrorCategory::Blend => {
                "Fix the malformed file in the framework or target tree and re-run the affected domain"
            }
            ErrorCategory::Service => {
                "Check the comparison/merge service endpoints and API key, then re-run"
            }
            ErrorCategory::Cleanup => {
                "Migrate or remove the listed files manually, then re-run the cleanup phase"
            }
            ErrorCategory::Io => "Check file permissions and available disk space",
            ErrorCategory::Configuration => "Review the configuration file and command line flags",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            BlendError::CleanupVerificationError {
                legacy_dir,
                unmigrated,
            } => {
                let mut lines = vec![format!(
                    "Refusing to delete {}; these files have no counterpart in the unified tree:",
                    legacy_dir.display()
                )];
                lines.extend(unmigrated.iter().map(|p| format!("  - {}", p.display())));
                lines.join("\n")
            }
            BlendError::ValidationError { domain, issues } => {
                let mut lines = vec![format!("Blended {} content is invalid:", domain)];
                lines.extend(issues.iter().map(|i| format!("  - {}", i)));
                lines.join("\n")
            }
            other => other.to_string(),
        }
    }
}
