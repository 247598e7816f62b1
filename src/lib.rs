pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{HttpComparisonService, HttpMergeService, HttpServiceConfig, LocalStorage};
pub use config::{BlendConfig, DomainTables};
pub use core::{orchestrator::Orchestrator, services::MeteredServices};
pub use domain::model::{Domain, Phase, RunReport, RunRequest, RunStatus};
pub use domain::ports::{ConflictResolver, PreferFramework};
pub use utils::error::{BlendError, Result};
