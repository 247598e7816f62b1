pub mod backup;
pub mod classifier;
pub mod cleanup;
pub mod markdown;
pub mod orchestrator;
pub mod registry;
pub mod scanner;
pub mod services;
pub mod strategies;

pub use crate::domain::model::{BlendResult, CandidateFile, RunReport, RunRequest, RunStatus};
pub use crate::domain::ports::{ConflictResolver, Storage};
pub use crate::utils::error::Result;
