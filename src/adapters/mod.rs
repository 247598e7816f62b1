// Adapters layer: concrete implementations for external systems (filesystem, http services).

pub mod http;
pub mod storage;

pub use http::{HttpComparisonService, HttpMergeService, HttpServiceConfig, UnavailableService};
pub use storage::LocalStorage;
