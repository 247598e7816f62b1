pub mod error;
pub mod hashing;
pub mod logger;
pub mod validation;
