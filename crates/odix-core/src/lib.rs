//! odix-core: Shared types, errors, and configuration for the odix index.

pub mod config;
pub mod error;
pub mod types;

pub use config::{IndexingConfig, OdixConfig, StorageConfig};
pub use error::*;
pub use types::*;
