//! Shared foundation for the `ispflow` workspace: configuration, the
//! installation-request record model, text normalization, similarity
//! scoring and the resilient request executor.

pub mod app_config;
pub mod config;
pub mod records;
pub mod retry;
pub mod similarity;
pub mod text;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use records::{InstallationRequest, InstallationStore, MemoryStore, StoreError};
pub use retry::{Classify, RetryDecision, RetryPolicy};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read {path}: {source}")]
    FileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    FileParse { path: String, reason: String },

    #[error("validation error: {0}")]
    Validation(String),
}
