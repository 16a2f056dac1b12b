//! Worker host contract between the page and the worker side.
//!
//! The page only ever asks the host to register a script path. Whatever the
//! host does to install and activate the worker stays behind this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by a worker host during registration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Worker host unavailable: {0}")]
    Unsupported(String),

    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Activation failed: {0}")]
    ActivationFailed(String),
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationInfo {
    /// Registration scope.
    pub scope: String,
    /// Registered script path.
    pub script: String,
    /// Bucket owned by the now-active worker.
    pub cache_name: String,
}

/// Platform worker host.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Register the worker script at `script_path`.
    async fn register(&self, script_path: &str) -> Result<RegistrationInfo, HostError>;
}
