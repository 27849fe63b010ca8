//! Error types for the NodeFit operator

use thiserror::Error;

/// Errors surfaced by the controller.
#[derive(Error, Debug)]
pub enum Error {
    /// Errors from the Kubernetes API (reads, lists, patches)
    #[error("Kubernetes API error: {0}")]
    KubeError(#[source] kube::Error),

    /// Invalid operator configuration (flags, RBAC, missing APIs)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Whether a short requeue is likely to succeed.
    ///
    /// API errors are transient infrastructure failures; configuration
    /// errors will not fix themselves and get a long retry interval.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::KubeError(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
