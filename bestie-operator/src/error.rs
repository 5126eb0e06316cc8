//! Error types for the Bestie operator.

use thiserror::Error;

/// Errors that can occur during operator operations.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Resource not found.
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
        /// Resource namespace.
        namespace: String,
    },

    /// Optimistic concurrency conflict on update.
    #[error("Conflict updating {kind}/{name}: resource version is stale")]
    Conflict {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconciliation error.
    #[error("Reconciliation failed for {kind}/{name}: {cause}")]
    ReconcileError {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
        /// Error cause.
        cause: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// API error reported by a resource client that is not a kube error.
    #[error("API error: {0}")]
    ApiError(String),
}

impl OperatorError {
    /// Whether this error is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        match self {
            OperatorError::Conflict { .. } => true,
            OperatorError::KubeError(kube::Error::Api(err)) => err.code == 409,
            _ => false,
        }
    }
}

/// Result type for operator operations.
pub type OperatorResult<T> = Result<T, OperatorError>;

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}
