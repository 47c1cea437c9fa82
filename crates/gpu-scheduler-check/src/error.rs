//! Error types for the status sidecar.

use thiserror::Error;

/// Errors that can occur while gathering or reporting status.
#[derive(Error, Debug)]
pub enum CheckError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// The pod's own name is not known.
    #[error("POD_NAME not available")]
    MissingPodName,

    /// The pod's own object no longer exists.
    #[error("Pod not found: {0}")]
    PodNotFound(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A status record could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A specialized Result type for sidecar operations.
pub type Result<T> = std::result::Result<T, CheckError>;
