//! Error types for the scheduler crate.
//!
//! Expected scheduling outcomes (no annotation, no mapping entry, node not
//! ready) are not errors; they are reported through [`crate::Outcome`]. These
//! variants cover transport and API failures only.

use thiserror::Error;

/// Errors that can occur while talking to the API server.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// The pod is already bound to a different node.
    #[error("Pod {pod} is bound to {}, not {requested_node}", .existing_node.as_deref().unwrap_or("<none>"))]
    BindConflict {
        /// `namespace/name` of the pod.
        pod: String,
        /// Node the pod is bound to, if it could be read back.
        existing_node: Option<String>,
        /// Node this scheduler asked for.
        requested_node: String,
    },

    /// The watch stream delivered an error event.
    #[error("Watch stream error: {0}")]
    WatchStream(String),

    /// A request body could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SchedulerError {
    /// Check if this error is retriable.
    ///
    /// A conflict is final: the API server has already decided the placement.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::KubeApi(_) | Self::WatchStream(_))
    }

    /// Check if this error means another binding won.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::BindConflict { .. } => true,
            Self::KubeApi(kube::Error::Api(e)) => e.code == 409,
            _ => false,
        }
    }
}

/// A specialized Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_both_nodes() {
        let err = SchedulerError::BindConflict {
            pod: "default/worker-2".to_string(),
            existing_node: Some("nodeA".to_string()),
            requested_node: "nodeC".to_string(),
        };

        assert_eq!(err.to_string(), "Pod default/worker-2 is bound to nodeA, not nodeC");
        assert!(err.is_conflict());
        assert!(!err.is_retriable());
    }

    #[test]
    fn conflict_without_read_back() {
        let err = SchedulerError::BindConflict {
            pod: "default/worker-2".to_string(),
            existing_node: None,
            requested_node: "nodeC".to_string(),
        };

        assert!(err.to_string().contains("<none>"));
    }

    #[test]
    fn watch_errors_are_retriable() {
        let err = SchedulerError::WatchStream("410 Gone".to_string());

        assert!(err.is_retriable());
        assert!(!err.is_conflict());
    }
}
