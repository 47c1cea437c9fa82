//! Error types for the annotation grammar.
//!
//! Nothing in this crate is fatal to a caller: these errors describe why a
//! single line, or a single device token, was left out of a mapping.

use thiserror::Error;

/// A result type using `LineError`.
pub type Result<T> = std::result::Result<T, LineError>;

/// Reasons a mapping line, or part of one, was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    /// The line has no `=` between the pod index and the placement.
    #[error("missing '=' separator")]
    MissingEquals,

    /// The placement has no `:` between the node name and the device list.
    #[error("missing ':' separator")]
    MissingColon,

    /// The pod index is not a non-negative integer.
    #[error("invalid pod index: {0:?}")]
    InvalidIndex(String),

    /// A device token is not a non-negative integer.
    #[error("invalid device id: {0:?}")]
    InvalidDevice(String),
}
