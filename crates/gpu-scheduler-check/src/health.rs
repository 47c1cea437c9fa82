//! Liveness marker and self checks.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::UNKNOWN;
use crate::error::Result;

/// Contents written to the liveness marker.
pub const MARKER_CONTENTS: &str = "healthy\n";

/// File whose presence tells the kubelet the sidecar is alive.
#[derive(Debug, Clone)]
pub struct HealthMarker {
    path: PathBuf,
}

impl HealthMarker {
    /// Create a marker at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write (or rewrite) the marker file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn touch(&self) -> Result<()> {
        std::fs::write(&self.path, MARKER_CONTENTS)?;
        debug!(path = %self.path.display(), "Health marker written");
        Ok(())
    }
}

/// Periodic self check.
///
/// An unknown node name is reported but does not fail the check.
#[must_use]
pub fn check(node_name: &str) -> bool {
    if node_name == UNKNOWN {
        warn!("Node name is unknown");
    }
    true
}
