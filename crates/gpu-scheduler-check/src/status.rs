//! Periodic status records.

use std::collections::BTreeMap;
use std::ffi::OsString;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{CheckConfig, PodIdentity};
use crate::devices::DeviceState;
use crate::error::Result;

/// Environment variable prefixes included in status records.
pub const ENV_PREFIXES: [&str; 4] = ["CUDA", "NODE", "POD", "KUBERNETES"];

/// One status report emitted by the sidecar.
#[derive(Debug, Clone, Serialize)]
pub struct StatusRecord {
    /// When the record was taken.
    pub timestamp: DateTime<Utc>,
    /// Node the pod runs on.
    pub node_name: String,
    /// Reported device list, `NOT_SET` when unknown.
    pub cuda_visible_devices: String,
    /// The pod's own identity.
    pub pod_info: PodIdentity,
    /// Container hostname.
    pub hostname: String,
    /// Placement-related environment variables.
    pub environment: BTreeMap<String, String>,
}

impl StatusRecord {
    /// Take a status record now.
    #[must_use]
    pub fn capture(
        config: &CheckConfig,
        devices: &DeviceState,
        vars: impl IntoIterator<Item = (OsString, OsString)>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            node_name: config.node_name.clone(),
            cuda_visible_devices: devices.to_string(),
            pod_info: config.pod.clone(),
            hostname: config.hostname.clone(),
            environment: relevant_env(vars),
        }
    }

    /// Pretty-printed JSON form of the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Keep only variables whose name starts with one of [`ENV_PREFIXES`].
///
/// Takes raw OS strings, as from [`std::env::vars_os`]. Names and values that
/// are not valid UTF-8 are converted lossily.
#[must_use]
pub fn relevant_env(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> BTreeMap<String, String> {
    vars.into_iter()
        .map(|(key, value)| {
            (
                key.to_string_lossy().into_owned(),
                value.to_string_lossy().into_owned(),
            )
        })
        .filter(|(key, _)| ENV_PREFIXES.iter().any(|prefix| key.starts_with(prefix)))
        .collect()
}
