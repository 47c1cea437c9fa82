//! Sidecar configuration, read from the downward API environment.

use std::path::PathBuf;
use std::time::Duration;

use gpu_scheduler_core::DEFAULT_ANNOTATION_KEY;

/// Value reported for identity fields that are not set.
pub const UNKNOWN: &str = "unknown";

/// Environment variables consulted for the node name, in order.
const NODE_NAME_VARS: [&str; 3] = ["NODE_NAME", "KUBERNETES_NODE_NAME", "MY_NODE_NAME"];

/// Identity of the pod the sidecar runs in.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PodIdentity {
    /// Pod name, from `POD_NAME`.
    pub pod_name: String,
    /// Pod namespace, from `POD_NAMESPACE`.
    pub pod_namespace: String,
    /// Pod IP, from `POD_IP`.
    pub pod_ip: String,
    /// Service account, from `SERVICE_ACCOUNT`.
    pub service_account: String,
}

impl PodIdentity {
    /// Whether the pod name was provided.
    #[must_use]
    pub fn has_name(&self) -> bool {
        self.pod_name != UNKNOWN
    }
}

/// Configuration for the status sidecar.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// Node the pod runs on.
    pub node_name: String,
    /// Container hostname.
    pub hostname: String,
    /// The pod's own identity.
    pub pod: PodIdentity,
    /// Annotation carrying the placement mapping.
    pub annotation_key: String,
    /// Time between status reports.
    pub interval: Duration,
    /// Liveness marker file.
    pub health_file: PathBuf,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl CheckConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `NODE_NAME`, `KUBERNETES_NODE_NAME`, `MY_NODE_NAME`: node name, first
    ///   one set wins; falls back to the hostname
    /// - `HOSTNAME`: container hostname
    /// - `POD_NAME`, `POD_NAMESPACE`, `POD_IP`, `SERVICE_ACCOUNT`: pod identity
    /// - `SCHEDULING_ANNOTATION`: annotation key holding the mapping
    /// - `CHECK_INTERVAL_SECS`: seconds between reports (default 10)
    /// - `HEALTH_FILE`: liveness marker path (default `/tmp/healthy`)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let or_unknown = |key: &str| var(key).unwrap_or_else(|| UNKNOWN.to_string());

        let hostname = or_unknown("HOSTNAME");
        let node_name = NODE_NAME_VARS
            .iter()
            .find_map(|key| var(*key))
            .unwrap_or_else(|| hostname.clone());

        let interval = var("CHECK_INTERVAL_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map_or(Duration::from_secs(10), Duration::from_secs);

        Self {
            node_name,
            hostname,
            pod: PodIdentity {
                pod_name: or_unknown("POD_NAME"),
                pod_namespace: var("POD_NAMESPACE").unwrap_or_else(|| "default".to_string()),
                pod_ip: or_unknown("POD_IP"),
                service_account: or_unknown("SERVICE_ACCOUNT"),
            },
            annotation_key: var("SCHEDULING_ANNOTATION")
                .unwrap_or_else(|| DEFAULT_ANNOTATION_KEY.to_string()),
            interval,
            health_file: var("HEALTH_FILE")
                .map_or_else(|| PathBuf::from("/tmp/healthy"), PathBuf::from),
        }
    }
}
