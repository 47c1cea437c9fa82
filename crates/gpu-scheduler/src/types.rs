//! Types for the scheduler crate.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use gpu_scheduler_core::DEFAULT_ANNOTATION_KEY;
use k8s_openapi::api::core::v1::{Binding, Node, ObjectReference, Pod};
use kube::api::ObjectMeta;
use serde::Serialize;

/// Scheduler name pods opt into through `spec.schedulerName`.
pub const DEFAULT_SCHEDULER_NAME: &str = "gpu-scheduler";

/// Upper bound the API server accepts for a watch timeout.
const MAX_WATCH_TIMEOUT_SECS: u32 = 290;

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Name pods declare to select this scheduler.
    pub scheduler_name: String,
    /// Annotation carrying the placement mapping.
    pub annotation_key: String,
    /// Server-side timeout for one watch subscription.
    pub watch_timeout_secs: u32,
    /// Fixed wait after a stream fault before resubscribing.
    pub retry_delay: Duration,
    /// Address for the health endpoints.
    pub listen_addr: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_name: DEFAULT_SCHEDULER_NAME.to_string(),
            annotation_key: DEFAULT_ANNOTATION_KEY.to_string(),
            watch_timeout_secs: 60,
            retry_delay: Duration::from_secs(5),
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `SCHEDULER_NAME`: name pods declare in `spec.schedulerName`
    /// - `SCHEDULING_ANNOTATION`: annotation key holding the mapping
    /// - `WATCH_TIMEOUT_SECS`: server-side watch timeout (capped at 290)
    /// - `WATCH_RETRY_DELAY_SECS`: wait after a watch fault
    /// - `LISTEN_ADDR`: address for `/health` and `/ready`
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SCHEDULER_NAME") {
            config.scheduler_name = val;
        }
        if let Ok(val) = std::env::var("SCHEDULING_ANNOTATION") {
            config.annotation_key = val;
        }
        if let Ok(val) = std::env::var("WATCH_TIMEOUT_SECS") {
            if let Ok(n) = val.parse::<u32>() {
                config.watch_timeout_secs = n.clamp(1, MAX_WATCH_TIMEOUT_SECS);
            }
        }
        if let Ok(val) = std::env::var("WATCH_RETRY_DELAY_SECS") {
            if let Ok(n) = val.parse() {
                config.retry_delay = Duration::from_secs(n);
            }
        }
        if let Ok(val) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = val;
        }

        config
    }
}

/// The fields of a pod the scheduler looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodRecord {
    /// Pod name.
    pub name: String,
    /// Pod namespace.
    pub namespace: String,
    /// Pod annotations.
    pub annotations: BTreeMap<String, String>,
    /// Value of `spec.schedulerName`, if set.
    pub scheduler_name: Option<String>,
    /// Value of `spec.nodeName`, if set.
    pub node_name: Option<String>,
}

impl PodRecord {
    /// Create a record with no annotations and no scheduler.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Add an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Set the declared scheduler.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler_name: impl Into<String>) -> Self {
        self.scheduler_name = Some(scheduler_name.into());
        self
    }

    /// Extract a record from a Kubernetes pod.
    ///
    /// Returns `None` for a pod without a name. A missing namespace is read
    /// as `default`; an empty scheduler name is read as unset.
    #[must_use]
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let name = pod.metadata.name.clone()?;
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let spec = pod.spec.as_ref();

        Some(Self {
            name,
            namespace,
            annotations: pod.metadata.annotations.clone().unwrap_or_default(),
            scheduler_name: spec
                .and_then(|s| s.scheduler_name.clone())
                .filter(|s| !s.is_empty()),
            node_name: spec
                .and_then(|s| s.node_name.clone())
                .filter(|s| !s.is_empty()),
        })
    }

    /// Look up an annotation value.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

impl fmt::Display for PodRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A node as seen for one scheduling decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    /// Node name.
    pub name: String,
    /// Whether the node reports `Ready=True`.
    pub ready: bool,
}

impl NodeRecord {
    /// Create a new node record.
    #[must_use]
    pub fn new(name: impl Into<String>, ready: bool) -> Self {
        Self {
            name: name.into(),
            ready,
        }
    }

    /// Extract a record from a Kubernetes node.
    ///
    /// Returns `None` for a node without a name. A node without status, or
    /// without a `Ready` condition, is not ready.
    #[must_use]
    pub fn from_node(node: &Node) -> Option<Self> {
        let name = node.metadata.name.clone()?;
        let ready = node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            });

        Some(Self { name, ready })
    }
}

/// A pod to node assignment, built once a target node is confirmed ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRequest {
    /// Pod name.
    pub pod_name: String,
    /// Pod namespace.
    pub namespace: String,
    /// Target node.
    pub node_name: String,
}

impl BindingRequest {
    /// Create a new binding request.
    #[must_use]
    pub fn new(
        pod_name: impl Into<String>,
        namespace: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Self {
        Self {
            pod_name: pod_name.into(),
            namespace: namespace.into(),
            node_name: node_name.into(),
        }
    }

    /// Build the `v1/Binding` object submitted to the pod's `binding`
    /// subresource.
    #[must_use]
    pub fn to_binding(&self) -> Binding {
        Binding {
            metadata: ObjectMeta {
                name: Some(self.pod_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            target: ObjectReference {
                api_version: Some("v1".to_string()),
                kind: Some("Node".to_string()),
                name: Some(self.node_name.clone()),
                ..Default::default()
            },
        }
    }
}

impl fmt::Display for BindingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} -> {}", self.namespace, self.pod_name, self.node_name)
    }
}

/// How a successful bind came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindStatus {
    /// This call created the binding.
    Bound,
    /// The pod was already bound to the requested node.
    AlreadyBound,
}

/// Where a pod was placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Ordinal resolved from the pod name.
    pub pod_index: u32,
    /// Node the pod was bound to.
    pub node_name: String,
    /// Devices the mapping assigns to the pod. Informational only: binding
    /// cannot change the pod's environment.
    pub devices: Vec<u32>,
    /// Whether the binding was new.
    pub status: BindStatus,
}

/// Why a decision was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    /// The annotation produced no entries.
    MappingEmpty,
    /// No ordinal could be read from the pod name.
    IndexUnresolved,
    /// The mapping has no entry for the pod's ordinal.
    MappingMiss {
        /// The resolved ordinal.
        pod_index: u32,
    },
    /// The target node is missing, not ready, or could not be checked.
    NodeUnavailable {
        /// The target node.
        node_name: String,
    },
    /// The binding was rejected or could not be submitted.
    BindFailed {
        /// The target node.
        node_name: String,
        /// The error reported by the binder.
        reason: String,
    },
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MappingEmpty => write!(f, "mapping is empty"),
            Self::IndexUnresolved => write!(f, "pod index could not be resolved"),
            Self::MappingMiss { pod_index } => write!(f, "no mapping entry for index {pod_index}"),
            Self::NodeUnavailable { node_name } => write!(f, "node {node_name} is unavailable"),
            Self::BindFailed { node_name, reason } => {
                write!(f, "binding to {node_name} failed: {reason}")
            }
        }
    }
}

/// The result of one scheduling decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The pod does not carry the annotation; not ours to place.
    Skipped,
    /// The pod was bound.
    Scheduled(Placement),
    /// The pod was left unscheduled.
    Abandoned(AbandonReason),
}

impl Outcome {
    /// Whether the pod ended up bound.
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled(_))
    }

    /// The abandon reason, if any.
    #[must_use]
    pub const fn abandon_reason(&self) -> Option<&AbandonReason> {
        match self {
            Self::Abandoned(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Connection state of the watch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    /// No subscription has been opened yet.
    #[default]
    Disconnected,
    /// A subscription is open and events are being consumed.
    Streaming,
    /// The last subscription ended; a new one is being opened.
    Reconnecting,
    /// Waiting out the fixed delay after a fault.
    Backoff,
    /// The loop was cancelled.
    Stopped,
}

impl WatchState {
    /// Whether events are currently being consumed.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }
}
