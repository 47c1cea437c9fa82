//! Resolution of the GPU device list visible to this pod.
//!
//! When `CUDA_VISIBLE_DEVICES` is already set it is reported as-is. Otherwise
//! the pod's own mapping annotation is read back from the API server and the
//! entry for its ordinal supplies the device list. The process environment is
//! never modified; the resolved value only feeds status reports.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use gpu_scheduler_core::{index, Mapping};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CheckConfig;
use crate::error::{CheckError, Result};

/// Environment variable carrying the visible device list.
pub const CUDA_VISIBLE_DEVICES: &str = "CUDA_VISIBLE_DEVICES";

/// Value reported when no device list could be determined.
pub const NOT_SET: &str = "NOT_SET";

/// Where the reported device list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSource {
    /// `CUDA_VISIBLE_DEVICES` was set in the environment.
    Environment,
    /// Resolved from the pod's mapping annotation.
    Annotation,
    /// Nothing could be resolved.
    Unset,
}

/// The device list reported by the sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    devices: Option<String>,
    source: DeviceSource,
}

impl DeviceState {
    /// Devices taken from the environment.
    #[must_use]
    pub fn from_environment(devices: impl Into<String>) -> Self {
        Self {
            devices: Some(devices.into()),
            source: DeviceSource::Environment,
        }
    }

    /// Devices resolved from the mapping annotation.
    #[must_use]
    pub fn from_annotation(devices: impl Into<String>) -> Self {
        Self {
            devices: Some(devices.into()),
            source: DeviceSource::Annotation,
        }
    }

    /// No device list available.
    #[must_use]
    pub fn unset() -> Self {
        Self {
            devices: None,
            source: DeviceSource::Unset,
        }
    }

    /// The resolved device list, if any.
    #[must_use]
    pub fn devices(&self) -> Option<&str> {
        self.devices.as_deref()
    }

    /// Where the device list came from.
    #[must_use]
    pub fn source(&self) -> DeviceSource {
        self.source
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.devices.as_deref().unwrap_or(NOT_SET))
    }
}

/// Read access to the annotations of the sidecar's own pod.
#[async_trait]
pub trait PodAnnotations: Send + Sync {
    /// Fetch the annotations of `namespace/name`.
    async fn annotations(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>>;
}

/// Pod annotation lookup backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubePodAnnotations {
    client: Client,
}

impl KubePodAnnotations {
    /// Create a lookup from a Kubernetes client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodAnnotations for KubePodAnnotations {
    async fn annotations(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods
            .get_opt(name)
            .await?
            .ok_or_else(|| CheckError::PodNotFound(format!("{namespace}/{name}")))?;
        Ok(pod.metadata.annotations.unwrap_or_default())
    }
}

/// Look up the device list for `pod_name` in a raw mapping annotation.
///
/// A pod name without a numeric ordinal is treated as ordinal 0.
#[must_use]
pub fn devices_for_pod(pod_name: &str, annotation: &str) -> Option<String> {
    let mapping = Mapping::parse(annotation);
    if index::resolve(pod_name).is_none() {
        warn!(pod = %pod_name, "Could not extract pod index, using 0");
    }
    let pod_index = index::resolve_or(pod_name, 0);

    match mapping.get(pod_index) {
        Some(entry) => {
            info!(
                pod_index,
                node = %entry.node_name,
                devices = %entry.visible_devices(),
                "Found device assignment"
            );
            Some(entry.visible_devices())
        }
        None => {
            warn!(pod_index, "No mapping found for pod index");
            None
        }
    }
}

/// Determine the device list for this pod.
///
/// `env_devices` is the current `CUDA_VISIBLE_DEVICES` value. Annotation
/// lookups that fail are logged and reported as unset.
pub async fn resolve<P: PodAnnotations + ?Sized>(
    config: &CheckConfig,
    env_devices: Option<String>,
    pods: &P,
) -> DeviceState {
    if let Some(devices) = env_devices.filter(|v| !v.is_empty()) {
        debug!(devices = %devices, "Using CUDA_VISIBLE_DEVICES from environment");
        return DeviceState::from_environment(devices);
    }

    match lookup_annotation(config, pods).await {
        Ok(Some(devices)) => DeviceState::from_annotation(devices),
        Ok(None) => DeviceState::unset(),
        Err(e) => {
            warn!(error = %e, "Failed to resolve devices from pod annotation");
            DeviceState::unset()
        }
    }
}

async fn lookup_annotation<P: PodAnnotations + ?Sized>(
    config: &CheckConfig,
    pods: &P,
) -> Result<Option<String>> {
    if !config.pod.has_name() {
        return Err(CheckError::MissingPodName);
    }

    let annotations = pods
        .annotations(&config.pod.pod_namespace, &config.pod.pod_name)
        .await?;
    let Some(raw) = annotations.get(&config.annotation_key) else {
        info!(annotation = %config.annotation_key, "No mapping annotation on pod");
        return Ok(None);
    };

    Ok(devices_for_pod(&config.pod.pod_name, raw))
}
