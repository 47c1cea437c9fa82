//! The per-pod scheduling decision.
//!
//! A decision parses the pod's mapping annotation, resolves the pod's ordinal
//! from its name, checks that the mapped node is ready, and binds. Each step
//! either moves on or ends the decision with an [`Outcome`]; nothing here
//! returns an error or panics.

use gpu_scheduler_core::{index, Mapping};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::binder::Binder;
use crate::cluster::ClusterView;
use crate::types::{AbandonReason, BindingRequest, Outcome, Placement, PodRecord};

/// Composes mapping, index resolution, readiness and binding.
pub struct SchedulingPipeline<C, B> {
    annotation_key: String,
    cluster: C,
    binder: B,
}

impl<C: ClusterView, B: Binder> SchedulingPipeline<C, B> {
    /// Create a pipeline reading the mapping from `annotation_key`.
    #[must_use]
    pub fn new(annotation_key: impl Into<String>, cluster: C, binder: B) -> Self {
        Self {
            annotation_key: annotation_key.into(),
            cluster,
            binder,
        }
    }

    /// The annotation this pipeline reads.
    #[must_use]
    pub fn annotation_key(&self) -> &str {
        &self.annotation_key
    }

    /// Decide where a pod goes and bind it there.
    pub async fn decide(&self, pod: &PodRecord) -> Outcome {
        let span = info_span!("decide", pod = %pod.name, namespace = %pod.namespace);
        self.decide_inner(pod).instrument(span).await
    }

    async fn decide_inner(&self, pod: &PodRecord) -> Outcome {
        let Some(annotation) = pod.annotation(&self.annotation_key) else {
            debug!("Pod has no scheduling annotation, skipping");
            return Outcome::Skipped;
        };

        let mapping = Mapping::parse(annotation);
        if mapping.is_empty() {
            warn!("Pod has an empty or invalid mapping");
            return Outcome::Abandoned(AbandonReason::MappingEmpty);
        }

        let Some(pod_index) = index::resolve(&pod.name) else {
            warn!("Could not determine pod index from name");
            return Outcome::Abandoned(AbandonReason::IndexUnresolved);
        };

        let Some(entry) = mapping.get(pod_index) else {
            warn!(pod_index, entries = mapping.len(), "No mapping entry for pod index");
            return Outcome::Abandoned(AbandonReason::MappingMiss { pod_index });
        };

        if !self.cluster.is_ready(&entry.node_name).await {
            error!(pod_index, node = %entry.node_name, "Target node is missing or not ready");
            return Outcome::Abandoned(AbandonReason::NodeUnavailable {
                node_name: entry.node_name.clone(),
            });
        }

        info!(
            pod_index,
            node = %entry.node_name,
            devices = %entry.visible_devices(),
            "Binding pod to mapped node"
        );

        let request = BindingRequest::new(&pod.name, &pod.namespace, &entry.node_name);
        match self.binder.bind(&request).await {
            Ok(status) => {
                info!(
                    pod_index,
                    node = %entry.node_name,
                    devices = %entry.visible_devices(),
                    status = ?status,
                    "Scheduled pod"
                );
                Outcome::Scheduled(Placement {
                    pod_index,
                    node_name: entry.node_name.clone(),
                    devices: entry.devices.clone(),
                    status,
                })
            }
            Err(e) => {
                error!(node = %entry.node_name, error = %e, "Failed to bind pod");
                Outcome::Abandoned(AbandonReason::BindFailed {
                    node_name: entry.node_name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;
    use crate::types::BindStatus;
    use gpu_scheduler_core::DEFAULT_ANNOTATION_KEY;
    use std::sync::Arc;

    fn pipeline(
        cluster: &Arc<MockCluster>,
    ) -> SchedulingPipeline<Arc<MockCluster>, Arc<MockCluster>> {
        SchedulingPipeline::new(
            DEFAULT_ANNOTATION_KEY,
            Arc::clone(cluster),
            Arc::clone(cluster),
        )
    }

    fn worker(name: &str, mapping: &str) -> PodRecord {
        PodRecord::new(name, "ml").with_annotation(DEFAULT_ANNOTATION_KEY, mapping)
    }

    #[tokio::test]
    async fn binds_to_ready_mapped_node() {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_node("nodeC", true);

        let outcome = pipeline(&cluster).decide(&worker("worker-2", "2=nodeC:4,5")).await;

        assert_eq!(
            outcome,
            Outcome::Scheduled(Placement {
                pod_index: 2,
                node_name: "nodeC".to_string(),
                devices: vec![4, 5],
                status: BindStatus::Bound,
            })
        );
        assert_eq!(
            cluster.binding_requests(),
            vec![BindingRequest::new("worker-2", "ml", "nodeC")]
        );
    }

    #[tokio::test]
    async fn unready_node_is_not_bound() {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_node("nodeC", false);

        let outcome = pipeline(&cluster).decide(&worker("worker-2", "2=nodeC:4,5")).await;

        assert_eq!(
            outcome,
            Outcome::Abandoned(AbandonReason::NodeUnavailable {
                node_name: "nodeC".to_string()
            })
        );
        assert!(cluster.binding_requests().is_empty());
    }

    #[tokio::test]
    async fn missing_node_is_unavailable() {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_node("nodeA", true);

        let outcome = pipeline(&cluster).decide(&worker("worker-0", "0=nodeZ:0")).await;

        assert!(matches!(
            outcome.abandon_reason(),
            Some(AbandonReason::NodeUnavailable { node_name }) if node_name == "nodeZ"
        ));
        assert!(cluster.binding_requests().is_empty());
    }

    #[tokio::test]
    async fn node_list_failure_is_unavailable() {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_node("nodeC", true);
        cluster.fail_node_list(true);

        let outcome = pipeline(&cluster).decide(&worker("worker-2", "2=nodeC:4")).await;

        assert!(matches!(
            outcome.abandon_reason(),
            Some(AbandonReason::NodeUnavailable { .. })
        ));
        assert!(cluster.binding_requests().is_empty());
    }

    #[tokio::test]
    async fn index_without_entry_is_a_miss() {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_node("nodeC", true);

        let outcome = pipeline(&cluster).decide(&worker("worker-2", "5=nodeC:0")).await;

        assert_eq!(
            outcome,
            Outcome::Abandoned(AbandonReason::MappingMiss { pod_index: 2 })
        );
        assert!(cluster.binding_requests().is_empty());
    }

    #[tokio::test]
    async fn missing_annotation_is_skipped() {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_node("nodeC", true);

        let pod = PodRecord::new("worker-2", "ml").with_scheduler("gpu-scheduler");
        let outcome = pipeline(&cluster).decide(&pod).await;

        assert_eq!(outcome, Outcome::Skipped);
        assert!(cluster.binding_requests().is_empty());
    }

    #[tokio::test]
    async fn empty_mapping_is_abandoned() {
        let cluster = Arc::new(MockCluster::new());

        let outcome = pipeline(&cluster).decide(&worker("worker-2", "garbage\n\n")).await;

        assert_eq!(outcome, Outcome::Abandoned(AbandonReason::MappingEmpty));
    }

    #[tokio::test]
    async fn unresolvable_name_is_abandoned() {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_node("nodeC", true);

        let outcome = pipeline(&cluster).decide(&worker("standalone", "0=nodeC:0")).await;

        assert_eq!(outcome, Outcome::Abandoned(AbandonReason::IndexUnresolved));
        assert!(cluster.binding_requests().is_empty());
    }

    #[tokio::test]
    async fn bind_failure_is_abandoned() {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_node("nodeC", true);
        cluster.fail_binds(true);

        let outcome = pipeline(&cluster).decide(&worker("worker-2", "2=nodeC:4,5")).await;

        match outcome {
            Outcome::Abandoned(AbandonReason::BindFailed { node_name, reason }) => {
                assert_eq!(node_name, "nodeC");
                assert!(reason.contains("connection refused"));
            }
            other => panic!("expected bind failure, got {other:?}"),
        }
        assert_eq!(cluster.binding_requests().len(), 1);
    }

    #[tokio::test]
    async fn conflicting_bind_is_abandoned() {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_node("nodeC", true);
        cluster.prebind("ml", "worker-2", "nodeA");

        let outcome = pipeline(&cluster).decide(&worker("worker-2", "2=nodeC:4")).await;

        assert!(matches!(
            outcome.abandon_reason(),
            Some(AbandonReason::BindFailed { .. })
        ));
        assert_eq!(cluster.bound_node("ml", "worker-2").as_deref(), Some("nodeA"));
    }

    #[tokio::test]
    async fn repeat_bind_to_same_node_succeeds() {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_node("nodeC", true);
        cluster.prebind("ml", "worker-2", "nodeC");

        let outcome = pipeline(&cluster).decide(&worker("worker-2", "2=nodeC:4")).await;

        match outcome {
            Outcome::Scheduled(placement) => assert_eq!(placement.status, BindStatus::AlreadyBound),
            other => panic!("expected success, got {other:?}"),
        }
    }
}
