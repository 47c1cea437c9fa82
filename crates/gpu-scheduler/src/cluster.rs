//! Node readiness lookups.
//!
//! Every check lists the nodes afresh. There is no cache, so a decision always
//! sees the readiness the API server reports at that moment.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::{debug, error, warn};

use crate::types::NodeRecord;
use crate::Result;

/// Readiness of a named node within a node list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeReadiness {
    /// The node exists and reports `Ready=True`.
    Ready,
    /// The node exists but is not ready.
    NotReady,
    /// No node has that name.
    Missing,
}

/// Find a node by name and report its readiness.
#[must_use]
pub fn readiness(nodes: &[NodeRecord], node_name: &str) -> NodeReadiness {
    match nodes.iter().find(|n| n.name == node_name) {
        Some(node) if node.ready => NodeReadiness::Ready,
        Some(_) => NodeReadiness::NotReady,
        None => NodeReadiness::Missing,
    }
}

/// Read access to the cluster's nodes.
#[async_trait]
pub trait ClusterView: Send + Sync {
    /// List every node with its readiness.
    ///
    /// # Errors
    ///
    /// Returns an error if the node list cannot be fetched.
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>>;

    /// Check whether a node exists and is ready.
    ///
    /// A failed lookup counts as not ready.
    async fn is_ready(&self, node_name: &str) -> bool {
        let nodes = match self.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(node_name, error = %e, "Failed to list nodes, treating node as unavailable");
                return false;
            }
        };

        match readiness(&nodes, node_name) {
            NodeReadiness::Ready => {
                debug!(node_name, "Node exists and is ready");
                true
            }
            NodeReadiness::NotReady => {
                warn!(node_name, "Node exists but is not ready");
                false
            }
            NodeReadiness::Missing => {
                warn!(node_name, nodes = nodes.len(), "Node does not exist");
                false
            }
        }
    }
}

#[async_trait]
impl<T: ClusterView + ?Sized> ClusterView for Arc<T> {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        (**self).list_nodes().await
    }

    async fn is_ready(&self, node_name: &str) -> bool {
        (**self).is_ready(node_name).await
    }
}

/// [`ClusterView`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterView {
    client: Client,
}

impl KubeClusterView {
    /// Create a view over the given client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterView for KubeClusterView {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;

        Ok(list.items.iter().filter_map(NodeRecord::from_node).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn kube_client(server: &MockServer) -> Client {
        let uri: http::Uri = server.uri().parse().unwrap();
        Client::try_from(kube::Config::new(uri)).unwrap()
    }

    fn node_json(name: &str, ready: &str) -> serde_json::Value {
        json!({
            "metadata": { "name": name },
            "status": { "conditions": [ { "type": "Ready", "status": ready } ] }
        })
    }

    #[test]
    fn readiness_lookup() {
        let nodes = vec![NodeRecord::new("nodeA", true), NodeRecord::new("nodeB", false)];

        assert_eq!(readiness(&nodes, "nodeA"), NodeReadiness::Ready);
        assert_eq!(readiness(&nodes, "nodeB"), NodeReadiness::NotReady);
        assert_eq!(readiness(&nodes, "nodeC"), NodeReadiness::Missing);
        assert_eq!(readiness(&[], "nodeA"), NodeReadiness::Missing);
    }

    #[tokio::test]
    async fn is_ready_only_for_ready_nodes() {
        let cluster = MockCluster::new();
        cluster.add_node("nodeA", true);
        cluster.add_node("nodeB", false);

        assert!(cluster.is_ready("nodeA").await);
        assert!(!cluster.is_ready("nodeB").await);
        assert!(!cluster.is_ready("nodeC").await);
    }

    #[tokio::test]
    async fn is_ready_false_when_listing_fails() {
        let cluster = MockCluster::new();
        cluster.add_node("nodeA", true);
        cluster.fail_node_list(true);

        assert!(!cluster.is_ready("nodeA").await);
    }

    #[tokio::test]
    async fn kube_view_reads_node_conditions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/nodes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "NodeList",
                "metadata": { "resourceVersion": "1" },
                "items": [
                    node_json("nodeA", "True"),
                    node_json("nodeB", "False"),
                    node_json("nodeC", "Unknown"),
                    { "metadata": { "name": "nodeD" } }
                ]
            })))
            .mount(&server)
            .await;

        let view = KubeClusterView::new(kube_client(&server));

        assert!(view.is_ready("nodeA").await);
        assert!(!view.is_ready("nodeB").await);
        assert!(!view.is_ready("nodeC").await);
        assert!(!view.is_ready("nodeD").await);
        assert!(!view.is_ready("nodeE").await);
    }

    #[tokio::test]
    async fn kube_view_api_error_is_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/nodes"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "Status",
                "status": "Failure",
                "message": "nodes is forbidden",
                "reason": "Forbidden",
                "code": 403
            })))
            .mount(&server)
            .await;

        let view = KubeClusterView::new(kube_client(&server));

        assert!(view.list_nodes().await.is_err());
        assert!(!view.is_ready("nodeA").await);
    }
}
