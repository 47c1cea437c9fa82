//! Submission of pod to node bindings.
//!
//! A binding only places the pod. The API server rejects changes to a
//! running pod's container spec, so the device list from the mapping is never
//! written into the pod here; workloads carry it in their template or read it
//! through the status sidecar.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

use crate::types::{BindStatus, BindingRequest};
use crate::{Result, SchedulerError};

/// Submits bindings to the API server.
#[async_trait]
pub trait Binder: Send + Sync {
    /// Bind a pod to a node. Called at most once per decision; never retries.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::BindConflict` if the pod is bound to another
    /// node, or `SchedulerError::KubeApi` for any other rejection.
    async fn bind(&self, request: &BindingRequest) -> Result<BindStatus>;
}

#[async_trait]
impl<T: Binder + ?Sized> Binder for Arc<T> {
    async fn bind(&self, request: &BindingRequest) -> Result<BindStatus> {
        (**self).bind(request).await
    }
}

/// [`Binder`] backed by the pod `binding` subresource.
#[derive(Clone)]
pub struct KubeBinder {
    client: Client,
}

impl KubeBinder {
    /// Create a binder over the given client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Work out what a 409 means by reading the pod back.
    ///
    /// A pod already on the requested node counts as bound, which makes a
    /// repeated bind after a lost response safe.
    async fn resolve_conflict(
        &self,
        pods: &Api<Pod>,
        request: &BindingRequest,
    ) -> Result<BindStatus> {
        let existing_node = pods
            .get_opt(&request.pod_name)
            .await?
            .and_then(|pod| pod.spec)
            .and_then(|spec| spec.node_name);

        if existing_node.as_deref() == Some(request.node_name.as_str()) {
            info!(binding = %request, "Pod already bound to requested node");
            return Ok(BindStatus::AlreadyBound);
        }

        warn!(
            binding = %request,
            existing_node = ?existing_node,
            "Binding conflict, pod placed elsewhere"
        );
        Err(SchedulerError::BindConflict {
            pod: format!("{}/{}", request.namespace, request.pod_name),
            existing_node,
            requested_node: request.node_name.clone(),
        })
    }
}

#[async_trait]
impl Binder for KubeBinder {
    async fn bind(&self, request: &BindingRequest) -> Result<BindStatus> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &request.namespace);
        let body = serde_json::to_vec(&request.to_binding())?;

        debug!(binding = %request, "Submitting binding");

        match pods
            .create_subresource::<serde_json::Value>(
                "binding",
                &request.pod_name,
                &PostParams::default(),
                body,
            )
            .await
        {
            Ok(_) => Ok(BindStatus::Bound),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                self.resolve_conflict(&pods, request).await
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BINDING_PATH: &str = "/api/v1/namespaces/ml/pods/worker-2/binding";
    const POD_PATH: &str = "/api/v1/namespaces/ml/pods/worker-2";

    fn kube_client(server: &MockServer) -> Client {
        let uri: http::Uri = server.uri().parse().unwrap();
        Client::try_from(kube::Config::new(uri)).unwrap()
    }

    fn status(code: u16, reason: &str) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Status",
            "metadata": {},
            "status": if code < 300 { "Success" } else { "Failure" },
            "message": reason,
            "reason": reason,
            "code": code
        })
    }

    fn bound_pod(node: &str) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "worker-2", "namespace": "ml" },
            "spec": { "containers": [], "nodeName": node }
        })
    }

    #[tokio::test]
    async fn bind_posts_node_target() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(BINDING_PATH))
            .and(body_partial_json(json!({
                "kind": "Binding",
                "metadata": { "name": "worker-2", "namespace": "ml" },
                "target": { "kind": "Node", "name": "nodeC", "apiVersion": "v1" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(status(201, "")))
            .expect(1)
            .mount(&server)
            .await;

        let binder = KubeBinder::new(kube_client(&server));
        let status = binder
            .bind(&BindingRequest::new("worker-2", "ml", "nodeC"))
            .await
            .unwrap();

        assert_eq!(status, BindStatus::Bound);
    }

    #[tokio::test]
    async fn conflict_on_same_node_is_already_bound() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(BINDING_PATH))
            .respond_with(ResponseTemplate::new(409).set_body_json(status(409, "Conflict")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(POD_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(bound_pod("nodeC")))
            .mount(&server)
            .await;

        let binder = KubeBinder::new(kube_client(&server));
        let status = binder
            .bind(&BindingRequest::new("worker-2", "ml", "nodeC"))
            .await
            .unwrap();

        assert_eq!(status, BindStatus::AlreadyBound);
    }

    #[tokio::test]
    async fn conflict_on_other_node_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(BINDING_PATH))
            .respond_with(ResponseTemplate::new(409).set_body_json(status(409, "Conflict")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(POD_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(bound_pod("nodeA")))
            .mount(&server)
            .await;

        let binder = KubeBinder::new(kube_client(&server));
        let err = binder
            .bind(&BindingRequest::new("worker-2", "ml", "nodeC"))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        match err {
            SchedulerError::BindConflict {
                existing_node,
                requested_node,
                ..
            } => {
                assert_eq!(existing_node.as_deref(), Some("nodeA"));
                assert_eq!(requested_node, "nodeC");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_rejections_propagate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(BINDING_PATH))
            .respond_with(ResponseTemplate::new(404).set_body_json(status(404, "NotFound")))
            .mount(&server)
            .await;

        let binder = KubeBinder::new(kube_client(&server));
        let err = binder
            .bind(&BindingRequest::new("worker-2", "ml", "nodeC"))
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::KubeApi(kube::Error::Api(ref e)) if e.code == 404));
        assert!(!err.is_conflict());
    }
}
