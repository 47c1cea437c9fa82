//! In-memory stand-ins for the API server, for testing without a cluster.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::WatchEvent;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::binder::Binder;
use crate::cluster::ClusterView;
use crate::types::{BindStatus, BindingRequest, NodeRecord};
use crate::watch::PodEventSource;
use crate::{Result, SchedulerError};

/// A mock cluster that keeps nodes and bindings in memory.
///
/// Binding follows the API server's rules: the first bind of a pod wins, a
/// repeat to the same node is accepted, a repeat to another node conflicts.
#[derive(Default)]
pub struct MockCluster {
    nodes: Mutex<Vec<NodeRecord>>,
    bound: Mutex<HashMap<(String, String), String>>,
    requests: Mutex<Vec<BindingRequest>>,
    fail_node_list: Mutex<bool>,
    fail_binds: Mutex<bool>,
}

impl MockCluster {
    /// Create an empty mock cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a node.
    pub fn add_node(&self, name: &str, ready: bool) {
        let mut nodes = self.nodes.lock();
        nodes.retain(|n| n.name != name);
        nodes.push(NodeRecord::new(name, ready));
    }

    /// Make node listing fail.
    pub fn fail_node_list(&self, fail: bool) {
        *self.fail_node_list.lock() = fail;
    }

    /// Make every bind fail with a transport-style error.
    pub fn fail_binds(&self, fail: bool) {
        *self.fail_binds.lock() = fail;
    }

    /// Mark a pod as already bound, as if another scheduler got there first.
    pub fn prebind(&self, namespace: &str, pod_name: &str, node_name: &str) {
        self.bound.lock().insert(
            (namespace.to_string(), pod_name.to_string()),
            node_name.to_string(),
        );
    }

    /// Every binding request received, in order, including rejected ones.
    #[must_use]
    pub fn binding_requests(&self) -> Vec<BindingRequest> {
        self.requests.lock().clone()
    }

    /// The node a pod is bound to.
    #[must_use]
    pub fn bound_node(&self, namespace: &str, pod_name: &str) -> Option<String> {
        self.bound
            .lock()
            .get(&(namespace.to_string(), pod_name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ClusterView for MockCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        if *self.fail_node_list.lock() {
            return Err(SchedulerError::Config("node list unavailable".to_string()));
        }
        Ok(self.nodes.lock().clone())
    }
}

#[async_trait]
impl Binder for MockCluster {
    async fn bind(&self, request: &BindingRequest) -> Result<BindStatus> {
        self.requests.lock().push(request.clone());

        if *self.fail_binds.lock() {
            return Err(SchedulerError::Config("connection refused".to_string()));
        }

        let key = (request.namespace.clone(), request.pod_name.clone());
        let mut bound = self.bound.lock();
        match bound.get(&key) {
            Some(node) if *node == request.node_name => Ok(BindStatus::AlreadyBound),
            Some(node) => Err(SchedulerError::BindConflict {
                pod: format!("{}/{}", request.namespace, request.pod_name),
                existing_node: Some(node.clone()),
                requested_node: request.node_name.clone(),
            }),
            None => {
                bound.insert(key, request.node_name.clone());
                Ok(BindStatus::Bound)
            }
        }
    }
}

/// One scripted subscription.
pub enum Subscription {
    /// The subscription opens and yields these items, then ends.
    Events(Vec<Result<WatchEvent<Pod>>>),
    /// The subscription cannot be opened.
    Fail(SchedulerError),
    /// The subscription opens and stays silent until the loop stops.
    Pending,
}

/// A pod event source that replays scripted subscriptions.
///
/// When the script runs out, the source cancels the given token so the
/// watch loop under test stops.
pub struct MockPodEvents {
    script: Mutex<VecDeque<Subscription>>,
    subscribes: Mutex<usize>,
    done: CancellationToken,
}

impl MockPodEvents {
    /// Create a source that cancels `done` once the script is exhausted.
    #[must_use]
    pub fn new(script: Vec<Subscription>, done: CancellationToken) -> Self {
        Self {
            script: Mutex::new(script.into()),
            subscribes: Mutex::new(0),
            done,
        }
    }

    /// Number of subscriptions opened or attempted.
    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        *self.subscribes.lock()
    }
}

#[async_trait]
impl PodEventSource for MockPodEvents {
    async fn subscribe(&self) -> Result<BoxStream<'_, Result<WatchEvent<Pod>>>> {
        *self.subscribes.lock() += 1;

        let next = self.script.lock().pop_front();
        match next {
            Some(Subscription::Events(events)) => Ok(stream::iter(events).boxed()),
            Some(Subscription::Fail(e)) => Err(e),
            Some(Subscription::Pending) => Ok(stream::pending().boxed()),
            None => {
                self.done.cancel();
                Ok(stream::empty().boxed())
            }
        }
    }
}
