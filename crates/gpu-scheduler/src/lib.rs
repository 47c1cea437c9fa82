//! Annotation-driven Kubernetes scheduler for GPU-indexed workloads.
//!
//! Pods opt in by naming this scheduler in `spec.schedulerName`, or by naming
//! no scheduler and carrying the `gpu-scheduling-map` annotation. The
//! annotation maps pod ordinals to nodes and device sets:
//!
//! ```text
//! 0=node1:0,1
//! 1=node2:2
//! 2=node3:0,1,2
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Kubernetes API Server                         │
//! └─────────────────────────────────────────────────────────────────┘
//!          │ watch spec.nodeName=                  ▲ pods/binding
//!          ▼                                       │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         WatchLoop                                │
//! │                             │                                    │
//! │                             ▼                                    │
//! │                    SchedulingPipeline                            │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────┐ ┌───────────┐  │
//! │  │  Mapping    │ │   Index     │ │  Cluster    │ │  Binder   │  │
//! │  │  Parser     │ │   Resolver  │ │  View       │ │           │  │
//! │  └─────────────┘ └─────────────┘ └─────────────┘ └───────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Binding only places a pod. Device ids from the mapping are not injected
//! into the pod; the workload's template or the status sidecar carries them.
//!
//! # Example
//!
//! ```no_run
//! use gpu_scheduler::{
//!     KubeBinder, KubeClusterView, KubePodEvents, SchedulerConfig, SchedulingPipeline,
//!     WatchLoop,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SchedulerConfig::default();
//! let client = kube::Client::try_default().await?;
//!
//! let pipeline = SchedulingPipeline::new(
//!     &config.annotation_key,
//!     KubeClusterView::new(client.clone()),
//!     KubeBinder::new(client.clone()),
//! );
//! let events = KubePodEvents::new(client, config.watch_timeout_secs);
//! let watch_loop = WatchLoop::new(events, pipeline, &config);
//!
//! watch_loop.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature for in-memory stand-ins:
//!
//! ```ignore
//! use gpu_scheduler::{ClusterView, MockCluster};
//!
//! # async fn example() {
//! let cluster = MockCluster::new();
//! cluster.add_node("node1", true);
//! assert!(cluster.is_ready("node1").await);
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod binder;
pub mod cluster;
pub mod error;
pub mod pipeline;
pub mod types;
pub mod watch;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use binder::{Binder, KubeBinder};
pub use cluster::{ClusterView, KubeClusterView, NodeReadiness};
pub use error::{Result, SchedulerError};
pub use pipeline::SchedulingPipeline;
pub use types::{
    AbandonReason, BindStatus, BindingRequest, NodeRecord, Outcome, Placement, PodRecord,
    SchedulerConfig, WatchState,
};
pub use watch::{KubePodEvents, PodEventSource, WatchLoop, WatchStats};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockCluster, MockPodEvents};
