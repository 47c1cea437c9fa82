//! The watch loop over unscheduled pods.
//!
//! The loop holds one subscription at a time. Each subscription asks the API
//! server for pods with no node, across all namespaces, and carries a server
//! side timeout. When the server closes the stream at that timeout the loop
//! resubscribes straight away. Any other failure is logged, followed by a
//! fixed wait before resubscribing.
//!
//! Every subscription starts from resource version `"0"`, so the server
//! replays the pods that are still unscheduled. That replay is what gives an
//! abandoned pod another chance.
//!
//! Events are handled one at a time: a decision, including its node lookup and
//! bind call, finishes before the next event is read.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, WatchEvent, WatchParams};
use kube::Client;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::binder::Binder;
use crate::cluster::ClusterView;
use crate::pipeline::SchedulingPipeline;
use crate::types::{Outcome, PodRecord, SchedulerConfig, WatchState};
use crate::{Result, SchedulerError};

/// Field selector matching pods that have no node yet.
pub const UNSCHEDULED_SELECTOR: &str = "spec.nodeName=";

/// A source of pod watch subscriptions.
#[async_trait]
pub trait PodEventSource: Send + Sync {
    /// Open a new subscription over unscheduled pods.
    ///
    /// The stream ends when the server closes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be opened.
    async fn subscribe(&self) -> Result<BoxStream<'_, Result<WatchEvent<Pod>>>>;
}

/// [`PodEventSource`] backed by a cluster-wide pod watch.
pub struct KubePodEvents {
    pods: Api<Pod>,
    params: WatchParams,
}

impl KubePodEvents {
    /// Watch unscheduled pods in all namespaces with the given server timeout.
    #[must_use]
    pub fn new(client: Client, timeout_secs: u32) -> Self {
        Self {
            pods: Api::all(client),
            params: WatchParams::default()
                .fields(UNSCHEDULED_SELECTOR)
                .timeout(timeout_secs),
        }
    }
}

#[async_trait]
impl PodEventSource for KubePodEvents {
    async fn subscribe(&self) -> Result<BoxStream<'_, Result<WatchEvent<Pod>>>> {
        let stream = self.pods.watch(&self.params, "0").await?;
        Ok(stream.map(|item| item.map_err(SchedulerError::from)).boxed())
    }
}

/// Whether a pod is this scheduler's to place.
///
/// A pod qualifies if it names this scheduler, or names no scheduler and
/// carries the mapping annotation.
#[must_use]
pub fn is_ours(pod: &PodRecord, scheduler_name: &str, annotation_key: &str) -> bool {
    match pod.scheduler_name.as_deref() {
        Some(name) => name == scheduler_name,
        None => pod.annotation(annotation_key).is_some(),
    }
}

/// Counters for one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    /// Subscriptions opened successfully.
    pub subscriptions: u64,
    /// Events received, of any type.
    pub events: u64,
    /// Events that reached the pipeline.
    pub decisions: u64,
    /// Decisions that bound a pod.
    pub scheduled: u64,
    /// Decisions that were abandoned.
    pub abandoned: u64,
    /// Stream faults, each followed by the retry delay.
    pub faults: u64,
}

impl WatchStats {
    fn record(&mut self, outcome: &Outcome) {
        self.decisions += 1;
        match outcome {
            Outcome::Scheduled(_) => self.scheduled += 1,
            Outcome::Abandoned(_) => self.abandoned += 1,
            Outcome::Skipped => {}
        }
    }
}

enum StreamEnd {
    Expired,
    Fault(SchedulerError),
    Cancelled,
}

/// Drives the pipeline from pod watch events.
pub struct WatchLoop<S, C, B> {
    source: S,
    pipeline: SchedulingPipeline<C, B>,
    scheduler_name: String,
    retry_delay: Duration,
    state: watch::Sender<WatchState>,
}

impl<S, C, B> WatchLoop<S, C, B>
where
    S: PodEventSource,
    C: ClusterView,
    B: Binder,
{
    /// Create a loop over `source` feeding `pipeline`.
    #[must_use]
    pub fn new(source: S, pipeline: SchedulingPipeline<C, B>, config: &SchedulerConfig) -> Self {
        let (state, _) = watch::channel(WatchState::Disconnected);
        Self {
            source,
            pipeline,
            scheduler_name: config.scheduler_name.clone(),
            retry_delay: config.retry_delay,
            state,
        }
    }

    /// Follow the loop's connection state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<WatchState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between events; a decision in progress runs
    /// to completion first.
    pub async fn run(&self, shutdown: CancellationToken) -> WatchStats {
        let mut stats = WatchStats::default();

        info!(
            scheduler_name = %self.scheduler_name,
            annotation = %self.pipeline.annotation_key(),
            "Starting scheduler watch loop"
        );

        loop {
            let subscribed = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                result = self.source.subscribe() => result,
            };

            let end = match subscribed {
                Ok(stream) => {
                    stats.subscriptions += 1;
                    self.set_state(WatchState::Streaming);
                    info!("Watching for unscheduled pods");
                    self.consume(stream, &shutdown, &mut stats).await
                }
                Err(e) => StreamEnd::Fault(e),
            };

            match end {
                StreamEnd::Cancelled => break,
                StreamEnd::Expired => {
                    debug!("Watch subscription expired, resubscribing");
                    self.set_state(WatchState::Reconnecting);
                }
                StreamEnd::Fault(e) => {
                    stats.faults += 1;
                    error!(error = %e, "Error in watch loop");
                    info!(
                        delay_secs = self.retry_delay.as_secs_f64(),
                        "Restarting watch after delay"
                    );
                    self.set_state(WatchState::Backoff);

                    tokio::select! {
                        biased;
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(self.retry_delay) => {}
                    }
                    self.set_state(WatchState::Reconnecting);
                }
            }
        }

        self.set_state(WatchState::Stopped);
        info!(
            decisions = stats.decisions,
            scheduled = stats.scheduled,
            faults = stats.faults,
            "Scheduler watch loop stopped"
        );
        stats
    }

    async fn consume(
        &self,
        mut stream: BoxStream<'_, Result<WatchEvent<Pod>>>,
        shutdown: &CancellationToken,
        stats: &mut WatchStats,
    ) -> StreamEnd {
        loop {
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => return StreamEnd::Cancelled,
                next = stream.next() => next,
            };

            let event = match next {
                None => return StreamEnd::Expired,
                Some(Err(e)) => return StreamEnd::Fault(e),
                Some(Ok(WatchEvent::Error(e))) => {
                    return StreamEnd::Fault(SchedulerError::WatchStream(format!(
                        "{} {}: {}",
                        e.code, e.reason, e.message
                    )));
                }
                Some(Ok(event)) => event,
            };

            stats.events += 1;
            if let Some(outcome) = self.handle_event(event).await {
                stats.record(&outcome);
            }
        }
    }

    /// Filter one event and run the pipeline on it if it is ours.
    async fn handle_event(&self, event: WatchEvent<Pod>) -> Option<Outcome> {
        let (kind, pod) = match event {
            WatchEvent::Added(pod) => ("ADDED", pod),
            WatchEvent::Modified(pod) => ("MODIFIED", pod),
            WatchEvent::Deleted(_) | WatchEvent::Bookmark(_) | WatchEvent::Error(_) => {
                return None;
            }
        };

        let Some(record) = PodRecord::from_pod(&pod) else {
            warn!(event = kind, "Ignoring pod event without a name");
            return None;
        };

        if !is_ours(&record, &self.scheduler_name, self.pipeline.annotation_key()) {
            debug!(pod = %record, event = kind, "Ignoring pod for another scheduler");
            return None;
        }

        info!(pod = %record.name, namespace = %record.namespace, event = kind, "Processing pod");
        Some(self.pipeline.decide(&record).await)
    }

    fn set_state(&self, state: WatchState) {
        self.state.send_replace(state);
    }
}
