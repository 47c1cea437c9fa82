//! The periodic report loop.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info, warn};

use crate::config::CheckConfig;
use crate::devices::DeviceState;
use crate::error::Result;
use crate::health::{self, HealthMarker};
use crate::status::StatusRecord;

/// Iterations between self checks.
pub const HEALTH_CHECK_EVERY: u64 = 10;

/// Iterations between uptime reports.
pub const UPTIME_EVERY: u64 = 60;

/// Emits a status record every interval and keeps the liveness marker fresh.
pub struct Reporter {
    config: CheckConfig,
    devices: DeviceState,
    marker: HealthMarker,
    marker_failing: AtomicBool,
}

impl Reporter {
    /// Create a reporter.
    #[must_use]
    pub fn new(config: CheckConfig, devices: DeviceState) -> Self {
        let marker = HealthMarker::new(config.health_file.clone());
        Self {
            config,
            devices,
            marker,
            marker_failing: AtomicBool::new(false),
        }
    }

    /// Emit one status record and refresh the liveness marker.
    ///
    /// A marker that cannot be written is logged, once at warn level until it
    /// recovers, and does not fail the report.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded.
    pub fn report(&self) -> Result<StatusRecord> {
        let record = StatusRecord::capture(&self.config, &self.devices, std::env::vars_os());

        info!(
            node = %record.node_name,
            devices = %record.cuda_visible_devices,
            pod = %record.pod_info.pod_name,
            namespace = %record.pod_info.pod_namespace,
            "Status"
        );
        info!("Detailed status: {}", record.to_json()?);

        self.refresh_marker();
        Ok(record)
    }

    fn refresh_marker(&self) {
        match self.marker.touch() {
            Ok(()) => {
                if self.marker_failing.swap(false, Ordering::Relaxed) {
                    info!(path = %self.marker.path().display(), "Health marker writable again");
                }
            }
            Err(e) => {
                if self.marker_failing.swap(true, Ordering::Relaxed) {
                    debug!(error = %e, "Health marker still not writable");
                } else {
                    warn!(
                        path = %self.marker.path().display(),
                        error = %e,
                        "Could not write health marker"
                    );
                }
            }
        }
    }

    /// Whether the last marker write failed.
    #[must_use]
    pub fn marker_failing(&self) -> bool {
        self.marker_failing.load(Ordering::Relaxed)
    }

    /// Periodic work for iteration `iteration` (1-based).
    ///
    /// Returns whether a health check ran. The periodic checks run even when
    /// the report itself fails.
    ///
    /// # Errors
    ///
    /// Propagates failures from [`Reporter::report`].
    pub fn tick(&self, iteration: u64) -> Result<bool> {
        let reported = self.report().map(|_| ());

        let checked = iteration % HEALTH_CHECK_EVERY == 0;
        if checked && health::check(&self.config.node_name) {
            info!(iteration, "Health check passed");
        }

        if iteration % UPTIME_EVERY == 0 {
            let uptime_secs = iteration * self.config.interval.as_secs();
            info!(
                uptime_secs,
                pid = std::process::id(),
                os = std::env::consts::OS,
                arch = std::env::consts::ARCH,
                "Uptime"
            );
        }

        reported.map(|()| checked)
    }

    /// Run until `shutdown` completes, returning the number of iterations.
    ///
    /// The first report is emitted immediately. Failed iterations are logged
    /// and the loop keeps going.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> u64 {
        let mut ticker = tokio::time::interval(self.config.interval);
        tokio::pin!(shutdown);

        let mut iteration = 0;
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            iteration += 1;
            if let Err(e) = self.tick(iteration) {
                error!(iteration, error = %e, "Status iteration failed");
            }
        }

        info!(iterations = iteration, "GPU check stopped");
        iteration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn reporter_in(dir: &tempfile::TempDir) -> Reporter {
        let mut config = CheckConfig::default();
        config.node_name = "nodeA".to_string();
        config.health_file = dir.path().join("healthy");
        Reporter::new(config, DeviceState::from_annotation("0,1"))
    }

    #[test]
    fn report_touches_marker() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = reporter_in(&dir);

        let record = reporter.report().unwrap();

        assert_eq!(record.node_name, "nodeA");
        assert_eq!(record.cuda_visible_devices, "0,1");
        assert!(dir.path().join("healthy").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_each_interval() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = reporter_in(&dir);

        // Ticks at 0s, 10s and 20s before the shutdown at 25s.
        let iterations = reporter
            .run(tokio::time::sleep(Duration::from_secs(25)))
            .await;

        assert_eq!(iterations, 3);
        assert!(dir.path().join("healthy").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn marker_failure_does_not_stop_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CheckConfig::default();
        config.health_file = dir.path().join("missing").join("healthy");
        let reporter = Reporter::new(config, DeviceState::unset());

        let iterations = reporter
            .run(tokio::time::sleep(Duration::from_secs(15)))
            .await;

        assert_eq!(iterations, 2);
        assert!(reporter.marker_failing());
    }

    #[test]
    fn unwritable_marker_keeps_checks_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CheckConfig::default();
        config.health_file = dir.path().join("missing").join("healthy");
        let reporter = Reporter::new(config, DeviceState::unset());

        assert!(reporter.report().is_ok());
        assert!(!reporter.tick(9).unwrap());
        assert!(reporter.tick(10).unwrap());
        assert!(reporter.tick(60).unwrap());
        assert!(reporter.marker_failing());
    }

    #[test]
    fn marker_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CheckConfig::default();
        config.health_file = dir.path().join("later").join("healthy");
        let reporter = Reporter::new(config, DeviceState::unset());

        reporter.report().unwrap();
        assert!(reporter.marker_failing());

        std::fs::create_dir(dir.path().join("later")).unwrap();
        reporter.report().unwrap();
        assert!(!reporter.marker_failing());
        assert!(dir.path().join("later").join("healthy").exists());
    }

    #[tokio::test]
    async fn completed_shutdown_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = reporter_in(&dir);

        assert_eq!(reporter.run(std::future::ready(())).await, 0);
        assert!(!dir.path().join("healthy").exists());
    }
}
