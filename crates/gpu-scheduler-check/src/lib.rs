//! Status sidecar for pods placed by the GPU scheduler.
//!
//! Runs next to a workload and reports, every interval, which node the pod
//! landed on and which GPU devices it was assigned. When
//! `CUDA_VISIBLE_DEVICES` is not set in the container, the device list is
//! recovered from the pod's own `gpu-scheduling-map` annotation.
//!
//! # Modules
//!
//! - [`config`] - Downward API environment
//! - [`devices`] - Device list resolution
//! - [`status`] - Status records
//! - [`health`] - Liveness marker
//! - [`reporter`] - The periodic loop

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod devices;
pub mod error;
pub mod health;
pub mod reporter;
pub mod status;

pub use config::{CheckConfig, PodIdentity};
pub use devices::{DeviceSource, DeviceState, KubePodAnnotations, PodAnnotations};
pub use error::{CheckError, Result};
pub use health::HealthMarker;
pub use reporter::Reporter;
pub use status::StatusRecord;
