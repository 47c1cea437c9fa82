//! Shared building blocks for gpu-scheduler.
//!
//! This crate holds the pieces both the scheduler and the status sidecar need,
//! with no dependency on a cluster:
//!
//! - **Mapping grammar**: parsing of the `gpu-scheduling-map` annotation into
//!   typed [`MappingEntry`] values
//! - **Index resolution**: recovering a pod's ordinal from its name
//!
//! # Example
//!
//! ```
//! use gpu_scheduler_core::{index, Mapping};
//!
//! let mapping = Mapping::parse("0=node1:0,1\n1=node2:2");
//! let ordinal = index::resolve("trainer-1").unwrap();
//!
//! let entry = mapping.get(ordinal).unwrap();
//! assert_eq!(entry.node_name, "node2");
//! assert_eq!(entry.visible_devices(), "2");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod index;
pub mod mapping;

pub use error::{LineError, Result};
pub use mapping::{
    parse_line, parse_report, DroppedDevice, Mapping, MappingEntry, ParseReport, ParsedLine,
    SkippedLine, DEFAULT_ANNOTATION_KEY,
};
