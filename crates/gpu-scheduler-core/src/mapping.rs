//! The scheduling annotation grammar.
//!
//! A mapping annotation carries one directive per line:
//!
//! ```text
//! <pod-index>=<node-name>:<device-id>[,<device-id>...]
//! ```
//!
//! Blank lines are ignored. A line without `=`, without `:` after the `=`, or
//! with a pod index that is not an integer is skipped as a whole. Device tokens
//! that are not integers are dropped one by one; the entry itself survives with
//! whatever devices did parse. When two lines name the same index, the later
//! line wins.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{LineError, Result};

/// Annotation key the scheduler and the status sidecar read by default.
pub const DEFAULT_ANNOTATION_KEY: &str = "gpu-scheduling-map";

/// One placement directive: which node a pod index goes to, and which
/// accelerator devices it should see there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Ordinal of the pod this entry applies to.
    pub pod_index: u32,
    /// Name of the target node.
    pub node_name: String,
    /// Device ids in annotation order. May be empty.
    pub devices: Vec<u32>,
}

impl MappingEntry {
    /// Create a new entry.
    #[must_use]
    pub fn new(pod_index: u32, node_name: impl Into<String>, devices: Vec<u32>) -> Self {
        Self {
            pod_index,
            node_name: node_name.into(),
            devices,
        }
    }

    /// Render the device list the way `CUDA_VISIBLE_DEVICES` expects it.
    #[must_use]
    pub fn visible_devices(&self) -> String {
        self.devices
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for MappingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}:{}",
            self.pod_index,
            self.node_name,
            self.visible_devices()
        )
    }
}

/// Pod index to placement, built from a single annotation value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    entries: BTreeMap<u32, MappingEntry>,
}

impl Mapping {
    /// Parse an annotation value, skipping anything malformed.
    ///
    /// Never fails. See [`parse_report`] for the lines that were left out.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        parse_report(text).mapping
    }

    /// Insert an entry, replacing any previous entry for the same index.
    pub fn insert(&mut self, entry: MappingEntry) -> Option<MappingEntry> {
        self.entries.insert(entry.pod_index, entry)
    }

    /// Look up the entry for a pod index.
    #[must_use]
    pub fn get(&self, pod_index: u32) -> Option<&MappingEntry> {
        self.entries.get(&pod_index)
    }

    /// Number of distinct pod indices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no line produced an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in ascending pod index order.
    pub fn iter(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.values()
    }
}

/// A line that did not produce an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    /// 1-based line number within the annotation.
    pub line_number: usize,
    /// The trimmed line text.
    pub text: String,
    /// Why it was skipped.
    pub error: LineError,
}

/// A device token dropped from an otherwise valid line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedDevice {
    /// 1-based line number within the annotation.
    pub line_number: usize,
    /// Pod index of the entry the token belonged to.
    pub pod_index: u32,
    /// Why it was dropped.
    pub error: LineError,
}

/// Result of parsing an annotation, with diagnostics kept alongside.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseReport {
    /// Entries that parsed.
    pub mapping: Mapping,
    /// Lines skipped entirely.
    pub skipped: Vec<SkippedLine>,
    /// Device tokens dropped from kept lines.
    pub dropped_devices: Vec<DroppedDevice>,
}

impl ParseReport {
    /// Whether every non-blank line parsed without losing anything.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.dropped_devices.is_empty()
    }
}

/// A single parsed line before it joins a mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    /// The entry built from the line.
    pub entry: MappingEntry,
    /// Device tokens that were not integers.
    pub rejected_devices: Vec<LineError>,
}

/// Parse one non-blank directive line.
///
/// # Errors
///
/// Returns an error if the line is missing a separator or has a non-integer
/// pod index. Bad device tokens are not errors; they are returned in
/// [`ParsedLine::rejected_devices`].
pub fn parse_line(line: &str) -> Result<ParsedLine> {
    let (index, placement) = line.split_once('=').ok_or(LineError::MissingEquals)?;
    let (node, devices) = placement.split_once(':').ok_or(LineError::MissingColon)?;

    let index = index.trim();
    let pod_index = index
        .parse::<u32>()
        .map_err(|_| LineError::InvalidIndex(index.to_string()))?;

    let mut parsed = Vec::new();
    let mut rejected_devices = Vec::new();
    let devices = devices.trim();
    if !devices.is_empty() {
        for token in devices.split(',').map(str::trim) {
            match token.parse::<u32>() {
                Ok(id) => parsed.push(id),
                Err(_) => rejected_devices.push(LineError::InvalidDevice(token.to_string())),
            }
        }
    }

    Ok(ParsedLine {
        entry: MappingEntry::new(pod_index, node.trim(), parsed),
        rejected_devices,
    })
}

/// Parse an annotation value and keep the diagnostics.
///
/// Every skipped line and dropped device is also logged at warn level.
#[must_use]
pub fn parse_report(text: &str) -> ParseReport {
    let mut report = ParseReport::default();

    for (offset, raw) in text.lines().enumerate() {
        let line_number = offset + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        match parse_line(line) {
            Ok(ParsedLine {
                entry,
                rejected_devices,
            }) => {
                for error in rejected_devices {
                    warn!(
                        line_number,
                        pod_index = entry.pod_index,
                        %error,
                        "Dropping device from mapping line"
                    );
                    report.dropped_devices.push(DroppedDevice {
                        line_number,
                        pod_index: entry.pod_index,
                        error,
                    });
                }
                report.mapping.insert(entry);
            }
            Err(error) => {
                warn!(line_number, line, %error, "Skipping malformed mapping line");
                report.skipped.push(SkippedLine {
                    line_number,
                    text: line.to_string(),
                    error,
                });
            }
        }
    }

    report
}
