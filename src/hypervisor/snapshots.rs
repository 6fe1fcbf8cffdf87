// ============================================================================
// File: src/hypervisor/snapshots.rs
// ----------------------------------------------------------------------------
// Snapshot handles, generated names and `listSnapshots` output parsing.
// ============================================================================

use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

const SUMMARY_MARKER: &str = "Total snapshots";

/// Opaque name of a point-in-time VM state
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotHandle(String);

impl SnapshotHandle {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SnapshotHandle {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Name for a pre-deployment snapshot taken at `at`
pub fn auto_snapshot_name(at: DateTime<Local>) -> String {
    format!("auto_snapshot_{}", at.format("%Y%m%d_%H%M%S"))
}

/// Parse `listSnapshots` output
///
/// One name per line; blank lines and the summary line are dropped and
/// the reported order is kept.
pub fn parse_snapshot_list(output: &str) -> Vec<SnapshotHandle> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains(SUMMARY_MARKER))
        .map(SnapshotHandle::new)
        .collect()
}
