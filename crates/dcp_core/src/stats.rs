//! Checkpoint statistics.
//!
//! Each call returns a report describing what it did; the engine also keeps
//! cumulative counters for the whole run.
//!
//! # Usage
//!
//! ```rust,ignore
//! let report = dcp.checkpoint("step-10")?;
//! println!("committed {} of {} blocks", report.blocks_committed, report.blocks_total);
//!
//! let stats = dcp.stats();
//! println!("bytes written so far: {}", stats.bytes_written());
//! ```

use crate::layer::LayerPosition;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of one checkpoint call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointReport {
    /// Caller-supplied label.
    pub label: String,
    /// Position in the layer stack.
    pub position: LayerPosition,
    /// Variables processed.
    pub variables: usize,
    /// Sum of the variables' logical byte sizes.
    pub logical_bytes: u64,
    /// Blocks hashed.
    pub blocks_total: u64,
    /// Blocks written.
    pub blocks_committed: u64,
    /// Block payload bytes written (headers and block-meta excluded).
    pub payload_bytes: u64,
    /// Size of the layered file after this checkpoint.
    pub layered_file_size: u64,
    /// File id deleted by this checkpoint, if any.
    pub retired_file: Option<u64>,
}

/// Outcome of one recovery call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Layered file the buffers were restored from.
    pub file_id: u64,
    /// Variables restored.
    pub variables: usize,
    /// Bytes copied from the base layer.
    pub base_bytes: u64,
    /// Delta blocks applied.
    pub delta_blocks: u64,
}

/// Cumulative engine counters.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct DcpStats {
    /// Completed checkpoints.
    checkpoints: AtomicU64,
    /// Completed recoveries.
    recoveries: AtomicU64,
    /// Blocks written across all checkpoints.
    blocks_committed: AtomicU64,
    /// Payload bytes written across all checkpoints.
    bytes_written: AtomicU64,
    /// Layered files deleted by rollover.
    files_retired: AtomicU64,
    /// Failed operations.
    errors: AtomicU64,
}

impl DcpStats {
    /// Creates a new stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_checkpoint(&self, report: &CheckpointReport) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
        self.blocks_committed
            .fetch_add(report.blocks_committed, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(report.payload_bytes, Ordering::Relaxed);
        if report.retired_file.is_some() {
            self.files_retired.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Completed checkpoints.
    pub fn checkpoints(&self) -> u64 {
        self.checkpoints.load(Ordering::Relaxed)
    }

    /// Completed recoveries.
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::Relaxed)
    }

    /// Blocks written so far.
    pub fn blocks_committed(&self) -> u64 {
        self.blocks_committed.load(Ordering::Relaxed)
    }

    /// Payload bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Layered files deleted so far.
    pub fn files_retired(&self) -> u64 {
        self.files_retired.load(Ordering::Relaxed)
    }

    /// Failed operations so far.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(blocks: u64, retired: Option<u64>) -> CheckpointReport {
        CheckpointReport {
            label: "t".into(),
            position: LayerPosition::from_counter(0, 5),
            variables: 1,
            logical_bytes: 256,
            blocks_total: 2,
            blocks_committed: blocks,
            payload_bytes: blocks * 128,
            layered_file_size: 0,
            retired_file: retired,
        }
    }

    #[test]
    fn counters_accumulate() {
        let stats = DcpStats::new();
        stats.record_checkpoint(&report(2, None));
        stats.record_checkpoint(&report(1, Some(0)));
        stats.record_recovery();
        stats.record_error();

        assert_eq!(stats.checkpoints(), 2);
        assert_eq!(stats.blocks_committed(), 3);
        assert_eq!(stats.bytes_written(), 384);
        assert_eq!(stats.files_retired(), 1);
        assert_eq!(stats.recoveries(), 1);
        assert_eq!(stats.errors(), 1);
    }
}
