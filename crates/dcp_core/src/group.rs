//! Process-group bootstrap.
//!
//! The engine only needs three things from the surrounding parallel runtime:
//! its rank, the group size, and a way to agree on one value (the run id)
//! across ranks. Bindings to a message-passing runtime implement
//! [`ProcessGroup`]; [`LocalGroup`] and [`FixedGroup`] cover single-process
//! runs and tests.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A group of cooperating ranks.
pub trait ProcessGroup {
    /// This process's rank, in `0..size()`.
    fn rank(&self) -> u32;

    /// Number of ranks in the group.
    fn size(&self) -> u32;

    /// Returns rank 0's `value` on every rank.
    fn broadcast_from_root(&self, value: u64) -> u64;
}

/// A group consisting of this process alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalGroup;

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> u32 {
        0
    }

    fn size(&self) -> u32 {
        1
    }

    fn broadcast_from_root(&self, value: u64) -> u64 {
        value
    }
}

/// A group member with a fixed rank whose broadcast result is known up front.
///
/// Lets several engines in one process act as distinct ranks of the same
/// run, each with its own files.
#[derive(Debug, Clone, Copy)]
pub struct FixedGroup {
    rank: u32,
    size: u32,
    shared: u64,
}

impl FixedGroup {
    /// Creates member `rank` of a group of `size` ranks agreeing on `shared`.
    #[must_use]
    pub const fn new(rank: u32, size: u32, shared: u64) -> Self {
        Self { rank, size, shared }
    }
}

impl ProcessGroup for FixedGroup {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn broadcast_from_root(&self, _value: u64) -> u64 {
        self.shared
    }
}

/// Wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Execution facts established at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecInfo {
    /// This process's rank.
    pub rank: u32,
    /// Ranks in the group.
    pub size: u32,
    /// Ranks per node.
    pub node_size: u32,
    /// Node this rank belongs to (`rank / node_size`).
    pub node_id: u32,
    /// Run identifier shared by all ranks.
    pub run_id: u64,
}

impl ExecInfo {
    /// Number of nodes in the group.
    #[must_use]
    pub const fn node_count(&self) -> u32 {
        self.size / self.node_size
    }

    /// Rank within this node.
    #[must_use]
    pub const fn node_rank(&self) -> u32 {
        self.rank % self.node_size
    }
}

impl fmt::Display for ExecInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "execution id: {}, processes: {}, processes per node: {}, nodes: {}",
            self.run_id,
            self.size,
            self.node_size,
            self.node_count()
        )
    }
}
