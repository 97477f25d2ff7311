//! Layer schedule.
//!
//! Maps the monotonically increasing checkpoint counter onto a layered file
//! and a layer within it. Every `stack_size` checkpoints a new file id starts
//! with a full base layer; the others append delta layers. Recovery therefore
//! never applies more than `stack_size - 1` deltas on top of one base.

use std::fmt;

/// Where a checkpoint lands in the rotating stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerPosition {
    /// Checkpoint counter the position was derived from.
    pub counter: u64,
    /// Layered file id (`counter / stack_size`).
    pub file_id: u64,
    /// Layer within the file (`counter % stack_size`).
    pub layer: u64,
    /// Layers per file.
    pub stack_size: u64,
}

impl LayerPosition {
    /// Derives the position of checkpoint number `counter`.
    ///
    /// `stack_size` must be positive; configuration validation guarantees it.
    #[must_use]
    pub const fn from_counter(counter: u64, stack_size: u64) -> Self {
        Self {
            counter,
            file_id: counter / stack_size,
            layer: counter % stack_size,
            stack_size,
        }
    }

    /// True for layer 0, the full positional rewrite.
    #[must_use]
    pub const fn is_base(&self) -> bool {
        self.layer == 0
    }

    /// True for the final delta before the next base layer.
    #[must_use]
    pub const fn is_last_delta(&self) -> bool {
        self.layer == self.stack_size - 1
    }

    /// File id whose file is deleted once this checkpoint completes.
    #[must_use]
    pub const fn retired_file_id(&self) -> Option<u64> {
        if self.is_base() && self.file_id > 0 {
            Some(self.file_id - 1)
        } else {
            None
        }
    }

    /// Counter value of the next base layer strictly after this position.
    #[must_use]
    pub const fn next_base_counter(&self) -> u64 {
        (self.file_id + 1) * self.stack_size
    }
}

impl fmt::Display for LayerPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "file {} layer {}/{}",
            self.file_id, self.layer, self.stack_size
        )
    }
}
