//! Core type definitions for the checkpointing engine.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Largest variable id addressable by a block-meta record (18 bits).
pub const MAX_VAR_ID: u32 = (1 << 18) - 1;

/// Largest block index addressable by a block-meta record (30 bits).
pub const MAX_BLOCK_IDX: u64 = (1 << 30) - 1;

/// A caller-owned buffer shared with the engine.
///
/// The caller keeps a clone and mutates through it between checkpoints.
/// The engine reads it during checkpoint and writes it during recovery.
pub type SharedBuffer = Arc<RwLock<Vec<u8>>>;

/// Wraps bytes into a [`SharedBuffer`].
#[must_use]
pub fn shared_buffer(bytes: Vec<u8>) -> SharedBuffer {
    Arc::new(RwLock::new(bytes))
}

/// Identifier of a registered variable.
///
/// Ids are non-negative and unique within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub u32);

impl VarId {
    /// Creates a new variable id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true if the id fits a block-meta record.
    #[must_use]
    pub const fn is_addressable(self) -> bool {
        self.0 <= MAX_VAR_ID
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var:{}", self.0)
    }
}

/// Number of blocks needed to cover `byte_size` bytes.
#[must_use]
pub const fn block_count(byte_size: u64, block_size: u64) -> u64 {
    byte_size.div_ceil(block_size)
}

/// `byte_size` rounded up to the next block boundary.
#[must_use]
pub const fn padded_size(byte_size: u64, block_size: u64) -> u64 {
    block_count(byte_size, block_size) * block_size
}
