//! Variable registry.
//!
//! Holds the buffers protected by one engine, in registration order, together
//! with each buffer's per-block digest table from its last checkpoint.
//! Registration is append-only: there is no removal and the order never
//! changes, because the base layer and the metadata are both positional.

use crate::error::{CoreError, CoreResult};
use crate::types::{block_count, SharedBuffer, VarId};
use std::collections::HashMap;

/// Per-block digests of a variable, stored contiguously.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockHashes {
    width: usize,
    digests: Vec<u8>,
}

impl BlockHashes {
    /// Creates an empty table for digests of `width` bytes, sized for
    /// `blocks` entries.
    #[must_use]
    pub fn with_capacity(width: usize, blocks: usize) -> Self {
        Self {
            width,
            digests: Vec::with_capacity(width * blocks),
        }
    }

    /// Number of blocks with a digest.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.digests.len() / self.width
        }
    }

    /// Returns true if the table holds no digests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Digest of block `index`, if one was recorded.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        if self.width == 0 {
            return None;
        }
        let start = index.checked_mul(self.width)?;
        self.digests.get(start..start.checked_add(self.width)?)
    }

    /// Buffer that digests are appended to.
    pub(crate) fn sink(&mut self) -> &mut Vec<u8> {
        &mut self.digests
    }
}

/// A registered variable.
#[derive(Debug)]
pub struct Variable {
    id: VarId,
    buffer: SharedBuffer,
    element_size: usize,
    element_count: usize,
    byte_size: u64,
    hashes: BlockHashes,
    hashed_byte_size: u64,
}

impl Variable {
    /// The variable id.
    #[must_use]
    pub fn id(&self) -> VarId {
        self.id
    }

    /// The caller's buffer.
    #[must_use]
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    /// Size of one element in bytes.
    #[must_use]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Number of elements.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Logical size in bytes (`element_size * element_count`).
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    /// Digest table from the last checkpoint.
    #[must_use]
    pub fn hashes(&self) -> &BlockHashes {
        &self.hashes
    }

    /// Byte size covered by [`Variable::hashes`]. Blocks at or past this
    /// offset are always committed.
    #[must_use]
    pub fn hashed_byte_size(&self) -> u64 {
        self.hashed_byte_size
    }

    /// Number of blocks covering the variable.
    #[must_use]
    pub fn block_count(&self, block_size: u64) -> u64 {
        block_count(self.byte_size, block_size)
    }

    /// Swaps in the digest table computed by a completed pass.
    pub(crate) fn replace_hashes(&mut self, hashes: BlockHashes) {
        self.hashes = hashes;
        self.hashed_byte_size = self.byte_size;
    }

    /// Forces every block to be committed on the next pass.
    pub(crate) fn invalidate_hashes(&mut self) {
        self.hashed_byte_size = 0;
    }
}

/// Outcome of a [`Registry::protect`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A new variable was appended.
    Added,
    /// An existing variable's buffer and size were replaced.
    Updated,
}

/// Ordered collection of registered variables with O(1) lookup by id.
#[derive(Debug, Default)]
pub struct Registry {
    vars: Vec<Variable>,
    index: HashMap<VarId, usize>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or re-registers a buffer under `id`.
    ///
    /// Re-registering keeps the variable's position and digest history; the
    /// diff engine commits any blocks past the previously hashed size.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `id` is negative, if the byte size
    /// overflows, or if the buffer is shorter than
    /// `element_count * element_size`. The registry is left unchanged.
    pub fn protect(
        &mut self,
        id: i32,
        buffer: SharedBuffer,
        element_count: usize,
        element_size: usize,
    ) -> CoreResult<Registration> {
        let raw = u32::try_from(id).map_err(|_| {
            CoreError::invalid_argument(format!("invalid id '{id}', ids have to be positive"))
        })?;
        let var_id = VarId::new(raw);

        let byte_size = element_count
            .checked_mul(element_size)
            .ok_or_else(|| {
                CoreError::invalid_argument(format!(
                    "size of {var_id} overflows: {element_count} x {element_size} bytes"
                ))
            })?;

        let available = buffer.read().len();
        if available < byte_size {
            return Err(CoreError::invalid_argument(format!(
                "buffer of {var_id} holds {available} bytes, {byte_size} required"
            )));
        }

        if let Some(&slot) = self.index.get(&var_id) {
            let var = &mut self.vars[slot];
            var.buffer = buffer;
            var.element_count = element_count;
            var.element_size = element_size;
            var.byte_size = byte_size as u64;
            return Ok(Registration::Updated);
        }

        self.index.insert(var_id, self.vars.len());
        self.vars.push(Variable {
            id: var_id,
            buffer,
            element_size,
            element_count,
            byte_size: byte_size as u64,
            hashes: BlockHashes::default(),
            hashed_byte_size: 0,
        });
        Ok(Registration::Added)
    }

    /// Looks up a variable by id.
    #[must_use]
    pub fn get(&self, id: VarId) -> Option<&Variable> {
        self.index.get(&id).map(|&slot| &self.vars[slot])
    }

    /// Position of `id` in registration order.
    #[must_use]
    pub fn position(&self, id: VarId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Variables in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Variable> {
        self.vars.iter_mut()
    }

    /// Number of registered variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Sum of all logical byte sizes.
    #[must_use]
    pub fn total_byte_size(&self) -> u64 {
        self.vars.iter().map(Variable::byte_size).sum()
    }
}
