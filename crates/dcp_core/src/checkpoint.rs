//! Differential layer writer.
//!
//! One pass walks every registered variable block by block, hashes each
//! block and writes the ones that changed since the previous checkpoint:
//!
//! - A base layer writes every variable's header and every block,
//!   positionally.
//! - A delta layer writes a block-meta record plus the block for each
//!   committed block only.
//!
//! Short tail blocks are zero-padded, so the hashed and written unit is
//! always exactly one block. The pass does not touch the registry's digest
//! tables; it returns the fresh tables and the engine installs them once the
//! checkpoint is durable.

use crate::digest::BlockDigester;
use crate::error::{CoreError, CoreResult};
use crate::format::{BaseHeader, BlockMeta};
use crate::layer::LayerPosition;
use crate::registry::{BlockHashes, Registry, Variable};
use crate::types::{MAX_BLOCK_IDX, MAX_VAR_ID};
use dcp_storage::StorageBackend;
use tracing::debug;

/// Appends are batched up to this many bytes before reaching the backend.
const STAGING_CAPACITY: usize = 64 * 1024;

/// Result of writing one layer.
#[derive(Debug, Default)]
pub struct LayerOutcome {
    /// Sum of the variables' logical byte sizes.
    pub logical_bytes: u64,
    /// Blocks hashed.
    pub blocks_total: u64,
    /// Blocks written.
    pub blocks_committed: u64,
    /// Block payload bytes written.
    pub payload_bytes: u64,
    /// Bytes appended to the layered file (headers and records included).
    pub file_bytes: u64,
    /// Fresh digest tables, in registration order.
    pub hashes: Vec<BlockHashes>,
}

/// Checks that every variable is addressable with `block_size`.
///
/// # Errors
///
/// Returns `Overflow` naming the first variable whose id exceeds
/// [`MAX_VAR_ID`] or whose size exceeds `MAX_BLOCK_IDX * block_size`.
pub fn check_addressable(registry: &Registry, block_size: u64) -> CoreResult<()> {
    for var in registry.iter() {
        if let Some(max_size) = MAX_BLOCK_IDX.checked_mul(block_size) {
            if var.byte_size() > max_size {
                return Err(CoreError::overflow(format!(
                    "overflow in size of dataset with id: {} (datasize: {} > MAX_DATA_SIZE: {max_size})",
                    var.id().as_u32(),
                    var.byte_size()
                )));
            }
        }
        if !var.id().is_addressable() {
            return Err(CoreError::overflow(format!(
                "overflow in ID (id: {} > MAX_ID: {MAX_VAR_ID})",
                var.id().as_u32()
            )));
        }
    }
    Ok(())
}

/// Buffers small appends so a layer is written in large chunks.
struct Staging<'a> {
    backend: &'a mut dyn StorageBackend,
    buf: Vec<u8>,
    appended: u64,
}

impl<'a> Staging<'a> {
    fn new(backend: &'a mut dyn StorageBackend) -> Self {
        Self {
            backend,
            buf: Vec::with_capacity(STAGING_CAPACITY),
            appended: 0,
        }
    }

    fn push(&mut self, data: &[u8]) -> CoreResult<()> {
        if self.buf.len() + data.len() > STAGING_CAPACITY {
            self.drain()?;
        }
        if data.len() >= STAGING_CAPACITY {
            self.backend.append(data)?;
        } else {
            self.buf.extend_from_slice(data);
        }
        self.appended += data.len() as u64;
        Ok(())
    }

    fn drain(&mut self) -> CoreResult<()> {
        if !self.buf.is_empty() {
            self.backend.append(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }

    fn finish(mut self) -> CoreResult<u64> {
        self.drain()?;
        Ok(self.appended)
    }
}

/// Writes one layer for every registered variable.
///
/// The caller opens `backend` (truncated for a base layer, positioned at the
/// committed end for a delta layer) and syncs it afterwards.
///
/// # Errors
///
/// Returns `Overflow` if a variable is not addressable, `InvalidArgument` if
/// a buffer shrank below its registered size, or a storage error.
pub fn write_layer(
    registry: &Registry,
    position: LayerPosition,
    block_size: u64,
    digester: &dyn BlockDigester,
    backend: &mut dyn StorageBackend,
) -> CoreResult<LayerOutcome> {
    check_addressable(registry, block_size)?;

    let mut outcome = LayerOutcome {
        hashes: Vec::with_capacity(registry.len()),
        ..LayerOutcome::default()
    };
    let mut staging = Staging::new(backend);
    let mut scratch = vec![0u8; block_size as usize];

    for var in registry.iter() {
        let (hashes, committed) =
            diff_variable(var, position, block_size, digester, &mut staging, &mut scratch)?;

        let blocks = var.block_count(block_size);
        debug!(
            var = var.id().as_u32(),
            bytes = var.byte_size(),
            blocks,
            committed,
            layer = position.layer,
            "variable diffed"
        );

        outcome.logical_bytes += var.byte_size();
        outcome.blocks_total += blocks;
        outcome.blocks_committed += committed;
        outcome.payload_bytes += committed * block_size;
        outcome.hashes.push(hashes);
    }

    outcome.file_bytes = staging.finish()?;
    Ok(outcome)
}

fn diff_variable(
    var: &Variable,
    position: LayerPosition,
    block_size: u64,
    digester: &dyn BlockDigester,
    staging: &mut Staging<'_>,
    scratch: &mut [u8],
) -> CoreResult<(BlockHashes, u64)> {
    let byte_size = var.byte_size();
    let blocks = var.block_count(block_size);
    let buffer = var.buffer().read();

    if (buffer.len() as u64) < byte_size {
        return Err(CoreError::invalid_argument(format!(
            "buffer of {} shrank to {} bytes, {byte_size} registered",
            var.id(),
            buffer.len()
        )));
    }

    if position.is_base() {
        let header = BaseHeader {
            id: var.id(),
            byte_size,
        };
        staging.push(&header.encode()?)?;
    }

    let width = digester.width();
    let mut hashes = BlockHashes::with_capacity(width, blocks as usize);
    let mut committed = 0;

    for index in 0..blocks {
        let start = index * block_size;
        let end = (start + block_size).min(byte_size);
        let logical = &buffer[start as usize..end as usize];

        let block: &[u8] = if logical.len() as u64 == block_size {
            logical
        } else {
            scratch.fill(0);
            scratch[..logical.len()].copy_from_slice(logical);
            &scratch[..]
        };

        let sink = hashes.sink();
        let digest_at = sink.len();
        digester.digest_into(block, sink);
        let digest = &sink[digest_at..];

        let commit = position.is_base()
            || start >= var.hashed_byte_size()
            || var.hashes().get(index as usize) != Some(digest);

        if commit {
            if !position.is_base() {
                let meta = BlockMeta {
                    id: var.id(),
                    block_index: index,
                };
                staging.push(&meta.encode()?)?;
            }
            staging.push(block)?;
            committed += 1;
        }
    }

    Ok((hashes, committed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{Crc32Digester, Sha256Digester};
    use crate::format::{BASE_HEADER_SIZE, BLOCK_META_SIZE};
    use crate::types::{shared_buffer, SharedBuffer, VarId};
    use dcp_storage::InMemoryBackend;

    const BLOCK: u64 = 16;

    fn pos(counter: u64) -> LayerPosition {
        LayerPosition::from_counter(counter, 5)
    }

    fn registry_with(bytes: Vec<u8>) -> (Registry, SharedBuffer) {
        let buffer = shared_buffer(bytes);
        let mut registry = Registry::new();
        let len = buffer.read().len();
        registry.protect(0, buffer.clone(), len, 1).unwrap();
        (registry, buffer)
    }

    fn install(registry: &mut Registry, outcome: LayerOutcome) {
        for (var, hashes) in registry.iter_mut().zip(outcome.hashes) {
            var.replace_hashes(hashes);
        }
    }

    #[test]
    fn base_layer_writes_header_and_every_block() {
        let (registry, _) = registry_with((0..40).collect());
        let mut backend = InMemoryBackend::new();

        let outcome = write_layer(&registry, pos(0), BLOCK, &Sha256Digester, &mut backend).unwrap();

        assert_eq!(outcome.blocks_total, 3);
        assert_eq!(outcome.blocks_committed, 3);
        assert_eq!(outcome.logical_bytes, 40);
        let data = backend.data();
        assert_eq!(data.len(), BASE_HEADER_SIZE + 48);
        assert_eq!(outcome.file_bytes, data.len() as u64);
        assert_eq!(&data[4..12], &40u64.to_le_bytes());
        // Tail block is zero-padded.
        assert_eq!(&data[BASE_HEADER_SIZE + 40..], &[0u8; 8]);
    }

    #[test]
    fn unchanged_delta_writes_nothing() {
        let (mut registry, _) = registry_with(vec![7; 64]);
        let mut backend = InMemoryBackend::new();

        let outcome = write_layer(&registry, pos(0), BLOCK, &Crc32Digester, &mut backend).unwrap();
        install(&mut registry, outcome);
        let base_len = backend.size().unwrap();

        let outcome = write_layer(&registry, pos(1), BLOCK, &Crc32Digester, &mut backend).unwrap();
        assert_eq!(outcome.blocks_committed, 0);
        assert_eq!(outcome.payload_bytes, 0);
        assert_eq!(backend.size().unwrap(), base_len);
    }

    #[test]
    fn single_byte_change_commits_only_its_block() {
        let (mut registry, buffer) = registry_with(vec![0; 64]);
        let mut backend = InMemoryBackend::new();

        let outcome = write_layer(&registry, pos(0), BLOCK, &Sha256Digester, &mut backend).unwrap();
        install(&mut registry, outcome);
        let base_len = backend.size().unwrap() as usize;

        buffer.write()[35] = 0xAB;
        let outcome = write_layer(&registry, pos(1), BLOCK, &Sha256Digester, &mut backend).unwrap();
        assert_eq!(outcome.blocks_committed, 1);

        let data = backend.data();
        let mut meta = [0u8; BLOCK_META_SIZE];
        meta.copy_from_slice(&data[base_len..base_len + BLOCK_META_SIZE]);
        assert_eq!(
            BlockMeta::decode(&meta),
            BlockMeta {
                id: VarId::new(0),
                block_index: 2
            }
        );
        assert_eq!(data[base_len + BLOCK_META_SIZE + 3], 0xAB);
    }

    #[test]
    fn growth_commits_blocks_past_old_size() {
        let (mut registry, buffer) = registry_with(vec![1; 32]);
        let mut backend = InMemoryBackend::new();

        let outcome = write_layer(&registry, pos(0), BLOCK, &Sha256Digester, &mut backend).unwrap();
        install(&mut registry, outcome);

        buffer.write().resize(64, 0);
        registry.protect(0, buffer.clone(), 64, 1).unwrap();

        let outcome = write_layer(&registry, pos(1), BLOCK, &Sha256Digester, &mut backend).unwrap();
        // Two new zero blocks, committed although nothing was hashed there.
        assert_eq!(outcome.blocks_committed, 2);
        assert_eq!(outcome.blocks_total, 4);
    }

    #[test]
    fn invalidated_history_commits_everything() {
        let (mut registry, _) = registry_with(vec![3; 48]);
        let mut backend = InMemoryBackend::new();

        let outcome = write_layer(&registry, pos(0), BLOCK, &Sha256Digester, &mut backend).unwrap();
        install(&mut registry, outcome);
        registry.iter_mut().for_each(Variable::invalidate_hashes);

        let outcome = write_layer(&registry, pos(1), BLOCK, &Sha256Digester, &mut backend).unwrap();
        assert_eq!(outcome.blocks_committed, 3);
    }

    #[test]
    fn shrunk_buffer_rejected() {
        let (registry, buffer) = registry_with(vec![0; 32]);
        buffer.write().truncate(10);
        let mut backend = InMemoryBackend::new();

        let result = write_layer(&registry, pos(0), BLOCK, &Sha256Digester, &mut backend);
        assert!(matches!(result, Err(CoreError::InvalidArgument { .. })));
    }

    #[test]
    fn oversized_id_rejected_before_writing() {
        let mut registry = Registry::new();
        registry
            .protect((MAX_VAR_ID + 1) as i32, shared_buffer(vec![0; 4]), 4, 1)
            .unwrap();
        let mut backend = InMemoryBackend::new();

        let result = write_layer(&registry, pos(0), BLOCK, &Sha256Digester, &mut backend);
        assert!(matches!(result, Err(CoreError::Overflow { .. })));
        assert_eq!(backend.size().unwrap(), 0);
    }

    #[test]
    fn staging_flushes_large_layers() {
        let (registry, _) = registry_with(vec![9; 3 * STAGING_CAPACITY + 5]);
        let mut backend = InMemoryBackend::new();

        let outcome = write_layer(&registry, pos(0), 4096, &Crc32Digester, &mut backend).unwrap();
        assert_eq!(outcome.file_bytes, backend.size().unwrap());
        assert_eq!(
            backend.size().unwrap(),
            BASE_HEADER_SIZE as u64 + outcome.blocks_total * 4096
        );
    }
}
