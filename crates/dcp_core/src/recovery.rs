//! Recovery of registered buffers from a layered file.
//!
//! Recovery runs in two phases. The plan phase reads the base layer and every
//! delta record up to the recorded file size into one staging image per
//! variable, resolving each id against the registry. The apply phase copies
//! the images into the live buffers. Any mismatch or truncation is reported
//! before a single buffer is written.

use crate::error::{CoreError, CoreResult};
use crate::format::LayerReader;
use crate::metadata::Metadata;
use crate::registry::Registry;
use crate::stats::RecoveryReport;
use crate::types::{padded_size, VarId};
use dcp_storage::StorageBackend;
use std::collections::HashMap;
use tracing::debug;

/// Restored content of one variable, not yet applied.
#[derive(Debug)]
struct Staged {
    id: VarId,
    image: Vec<u8>,
}

/// Fully decoded recovery, ready to apply.
#[derive(Debug)]
struct RecoveryPlan {
    staged: Vec<Staged>,
    base_bytes: u64,
    delta_blocks: u64,
}

/// Restores every variable recorded in `metadata` from `backend`.
///
/// # Errors
///
/// Returns `RecoveryMismatch` if the registered variables differ from the
/// recorded ones in set or order, a base header disagrees with the metadata, or a buffer cannot hold its recorded
/// size. Returns `InvalidFormat` if the file is shorter than recorded or a
/// record is malformed. On error no buffer has been modified.
pub fn recover_layers(
    metadata: &Metadata,
    backend: &dyn StorageBackend,
    registry: &Registry,
) -> CoreResult<RecoveryReport> {
    let plan = plan(metadata, backend, registry)?;
    let report = RecoveryReport {
        file_id: metadata.file_id,
        variables: plan.staged.len(),
        base_bytes: plan.base_bytes,
        delta_blocks: plan.delta_blocks,
    };
    apply(plan, registry)?;
    Ok(report)
}

fn plan(
    metadata: &Metadata,
    backend: &dyn StorageBackend,
    registry: &Registry,
) -> CoreResult<RecoveryPlan> {
    let block_size = metadata.block_size;
    if block_size == 0 {
        return Err(CoreError::invalid_format("metadata records a zero block size"));
    }

    check_registration(metadata, registry)?;

    let mut reader = LayerReader::new(backend, metadata.layered_file_size)?;
    let mut staged = Vec::with_capacity(metadata.variables.len());
    let mut by_id = HashMap::with_capacity(metadata.variables.len());
    let mut base_bytes = 0;

    for entry in &metadata.variables {
        let header = reader.read_base_header()?;
        if header.id != entry.id {
            return Err(CoreError::recovery_mismatch(format!(
                "base layer holds {} where metadata records {}",
                header.id, entry.id
            )));
        }

        let var = registry.get(entry.id).ok_or_else(|| {
            CoreError::recovery_mismatch(format!(
                "no registered variable with id {}",
                entry.id.as_u32()
            ))
        })?;

        let available = var.buffer().read().len() as u64;
        if available < entry.byte_size {
            return Err(CoreError::recovery_mismatch(format!(
                "buffer of {} holds {available} bytes, checkpoint recorded {}",
                entry.id, entry.byte_size
            )));
        }

        let padded = padded_size(header.byte_size, block_size);
        let copied = padded.min(entry.byte_size);
        let mut image = vec![0u8; to_usize(entry.byte_size)?];
        reader.read_exact(&mut image[..to_usize(copied)?])?;
        reader.skip(padded - copied)?;
        base_bytes += copied;

        debug!(var = entry.id.as_u32(), bytes = copied, "base layer staged");
        by_id.insert(entry.id, staged.len());
        staged.push(Staged {
            id: entry.id,
            image,
        });
    }

    let mut block = vec![0u8; to_usize(block_size)?];
    let mut delta_blocks = 0;

    while !reader.at_end() {
        let meta = reader.read_block_meta()?;
        reader.read_exact(&mut block)?;

        let &index = by_id.get(&meta.id).ok_or_else(|| {
            CoreError::recovery_mismatch(format!(
                "delta block {} references unrecorded variable id {}",
                meta.block_index,
                meta.id.as_u32()
            ))
        })?;
        let target = &mut staged[index];

        let len = target.image.len() as u64;
        let offset = meta.block_index * block_size;
        if offset >= len {
            continue;
        }
        let chunk = block_size.min(len - offset);
        let start = to_usize(offset)?;
        let chunk = to_usize(chunk)?;
        target.image[start..start + chunk].copy_from_slice(&block[..chunk]);
        delta_blocks += 1;
    }

    Ok(RecoveryPlan {
        staged,
        base_bytes,
        delta_blocks,
    })
}

/// Requires the live registry to hold exactly the recorded variables, in the
/// recorded order.
fn check_registration(metadata: &Metadata, registry: &Registry) -> CoreResult<()> {
    if registry.len() != metadata.variables.len() {
        return Err(CoreError::recovery_mismatch(format!(
            "checkpoint records {} variables, {} are registered",
            metadata.variables.len(),
            registry.len()
        )));
    }
    for (index, entry) in metadata.variables.iter().enumerate() {
        match registry.position(entry.id) {
            Some(position) if position == index => {}
            Some(position) => {
                return Err(CoreError::recovery_mismatch(format!(
                    "{} is registered at position {position}, checkpoint records {index}",
                    entry.id
                )))
            }
            None => {
                return Err(CoreError::recovery_mismatch(format!(
                    "no registered variable with id {}",
                    entry.id.as_u32()
                )))
            }
        }
    }
    Ok(())
}

fn apply(plan: RecoveryPlan, registry: &Registry) -> CoreResult<()> {
    for staged in plan.staged {
        let var = registry.get(staged.id).ok_or_else(|| {
            CoreError::recovery_mismatch(format!("{} was unregistered during recovery", staged.id))
        })?;
        let mut buffer = var.buffer().write();
        let target = buffer.get_mut(..staged.image.len()).ok_or_else(|| {
            CoreError::invalid_argument(format!("buffer of {} shrank during recovery", staged.id))
        })?;
        target.copy_from_slice(&staged.image);
    }
    Ok(())
}

fn to_usize(value: u64) -> CoreResult<usize> {
    usize::try_from(value)
        .map_err(|_| CoreError::overflow(format!("{value} bytes exceed the address space")))
}
