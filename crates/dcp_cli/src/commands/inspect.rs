//! Inspect command implementation.

use dcp_core::{block_count, RunDir};
use dcp_storage::StorageBackend;
use serde::Serialize;
use std::path::Path;

/// Checkpoint inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Run directory path.
    pub path: String,
    /// Inspected rank.
    pub rank: u32,
    /// Layered file holding the latest checkpoint.
    pub file_id: u64,
    /// Block size the file was written with.
    pub block_size: u64,
    /// Bytes of the layered file covered by completed checkpoints.
    pub committed_size: u64,
    /// Bytes of the layered file on disk.
    pub file_size: u64,
    /// Sum of the variables' logical sizes.
    pub logical_size: u64,
    /// Recorded variables.
    pub variables: Vec<VariableInfo>,
}

/// One recorded variable.
#[derive(Debug, Serialize)]
pub struct VariableInfo {
    /// Variable id.
    pub id: u32,
    /// Logical size in bytes.
    pub byte_size: u64,
    /// Number of blocks.
    pub blocks: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, rank: u32, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, rank)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects the inspection result for `rank` of the run at `path`.
pub fn inspect(path: &Path, rank: u32) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let dir = RunDir::open(path, false)?;
    let metadata = dir
        .load_metadata(rank)?
        .ok_or_else(|| format!("No checkpoint metadata for rank {rank} in {}", path.display()))?;

    let file_size = match dir.open_layered_read(metadata.file_id, rank) {
        Ok(backend) => backend.size()?,
        Err(_) => 0,
    };

    let variables = metadata
        .variables
        .iter()
        .map(|entry| VariableInfo {
            id: entry.id.as_u32(),
            byte_size: entry.byte_size,
            blocks: block_count(entry.byte_size, metadata.block_size),
        })
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        rank,
        file_id: metadata.file_id,
        block_size: metadata.block_size,
        committed_size: metadata.layered_file_size,
        file_size,
        logical_size: metadata.logical_size,
        variables,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("DCP Checkpoint Inspection");
    println!("=========================");
    println!();
    println!("Path:           {}", result.path);
    println!("Rank:           {}", result.rank);
    println!("File id:        {}", result.file_id);
    println!("Block size:     {} bytes", result.block_size);
    println!();
    println!("Layered file:");
    println!("  Committed:    {} bytes", result.committed_size);
    println!("  On disk:      {} bytes", result.file_size);
    if result.file_size < result.committed_size {
        println!("  WARNING: file is shorter than the committed size");
    } else if result.file_size > result.committed_size {
        println!(
            "  Uncommitted tail: {} bytes",
            result.file_size - result.committed_size
        );
    }
    println!();
    println!("Variables ({}):", result.variables.len());
    println!("  Logical size: {} bytes", result.logical_size);
    for var in &result.variables {
        println!(
            "  id {:>6}: {:>12} bytes, {:>8} blocks",
            var.id, var.byte_size, var.blocks
        );
    }
}
