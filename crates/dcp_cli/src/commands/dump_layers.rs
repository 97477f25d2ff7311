//! Dump layers command implementation.

use dcp_core::{scan_layers, LayerRecord, RunDir};
use serde::Serialize;
use std::path::Path;

/// Layered file record representation for output.
#[derive(Debug, Serialize)]
pub struct LayerRecordInfo {
    /// Offset in the layered file.
    pub offset: u64,
    /// Record kind (`base` or `delta`).
    pub kind: &'static str,
    /// Variable id.
    pub id: u32,
    /// Logical size (base records only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_size: Option<u64>,
    /// Block index (delta records only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
}

impl From<LayerRecord> for LayerRecordInfo {
    fn from(record: LayerRecord) -> Self {
        match record {
            LayerRecord::Base { offset, header } => Self {
                offset,
                kind: "base",
                id: header.id.as_u32(),
                byte_size: Some(header.byte_size),
                block_index: None,
            },
            LayerRecord::Delta { offset, meta } => Self {
                offset,
                kind: "delta",
                id: meta.id.as_u32(),
                byte_size: None,
                block_index: Some(meta.block_index),
            },
        }
    }
}

/// Runs the dump-layers command.
pub fn run(
    path: &Path,
    rank: u32,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = read_records(path, rank, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
        }
    }

    Ok(())
}

/// Lists the committed records of `rank`'s current layered file.
pub fn read_records(
    path: &Path,
    rank: u32,
    limit: Option<usize>,
) -> Result<Vec<LayerRecordInfo>, Box<dyn std::error::Error>> {
    let dir = RunDir::open(path, false)?;
    let metadata = dir
        .load_metadata(rank)?
        .ok_or_else(|| format!("No checkpoint metadata for rank {rank} in {}", path.display()))?;
    let backend = dir.open_layered_read(metadata.file_id, rank)?;

    let records = scan_layers(
        &backend,
        metadata.layered_file_size,
        metadata.variables.len(),
        metadata.block_size,
    )?;

    Ok(records
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(LayerRecordInfo::from)
        .collect())
}

fn print_text_output(records: &[LayerRecordInfo]) {
    println!("Layer Records ({} total)", records.len());
    println!("========================");
    println!();

    for record in records {
        print!("@{:08}: {:<6} id={}", record.offset, record.kind, record.id);
        if let Some(size) = record.byte_size {
            print!(" size={size}");
        }
        if let Some(index) = record.block_index {
            print!(" block={index}");
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcp_core::{shared_buffer, Config, Dcp, LocalGroup, BASE_HEADER_SIZE};
    use tempfile::tempdir;

    #[test]
    fn dump_lists_base_and_delta_records() {
        let dir = tempdir().unwrap();
        let config = Config::default()
            .base_dir(dir.path())
            .block_size(16)
            .run_id(5);
        let mut dcp = Dcp::init(&LocalGroup, config).unwrap();
        let buffer = shared_buffer(vec![0; 48]);
        dcp.protect(2, buffer.clone(), 48, 1).unwrap();
        dcp.checkpoint("base").unwrap();
        buffer.write()[40] = 1;
        dcp.checkpoint("delta").unwrap();

        let records = read_records(&dir.path().join("5"), 0, None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, "base");
        assert_eq!(records[0].byte_size, Some(48));
        assert_eq!(records[1].kind, "delta");
        assert_eq!(records[1].block_index, Some(2));
        assert_eq!(records[1].offset, (BASE_HEADER_SIZE + 48) as u64);

        let limited = read_records(&dir.path().join("5"), 0, Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }
}
