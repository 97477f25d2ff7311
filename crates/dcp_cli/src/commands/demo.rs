//! Demo command implementation.
//!
//! Protects two integer arrays of 20 and 40 blocks, checkpoints eight times
//! (mutating three elements before the seventh and restoring them before the
//! eighth), zeroes both arrays, recovers and checks the element sums.

use dcp_core::{shared_buffer, Config, Dcp, DigestKind, LocalGroup, SharedBuffer};
use std::path::Path;
use tracing::info;

const ELEM_SIZE: usize = std::mem::size_of::<i32>();

/// Result of a demo run.
#[derive(Debug)]
pub struct DemoOutcome {
    /// Recovered sum of the first array.
    pub sum_1: i64,
    /// Expected sum of the first array.
    pub expected_1: i64,
    /// Recovered sum of the second array.
    pub sum_2: i64,
    /// Expected sum of the second array.
    pub expected_2: i64,
    /// Blocks committed by the mutating checkpoint.
    pub mutated_blocks: u64,
}

impl DemoOutcome {
    /// True if both sums match.
    #[must_use]
    pub fn success(&self) -> bool {
        self.sum_1 == self.expected_1 && self.sum_2 == self.expected_2
    }
}

/// Runs the demo command.
pub fn run(
    base_dir: &Path,
    hash: DigestKind,
    block_size: u64,
    stack_size: u64,
) -> Result<DemoOutcome, Box<dyn std::error::Error>> {
    if block_size == 0 || block_size % ELEM_SIZE as u64 != 0 {
        return Err(format!("block size {block_size} is not a multiple of {ELEM_SIZE}").into());
    }
    let per_block = (block_size / ELEM_SIZE as u64) as usize;
    let n1 = 20 * per_block;
    let n2 = 40 * per_block;

    let config = Config::default()
        .base_dir(base_dir)
        .block_size(block_size)
        .stack_size(stack_size)
        .digest(hash);
    let mut dcp = Dcp::init(&LocalGroup, config)?;

    let data_1 = shared_buffer(sequence(n1));
    let data_2 = shared_buffer(sequence(n2));
    dcp.protect(0, data_1.clone(), n1, ELEM_SIZE)?;
    dcp.protect(1, data_2.clone(), n2, ELEM_SIZE)?;
    info!(n1, n2, per_block, "protected two arrays");

    for step in 0..6 {
        dcp.checkpoint(&step.to_string())?;
    }

    set(&data_1, 0, -1);
    set(&data_2, per_block, -1);
    set(&data_2, 10 * per_block, -1);
    let mutated = dcp.checkpoint("6")?;

    set(&data_1, 0, 1);
    set(&data_2, per_block, per_block as i32 + 1);
    set(&data_2, 10 * per_block, 10 * per_block as i32 + 1);
    dcp.checkpoint("7")?;

    data_1.write().fill(0);
    data_2.write().fill(0);
    dcp.recover()?;

    let outcome = DemoOutcome {
        sum_1: sum(&data_1),
        expected_1: triangular(n1),
        sum_2: sum(&data_2),
        expected_2: triangular(n2),
        mutated_blocks: mutated.blocks_committed,
    };

    println!(
        "[{}] -> check_1:[{}|{}] , check_2:[{}|{}]",
        if outcome.success() { "SUCCESS" } else { "FAILURE" },
        outcome.sum_1,
        outcome.expected_1,
        outcome.sum_2,
        outcome.expected_2
    );
    println!("Run directory:     {}", dcp.run_dir().path().display());
    println!("Checkpoints:       {}", dcp.stats().checkpoints());
    println!("Blocks committed:  {}", dcp.stats().blocks_committed());
    println!("Bytes written:     {}", dcp.stats().bytes_written());
    println!("Files retired:     {}", dcp.stats().files_retired());

    Ok(outcome)
}

fn sequence(n: usize) -> Vec<u8> {
    (1..=n as i32).flat_map(i32::to_le_bytes).collect()
}

fn set(buffer: &SharedBuffer, index: usize, value: i32) {
    let start = index * ELEM_SIZE;
    buffer.write()[start..start + ELEM_SIZE].copy_from_slice(&value.to_le_bytes());
}

fn sum(buffer: &SharedBuffer) -> i64 {
    buffer
        .read()
        .chunks_exact(ELEM_SIZE)
        .map(|chunk| i64::from(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])))
        .sum()
}

fn triangular(n: usize) -> i64 {
    let n = n as i64;
    n * (n + 1) / 2
}
