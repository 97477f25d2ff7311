//! Test fixtures and run helpers.
//!
//! Provides temporary checkpoint runs that clean up after themselves and
//! helpers for treating shared buffers as `i32` arrays.

use dcp_core::{shared_buffer, Config, Dcp, FixedGroup, LocalGroup, SharedBuffer};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Run id used by every fixture run.
pub const TEST_RUN_ID: u64 = 1;

/// A checkpoint engine writing into a temporary directory.
pub struct TestRun {
    /// The engine instance.
    pub dcp: Dcp,
    config: Config,
    temp_dir: TempDir,
}

impl TestRun {
    /// Creates a run with the default configuration.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates a run whose configuration is adjusted by `configure`.
    ///
    /// The base directory and run id are fixed by the fixture.
    pub fn with_config(configure: impl FnOnce(Config) -> Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = configure(Config::default())
            .base_dir(temp_dir.path())
            .run_id(TEST_RUN_ID);
        let dcp = Dcp::init(&LocalGroup, config.clone()).expect("Failed to initialize engine");
        Self {
            dcp,
            config,
            temp_dir,
        }
    }

    /// Creates a run with the given block and stack sizes.
    pub fn sized(block_size: u64, stack_size: u64) -> Self {
        Self::with_config(|config| config.block_size(block_size).stack_size(stack_size))
    }

    /// Simulates a process restart: returns a fresh engine on the same run
    /// directory, with nothing registered.
    pub fn restart(&self) -> Dcp {
        Dcp::init(&LocalGroup, self.config.clone()).expect("Failed to reinitialize engine")
    }

    /// Creates engine `rank` of a `size`-rank group sharing this run.
    pub fn rank(&self, rank: u32, size: u32) -> Dcp {
        Dcp::init(&FixedGroup::new(rank, size, TEST_RUN_ID), self.config.clone())
            .expect("Failed to initialize rank")
    }

    /// The base directory.
    pub fn base_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// The run directory (`<base_dir>/<run_id>`).
    pub fn run_path(&self) -> PathBuf {
        self.temp_dir.path().join(TEST_RUN_ID.to_string())
    }

    /// The configuration the run was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Default for TestRun {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestRun {
    type Target = Dcp;

    fn deref(&self) -> &Self::Target {
        &self.dcp
    }
}

impl std::ops::DerefMut for TestRun {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.dcp
    }
}

/// Runs a test with a temporary engine.
///
/// # Example
///
/// ```rust,ignore
/// use dcp_testkit::with_temp_run;
///
/// #[test]
/// fn my_test() {
///     with_temp_run(|dcp| {
///         dcp.checkpoint("empty").unwrap();
///     });
/// }
/// ```
pub fn with_temp_run<F, R>(f: F) -> R
where
    F: FnOnce(&mut Dcp) -> R,
{
    let mut run = TestRun::new();
    f(&mut run.dcp)
}

/// Builds a buffer holding `values` as little-endian `i32`s.
pub fn i32_buffer(values: impl IntoIterator<Item = i32>) -> SharedBuffer {
    shared_buffer(values.into_iter().flat_map(i32::to_le_bytes).collect())
}

/// Builds a buffer holding `1, 2, ..., n`.
pub fn sequence_buffer(n: usize) -> SharedBuffer {
    i32_buffer(1..=n as i32)
}

/// Reads a buffer as `i32`s.
pub fn read_i32s(buffer: &SharedBuffer) -> Vec<i32> {
    buffer
        .read()
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Reads element `index` of an `i32` buffer.
pub fn read_i32(buffer: &SharedBuffer, index: usize) -> i32 {
    let data = buffer.read();
    let start = index * 4;
    i32::from_le_bytes([data[start], data[start + 1], data[start + 2], data[start + 3]])
}

/// Writes element `index` of an `i32` buffer.
pub fn write_i32(buffer: &SharedBuffer, index: usize, value: i32) {
    let start = index * 4;
    buffer.write()[start..start + 4].copy_from_slice(&value.to_le_bytes());
}

/// Zeroes a buffer.
pub fn zero(buffer: &SharedBuffer) {
    buffer.write().fill(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_creates_run_dir() {
        let run = TestRun::new();
        assert!(run.run_path().is_dir());
        assert_eq!(run.exec().run_id, TEST_RUN_ID);
    }

    #[test]
    fn test_with_temp_run() {
        let counter = with_temp_run(|dcp| {
            dcp.protect(0, sequence_buffer(8), 8, 4).unwrap();
            dcp.checkpoint("0").unwrap();
            dcp.counter()
        });
        assert_eq!(counter, 1);
    }

    #[test]
    fn test_i32_helpers() {
        let buffer = sequence_buffer(5);
        assert_eq!(read_i32s(&buffer), vec![1, 2, 3, 4, 5]);
        write_i32(&buffer, 2, -7);
        assert_eq!(read_i32(&buffer, 2), -7);
        zero(&buffer);
        assert_eq!(read_i32s(&buffer), vec![0; 5]);
    }

    #[test]
    fn test_sized_run_config() {
        let run = TestRun::sized(64, 3);
        assert_eq!(run.config().block_size, 64);
        assert_eq!(run.config().stack_size, 3);
    }
}
