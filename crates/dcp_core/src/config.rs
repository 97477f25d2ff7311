//! Engine configuration.

use crate::digest::DigestKind;
use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::path::PathBuf;

/// Environment variable selecting the digest strategy.
pub const ENV_HASH_METHOD: &str = "DCP_HASH_METHOD";
/// Environment variable setting the number of ranks per node.
pub const ENV_NODE_SIZE: &str = "NODE_SIZE";
/// Environment variable overriding the block size.
pub const ENV_BLOCK_SIZE: &str = "DCP_BLOCK_SIZE";
/// Environment variable overriding the stack size.
pub const ENV_STACK_SIZE: &str = "DCP_STACK_SIZE";
/// Environment variable overriding the base directory.
pub const ENV_DIR: &str = "DCP_DIR";
/// Environment variable reattaching to an existing run.
pub const ENV_RUN_ID: &str = "DCP_RUN_ID";

/// Configuration for initializing a checkpointing engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory under which the per-run directory is created.
    pub base_dir: PathBuf,

    /// Bytes per hashed and written block.
    pub block_size: u64,

    /// Layers per layered file (one base plus `stack_size - 1` deltas).
    pub stack_size: u64,

    /// Digest strategy for change detection.
    pub digest: DigestKind,

    /// Ranks per node; the group size must be a multiple of it.
    pub node_size: u32,

    /// Fixed run id. When unset, rank 0's clock reading is broadcast.
    pub run_id: Option<u64>,

    /// Whether to fsync the run directory after renames and deletions.
    pub sync_directory: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            block_size: 128,
            stack_size: 5,
            digest: DigestKind::Sha256,
            node_size: 1,
            run_id: None,
            sync_directory: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from defaults overlaid with the environment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a variable is set to an unparsable value.
    pub fn from_env() -> CoreResult<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlays values looked up through `lookup` (keys are the `ENV_*` names).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a value cannot be parsed.
    pub fn with_overrides<F>(mut self, lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(method) = lookup(ENV_HASH_METHOD) {
            self.digest = method.parse()?;
        }
        if let Some(value) = lookup(ENV_NODE_SIZE) {
            self.node_size = parse_number(ENV_NODE_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_BLOCK_SIZE) {
            self.block_size = parse_number(ENV_BLOCK_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_STACK_SIZE) {
            self.stack_size = parse_number(ENV_STACK_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_DIR) {
            self.base_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_RUN_ID) {
            self.run_id = Some(parse_number(ENV_RUN_ID, &value)?);
        }
        Ok(self)
    }

    /// Sets the base directory.
    #[must_use]
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Sets the block size.
    #[must_use]
    pub const fn block_size(mut self, size: u64) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the stack size.
    #[must_use]
    pub const fn stack_size(mut self, size: u64) -> Self {
        self.stack_size = size;
        self
    }

    /// Sets the digest strategy.
    #[must_use]
    pub const fn digest(mut self, kind: DigestKind) -> Self {
        self.digest = kind;
        self
    }

    /// Sets the node size.
    #[must_use]
    pub const fn node_size(mut self, size: u32) -> Self {
        self.node_size = size;
        self
    }

    /// Pins the run id instead of broadcasting a timestamp.
    #[must_use]
    pub const fn run_id(mut self, id: u64) -> Self {
        self.run_id = Some(id);
        self
    }

    /// Sets whether to fsync the run directory.
    #[must_use]
    pub const fn sync_directory(mut self, value: bool) -> Self {
        self.sync_directory = value;
        self
    }

    /// Checks the configuration against a process group of `group_size` ranks.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on a zero block or stack size, or when the
    /// group size is not a multiple of the node size.
    pub fn validate(&self, group_size: u32) -> CoreResult<()> {
        if self.block_size == 0 {
            return Err(CoreError::invalid_argument("block size must be positive"));
        }
        if self.stack_size == 0 {
            return Err(CoreError::invalid_argument("stack size must be positive"));
        }
        if self.node_size == 0 || group_size % self.node_size != 0 {
            return Err(CoreError::invalid_argument(format!(
                "number of processes '{group_size}' has to be a multiple of the node size '{}'",
                self.node_size
            )));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> CoreResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::invalid_argument(format!("{key}: invalid value '{value}'")))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "base dir: {}, block size: {}, stack size: {}, hashing method: {}, node size: {}",
            self.base_dir.display(),
            self.block_size,
            self.stack_size,
            self.digest,
            self.node_size
        )
    }
}
