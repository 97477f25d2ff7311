//! # DCP Core
//!
//! Differential checkpointing engine for long-running parallel computations.
//!
//! Each process registers in-memory buffers and periodically checkpoints
//! them to local storage. Buffers are split into fixed-size blocks; only
//! blocks whose digest changed since the previous checkpoint are written.
//! Checkpoints rotate through a stack of layers per file: one full base
//! layer followed by `stack_size - 1` delta layers, after which a new file
//! starts and the previous one is deleted.
//!
//! This crate provides:
//! - [`Dcp`], the per-rank engine (`protect`, `checkpoint`, `recover`)
//! - The variable registry and per-block digest history
//! - Pluggable block digests (SHA-256, CRC-32)
//! - The layered file format and the metadata record
//! - Run-directory management with atomic metadata replacement
//!
//! ## Example
//!
//! ```rust,no_run
//! use dcp_core::{shared_buffer, Config, Dcp, LocalGroup};
//!
//! # fn main() -> dcp_core::CoreResult<()> {
//! let mut dcp = Dcp::init(&LocalGroup, Config::default().base_dir("/tmp/dcp"))?;
//!
//! let data = shared_buffer(vec![0u8; 1024]);
//! dcp.protect(0, data.clone(), 256, 4)?;
//!
//! data.write()[0] = 42;
//! let report = dcp.checkpoint("step-1")?;
//! assert!(report.blocks_committed > 0);
//!
//! dcp.recover()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
mod digest;
mod dir;
mod engine;
mod error;
mod format;
mod group;
mod layer;
mod metadata;
mod recovery;
mod registry;
mod stats;
mod types;

pub use checkpoint::{check_addressable, write_layer, LayerOutcome};
pub use config::{
    Config, ENV_BLOCK_SIZE, ENV_DIR, ENV_HASH_METHOD, ENV_NODE_SIZE, ENV_RUN_ID, ENV_STACK_SIZE,
};
pub use digest::{
    BlockDigester, Crc32Digester, DigestKind, Md5Digester, Sha256Digester, CRC32_DIGEST_WIDTH,
    MD5_DIGEST_WIDTH, SHA256_DIGEST_WIDTH,
};
pub use dir::RunDir;
pub use engine::Dcp;
pub use error::{CoreError, CoreResult};
pub use format::{
    scan_layers, BaseHeader, BlockMeta, LayerReader, LayerRecord, BASE_HEADER_SIZE,
    BLOCK_META_SIZE,
};
pub use group::{timestamp_millis, ExecInfo, FixedGroup, LocalGroup, ProcessGroup};
pub use layer::LayerPosition;
pub use metadata::{Metadata, VariableEntry, METADATA_ENTRY_SIZE, METADATA_FIXED_SIZE};
pub use recovery::recover_layers;
pub use registry::{BlockHashes, Registration, Registry, Variable};
pub use stats::{CheckpointReport, DcpStats, RecoveryReport};
pub use types::{
    block_count, padded_size, shared_buffer, SharedBuffer, VarId, MAX_BLOCK_IDX, MAX_VAR_ID,
};

/// Crate version, recorded by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
