//! # DCP Storage
//!
//! Byte-store backends for the differential checkpointing engine.
//!
//! Backends are **opaque byte stores**: they know nothing about base layers,
//! delta records or metadata. `dcp_core` owns all format interpretation.
//!
//! ## Design Principles
//!
//! - Append-only writes, positional reads, explicit sync
//! - Short writes are retried a bounded number of times, then escalated
//! - Must be `Send + Sync`
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and dry runs
//! - [`FileBackend`] - For layered checkpoint files on local storage
//!
//! ## Example
//!
//! ```rust
//! use dcp_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"block").unwrap();
//! let data = backend.read_at(offset, 5).unwrap();
//! assert_eq!(&data, b"block");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, MAX_WRITE_ATTEMPTS};
pub use memory::InMemoryBackend;
