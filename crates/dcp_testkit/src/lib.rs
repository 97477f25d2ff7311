//! # DCP Testkit
//!
//! Test utilities for the differential checkpointing engine.
//!
//! This crate provides:
//! - Test fixtures: temporary runs and integer buffer helpers
//! - Property-based generators for buffer mutation schedules
//! - Cross-crate scenarios (checkpoint, rollover, growth, multi-rank,
//!   restart recovery) usable from any test
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dcp_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_run() {
//!     with_temp_run(|dcp| {
//!         let data = sequence_buffer(64);
//!         dcp.protect(0, data.clone(), 64, 4).unwrap();
//!         dcp.checkpoint("0").unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
