//! CLI command implementations.

pub mod demo;
pub mod dump_layers;
pub mod inspect;
