//! CLI command implementations.

pub mod qwc;
pub mod simulate;
