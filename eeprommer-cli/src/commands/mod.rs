//! Command implementations.
//!
//! Each group of subcommands is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod device;
pub(crate) mod memory;
pub(crate) mod ports;
