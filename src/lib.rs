//! Breakpoint and exit signalling for a MicroBlaze fuzzing emulator.
//!
//! This crate re-exports the workspace members so harnesses can depend on a single package.
#![forbid(unsafe_code)]

pub use tether_exit as exit;
pub use tether_harness as harness;
pub use tether_mb as mb;
