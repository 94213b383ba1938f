//! Reference MicroBlaze-subset engine wired to the `tether-exit` protocol.
//!
//! Guest code is translated into blocks that are cached per entry PC. Breakpoint checks are baked
//! into blocks at translation time, which is why the [`BlockCache`] implements
//! [`tether_exit::CodeInvalidator`]: the breakpoint registry flushes affected blocks on every
//! mutation.

#![forbid(unsafe_code)]

pub mod asm;
pub mod config;
pub mod cpu;
pub mod decode;
mod error;
mod exec;
pub mod gdb;
pub mod mem;
pub mod translate;

pub use config::{ConfigError, VmConfig};
pub use cpu::{Msr, Vcpu};
pub use error::VmError;
pub use exec::{RunExit, StepExit, Vm};
pub use mem::{GuestRam, MemError};
pub use translate::{Block, BlockCache, CacheStats};
