//! Breakpoint registry and exit-reason signaling shared between an emulation engine and the
//! driver that controls it.
//!
//! The engine consults the [`BreakpointRegistry`] while translating guest code, and on a hit (or
//! on the guest executing the synchronization backdoor) records an [`ExitReason`] in the
//! [`ExitContext`] and unwinds its dispatch loop with the returned [`ExitSignal`]. The driver then
//! reads the reason back, acts on it and resumes execution from
//! [`ExitReason::resume_address`].
//!
//! Everything lives in one [`ExitContext`] that is shared (usually behind an `Arc`) between the
//! driver, the engine and any watchdog threads.

#![forbid(unsafe_code)]

pub mod breakpoints;
pub mod context;
pub mod flags;
pub mod reason;
pub mod signal;

pub use breakpoints::{BreakpointRegistry, CodeInvalidator, NoopInvalidator};
pub use context::ExitContext;
pub use flags::SuspensionFlags;
pub use reason::{CpuId, ExitReason, ExitReasonKind};
pub use signal::{ExitSignal, EXCP_EXIT};

/// Guest virtual address.
pub type GuestAddr = u64;
