//! The control-transfer signal.
//!
//! Engines unwind from guest code back to their dispatch loop by returning an [`ExitSignal`]
//! through every frame between the instruction that triggered the exit and the loop itself. The
//! value can only be produced by [`ExitContext`](crate::ExitContext) after it has recorded an
//! exit reason, so a dispatch loop that receives one always has a reason to hand to the driver.

use crate::reason::CpuId;

/// Engine-private exception code reserved for exits.
///
/// Engines that keep a numeric exception index alongside architectural exceptions must reserve
/// this value and never deliver it to the guest. It is chosen far outside any architectural
/// vector range.
pub const EXCP_EXIT: u32 = 0xf477_5747;

/// Token proving an exit has been recorded and the calling vCPU must stop executing.
///
/// Not `Clone`: each recorded exit unwinds exactly one dispatch loop.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an exit signal must be propagated to the dispatch loop"]
pub struct ExitSignal {
    cpu: CpuId,
}

impl ExitSignal {
    pub(crate) fn new(cpu: CpuId) -> Self {
        Self { cpu }
    }

    /// The reserved exception code carried by every exit signal.
    pub fn code(&self) -> u32 {
        EXCP_EXIT
    }

    /// vCPU whose execution is being unwound.
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }
}
