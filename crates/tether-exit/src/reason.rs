use std::fmt;

use crate::GuestAddr;

/// Non-owning handle to a virtual CPU.
///
/// This is an index into the engine's vCPU collection. The exit context never owns or
/// dereferences the CPU; the engine guarantees the index stays valid for the duration of a
/// hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuId(pub usize);

impl CpuId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Why the engine stopped, with the data specific to each cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReasonKind {
    /// Execution reached an address present in the breakpoint registry.
    Breakpoint { addr: GuestAddr },
    /// The guest executed the synchronization backdoor instruction.
    SyncBackdoor,
    /// An exit was requested from outside the execution loop (see
    /// [`ExitContext::request_exit_asap`](crate::ExitContext::request_exit_asap)).
    Requested,
}

impl ExitReasonKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExitReasonKind::Breakpoint { .. } => "breakpoint",
            ExitReasonKind::SyncBackdoor => "sync-backdoor",
            ExitReasonKind::Requested => "requested",
        }
    }
}

/// The record of the most recent suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReason {
    pub kind: ExitReasonKind,
    /// vCPU that triggered the exit.
    pub triggering_cpu: CpuId,
    /// PC that should be loaded into `triggering_cpu` when execution re-enters.
    pub resume_address: GuestAddr,
}

impl ExitReason {
    pub fn breakpoint(cpu: CpuId, pc: GuestAddr) -> Self {
        Self {
            kind: ExitReasonKind::Breakpoint { addr: pc },
            triggering_cpu: cpu,
            resume_address: pc,
        }
    }

    pub fn sync_backdoor(cpu: CpuId, next_pc: GuestAddr) -> Self {
        Self {
            kind: ExitReasonKind::SyncBackdoor,
            triggering_cpu: cpu,
            resume_address: next_pc,
        }
    }

    pub fn requested(cpu: CpuId, next_pc: GuestAddr) -> Self {
        Self {
            kind: ExitReasonKind::Requested,
            triggering_cpu: cpu,
            resume_address: next_pc,
        }
    }

    /// Address of the breakpoint that fired, if this is a breakpoint exit.
    pub fn breakpoint_addr(&self) -> Option<GuestAddr> {
        match self.kind {
            ExitReasonKind::Breakpoint { addr } => Some(addr),
            ExitReasonKind::SyncBackdoor | ExitReasonKind::Requested => None,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ExitReasonKind::Breakpoint { addr } => write!(
                f,
                "{} hit breakpoint {addr:#x} (resume at {:#x})",
                self.triggering_cpu, self.resume_address
            ),
            kind => write!(
                f,
                "{} exited ({}), resume at {:#x}",
                self.triggering_cpu,
                kind.name(),
                self.resume_address
            ),
        }
    }
}
