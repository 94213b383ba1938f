use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::breakpoints::{BreakpointRegistry, CodeInvalidator};
use crate::flags::SuspensionFlags;
use crate::reason::{CpuId, ExitReason};
use crate::signal::ExitSignal;
use crate::GuestAddr;

/// Shared state of the exit/resume protocol.
///
/// Holds the breakpoint registry, the single exit-reason slot and the suspension flags. There is
/// at most one exit in flight: the driver must consume it (and call [`Self::signal_vm_start`])
/// before any vCPU may record another one. The slot is a synchronous hand-off, not a mailbox.
#[derive(Debug)]
pub struct ExitContext {
    breakpoints: BreakpointRegistry,
    slot: Mutex<Option<ExitReason>>,
    flags: SuspensionFlags,
}

impl ExitContext {
    pub fn new(invalidator: Arc<dyn CodeInvalidator>) -> Self {
        Self {
            breakpoints: BreakpointRegistry::new(invalidator),
            slot: Mutex::new(None),
            flags: SuspensionFlags::new(),
        }
    }

    pub fn breakpoints(&self) -> &BreakpointRegistry {
        &self.breakpoints
    }

    pub fn flags(&self) -> &SuspensionFlags {
        &self.flags
    }

    /// Records a breakpoint exit for `cpu` at `pc` and returns the signal to unwind with.
    ///
    /// The vCPU resumes at `pc` itself; stepping over the breakpoint is the driver's job.
    ///
    /// # Panics
    ///
    /// Panics if a previous exit has not been consumed with [`Self::signal_vm_start`].
    pub fn request_breakpoint_exit(&self, cpu: CpuId, pc: GuestAddr) -> ExitSignal {
        self.record(ExitReason::breakpoint(cpu, pc))
    }

    /// Records a synchronization-backdoor exit. `next_pc` is the instruction after the backdoor.
    ///
    /// # Panics
    ///
    /// Panics if a previous exit has not been consumed with [`Self::signal_vm_start`].
    pub fn request_sync_backdoor_exit(&self, cpu: CpuId, next_pc: GuestAddr) -> ExitSignal {
        self.record(ExitReason::sync_backdoor(cpu, next_pc))
    }

    /// Records an exit caused by [`Self::request_exit_asap`]. `next_pc` is the first instruction
    /// that has not been executed yet.
    ///
    /// # Panics
    ///
    /// Panics if a previous exit has not been consumed with [`Self::signal_vm_start`].
    pub fn request_asap_exit(&self, cpu: CpuId, next_pc: GuestAddr) -> ExitSignal {
        self.record(ExitReason::requested(cpu, next_pc))
    }

    fn record(&self, reason: ExitReason) -> ExitSignal {
        let mut slot = self.slot.lock().unwrap();
        if let Some(pending) = *slot {
            panic!(
                "exit recorded while a previous exit is still in flight: \
                 new={reason:?} pending={pending:?}"
            );
        }
        debug!("{reason}");
        *slot = Some(reason);
        ExitSignal::new(reason.triggering_cpu)
    }

    /// Current exit reason, or `None` if no exit is expected.
    pub fn get_exit_reason(&self) -> Option<ExitReason> {
        *self.slot.lock().unwrap()
    }

    /// vCPU that triggered the current exit, or `None` if no exit is expected.
    pub fn last_exit_cpu(&self) -> Option<CpuId> {
        self.get_exit_reason().map(|reason| reason.triggering_cpu)
    }

    /// Whether an exit has been recorded and not yet consumed.
    pub fn exit_expected(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }

    /// Marks the start of a new execution segment.
    ///
    /// Clears the in-flight exit (if any) and the `exit_requested` flag.
    pub fn signal_vm_start(&self) {
        *self.slot.lock().unwrap() = None;
        self.flags.clear();
    }

    /// Re-raises the control-transfer signal for the exit currently in flight.
    ///
    /// Used by engine frames that need to unwind again after having consumed the original
    /// [`ExitSignal`] (for example when an exit is detected while finishing an instruction).
    ///
    /// # Panics
    ///
    /// Panics if no exit is in flight.
    pub fn sync_exit_cpu(&self) -> ExitSignal {
        match *self.slot.lock().unwrap() {
            Some(reason) => ExitSignal::new(reason.triggering_cpu),
            None => panic!("control-transfer signal raised with no exit in flight"),
        }
    }

    /// Asks the engine to exit at its next safe point.
    pub fn request_exit_asap(&self) {
        debug!("exit requested");
        self.flags.request_exit();
    }

    pub fn exit_asap(&self) -> bool {
        self.flags.exit_requested()
    }
}
