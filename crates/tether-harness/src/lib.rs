//! Fuzzing-harness driver for the `tether-mb` engine.
//!
//! A [`Harness`] owns the VM and decides how execution resumes after each exit. Every call to
//! [`Harness::run`] consumes the previous exit with `signal_vm_start`, optionally steps over the
//! breakpoint the exiting vCPU is parked on, and then runs the vCPUs until the next stop.
#![forbid(unsafe_code)]

mod watchdog;

use std::sync::Arc;
use std::time::Duration;

use tether_exit::{CpuId, ExitContext, ExitReason, ExitReasonKind, GuestAddr};
use tether_mb::{RunExit, StepExit, Vm, VmError};
use thiserror::Error;
use tracing::{debug, info};

pub use watchdog::Watchdog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Wall-clock limit for a single [`Harness::run`]. `None` disables the watchdog.
    pub timeout: Option<Duration>,
    /// Instructions a vCPU runs before the next one gets a turn.
    pub slice: u64,
    /// Instruction budget for a single [`Harness::run`].
    pub max_insts: u64,
    /// Step over the breakpoint the last exiting vCPU stopped at before continuing.
    pub step_over_breakpoints: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            slice: 10_000,
            max_insts: u64::MAX,
            step_over_breakpoints: true,
        }
    }
}

/// Why [`Harness::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stop {
    /// A vCPU exited through the control-transfer signal.
    Exit(ExitReason),
    /// The watchdog expired and the engine exited on its request.
    Timeout(ExitReason),
    /// `max_insts` instructions retired without an exit.
    BudgetExhausted { executed: u64 },
    IllegalInstruction { cpu: CpuId, pc: u32, word: u32 },
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error("no exit to resume from")]
    NoExit,
}

enum StepOver {
    Skipped,
    /// One instruction retired.
    Stepped,
    Stopped(Stop),
}

#[derive(Debug)]
pub struct Harness {
    vm: Vm,
    ctx: Arc<ExitContext>,
    config: HarnessConfig,
    last_exit: Option<ExitReason>,
}

impl Harness {
    pub fn new(vm: Vm, config: HarnessConfig) -> Self {
        let ctx = vm.exit_context().clone();
        Self {
            vm,
            ctx,
            config,
            last_exit: None,
        }
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }

    pub fn exit_context(&self) -> &Arc<ExitContext> {
        &self.ctx
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The reason for the most recent exit. Cleared when a run stops without one.
    pub fn last_exit(&self) -> Option<ExitReason> {
        self.last_exit
    }

    pub fn set_breakpoint(&self, addr: GuestAddr) -> bool {
        self.ctx.breakpoints().insert(addr)
    }

    pub fn remove_breakpoint(&self, addr: GuestAddr) -> bool {
        self.ctx.breakpoints().remove(addr)
    }

    /// Redirects the vCPU that exited last to `addr` instead of its resume address.
    pub fn resume_at(&mut self, addr: GuestAddr) -> Result<(), HarnessError> {
        let cpu = self.last_exit.ok_or(HarnessError::NoExit)?.triggering_cpu;
        self.vm.resume_at(cpu, addr)?;
        Ok(())
    }

    pub fn run(&mut self) -> Result<Stop, HarnessError> {
        self.ctx.signal_vm_start();

        let stepped = match self.step_over()? {
            StepOver::Skipped => 0,
            StepOver::Stepped => 1,
            StepOver::Stopped(stop) => return Ok(stop),
        };
        // The stepped instruction counts against this run's budget.
        let budget = self.config.max_insts.saturating_sub(stepped);
        if budget == 0 {
            self.last_exit = None;
            return Ok(Stop::BudgetExhausted { executed: stepped });
        }

        let watchdog = self
            .config
            .timeout
            .map(|timeout| Watchdog::arm(self.ctx.clone(), timeout));
        let exit = self.vm.run_round_robin(self.config.slice, budget);
        let fired = watchdog.map_or(false, Watchdog::disarm);

        match exit? {
            RunExit::Exit { signal, executed } => {
                let reason = self.consume_exit(signal.cpu());
                debug!(executed = executed + stepped, "{reason}");
                if fired && reason.kind == ExitReasonKind::Requested {
                    info!("run timed out on {}", reason.triggering_cpu);
                    Ok(Stop::Timeout(reason))
                } else {
                    Ok(Stop::Exit(reason))
                }
            }
            RunExit::Completed { executed } => {
                self.last_exit = None;
                Ok(Stop::BudgetExhausted {
                    executed: executed + stepped,
                })
            }
            RunExit::IllegalInstruction { cpu, pc, word, .. } => {
                self.last_exit = None;
                Ok(Stop::IllegalInstruction { cpu, pc, word })
            }
        }
    }

    /// Executes the instruction under the breakpoint the last exiting vCPU is parked on.
    fn step_over(&mut self) -> Result<StepOver, HarnessError> {
        if !self.config.step_over_breakpoints || self.config.max_insts == 0 {
            return Ok(StepOver::Skipped);
        }
        let Some(ExitReason {
            kind: ExitReasonKind::Breakpoint { addr },
            triggering_cpu: cpu,
            ..
        }) = self.last_exit
        else {
            return Ok(StepOver::Skipped);
        };
        if GuestAddr::from(self.vm.cpu(cpu)?.pc) != addr {
            return Ok(StepOver::Skipped);
        }

        debug!("stepping {cpu} over breakpoint {addr:#x}");
        match self.vm.single_step(cpu)? {
            StepExit::Continue => Ok(StepOver::Stepped),
            StepExit::Exit(signal) => Ok(StepOver::Stopped(Stop::Exit(
                self.consume_exit(signal.cpu()),
            ))),
            StepExit::IllegalInstruction { pc, word } => {
                self.last_exit = None;
                Ok(StepOver::Stopped(Stop::IllegalInstruction { cpu, pc, word }))
            }
        }
    }

    fn consume_exit(&mut self, cpu: CpuId) -> ExitReason {
        let reason = self
            .ctx
            .get_exit_reason()
            .expect("exit signal raised without a recorded reason");
        debug_assert_eq!(reason.triggering_cpu, cpu);
        self.last_exit = Some(reason);
        reason
    }
}
