use std::sync::Arc;

use tether_exit::{CpuId, ExitContext, ExitSignal, GuestAddr};
use tracing::{debug, trace};

use crate::config::VmConfig;
use crate::cpu::Vcpu;
use crate::decode::{decode, BranchTarget, Insn};
use crate::error::VmError;
use crate::mem::GuestRam;
use crate::translate::{translate, Block, BlockCache, Op};

/// Result of a [`Vm::run`] slice.
#[derive(Debug, PartialEq, Eq)]
pub enum RunExit {
    /// The control-transfer signal unwound the dispatch loop. The reason is available from the
    /// VM's [`ExitContext`] until the next [`ExitContext::signal_vm_start`].
    Exit { signal: ExitSignal, executed: u64 },
    /// The slice completed because `max_insts` was reached.
    Completed { executed: u64 },
    /// The vCPU reached a word that is not a supported instruction. Its PC points at the word.
    IllegalInstruction {
        cpu: CpuId,
        pc: u32,
        word: u32,
        executed: u64,
    },
}

impl RunExit {
    /// Number of guest instructions retired in this slice.
    pub fn executed(&self) -> u64 {
        match *self {
            RunExit::Exit { executed, .. }
            | RunExit::Completed { executed }
            | RunExit::IllegalInstruction { executed, .. } => executed,
        }
    }
}

/// Result of [`Vm::single_step`].
#[derive(Debug, PartialEq, Eq)]
pub enum StepExit {
    Continue,
    Exit(ExitSignal),
    IllegalInstruction { pc: u32, word: u32 },
}

enum BlockExit {
    Continue,
    Signal(ExitSignal),
    Illegal { pc: u32, word: u32 },
}

enum InsnOutcome {
    Continue,
    SyncBackdoor,
}

/// A set of vCPUs sharing guest RAM, a translation cache and an [`ExitContext`].
#[derive(Debug)]
pub struct Vm {
    config: VmConfig,
    ram: GuestRam,
    cpus: Vec<Vcpu>,
    cache: Arc<BlockCache>,
    ctx: Arc<ExitContext>,
}

impl Vm {
    pub fn new(config: VmConfig) -> Result<Self, VmError> {
        config.validate()?;
        let cache = Arc::new(BlockCache::new(config.max_cached_blocks));
        let ctx = Arc::new(ExitContext::new(cache.clone()));
        let cpus = (0..config.cpu_count).map(|_| Vcpu::new()).collect();
        let ram = GuestRam::new(config.ram_base, config.ram_size);
        Ok(Self {
            config,
            ram,
            cpus,
            cache,
            ctx,
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn exit_context(&self) -> &Arc<ExitContext> {
        &self.ctx
    }

    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    pub fn ram(&self) -> &GuestRam {
        &self.ram
    }

    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    pub fn cpu(&self, id: CpuId) -> Result<&Vcpu, VmError> {
        self.cpus.get(id.index()).ok_or(VmError::InvalidCpu(id))
    }

    pub fn cpu_mut(&mut self, id: CpuId) -> Result<&mut Vcpu, VmError> {
        self.cpus.get_mut(id.index()).ok_or(VmError::InvalidCpu(id))
    }

    /// Writes `data` into guest RAM and drops every cached translation.
    pub fn load(&mut self, addr: u32, data: &[u8]) -> Result<(), VmError> {
        self.ram.load(addr, data)?;
        self.cache.flush();
        Ok(())
    }

    /// Points `cpu` at `addr`, typically the `resume_address` of the last exit.
    pub fn resume_at(&mut self, cpu: CpuId, addr: GuestAddr) -> Result<(), VmError> {
        let pc = u32::try_from(addr).map_err(|_| VmError::AddressOutOfRange(addr))?;
        self.cpu_mut(cpu)?.pc = pc;
        Ok(())
    }

    fn block_for(&self, pc: u32) -> Result<Arc<Block>, VmError> {
        if let Some(block) = self.cache.get_cloned(pc) {
            return Ok(block);
        }
        loop {
            let generation = self.cache.generation();
            let block = Arc::new(translate(
                &self.ram,
                self.ctx.breakpoints(),
                &self.config,
                pc,
            )?);
            if self.cache.insert_if_current(generation, block.clone()) {
                return Ok(block);
            }
            trace!("translation of {pc:#x} raced with an invalidation; retranslating");
        }
    }

    /// Runs `cpu` until it exits, faults, or retires `max_insts` instructions.
    ///
    /// `exit_asap` is polled before every block. A breakpoint exit leaves the vCPU's PC on the
    /// breakpoint, so running again without stepping over it re-triggers the same exit.
    ///
    /// # Panics
    ///
    /// Panics if the vCPU exits while a previous exit has not been consumed with
    /// [`ExitContext::signal_vm_start`].
    pub fn run(&mut self, cpu: CpuId, max_insts: u64) -> Result<RunExit, VmError> {
        self.cpu(cpu)?;
        let mut executed = 0u64;

        while executed < max_insts {
            let pc = self.cpus[cpu.index()].pc;
            if self.ctx.exit_asap() {
                let signal = self.ctx.request_asap_exit(cpu, GuestAddr::from(pc));
                return Ok(RunExit::Exit { signal, executed });
            }

            let block = self.block_for(pc)?;
            let vcpu = &mut self.cpus[cpu.index()];
            match exec_block(vcpu, cpu, &block, &self.ctx, max_insts, &mut executed) {
                BlockExit::Continue => {}
                BlockExit::Signal(signal) => return Ok(RunExit::Exit { signal, executed }),
                BlockExit::Illegal { pc, word } => {
                    debug!("{cpu} hit illegal instruction {word:#010x} at {pc:#x}");
                    return Ok(RunExit::IllegalInstruction {
                        cpu,
                        pc,
                        word,
                        executed,
                    });
                }
            }
        }

        Ok(RunExit::Completed { executed })
    }

    /// Runs every vCPU in turn, `slice` instructions at a time, until one of them exits or faults
    /// or `max_insts` instructions have been retired in total.
    pub fn run_round_robin(&mut self, slice: u64, max_insts: u64) -> Result<RunExit, VmError> {
        let slice = slice.max(1);
        let mut total = 0u64;

        while total < max_insts {
            for index in 0..self.cpus.len() {
                let budget = slice.min(max_insts - total);
                if budget == 0 {
                    break;
                }
                let exit = self.run(CpuId(index), budget)?;
                total += exit.executed();
                match exit {
                    RunExit::Completed { .. } => {}
                    RunExit::Exit { signal, .. } => {
                        return Ok(RunExit::Exit {
                            signal,
                            executed: total,
                        })
                    }
                    RunExit::IllegalInstruction { cpu, pc, word, .. } => {
                        return Ok(RunExit::IllegalInstruction {
                            cpu,
                            pc,
                            word,
                            executed: total,
                        })
                    }
                }
            }
        }

        Ok(RunExit::Completed { executed: total })
    }

    /// Executes exactly one instruction on `cpu`, bypassing the translation cache and breakpoint
    /// checks.
    ///
    /// This is how a driver steps over the breakpoint it just stopped at. The synchronization
    /// backdoor still exits.
    pub fn single_step(&mut self, cpu: CpuId) -> Result<StepExit, VmError> {
        let pc = self.cpu(cpu)?.pc;
        let word = self.ram.read_u32(pc)?;
        let Some(insn) = decode(word, self.config.sync_backdoor_word) else {
            return Ok(StepExit::IllegalInstruction { pc, word });
        };

        let vcpu = &mut self.cpus[cpu.index()];
        match execute(vcpu, pc, insn) {
            InsnOutcome::Continue => Ok(StepExit::Continue),
            InsnOutcome::SyncBackdoor => {
                let next = GuestAddr::from(vcpu.pc);
                Ok(StepExit::Exit(self.ctx.request_sync_backdoor_exit(cpu, next)))
            }
        }
    }
}

fn exec_block(
    vcpu: &mut Vcpu,
    cpu: CpuId,
    block: &Block,
    ctx: &ExitContext,
    max_insts: u64,
    executed: &mut u64,
) -> BlockExit {
    for op in &block.ops {
        // Partial blocks are fine: the PC is kept exact at every instruction boundary.
        if *executed >= max_insts {
            vcpu.pc = op.pc;
            return BlockExit::Continue;
        }

        match op.op {
            Op::BreakpointCheck => {
                vcpu.pc = op.pc;
                return BlockExit::Signal(ctx.request_breakpoint_exit(cpu, GuestAddr::from(op.pc)));
            }
            Op::Illegal(word) => {
                vcpu.pc = op.pc;
                return BlockExit::Illegal { pc: op.pc, word };
            }
            Op::Exec(insn) => {
                let outcome = execute(vcpu, op.pc, insn);
                *executed += 1;
                if let InsnOutcome::SyncBackdoor = outcome {
                    let next = GuestAddr::from(vcpu.pc);
                    return BlockExit::Signal(ctx.request_sync_backdoor_exit(cpu, next));
                }
            }
        }
    }
    BlockExit::Continue
}

fn execute(vcpu: &mut Vcpu, pc: u32, insn: Insn) -> InsnOutcome {
    vcpu.pc = pc.wrapping_add(4);

    match insn {
        Insn::Add {
            rd,
            ra,
            rb,
            keep_carry,
        } => {
            let (value, carry) = vcpu.gpr(ra).overflowing_add(vcpu.gpr(rb));
            vcpu.set_gpr(rd, value);
            if !keep_carry {
                vcpu.set_carry(carry);
            }
        }
        Insn::AddImm {
            rd,
            ra,
            imm,
            keep_carry,
        } => {
            let (value, carry) = vcpu.gpr(ra).overflowing_add(imm as u32);
            vcpu.set_gpr(rd, value);
            if !keep_carry {
                vcpu.set_carry(carry);
            }
        }
        Insn::Or { rd, ra, rb } => vcpu.set_gpr(rd, vcpu.gpr(ra) | vcpu.gpr(rb)),
        Insn::OrImm { rd, ra, imm } => vcpu.set_gpr(rd, vcpu.gpr(ra) | imm as u32),
        Insn::Branch { target } => {
            vcpu.pc = match target {
                BranchTarget::Relative(offset) => pc.wrapping_add(offset as u32),
                BranchTarget::Absolute(addr) => addr,
            };
        }
        Insn::CondBranch { cond, ra, offset } => {
            if cond.holds(vcpu.gpr(ra) as i32) {
                vcpu.pc = pc.wrapping_add(offset as u32);
            }
        }
        Insn::SyncBackdoor => return InsnOutcome::SyncBackdoor,
    }

    InsnOutcome::Continue
}
