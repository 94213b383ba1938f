//! Remote-debugging register accessors.
//!
//! GDB numbers the MicroBlaze core registers as the 32 GPRs followed by the special registers in
//! this order: PC, MSR, EAR, ESR, FSR, BTR, PVR0..PVR12, EDR, PID, ZPR, TLBX, TLBSX, TLBLO, TLBHI,
//! SLR, SHR. PVR12 and the MMU registers are not modelled; they read as zero and ignore writes.
//! Values are transferred as 32-bit big-endian words.

use crate::cpu::{Msr, Vcpu};

pub const GDB_PC: usize = 32;
pub const GDB_MSR: usize = 32 + 1;
pub const GDB_EAR: usize = 32 + 2;
pub const GDB_ESR: usize = 32 + 3;
pub const GDB_FSR: usize = 32 + 4;
pub const GDB_BTR: usize = 32 + 5;
pub const GDB_PVR0: usize = 32 + 6;
pub const GDB_PVR11: usize = 32 + 17;
pub const GDB_EDR: usize = 32 + 18;
pub const GDB_SLR: usize = 32 + 25;
pub const GDB_SHR: usize = 32 + 26;

/// Number of core registers advertised to GDB.
pub const NUM_CORE_REGS: usize = 32 + 27;

/// Appends register `n` to `buf` and returns the number of bytes written.
///
/// Indices beyond [`NUM_CORE_REGS`] write nothing.
pub fn read_register(cpu: &Vcpu, n: usize, buf: &mut Vec<u8>) -> usize {
    if n > NUM_CORE_REGS {
        return 0;
    }

    let value = match n {
        1..=31 => cpu.gpr(n as u8),
        GDB_PC => cpu.pc,
        GDB_MSR => cpu.msr.bits(),
        GDB_EAR => cpu.ear,
        GDB_ESR => cpu.esr,
        GDB_FSR => cpu.fsr,
        GDB_BTR => cpu.btr,
        GDB_PVR0..=GDB_PVR11 => cpu.pvr[n - GDB_PVR0],
        GDB_EDR => cpu.edr,
        GDB_SLR => cpu.slr,
        GDB_SHR => cpu.shr,
        _ => 0,
    };
    buf.extend_from_slice(&value.to_be_bytes());
    4
}

/// Loads register `n` from the first four bytes of `buf` and returns the number of bytes
/// consumed.
///
/// Indices beyond [`NUM_CORE_REGS`] and buffers shorter than a register consume nothing.
pub fn write_register(cpu: &mut Vcpu, buf: &[u8], n: usize) -> usize {
    if n > NUM_CORE_REGS {
        return 0;
    }
    let Some(&[b0, b1, b2, b3]) = buf.get(..4) else {
        return 0;
    };
    let value = u32::from_be_bytes([b0, b1, b2, b3]);

    match n {
        1..=31 => cpu.set_gpr(n as u8, value),
        GDB_PC => cpu.pc = value,
        GDB_MSR => cpu.msr = Msr::from_bits_retain(value),
        GDB_EAR => cpu.ear = value,
        GDB_ESR => cpu.esr = value,
        GDB_FSR => cpu.fsr = value,
        GDB_BTR => cpu.btr = value,
        GDB_PVR0..=GDB_PVR11 => cpu.pvr[n - GDB_PVR0] = value,
        GDB_EDR => cpu.edr = value,
        GDB_SLR => cpu.slr = value,
        GDB_SHR => cpu.shr = value,
        _ => {}
    }
    4
}
