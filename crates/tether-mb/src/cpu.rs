use bitflags::bitflags;

bitflags! {
    /// Machine Status Register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Msr: u32 {
        const BE = 1 << 0;
        const IE = 1 << 1;
        /// Arithmetic carry.
        const C = 1 << 2;
        const BIP = 1 << 3;
        const FSL = 1 << 4;
        const ICE = 1 << 5;
        const DZ = 1 << 6;
        const DCE = 1 << 7;
        const EE = 1 << 8;
        const EIP = 1 << 9;
        const PVR = 1 << 10;
        const UM = 1 << 11;
        const UMS = 1 << 12;
        const VM = 1 << 13;
        const VMS = 1 << 14;
        /// Carry copy; always mirrors `C`.
        const CC = 1 << 31;
    }
}

/// Number of processor version registers exposed (PVR0..PVR11).
pub const PVR_COUNT: usize = 12;

/// Architectural state of one vCPU.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vcpu {
    regs: [u32; 32],
    pub pc: u32,
    pub msr: Msr,
    pub ear: u32,
    pub esr: u32,
    pub fsr: u32,
    pub btr: u32,
    pub edr: u32,
    pub pvr: [u32; PVR_COUNT],
    /// Stack protection low/high bounds.
    pub slr: u32,
    pub shr: u32,
}

impl Vcpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads general purpose register `n`. `r0` always reads as zero.
    pub fn gpr(&self, n: u8) -> u32 {
        match n {
            0 => 0,
            _ => self.regs[usize::from(n & 31)],
        }
    }

    /// Writes general purpose register `n`. Writes to `r0` are discarded.
    pub fn set_gpr(&mut self, n: u8, value: u32) {
        if n != 0 {
            self.regs[usize::from(n & 31)] = value;
        }
    }

    pub fn carry(&self) -> bool {
        self.msr.contains(Msr::C)
    }

    pub fn set_carry(&mut self, carry: bool) {
        self.msr.set(Msr::C | Msr::CC, carry);
    }
}
