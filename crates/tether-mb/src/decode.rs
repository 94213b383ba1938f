//! Decoder for the supported MicroBlaze subset.
//!
//! Encodings are the standard 32-bit big-endian ones: type A is
//! `opcode:6 rd:5 ra:5 rb:5 zero:11`, type B is `opcode:6 rd:5 ra:5 imm:16`. There is no `imm`
//! prefix support, so immediates are always the sign-extended low half-word. Delayed and linking
//! branch forms are not supported and decode as illegal.

pub(crate) const OP_ADD: u32 = 0x00;
pub(crate) const OP_ADDK: u32 = 0x04;
pub(crate) const OP_ADDI: u32 = 0x08;
pub(crate) const OP_ADDIK: u32 = 0x0C;
pub(crate) const OP_OR: u32 = 0x20;
pub(crate) const OP_ORI: u32 = 0x28;
pub(crate) const OP_BRI: u32 = 0x2E;
pub(crate) const OP_BCCI: u32 = 0x2F;

/// `ra` field value selecting the absolute form of `bri`.
pub(crate) const BRI_ABSOLUTE: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cond {
    fn from_field(rd: u8) -> Option<Self> {
        Some(match rd {
            0 => Cond::Eq,
            1 => Cond::Ne,
            2 => Cond::Lt,
            3 => Cond::Le,
            4 => Cond::Gt,
            5 => Cond::Ge,
            _ => return None,
        })
    }

    pub(crate) fn field(self) -> u8 {
        match self {
            Cond::Eq => 0,
            Cond::Ne => 1,
            Cond::Lt => 2,
            Cond::Le => 3,
            Cond::Gt => 4,
            Cond::Ge => 5,
        }
    }

    /// Compares a (signed) register value against zero.
    pub fn holds(self, value: i32) -> bool {
        match self {
            Cond::Eq => value == 0,
            Cond::Ne => value != 0,
            Cond::Lt => value < 0,
            Cond::Le => value <= 0,
            Cond::Gt => value > 0,
            Cond::Ge => value >= 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchTarget {
    /// Offset from the branch instruction's own address.
    Relative(i32),
    Absolute(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insn {
    /// `add`/`addk`: `rd = ra + rb`. The `k` form keeps MSR[C].
    Add { rd: u8, ra: u8, rb: u8, keep_carry: bool },
    /// `addi`/`addik`: `rd = ra + imm`.
    AddImm { rd: u8, ra: u8, imm: i32, keep_carry: bool },
    Or { rd: u8, ra: u8, rb: u8 },
    OrImm { rd: u8, ra: u8, imm: i32 },
    /// `bri`/`brai`.
    Branch { target: BranchTarget },
    /// `beqi`, `bnei`, `blti`, `blei`, `bgti`, `bgei`: branch relative if `ra` compares with zero.
    CondBranch { cond: Cond, ra: u8, offset: i32 },
    /// The reserved synchronization word.
    SyncBackdoor,
}

impl Insn {
    /// Whether translation must stop after this instruction.
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            Insn::Branch { .. } | Insn::CondBranch { .. } | Insn::SyncBackdoor
        )
    }
}

/// Decodes `word`, recognizing `sync_backdoor_word` before any regular encoding.
pub fn decode(word: u32, sync_backdoor_word: u32) -> Option<Insn> {
    if word == sync_backdoor_word {
        return Some(Insn::SyncBackdoor);
    }
    decode_regular(word)
}

/// Decodes `word` as a regular instruction, ignoring the backdoor.
pub fn decode_regular(word: u32) -> Option<Insn> {
    let opcode = word >> 26;
    let rd = ((word >> 21) & 0x1F) as u8;
    let ra = ((word >> 16) & 0x1F) as u8;
    let rb = ((word >> 11) & 0x1F) as u8;
    let imm = i32::from(word as u16 as i16);
    let type_a_reserved_clear = word & 0x7FF == 0;

    match opcode {
        OP_ADD | OP_ADDK if type_a_reserved_clear => Some(Insn::Add {
            rd,
            ra,
            rb,
            keep_carry: opcode == OP_ADDK,
        }),
        OP_ADDI | OP_ADDIK => Some(Insn::AddImm {
            rd,
            ra,
            imm,
            keep_carry: opcode == OP_ADDIK,
        }),
        OP_OR if type_a_reserved_clear => Some(Insn::Or { rd, ra, rb }),
        OP_ORI => Some(Insn::OrImm { rd, ra, imm }),
        OP_BRI if rd == 0 => match ra {
            0 => Some(Insn::Branch {
                target: BranchTarget::Relative(imm),
            }),
            BRI_ABSOLUTE => Some(Insn::Branch {
                target: BranchTarget::Absolute(imm as u32),
            }),
            _ => None,
        },
        OP_BCCI => Cond::from_field(rd).map(|cond| Insn::CondBranch {
            cond,
            ra,
            offset: imm,
        }),
        _ => None,
    }
}

pub(crate) fn opcode_bits(opcode: u32) -> u32 {
    opcode << 26
}
