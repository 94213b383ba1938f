//! Encoders for the supported instructions, used to build guest programs in tests and tools.

use crate::decode::{
    opcode_bits, Cond, BRI_ABSOLUTE, OP_ADD, OP_ADDI, OP_ADDIK, OP_ADDK, OP_BCCI, OP_BRI, OP_OR,
    OP_ORI,
};

fn type_a(opcode: u32, rd: u8, ra: u8, rb: u8) -> u32 {
    opcode_bits(opcode)
        | (u32::from(rd & 31) << 21)
        | (u32::from(ra & 31) << 16)
        | (u32::from(rb & 31) << 11)
}

fn type_b(opcode: u32, rd: u8, ra: u8, imm: i16) -> u32 {
    opcode_bits(opcode)
        | (u32::from(rd & 31) << 21)
        | (u32::from(ra & 31) << 16)
        | u32::from(imm as u16)
}

pub fn add(rd: u8, ra: u8, rb: u8) -> u32 {
    type_a(OP_ADD, rd, ra, rb)
}

pub fn addk(rd: u8, ra: u8, rb: u8) -> u32 {
    type_a(OP_ADDK, rd, ra, rb)
}

pub fn addi(rd: u8, ra: u8, imm: i16) -> u32 {
    type_b(OP_ADDI, rd, ra, imm)
}

pub fn addik(rd: u8, ra: u8, imm: i16) -> u32 {
    type_b(OP_ADDIK, rd, ra, imm)
}

pub fn or(rd: u8, ra: u8, rb: u8) -> u32 {
    type_a(OP_OR, rd, ra, rb)
}

pub fn ori(rd: u8, ra: u8, imm: i16) -> u32 {
    type_b(OP_ORI, rd, ra, imm)
}

pub fn nop() -> u32 {
    or(0, 0, 0)
}

/// Unconditional branch, relative to the branch itself.
pub fn bri(offset: i16) -> u32 {
    type_b(OP_BRI, 0, 0, offset)
}

/// Unconditional branch to an absolute (sign-extended) address.
pub fn brai(target: i16) -> u32 {
    type_b(OP_BRI, 0, BRI_ABSOLUTE, target)
}

pub fn bcci(cond: Cond, ra: u8, offset: i16) -> u32 {
    type_b(OP_BCCI, cond.field(), ra, offset)
}

pub fn beqi(ra: u8, offset: i16) -> u32 {
    bcci(Cond::Eq, ra, offset)
}

pub fn bnei(ra: u8, offset: i16) -> u32 {
    bcci(Cond::Ne, ra, offset)
}

/// Serializes a program as big-endian words.
pub fn to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}
