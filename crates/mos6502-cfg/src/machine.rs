// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! The 6502 machine model: registers, condition flags, mnemonics, addressing modes and the
//! official opcode table.
//!
//! The table is the single source for both directions of the encoding. The block builder uses
//! it to recover the bytes hidden behind a BIT-skip, the listing reader to size instructions,
//! and the reference interpreter to decode an assembled image.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Architectural registers visible to generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Register {
    A,
    X,
    Y,
}

impl Register {
    pub const ALL: [Register; 3] = [Register::A, Register::X, Register::Y];

    pub fn location(self) -> Location {
        match self {
            Register::A => Location::A,
            Register::X => Location::X,
            Register::Y => Location::Y,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Register::A => "a",
            Register::X => "x",
            Register::Y => "y",
        };
        write!(f, "{}", name)
    }
}

/// Condition flags tracked by the decompiler. Decimal and interrupt-disable are not modelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Flag {
    Carry,
    Zero,
    Negative,
    Overflow,
}

impl Flag {
    pub const ALL: [Flag; 4] = [Flag::Carry, Flag::Zero, Flag::Negative, Flag::Overflow];

    pub fn location(self) -> Location {
        match self {
            Flag::Carry => Location::C,
            Flag::Zero => Location::Z,
            Flag::Negative => Location::N,
            Flag::Overflow => Location::V,
        }
    }

    /// Bit position inside the processor status byte.
    pub fn status_bit(self) -> u8 {
        match self {
            Flag::Carry => 0,
            Flag::Zero => 1,
            Flag::Overflow => 6,
            Flag::Negative => 7,
        }
    }
}

/// A register or a flag: anything the symbolic state binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Location {
    A,
    X,
    Y,
    C,
    Z,
    N,
    V,
}

impl Location {
    pub const ALL: [Location; 7] = [
        Location::A,
        Location::X,
        Location::Y,
        Location::C,
        Location::Z,
        Location::N,
        Location::V,
    ];
    pub const FLAGS: [Location; 4] = [Location::C, Location::Z, Location::N, Location::V];

    pub fn register(self) -> Option<Register> {
        match self {
            Location::A => Some(Register::A),
            Location::X => Some(Register::X),
            Location::Y => Some(Register::Y),
            _ => None,
        }
    }

    pub fn flag(self) -> Option<Flag> {
        match self {
            Location::C => Some(Flag::Carry),
            Location::Z => Some(Flag::Zero),
            Location::N => Some(Flag::Negative),
            Location::V => Some(Flag::Overflow),
            _ => None,
        }
    }

    pub fn is_flag(self) -> bool {
        self.flag().is_some()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Location::A => "a",
            Location::X => "x",
            Location::Y => "y",
            Location::C => "c",
            Location::Z => "z",
            Location::N => "n",
            Location::V => "v",
        };
        write!(f, "{}", name)
    }
}

/// Official 6502 mnemonics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror, Rti,
    Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs, Tya,
}

impl Opcode {
    const NAMES: [(&'static str, Opcode); 56] = [
        ("adc", Opcode::Adc), ("and", Opcode::And), ("asl", Opcode::Asl), ("bcc", Opcode::Bcc),
        ("bcs", Opcode::Bcs), ("beq", Opcode::Beq), ("bit", Opcode::Bit), ("bmi", Opcode::Bmi),
        ("bne", Opcode::Bne), ("bpl", Opcode::Bpl), ("brk", Opcode::Brk), ("bvc", Opcode::Bvc),
        ("bvs", Opcode::Bvs), ("clc", Opcode::Clc), ("cld", Opcode::Cld), ("cli", Opcode::Cli),
        ("clv", Opcode::Clv), ("cmp", Opcode::Cmp), ("cpx", Opcode::Cpx), ("cpy", Opcode::Cpy),
        ("dec", Opcode::Dec), ("dex", Opcode::Dex), ("dey", Opcode::Dey), ("eor", Opcode::Eor),
        ("inc", Opcode::Inc), ("inx", Opcode::Inx), ("iny", Opcode::Iny), ("jmp", Opcode::Jmp),
        ("jsr", Opcode::Jsr), ("lda", Opcode::Lda), ("ldx", Opcode::Ldx), ("ldy", Opcode::Ldy),
        ("lsr", Opcode::Lsr), ("nop", Opcode::Nop), ("ora", Opcode::Ora), ("pha", Opcode::Pha),
        ("php", Opcode::Php), ("pla", Opcode::Pla), ("plp", Opcode::Plp), ("rol", Opcode::Rol),
        ("ror", Opcode::Ror), ("rti", Opcode::Rti), ("rts", Opcode::Rts), ("sbc", Opcode::Sbc),
        ("sec", Opcode::Sec), ("sed", Opcode::Sed), ("sei", Opcode::Sei), ("sta", Opcode::Sta),
        ("stx", Opcode::Stx), ("sty", Opcode::Sty), ("tax", Opcode::Tax), ("tay", Opcode::Tay),
        ("tsx", Opcode::Tsx), ("txa", Opcode::Txa), ("txs", Opcode::Txs), ("tya", Opcode::Tya),
    ];

    /// Case-insensitive mnemonic lookup.
    pub fn from_mnemonic(mnemonic: &str) -> Option<Opcode> {
        let lower = mnemonic.to_ascii_lowercase();
        Self::NAMES
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, opcode)| *opcode)
    }

    pub fn mnemonic(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(_, opcode)| *opcode == self)
            .map(|(name, _)| *name)
            .unwrap_or("???")
    }

    pub fn is_conditional_branch(self) -> bool {
        matches!(
            self,
            Opcode::Bcc
                | Opcode::Bcs
                | Opcode::Beq
                | Opcode::Bmi
                | Opcode::Bne
                | Opcode::Bpl
                | Opcode::Bvc
                | Opcode::Bvs
        )
    }

    /// Returns (flag tested, value of the flag that makes the branch taken).
    pub fn branch_condition(self) -> Option<(Flag, bool)> {
        Some(match self {
            Opcode::Bcc => (Flag::Carry, false),
            Opcode::Bcs => (Flag::Carry, true),
            Opcode::Bne => (Flag::Zero, false),
            Opcode::Beq => (Flag::Zero, true),
            Opcode::Bpl => (Flag::Negative, false),
            Opcode::Bmi => (Flag::Negative, true),
            Opcode::Bvc => (Flag::Overflow, false),
            Opcode::Bvs => (Flag::Overflow, true),
            _ => return None,
        })
    }

    pub fn is_return(self) -> bool {
        matches!(self, Opcode::Rts | Opcode::Rti)
    }

    /// Ends a basic block.
    pub fn is_control_transfer(self) -> bool {
        self.is_conditional_branch() || self.is_return() || self == Opcode::Jmp
    }

    /// Control never continues with the next instruction.
    pub fn is_unconditional_transfer(self) -> bool {
        self.is_return() || self == Opcode::Jmp
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic().to_ascii_uppercase())
    }
}

/// Encodable addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndexedIndirect,
    IndirectIndexed,
    Relative,
}

impl AddressingMode {
    /// Encoded instruction length including the opcode byte.
    pub fn encoded_len(self) -> u16 {
        match self {
            AddressingMode::Implied | AddressingMode::Accumulator => 1,
            AddressingMode::Immediate
            | AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::IndexedIndirect
            | AddressingMode::IndirectIndexed
            | AddressingMode::Relative => 2,
            AddressingMode::Absolute
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY
            | AddressingMode::Indirect => 3,
        }
    }
}

use AddressingMode as M;

#[rustfmt::skip]
const OPCODE_TABLE: &[(u8, Opcode, AddressingMode)] = &[
    (0x69, Opcode::Adc, M::Immediate), (0x65, Opcode::Adc, M::ZeroPage), (0x75, Opcode::Adc, M::ZeroPageX),
    (0x6D, Opcode::Adc, M::Absolute), (0x7D, Opcode::Adc, M::AbsoluteX), (0x79, Opcode::Adc, M::AbsoluteY),
    (0x61, Opcode::Adc, M::IndexedIndirect), (0x71, Opcode::Adc, M::IndirectIndexed),
    (0x29, Opcode::And, M::Immediate), (0x25, Opcode::And, M::ZeroPage), (0x35, Opcode::And, M::ZeroPageX),
    (0x2D, Opcode::And, M::Absolute), (0x3D, Opcode::And, M::AbsoluteX), (0x39, Opcode::And, M::AbsoluteY),
    (0x21, Opcode::And, M::IndexedIndirect), (0x31, Opcode::And, M::IndirectIndexed),
    (0x0A, Opcode::Asl, M::Accumulator), (0x06, Opcode::Asl, M::ZeroPage), (0x16, Opcode::Asl, M::ZeroPageX),
    (0x0E, Opcode::Asl, M::Absolute), (0x1E, Opcode::Asl, M::AbsoluteX),
    (0x90, Opcode::Bcc, M::Relative), (0xB0, Opcode::Bcs, M::Relative), (0xF0, Opcode::Beq, M::Relative),
    (0x30, Opcode::Bmi, M::Relative), (0xD0, Opcode::Bne, M::Relative), (0x10, Opcode::Bpl, M::Relative),
    (0x50, Opcode::Bvc, M::Relative), (0x70, Opcode::Bvs, M::Relative),
    (0x24, Opcode::Bit, M::ZeroPage), (0x2C, Opcode::Bit, M::Absolute),
    (0x00, Opcode::Brk, M::Implied),
    (0x18, Opcode::Clc, M::Implied), (0xD8, Opcode::Cld, M::Implied), (0x58, Opcode::Cli, M::Implied),
    (0xB8, Opcode::Clv, M::Implied),
    (0xC9, Opcode::Cmp, M::Immediate), (0xC5, Opcode::Cmp, M::ZeroPage), (0xD5, Opcode::Cmp, M::ZeroPageX),
    (0xCD, Opcode::Cmp, M::Absolute), (0xDD, Opcode::Cmp, M::AbsoluteX), (0xD9, Opcode::Cmp, M::AbsoluteY),
    (0xC1, Opcode::Cmp, M::IndexedIndirect), (0xD1, Opcode::Cmp, M::IndirectIndexed),
    (0xE0, Opcode::Cpx, M::Immediate), (0xE4, Opcode::Cpx, M::ZeroPage), (0xEC, Opcode::Cpx, M::Absolute),
    (0xC0, Opcode::Cpy, M::Immediate), (0xC4, Opcode::Cpy, M::ZeroPage), (0xCC, Opcode::Cpy, M::Absolute),
    (0xC6, Opcode::Dec, M::ZeroPage), (0xD6, Opcode::Dec, M::ZeroPageX), (0xCE, Opcode::Dec, M::Absolute),
    (0xDE, Opcode::Dec, M::AbsoluteX),
    (0xCA, Opcode::Dex, M::Implied), (0x88, Opcode::Dey, M::Implied),
    (0x49, Opcode::Eor, M::Immediate), (0x45, Opcode::Eor, M::ZeroPage), (0x55, Opcode::Eor, M::ZeroPageX),
    (0x4D, Opcode::Eor, M::Absolute), (0x5D, Opcode::Eor, M::AbsoluteX), (0x59, Opcode::Eor, M::AbsoluteY),
    (0x41, Opcode::Eor, M::IndexedIndirect), (0x51, Opcode::Eor, M::IndirectIndexed),
    (0xE6, Opcode::Inc, M::ZeroPage), (0xF6, Opcode::Inc, M::ZeroPageX), (0xEE, Opcode::Inc, M::Absolute),
    (0xFE, Opcode::Inc, M::AbsoluteX),
    (0xE8, Opcode::Inx, M::Implied), (0xC8, Opcode::Iny, M::Implied),
    (0x4C, Opcode::Jmp, M::Absolute), (0x6C, Opcode::Jmp, M::Indirect),
    (0x20, Opcode::Jsr, M::Absolute),
    (0xA9, Opcode::Lda, M::Immediate), (0xA5, Opcode::Lda, M::ZeroPage), (0xB5, Opcode::Lda, M::ZeroPageX),
    (0xAD, Opcode::Lda, M::Absolute), (0xBD, Opcode::Lda, M::AbsoluteX), (0xB9, Opcode::Lda, M::AbsoluteY),
    (0xA1, Opcode::Lda, M::IndexedIndirect), (0xB1, Opcode::Lda, M::IndirectIndexed),
    (0xA2, Opcode::Ldx, M::Immediate), (0xA6, Opcode::Ldx, M::ZeroPage), (0xB6, Opcode::Ldx, M::ZeroPageY),
    (0xAE, Opcode::Ldx, M::Absolute), (0xBE, Opcode::Ldx, M::AbsoluteY),
    (0xA0, Opcode::Ldy, M::Immediate), (0xA4, Opcode::Ldy, M::ZeroPage), (0xB4, Opcode::Ldy, M::ZeroPageX),
    (0xAC, Opcode::Ldy, M::Absolute), (0xBC, Opcode::Ldy, M::AbsoluteX),
    (0x4A, Opcode::Lsr, M::Accumulator), (0x46, Opcode::Lsr, M::ZeroPage), (0x56, Opcode::Lsr, M::ZeroPageX),
    (0x4E, Opcode::Lsr, M::Absolute), (0x5E, Opcode::Lsr, M::AbsoluteX),
    (0xEA, Opcode::Nop, M::Implied),
    (0x09, Opcode::Ora, M::Immediate), (0x05, Opcode::Ora, M::ZeroPage), (0x15, Opcode::Ora, M::ZeroPageX),
    (0x0D, Opcode::Ora, M::Absolute), (0x1D, Opcode::Ora, M::AbsoluteX), (0x19, Opcode::Ora, M::AbsoluteY),
    (0x01, Opcode::Ora, M::IndexedIndirect), (0x11, Opcode::Ora, M::IndirectIndexed),
    (0x48, Opcode::Pha, M::Implied), (0x08, Opcode::Php, M::Implied), (0x68, Opcode::Pla, M::Implied),
    (0x28, Opcode::Plp, M::Implied),
    (0x2A, Opcode::Rol, M::Accumulator), (0x26, Opcode::Rol, M::ZeroPage), (0x36, Opcode::Rol, M::ZeroPageX),
    (0x2E, Opcode::Rol, M::Absolute), (0x3E, Opcode::Rol, M::AbsoluteX),
    (0x6A, Opcode::Ror, M::Accumulator), (0x66, Opcode::Ror, M::ZeroPage), (0x76, Opcode::Ror, M::ZeroPageX),
    (0x6E, Opcode::Ror, M::Absolute), (0x7E, Opcode::Ror, M::AbsoluteX),
    (0x40, Opcode::Rti, M::Implied), (0x60, Opcode::Rts, M::Implied),
    (0xE9, Opcode::Sbc, M::Immediate), (0xE5, Opcode::Sbc, M::ZeroPage), (0xF5, Opcode::Sbc, M::ZeroPageX),
    (0xED, Opcode::Sbc, M::Absolute), (0xFD, Opcode::Sbc, M::AbsoluteX), (0xF9, Opcode::Sbc, M::AbsoluteY),
    (0xE1, Opcode::Sbc, M::IndexedIndirect), (0xF1, Opcode::Sbc, M::IndirectIndexed),
    (0x38, Opcode::Sec, M::Implied), (0xF8, Opcode::Sed, M::Implied), (0x78, Opcode::Sei, M::Implied),
    (0x85, Opcode::Sta, M::ZeroPage), (0x95, Opcode::Sta, M::ZeroPageX), (0x8D, Opcode::Sta, M::Absolute),
    (0x9D, Opcode::Sta, M::AbsoluteX), (0x99, Opcode::Sta, M::AbsoluteY),
    (0x81, Opcode::Sta, M::IndexedIndirect), (0x91, Opcode::Sta, M::IndirectIndexed),
    (0x86, Opcode::Stx, M::ZeroPage), (0x96, Opcode::Stx, M::ZeroPageY), (0x8E, Opcode::Stx, M::Absolute),
    (0x84, Opcode::Sty, M::ZeroPage), (0x94, Opcode::Sty, M::ZeroPageX), (0x8C, Opcode::Sty, M::Absolute),
    (0xAA, Opcode::Tax, M::Implied), (0xA8, Opcode::Tay, M::Implied), (0xBA, Opcode::Tsx, M::Implied),
    (0x8A, Opcode::Txa, M::Implied), (0x9A, Opcode::Txs, M::Implied), (0x98, Opcode::Tya, M::Implied),
];

/// Opcode byte for a mnemonic in the given mode, if the combination exists.
pub fn encode(opcode: Opcode, mode: AddressingMode) -> Option<u8> {
    OPCODE_TABLE
        .iter()
        .find(|(_, op, m)| *op == opcode && *m == mode)
        .map(|(byte, _, _)| *byte)
}

/// Mnemonic and mode for an opcode byte. Unofficial opcodes decode to `None`.
pub fn decode(byte: u8) -> Option<(Opcode, AddressingMode)> {
    OPCODE_TABLE
        .iter()
        .find(|(b, _, _)| *b == byte)
        .map(|(_, op, mode)| (*op, *mode))
}

pub fn supports(opcode: Opcode, mode: AddressingMode) -> bool {
    encode(opcode, mode).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_a_bijection() {
        for (byte, opcode, mode) in OPCODE_TABLE {
            assert_eq!(decode(*byte), Some((*opcode, *mode)));
            assert_eq!(encode(*opcode, *mode), Some(*byte));
        }
        assert_eq!(OPCODE_TABLE.len(), 151);
    }

    #[test]
    fn bit_skip_opcodes() {
        assert_eq!(encode(Opcode::Bit, AddressingMode::Absolute), Some(0x2C));
        assert_eq!(encode(Opcode::Bit, AddressingMode::ZeroPage), Some(0x24));
    }

    #[test]
    fn mnemonic_lookup_ignores_case() {
        assert_eq!(Opcode::from_mnemonic("LdA"), Some(Opcode::Lda));
        assert_eq!(Opcode::from_mnemonic("xyz"), None);
        assert_eq!(Opcode::Bne.to_string(), "BNE");
    }
}
