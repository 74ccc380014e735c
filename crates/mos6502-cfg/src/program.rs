// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Input model: the ordered line sequence handed over by an assembly parser.
//!
//! Every line carries its byte offset from the program origin so that overlapping
//! encodings (the BIT-skip) can be recognised without re-parsing.

use crate::error::CfgError;
use crate::machine::{self, AddressingMode, Location, Opcode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Base of an address expression.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Reference {
    Address(u16),
    Symbol(String),
}

/// `base ± offset`, e.g. `Table+1` or `$2007`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Target {
    pub base: Reference,
    pub offset: i32,
}

impl Target {
    pub fn address(address: u16) -> Self {
        Self {
            base: Reference::Address(address),
            offset: 0,
        }
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Self {
            base: Reference::Symbol(name.into()),
            offset: 0,
        }
    }

    pub fn with_offset(mut self, offset: i32) -> Self {
        self.offset = offset;
        self
    }

    /// The label this target names directly, if any.
    pub fn label(&self) -> Option<&str> {
        match &self.base {
            Reference::Symbol(name) if self.offset == 0 => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.base {
            Reference::Address(address) if *address <= 0xff => write!(f, "${:02X}", address)?,
            Reference::Address(address) => write!(f, "${:04X}", address)?,
            Reference::Symbol(name) => write!(f, "{}", name)?,
        }
        match self.offset {
            0 => Ok(()),
            offset if offset > 0 => write!(f, "+{}", offset),
            offset => write!(f, "{}", offset),
        }
    }
}

/// Immediate operand: a byte, or one half of an address expression (`#<Label`, `#>Label`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Immediate {
    Byte(u8),
    LowByte(Target),
    HighByte(Target),
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Byte(value) => write!(f, "#${:02X}", value),
            Immediate::LowByte(target) => write!(f, "#<{}", target),
            Immediate::HighByte(target) => write!(f, "#>{}", target),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Width {
    ZeroPage,
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexRegister {
    X,
    Y,
}

impl IndexRegister {
    pub fn location(self) -> Location {
        match self {
            IndexRegister::X => Location::X,
            IndexRegister::Y => Location::Y,
        }
    }
}

/// Addressing-mode operand as written in the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Implied,
    Accumulator,
    Immediate(Immediate),
    Direct {
        target: Target,
        width: Width,
    },
    Indexed {
        target: Target,
        index: IndexRegister,
        width: Width,
    },
    /// `JMP (target)`
    Indirect(Target),
    /// `(target,X)`
    IndexedIndirect(Target),
    /// `(target),Y`
    IndirectIndexed(Target),
}

impl Operand {
    pub fn direct(target: Target) -> Self {
        Operand::Direct {
            target,
            width: Width::Absolute,
        }
    }

    pub fn target(&self) -> Option<&Target> {
        match self {
            Operand::Direct { target, .. }
            | Operand::Indexed { target, .. }
            | Operand::Indirect(target)
            | Operand::IndexedIndirect(target)
            | Operand::IndirectIndexed(target) => Some(target),
            Operand::Implied | Operand::Accumulator | Operand::Immediate(_) => None,
        }
    }

    pub fn accesses_memory(&self) -> bool {
        self.target().is_some()
    }
}

/// Per-instruction register and flag traffic. `JSR` only reports the flags it leaves
/// undefined; the registers a callee consumes and produces come from the function analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Effects {
    pub reads: BTreeSet<Location>,
    pub writes: BTreeSet<Location>,
}

impl Effects {
    fn read(mut self, locations: &[Location]) -> Self {
        self.reads.extend(locations.iter().copied());
        self
    }

    fn write(mut self, locations: &[Location]) -> Self {
        self.writes.extend(locations.iter().copied());
        self
    }
}

/// A decoded instruction. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Operand,
}

impl Instruction {
    pub fn new(opcode: Opcode, operand: Operand) -> Self {
        Self { opcode, operand }
    }

    pub fn implied(opcode: Opcode) -> Self {
        Self::new(opcode, Operand::Implied)
    }

    /// The encodable addressing mode, falling back to the absolute form when the source asked
    /// for a zero-page form the opcode does not have.
    pub fn mode(&self) -> Option<AddressingMode> {
        let opcode = self.opcode;
        let pick = |preferred: AddressingMode, fallback: AddressingMode| {
            if machine::supports(opcode, preferred) {
                Some(preferred)
            } else if machine::supports(opcode, fallback) {
                Some(fallback)
            } else {
                None
            }
        };
        match &self.operand {
            Operand::Implied if machine::supports(opcode, AddressingMode::Accumulator) => {
                Some(AddressingMode::Accumulator)
            }
            Operand::Implied => pick(AddressingMode::Implied, AddressingMode::Implied),
            Operand::Accumulator => pick(AddressingMode::Accumulator, AddressingMode::Accumulator),
            Operand::Immediate(_) => pick(AddressingMode::Immediate, AddressingMode::Immediate),
            Operand::Direct { .. } if opcode.is_conditional_branch() => {
                Some(AddressingMode::Relative)
            }
            Operand::Direct { width: Width::ZeroPage, .. } => {
                pick(AddressingMode::ZeroPage, AddressingMode::Absolute)
            }
            Operand::Direct { .. } => pick(AddressingMode::Absolute, AddressingMode::Absolute),
            Operand::Indexed { index: IndexRegister::X, width: Width::ZeroPage, .. } => {
                pick(AddressingMode::ZeroPageX, AddressingMode::AbsoluteX)
            }
            Operand::Indexed { index: IndexRegister::Y, width: Width::ZeroPage, .. } => {
                pick(AddressingMode::ZeroPageY, AddressingMode::AbsoluteY)
            }
            Operand::Indexed { index: IndexRegister::X, .. } => {
                pick(AddressingMode::AbsoluteX, AddressingMode::AbsoluteX)
            }
            Operand::Indexed { index: IndexRegister::Y, .. } => {
                pick(AddressingMode::AbsoluteY, AddressingMode::AbsoluteY)
            }
            Operand::Indirect(_) => pick(AddressingMode::Indirect, AddressingMode::Indirect),
            Operand::IndexedIndirect(_) => {
                pick(AddressingMode::IndexedIndirect, AddressingMode::IndexedIndirect)
            }
            Operand::IndirectIndexed(_) => {
                pick(AddressingMode::IndirectIndexed, AddressingMode::IndirectIndexed)
            }
        }
    }

    pub fn encoded_len(&self) -> Option<u16> {
        self.mode().map(AddressingMode::encoded_len)
    }

    /// Static control-transfer target of a branch, `JMP abs` or `JSR`.
    pub fn transfer_target(&self) -> Option<&Target> {
        match (&self.operand, self.opcode) {
            (Operand::Direct { target, .. }, opcode)
                if opcode.is_conditional_branch() || matches!(opcode, Opcode::Jmp | Opcode::Jsr) =>
            {
                Some(target)
            }
            _ => None,
        }
    }

    /// Reads and writes nothing but registers and flags, so it can be folded into a condition.
    /// A conditional branch only reads a flag.
    pub fn is_register_only(&self) -> bool {
        if self.opcode.is_conditional_branch() {
            return true;
        }
        !self.operand.accesses_memory()
            && !matches!(
                self.opcode,
                Opcode::Jsr
                    | Opcode::Jmp
                    | Opcode::Pha
                    | Opcode::Pla
                    | Opcode::Php
                    | Opcode::Plp
                    | Opcode::Brk
                    | Opcode::Rts
                    | Opcode::Rti
                    | Opcode::Tsx
                    | Opcode::Txs
            )
    }

    pub fn effects(&self) -> Effects {
        use Location::*;
        let mut effects = Effects::default();
        match &self.operand {
            Operand::Indexed { index, .. } => {
                effects.reads.insert(index.location());
            }
            Operand::IndexedIndirect(_) => {
                effects.reads.insert(X);
            }
            Operand::IndirectIndexed(_) => {
                effects.reads.insert(Y);
            }
            _ => {}
        }
        let on_accumulator = !self.operand.accesses_memory();
        match self.opcode {
            Opcode::Adc | Opcode::Sbc => effects.read(&[A, C]).write(&[A, Z, N, C, V]),
            Opcode::And | Opcode::Ora | Opcode::Eor => effects.read(&[A]).write(&[A, Z, N]),
            Opcode::Asl | Opcode::Lsr if on_accumulator => effects.read(&[A]).write(&[A, Z, N, C]),
            Opcode::Asl | Opcode::Lsr => effects.write(&[Z, N, C]),
            Opcode::Rol | Opcode::Ror if on_accumulator => {
                effects.read(&[A, C]).write(&[A, Z, N, C])
            }
            Opcode::Rol | Opcode::Ror => effects.read(&[C]).write(&[Z, N, C]),
            Opcode::Bit => effects.read(&[A]).write(&[Z, N, V]),
            Opcode::Bcc | Opcode::Bcs => effects.read(&[C]),
            Opcode::Beq | Opcode::Bne => effects.read(&[Z]),
            Opcode::Bmi | Opcode::Bpl => effects.read(&[N]),
            Opcode::Bvc | Opcode::Bvs => effects.read(&[V]),
            Opcode::Clc | Opcode::Sec => effects.write(&[C]),
            Opcode::Clv => effects.write(&[V]),
            Opcode::Cmp => effects.read(&[A]).write(&[Z, N, C]),
            Opcode::Cpx => effects.read(&[X]).write(&[Z, N, C]),
            Opcode::Cpy => effects.read(&[Y]).write(&[Z, N, C]),
            Opcode::Dec | Opcode::Inc => effects.write(&[Z, N]),
            Opcode::Dex | Opcode::Inx => effects.read(&[X]).write(&[X, Z, N]),
            Opcode::Dey | Opcode::Iny => effects.read(&[Y]).write(&[Y, Z, N]),
            Opcode::Jsr => effects.write(&Location::FLAGS),
            Opcode::Lda => effects.write(&[A, Z, N]),
            Opcode::Ldx => effects.write(&[X, Z, N]),
            Opcode::Ldy => effects.write(&[Y, Z, N]),
            Opcode::Pha => effects.read(&[A]),
            Opcode::Php => effects.read(&Location::FLAGS),
            Opcode::Pla => effects.write(&[A, Z, N]),
            Opcode::Plp => effects.write(&Location::FLAGS),
            Opcode::Sta => effects.read(&[A]),
            Opcode::Stx => effects.read(&[X]),
            Opcode::Sty => effects.read(&[Y]),
            Opcode::Tax => effects.read(&[A]).write(&[X, Z, N]),
            Opcode::Tay => effects.read(&[A]).write(&[Y, Z, N]),
            Opcode::Txa => effects.read(&[X]).write(&[A, Z, N]),
            Opcode::Tya => effects.read(&[Y]).write(&[A, Z, N]),
            Opcode::Tsx => effects.write(&[X, Z, N]),
            Opcode::Txs => effects.read(&[X]),
            Opcode::Brk
            | Opcode::Cld
            | Opcode::Cli
            | Opcode::Jmp
            | Opcode::Nop
            | Opcode::Rti
            | Opcode::Rts
            | Opcode::Sed
            | Opcode::Sei => effects,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        match &self.operand {
            Operand::Implied => Ok(()),
            Operand::Accumulator => write!(f, " A"),
            Operand::Immediate(immediate) => write!(f, " {}", immediate),
            Operand::Direct { target, .. } => write!(f, " {}", target),
            Operand::Indexed { target, index: IndexRegister::X, .. } => write!(f, " {},X", target),
            Operand::Indexed { target, index: IndexRegister::Y, .. } => write!(f, " {},Y", target),
            Operand::Indirect(target) => write!(f, " ({})", target),
            Operand::IndexedIndirect(target) => write!(f, " ({},X)", target),
            Operand::IndirectIndexed(target) => write!(f, " ({}),Y", target),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineKind {
    /// A line holding only a label (or nothing).
    Empty,
    Instruction(Instruction),
    /// Raw bytes from a data directive.
    Data(Vec<u8>),
    /// `NAME = value`; occupies no bytes.
    Constant { name: String, value: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub label: Option<String>,
    /// Byte offset from the program origin.
    pub offset: u16,
    pub kind: LineKind,
}

impl Line {
    pub fn instruction(&self) -> Option<&Instruction> {
        match &self.kind {
            LineKind::Instruction(instruction) => Some(instruction),
            _ => None,
        }
    }

    /// Bytes this line occupies in the assembled image.
    pub fn size(&self) -> u16 {
        match &self.kind {
            LineKind::Instruction(instruction) => instruction.encoded_len().unwrap_or(0),
            LineKind::Data(bytes) => bytes.len() as u16,
            LineKind::Empty | LineKind::Constant { .. } => 0,
        }
    }
}

/// An ordered, parsed program. The symbol tables are built once from the lines, which can only
/// be replaced wholesale; data bytes may still be patched in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ProgramLines", into = "ProgramLines")]
pub struct Program {
    pub origin: u16,
    lines: Vec<Line>,
    constants: BTreeMap<String, u16>,
    label_offsets: BTreeMap<String, u16>,
}

#[derive(Clone, Serialize, Deserialize)]
struct ProgramLines {
    origin: u16,
    lines: Vec<Line>,
}

impl From<ProgramLines> for Program {
    fn from(program: ProgramLines) -> Self {
        Program::new(program.origin, program.lines)
    }
}

impl From<Program> for ProgramLines {
    fn from(program: Program) -> Self {
        ProgramLines {
            origin: program.origin,
            lines: program.lines,
        }
    }
}

impl Program {
    pub fn new(origin: u16, lines: Vec<Line>) -> Self {
        let constants = lines
            .iter()
            .filter_map(|line| match &line.kind {
                LineKind::Constant { name, value } => Some((name.clone(), *value)),
                _ => None,
            })
            .collect();
        let label_offsets = lines
            .iter()
            .filter(|line| !matches!(line.kind, LineKind::Constant { .. }))
            .filter_map(|line| line.label.clone().map(|label| (label, line.offset)))
            .collect();
        Self {
            origin,
            lines,
            constants,
            label_offsets,
        }
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// The bytes of a data line, for patching values known only once every symbol is.
    pub fn data_mut(&mut self, line: usize) -> Option<&mut Vec<u8>> {
        match &mut self.lines.get_mut(line)?.kind {
            LineKind::Data(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn constants(&self) -> &BTreeMap<String, u16> {
        &self.constants
    }

    /// Label name to byte offset.
    pub fn label_offsets(&self) -> &BTreeMap<String, u16> {
        &self.label_offsets
    }

    pub fn address_of(&self, offset: u16) -> u16 {
        self.origin.wrapping_add(offset)
    }

    /// Absolute address of a target. Constants shadow labels.
    pub fn resolve(&self, target: &Target) -> Option<u16> {
        let base = match &target.base {
            Reference::Address(address) => *address,
            Reference::Symbol(name) => match self.constants.get(name) {
                Some(value) => *value,
                None => self.address_of(*self.label_offsets.get(name)?),
            },
        };
        Some((base as i32).wrapping_add(target.offset) as u16)
    }

    pub fn resolve_immediate(&self, immediate: &Immediate) -> Option<u8> {
        match immediate {
            Immediate::Byte(value) => Some(*value),
            Immediate::LowByte(target) => self.resolve(target).map(|address| address as u8),
            Immediate::HighByte(target) => self.resolve(target).map(|address| (address >> 8) as u8),
        }
    }

    /// Encodes one instruction placed at `offset`.
    pub fn encode(&self, instruction: &Instruction, offset: u16) -> Result<Vec<u8>, CfgError> {
        let unencodable = || CfgError::Unencodable {
            instruction: instruction.to_string(),
        };
        let mode = instruction.mode().ok_or_else(unencodable)?;
        let opcode = machine::encode(instruction.opcode, mode).ok_or_else(unencodable)?;
        let mut bytes = vec![opcode];
        match (&instruction.operand, mode) {
            (Operand::Immediate(immediate), _) => {
                bytes.push(self.resolve_immediate(immediate).ok_or_else(unencodable)?);
            }
            (_, AddressingMode::Relative) => {
                let target = instruction.operand.target().ok_or_else(unencodable)?;
                let destination = self.resolve(target).ok_or_else(unencodable)?;
                let next = self.address_of(offset).wrapping_add(2);
                let displacement = destination.wrapping_sub(next) as i16;
                if !(-128..=127).contains(&displacement) {
                    return Err(CfgError::BranchOutOfRange {
                        instruction: instruction.to_string(),
                    });
                }
                bytes.push(displacement as i8 as u8);
            }
            (operand, mode) => {
                if let Some(target) = operand.target() {
                    let address = self.resolve(target).ok_or_else(unencodable)?;
                    bytes.push(address as u8);
                    if mode.encoded_len() == 3 {
                        bytes.push((address >> 8) as u8);
                    }
                }
            }
        }
        Ok(bytes)
    }

    /// Assembles the whole program into an image starting at `origin`.
    pub fn assemble(&self) -> Result<Vec<u8>, CfgError> {
        let mut image: Vec<u8> = Vec::new();
        for line in &self.lines {
            let bytes = match &line.kind {
                LineKind::Instruction(instruction) => self.encode(instruction, line.offset)?,
                LineKind::Data(bytes) => bytes.clone(),
                LineKind::Empty | LineKind::Constant { .. } => continue,
            };
            let start = line.offset as usize;
            if image.len() < start + bytes.len() {
                image.resize(start + bytes.len(), 0);
            }
            image[start..start + bytes.len()].copy_from_slice(&bytes);
        }
        Ok(image)
    }
}

/// Incremental construction of a [`Program`], computing byte offsets as lines are added.
/// Operands name their width explicitly, so sizes are known without a second pass.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    origin: u16,
    offset: u16,
    pending_label: Option<String>,
    lines: Vec<Line>,
}

impl ProgramBuilder {
    pub fn new(origin: u16) -> Self {
        Self {
            origin,
            ..Self::default()
        }
    }

    /// Attaches a label to the next line.
    pub fn label(mut self, name: &str) -> Self {
        if let Some(previous) = self.pending_label.replace(name.to_string()) {
            self.push(Some(previous), LineKind::Empty);
        }
        self
    }

    pub fn op(self, opcode: Opcode, operand: Operand) -> Self {
        self.line(LineKind::Instruction(Instruction::new(opcode, operand)))
    }

    pub fn implied(self, opcode: Opcode) -> Self {
        self.op(opcode, Operand::Implied)
    }

    pub fn immediate(self, opcode: Opcode, value: u8) -> Self {
        self.op(opcode, Operand::Immediate(Immediate::Byte(value)))
    }

    pub fn zero_page(self, opcode: Opcode, address: u8) -> Self {
        self.op(
            opcode,
            Operand::Direct {
                target: Target::address(address as u16),
                width: Width::ZeroPage,
            },
        )
    }

    pub fn absolute(self, opcode: Opcode, address: u16) -> Self {
        self.op(opcode, Operand::direct(Target::address(address)))
    }

    /// Branch, `JMP` or `JSR` to a label.
    pub fn to_label(self, opcode: Opcode, label: &str) -> Self {
        self.op(opcode, Operand::direct(Target::symbol(label)))
    }

    pub fn data(self, bytes: &[u8]) -> Self {
        self.line(LineKind::Data(bytes.to_vec()))
    }

    fn line(mut self, kind: LineKind) -> Self {
        let label = self.pending_label.take();
        self.push(label, kind);
        self
    }

    fn push(&mut self, label: Option<String>, kind: LineKind) {
        let line = Line {
            label,
            offset: self.offset,
            kind,
        };
        self.offset = self.offset.wrapping_add(line.size());
        self.lines.push(line);
    }

    pub fn build(mut self) -> Program {
        if let Some(label) = self.pending_label.take() {
            self.push(Some(label), LineKind::Empty);
        }
        Program::new(self.origin, self.lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_page_request_falls_back_to_absolute() {
        let jmp = Instruction::new(
            Opcode::Jmp,
            Operand::Direct {
                target: Target::address(0x10),
                width: Width::ZeroPage,
            },
        );
        assert_eq!(jmp.mode(), Some(AddressingMode::Absolute));
        let lda = Instruction::new(
            Opcode::Lda,
            Operand::Indexed {
                target: Target::address(0x10),
                index: IndexRegister::Y,
                width: Width::ZeroPage,
            },
        );
        assert_eq!(lda.mode(), Some(AddressingMode::AbsoluteY));
        assert_eq!(lda.encoded_len(), Some(3));
    }

    #[test]
    fn shifts_without_operand_use_accumulator() {
        let asl = Instruction::implied(Opcode::Asl);
        assert_eq!(asl.mode(), Some(AddressingMode::Accumulator));
        assert!(asl.effects().writes.contains(&Location::A));
    }

    #[test]
    fn builder_tracks_offsets_and_assembles() {
        let program = ProgramBuilder::new(0x8000)
            .label("Start")
            .immediate(Opcode::Ldx, 0x05)
            .label("Loop")
            .implied(Opcode::Dex)
            .to_label(Opcode::Bne, "Loop")
            .implied(Opcode::Rts)
            .build();
        assert_eq!(program.label_offsets().get("Loop"), Some(&2));
        assert_eq!(
            program.assemble().unwrap(),
            vec![0xA2, 0x05, 0xCA, 0xD0, 0xFD, 0x60]
        );
    }

    #[test]
    fn constants_shadow_labels() {
        let program = Program::new(
            0x8000,
            vec![
                Line {
                    label: Some("PPUDATA".into()),
                    offset: 0,
                    kind: LineKind::Constant {
                        name: "PPUDATA".into(),
                        value: 0x2007,
                    },
                },
                Line {
                    label: Some("Start".into()),
                    offset: 0,
                    kind: LineKind::Instruction(Instruction::implied(Opcode::Rts)),
                },
            ],
        );
        assert_eq!(program.resolve(&Target::symbol("PPUDATA")), Some(0x2007));
        assert_eq!(program.resolve(&Target::symbol("Start").with_offset(1)), Some(0x8001));
        assert_eq!(program.resolve(&Target::symbol("Missing")), None);
    }

    #[test]
    fn patched_data_keeps_symbols() {
        let mut program = ProgramBuilder::new(0xC000)
            .label("Table")
            .data(&[0, 0])
            .label("Start")
            .implied(Opcode::Rts)
            .build();
        let start = program.resolve(&Target::symbol("Start")).unwrap();
        assert_eq!(start, 0xC002);
        let bytes = program.data_mut(0).unwrap();
        bytes[0] = start as u8;
        bytes[1] = (start >> 8) as u8;
        assert_eq!(program.lines()[0].kind, LineKind::Data(vec![0x02, 0xC0]));
        assert_eq!(program.label_offsets().get("Start"), Some(&2));
        assert!(program.data_mut(1).is_none());
    }

    #[test]
    fn renders_source_syntax() {
        let sta = Instruction::new(
            Opcode::Sta,
            Operand::Indexed {
                target: Target::address(0x0200),
                index: IndexRegister::X,
                width: Width::Absolute,
            },
        );
        assert_eq!(sta.to_string(), "STA $0200,X");
        let lda = Instruction::new(Opcode::Lda, Operand::Immediate(Immediate::Byte(0xff)));
        assert_eq!(lda.to_string(), "LDA #$FF");
    }
}
