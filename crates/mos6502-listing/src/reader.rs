// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Line-oriented reader for assembly listings.
//!
//! Constants are collected first so that operand widths, and therefore byte offsets, are known
//! while the lines are read. `.dw` words are filled in once every label has an offset.

use crate::error::ListingError;
use log::debug;
use mos6502_cfg::program::{
    Immediate, IndexRegister, Line, LineKind, Operand, Reference, Target, Width,
};
use mos6502_cfg::{Instruction, Opcode, Program};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

static LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z_@.][\w@.]*):\s*(.*)$").unwrap());
static CONSTANT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*=\s*(.+)$").unwrap());
static DIRECTIVE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\.(\w+)\s*(.*)$").unwrap());
static INSTRUCTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z]{3})(?:\s+(.*))?$").unwrap());
static EXPRESSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<base>\$[0-9A-Fa-f]+|%[01]+|[0-9]+|[A-Za-z_@.][\w@.]*)\s*(?:(?P<sign>[+-])\s*(?P<offset>\$[0-9A-Fa-f]+|%[01]+|[0-9]+))?$",
    )
    .unwrap()
});
static INDEXED_INDIRECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\(\s*(.+?)\s*,\s*x\s*\)$").unwrap());
static INDIRECT_INDEXED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\(\s*(.+?)\s*\)\s*,\s*y$").unwrap());
static INDIRECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\(\s*(.+?)\s*\)$").unwrap());
static INDEXED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(.+?)\s*,\s*([xy])$").unwrap());

/// Reads a listing into the line model, computing every line's byte offset.
pub fn parse_listing(source: &str) -> Result<Program, ListingError> {
    let constants = collect_constants(source)?;
    let mut reader = Reader {
        constants,
        ..Reader::default()
    };
    for (index, text) in source.lines().enumerate() {
        reader.line(index + 1, strip_comment(text))?;
    }
    reader.finish()
}

fn strip_comment(text: &str) -> &str {
    text.split(';').next().unwrap_or_default().trim()
}

fn collect_constants(source: &str) -> Result<BTreeMap<String, u16>, ListingError> {
    let mut constants = BTreeMap::new();
    for (index, text) in source.lines().enumerate() {
        let line = index + 1;
        if let Some(captures) = CONSTANT.captures(strip_comment(text)) {
            let value = number_or_constant(line, &captures[2], &constants)?;
            constants.insert(captures[1].to_string(), value);
        }
    }
    Ok(constants)
}

/// A numeric literal, or a constant defined earlier in the listing.
fn number_or_constant(
    line: usize,
    text: &str,
    constants: &BTreeMap<String, u16>,
) -> Result<u16, ListingError> {
    let target = expression(line, text)?;
    let base = match &target.base {
        Reference::Address(address) => *address as i64,
        Reference::Symbol(name) => *constants.get(name).ok_or_else(|| ListingError::UnknownSymbol {
            line,
            symbol: name.clone(),
        })? as i64,
    };
    let value = base + target.offset as i64;
    u16::try_from(value).map_err(|_| ListingError::OutOfRange { line, value })
}

fn number(line: usize, text: &str) -> Result<i64, ListingError> {
    let parsed = if let Some(hex) = text.strip_prefix('$') {
        i64::from_str_radix(hex, 16)
    } else if let Some(binary) = text.strip_prefix('%') {
        i64::from_str_radix(binary, 2)
    } else {
        text.parse::<i64>()
    };
    parsed.map_err(|_| ListingError::Syntax {
        line,
        text: text.to_string(),
    })
}

/// `base` or `base ± number`, where `base` is a number or a symbol.
fn expression(line: usize, text: &str) -> Result<Target, ListingError> {
    let captures = EXPRESSION.captures(text.trim()).ok_or_else(|| ListingError::BadOperand {
        line,
        operand: text.to_string(),
    })?;
    let base = &captures["base"];
    let mut target = if base.starts_with(|c: char| c == '$' || c == '%' || c.is_ascii_digit()) {
        let value = number(line, base)?;
        let address = u16::try_from(value).map_err(|_| ListingError::OutOfRange { line, value })?;
        Target::address(address)
    } else {
        Target::symbol(base)
    };
    if let (Some(sign), Some(offset)) = (captures.name("sign"), captures.name("offset")) {
        let magnitude = number(line, offset.as_str())?;
        let offset = if sign.as_str() == "-" { -magnitude } else { magnitude };
        target = target.with_offset(i32::try_from(offset).map_err(|_| ListingError::OutOfRange {
            line,
            value: offset,
        })?);
    }
    Ok(target)
}

/// Pending `.dw` word: the data line, the position within it, and the expression to store.
struct Word {
    source_line: usize,
    line: usize,
    position: usize,
    target: Target,
}

#[derive(Default)]
struct Reader {
    constants: BTreeMap<String, u16>,
    origin: Option<u16>,
    offset: u16,
    labels: BTreeSet<String>,
    lines: Vec<Line>,
    words: Vec<Word>,
}

impl Reader {
    fn line(&mut self, number: usize, text: &str) -> Result<(), ListingError> {
        if text.is_empty() {
            return Ok(());
        }
        if let Some(captures) = CONSTANT.captures(text) {
            let name = captures[1].to_string();
            let value = self.constants.get(&name).copied().unwrap_or_default();
            self.push(None, LineKind::Constant { name, value });
            return Ok(());
        }
        let (label, rest) = match LABEL.captures(text) {
            Some(captures) => {
                let label = captures[1].to_string();
                if !self.labels.insert(label.clone()) {
                    return Err(ListingError::DuplicateLabel { line: number, label });
                }
                (Some(label), captures.get(2).map_or("", |rest| rest.as_str()).trim())
            }
            None => (None, text),
        };
        if rest.is_empty() {
            self.push(label, LineKind::Empty);
            return Ok(());
        }
        if let Some(captures) = DIRECTIVE.captures(rest) {
            return self.directive(number, label, &captures[1], captures[2].trim());
        }
        let captures = INSTRUCTION.captures(rest).ok_or_else(|| ListingError::Syntax {
            line: number,
            text: rest.to_string(),
        })?;
        let mnemonic = &captures[1];
        let opcode = Opcode::from_mnemonic(mnemonic).ok_or_else(|| ListingError::UnknownMnemonic {
            line: number,
            mnemonic: mnemonic.to_string(),
        })?;
        let text = captures.get(2).map_or("", |operand| operand.as_str());
        let operand = self.operand(number, text.trim())?;
        let instruction = Instruction::new(opcode, operand);
        if instruction.encoded_len().is_none() {
            return Err(ListingError::Unencodable {
                line: number,
                instruction: rest.to_string(),
            });
        }
        self.push(label, LineKind::Instruction(instruction));
        Ok(())
    }

    fn directive(
        &mut self,
        number: usize,
        label: Option<String>,
        name: &str,
        arguments: &str,
    ) -> Result<(), ListingError> {
        let items = || arguments.split(',').map(str::trim).filter(|item| !item.is_empty());
        match name.to_ascii_lowercase().as_str() {
            "org" => {
                let origin = number_or_constant(number, arguments, &self.constants)?;
                match self.origin {
                    None if self.offset == 0 => self.origin = Some(origin),
                    _ => {
                        let current = self.origin.unwrap_or_default().wrapping_add(self.offset);
                        if origin < current {
                            return Err(ListingError::OrgBackwards { line: number, origin });
                        }
                        let padding = (origin - current) as usize;
                        if padding > 0 {
                            self.push(None, LineKind::Data(vec![0; padding]));
                        }
                    }
                }
                if label.is_some() {
                    self.push(label, LineKind::Empty);
                }
            }
            "db" | "byte" => {
                let mut bytes = vec![];
                for item in items() {
                    let value = number_or_constant(number, item, &self.constants)?;
                    let byte = u8::try_from(value).map_err(|_| ListingError::OutOfRange {
                        line: number,
                        value: value as i64,
                    })?;
                    bytes.push(byte);
                }
                self.push(label, LineKind::Data(bytes));
            }
            "dw" | "word" => {
                let mut count = 0;
                for item in items() {
                    self.words.push(Word {
                        source_line: number,
                        line: self.lines.len(),
                        position: count * 2,
                        target: expression(number, item)?,
                    });
                    count += 1;
                }
                self.push(label, LineKind::Data(vec![0; count * 2]));
            }
            _ => {
                return Err(ListingError::UnknownDirective {
                    line: number,
                    directive: name.to_string(),
                })
            }
        }
        Ok(())
    }

    fn operand(&self, line: usize, text: &str) -> Result<Operand, ListingError> {
        if text.is_empty() {
            return Ok(Operand::Implied);
        }
        if text.eq_ignore_ascii_case("a") {
            return Ok(Operand::Accumulator);
        }
        if let Some(immediate) = text.strip_prefix('#') {
            let immediate = immediate.trim();
            return Ok(Operand::Immediate(if let Some(low) = immediate.strip_prefix('<') {
                Immediate::LowByte(expression(line, low)?)
            } else if let Some(high) = immediate.strip_prefix('>') {
                Immediate::HighByte(expression(line, high)?)
            } else {
                let value = number_or_constant(line, immediate, &self.constants)?;
                Immediate::Byte(u8::try_from(value).map_err(|_| ListingError::OutOfRange {
                    line,
                    value: value as i64,
                })?)
            }));
        }
        if let Some(captures) = INDEXED_INDIRECT.captures(text) {
            return Ok(Operand::IndexedIndirect(expression(line, &captures[1])?));
        }
        if let Some(captures) = INDIRECT_INDEXED.captures(text) {
            return Ok(Operand::IndirectIndexed(expression(line, &captures[1])?));
        }
        if let Some(captures) = INDIRECT.captures(text) {
            return Ok(Operand::Indirect(expression(line, &captures[1])?));
        }
        if let Some(captures) = INDEXED.captures(text) {
            let target = expression(line, &captures[1])?;
            let index = if captures[2].eq_ignore_ascii_case("x") {
                IndexRegister::X
            } else {
                IndexRegister::Y
            };
            let width = self.width(&target);
            return Ok(Operand::Indexed { target, index, width });
        }
        let target = expression(line, text)?;
        let width = self.width(&target);
        Ok(Operand::Direct { target, width })
    }

    /// Zero page when the address is known now and fits in a byte. Labels are always absolute.
    fn width(&self, target: &Target) -> Width {
        let base = match &target.base {
            Reference::Address(address) => Some(*address as i64),
            Reference::Symbol(name) => self.constants.get(name).map(|value| *value as i64),
        };
        match base.map(|base| base + target.offset as i64) {
            Some(address) if (0..=0xff).contains(&address) => Width::ZeroPage,
            _ => Width::Absolute,
        }
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

    fn finish(self) -> Result<Program, ListingError> {
        let mut program = Program::new(self.origin.unwrap_or_default(), self.lines);
        for word in &self.words {
            let value = program.resolve(&word.target).ok_or_else(|| ListingError::UnknownSymbol {
                line: word.source_line,
                symbol: word.target.to_string(),
            })?;
            if let Some(bytes) = program.data_mut(word.line) {
                bytes[word.position] = value as u8;
                bytes[word.position + 1] = (value >> 8) as u8;
            }
        }
        debug!(
            "[listing] {} lines at origin {:#06x}, {} bytes",
            program.lines().len(),
            program.origin,
            self.offset
        );
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mos6502_cfg::machine::AddressingMode;

    fn instruction(program: &Program, label: &str) -> Instruction {
        program
            .lines()
            .iter()
            .find(|line| line.label.as_deref() == Some(label))
            .and_then(Line::instruction)
            .cloned()
            .unwrap()
    }

    #[test]
    fn reads_labels_offsets_and_widths() {
        let program = parse_listing(
            "
            PPUDATA = $2007
            TMP = $10
                .org $8000
            Start:  LDA #$00      ; clear
                    STA TMP
            Store:  STA PPUDATA
                    LDY TMP+1,X   ; zero page, indexed
                    RTS
            ",
        )
        .unwrap();
        assert_eq!(program.origin, 0x8000);
        assert_eq!(program.label_offsets().get("Store"), Some(&4));
        assert_eq!(instruction(&program, "Store").mode(), Some(AddressingMode::Absolute));
        assert_eq!(
            program.assemble().unwrap(),
            vec![0xA9, 0x00, 0x85, 0x10, 0x8D, 0x07, 0x20, 0xB4, 0x11, 0x60]
        );
    }

    #[test]
    fn reads_addressing_modes() {
        let program = parse_listing(
            "
            a: ASL
            b: ROL A
            c: LDA ($20,x)
            d: STA ($20),Y
            e: JMP ($FFFC)
            f: LDA Table-1,Y
            Table: .db 1, $02, %11
            ",
        )
        .unwrap();
        assert_eq!(instruction(&program, "a").mode(), Some(AddressingMode::Accumulator));
        assert_eq!(instruction(&program, "b").operand, Operand::Accumulator);
        assert_eq!(instruction(&program, "c").mode(), Some(AddressingMode::IndexedIndirect));
        assert_eq!(instruction(&program, "d").mode(), Some(AddressingMode::IndirectIndexed));
        assert_eq!(instruction(&program, "e").mode(), Some(AddressingMode::Indirect));
        insta::assert_snapshot!(instruction(&program, "f").to_string(), @"LDA Table-1,Y");
        assert_eq!(
            program.lines().last().map(|line| line.kind.clone()),
            Some(LineKind::Data(vec![1, 2, 3]))
        );
    }

    #[test]
    fn words_resolve_forward_labels() {
        let program = parse_listing(
            "
                .org $c000
            Vectors: .dw Reset, Reset+2
            Reset:   RTS
            ",
        )
        .unwrap();
        assert_eq!(
            program.assemble().unwrap(),
            vec![0x04, 0xC0, 0x06, 0xC0, 0x60]
        );
    }

    #[test]
    fn bit_skip_data_byte_is_kept() {
        let program = parse_listing(
            "
            EntryA: LDA #$00
                    .db $2c
            EntryB: LDA #$FF
                    STA $00
                    RTS
            ",
        )
        .unwrap();
        assert_eq!(program.label_offsets().get("EntryB"), Some(&3));
        assert_eq!(program.lines()[1].kind, LineKind::Data(vec![0x2C]));
    }

    #[test]
    fn immediate_halves_of_labels() {
        let program = parse_listing(
            "
                .org $9000
            Start: LDA #<Start
                   LDX #>Start
                   RTS
            ",
        )
        .unwrap();
        assert_eq!(program.assemble().unwrap(), vec![0xA9, 0x00, 0xA2, 0x90, 0x60]);
    }

    #[test]
    fn later_org_pads_with_zeroes() {
        let program = parse_listing(
            "
                .org $8000
                RTS
                .org $8003
            Next: RTS
            ",
        )
        .unwrap();
        assert_eq!(program.label_offsets().get("Next"), Some(&3));
        assert_eq!(program.assemble().unwrap(), vec![0x60, 0, 0, 0x60]);
    }

    #[test]
    fn errors_name_the_line() {
        assert_eq!(
            parse_listing("  RTS\n  XYZ #1\n"),
            Err(ListingError::UnknownMnemonic {
                line: 2,
                mnemonic: "XYZ".to_string()
            })
        );
        assert_eq!(
            parse_listing("  LDA #$100\n"),
            Err(ListingError::OutOfRange { line: 1, value: 0x100 })
        );
        assert!(matches!(
            parse_listing("  .dw Missing\n"),
            Err(ListingError::UnknownSymbol { line: 1, .. })
        ));
        assert!(matches!(
            parse_listing("X1: RTS\nX1: RTS\n"),
            Err(ListingError::DuplicateLabel { line: 2, .. })
        ));
        assert!(matches!(
            parse_listing("  STX $10,X\n"),
            Err(ListingError::Unencodable { line: 1, .. })
        ));
        insta::assert_snapshot!(
            parse_listing("  .org $8000\n  RTS\n  .org $7000\n").unwrap_err().to_string(),
            @"line 3: `.org 0x7000` is behind the current address"
        );
    }
}
