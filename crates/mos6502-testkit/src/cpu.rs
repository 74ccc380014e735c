// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Reference interpreter for official 6502 opcodes over a flat 64 KiB memory.
//!
//! Decimal mode is not implemented: `SED` sets the flag but `ADC`/`SBC` stay binary.

use mos6502_cfg::machine::{self, AddressingMode};
use mos6502_cfg::Opcode;
use thiserror::Error;

pub const MEMORY_SIZE: usize = 0x10000;
const STACK_BASE: u16 = 0x0100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CpuError {
    #[error("illegal opcode {opcode:#04x} at {pc:#06x}")]
    IllegalOpcode { pc: u16, opcode: u8 },

    #[error("BRK at {pc:#06x}")]
    Break { pc: u16 },

    #[error("no return after {0} steps")]
    StepLimit(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status {
    pub carry: bool,
    pub zero: bool,
    pub interrupt: bool,
    pub decimal: bool,
    pub overflow: bool,
    pub negative: bool,
}

impl Status {
    /// Byte as pushed by `PHP` (break and unused bits set).
    pub fn to_byte(self) -> u8 {
        (self.carry as u8)
            | (self.zero as u8) << 1
            | (self.interrupt as u8) << 2
            | (self.decimal as u8) << 3
            | 0x30
            | (self.overflow as u8) << 6
            | (self.negative as u8) << 7
    }

    pub fn from_byte(byte: u8) -> Self {
        Self {
            carry: byte & 0x01 != 0,
            zero: byte & 0x02 != 0,
            interrupt: byte & 0x04 != 0,
            decimal: byte & 0x08 != 0,
            overflow: byte & 0x40 != 0,
            negative: byte & 0x80 != 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cpu {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub status: Status,
    pub memory: Vec<u8>,
    pub steps: usize,
}

impl Cpu {
    pub fn new(memory: Vec<u8>) -> Self {
        let mut memory = memory;
        memory.resize(MEMORY_SIZE, 0);
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xfd,
            pc: 0,
            status: Status {
                interrupt: true,
                ..Status::default()
            },
            memory,
            steps: 0,
        }
    }

    pub fn read(&self, address: u16) -> u8 {
        self.memory[address as usize]
    }

    fn write(&mut self, address: u16, value: u8) {
        self.memory[address as usize] = value;
    }

    fn word(&self, address: u16) -> u16 {
        u16::from_le_bytes([self.read(address), self.read(address.wrapping_add(1))])
    }

    fn zero_page_word(&self, address: u8) -> u16 {
        u16::from_le_bytes([self.read(address as u16), self.read(address.wrapping_add(1) as u16)])
    }

    fn push(&mut self, value: u8) {
        self.write(STACK_BASE + self.sp as u16, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn pull(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        self.read(STACK_BASE + self.sp as u16)
    }

    /// Calls the subroutine at `entry` as if by `JSR` and runs until it returns.
    pub fn call(&mut self, entry: u16, step_limit: usize) -> Result<(), CpuError> {
        // Return address as pushed by a JSR located just below `entry`; never executed.
        let sentinel = entry.wrapping_sub(1);
        self.push((sentinel >> 8) as u8);
        self.push(sentinel as u8);
        self.pc = entry;
        let mut depth = 0usize;
        loop {
            if self.steps >= step_limit {
                return Err(CpuError::StepLimit(self.steps));
            }
            match self.step()? {
                Opcode::Jsr => depth += 1,
                Opcode::Rts if depth == 0 => return Ok(()),
                Opcode::Rts => depth -= 1,
                _ => {}
            }
        }
    }

    /// Executes one instruction and reports its opcode.
    pub fn step(&mut self) -> Result<Opcode, CpuError> {
        let pc = self.pc;
        let byte = self.read(pc);
        let (opcode, mode) =
            machine::decode(byte).ok_or(CpuError::IllegalOpcode { pc, opcode: byte })?;
        self.steps += 1;
        let operand = pc.wrapping_add(1);
        let next = pc.wrapping_add(mode.encoded_len());
        let address = self.effective_address(mode, operand, next);
        self.pc = next;
        self.execute(opcode, mode, address)?;
        Ok(opcode)
    }

    fn effective_address(&self, mode: AddressingMode, operand: u16, next: u16) -> u16 {
        let byte = self.read(operand);
        match mode {
            AddressingMode::Implied | AddressingMode::Accumulator => 0,
            AddressingMode::Immediate => operand,
            AddressingMode::ZeroPage => byte as u16,
            AddressingMode::ZeroPageX => byte.wrapping_add(self.x) as u16,
            AddressingMode::ZeroPageY => byte.wrapping_add(self.y) as u16,
            AddressingMode::Absolute => self.word(operand),
            AddressingMode::AbsoluteX => self.word(operand).wrapping_add(self.x as u16),
            AddressingMode::AbsoluteY => self.word(operand).wrapping_add(self.y as u16),
            AddressingMode::Indirect => {
                let pointer = self.word(operand);
                let high = (pointer & 0xff00) | (pointer.wrapping_add(1) & 0x00ff);
                u16::from_le_bytes([self.read(pointer), self.read(high)])
            }
            AddressingMode::IndexedIndirect => self.zero_page_word(byte.wrapping_add(self.x)),
            AddressingMode::IndirectIndexed => {
                self.zero_page_word(byte).wrapping_add(self.y as u16)
            }
            AddressingMode::Relative => next.wrapping_add(byte as i8 as u16),
        }
    }

    fn set_zero_negative(&mut self, value: u8) {
        self.status.zero = value == 0;
        self.status.negative = value & 0x80 != 0;
    }

    fn add(&mut self, value: u8) {
        let sum = self.a as u16 + value as u16 + self.status.carry as u16;
        let result = sum as u8;
        self.status.carry = sum > 0xff;
        self.status.overflow = (self.a ^ value) & 0x80 == 0 && (self.a ^ result) & 0x80 != 0;
        self.a = result;
        self.set_zero_negative(result);
    }

    fn compare(&mut self, register: u8, value: u8) {
        self.status.carry = register >= value;
        self.set_zero_negative(register.wrapping_sub(value));
    }

    /// Shared read-modify-write path for shifts, rotates, `INC` and `DEC`.
    fn modify(&mut self, mode: AddressingMode, address: u16, f: impl FnOnce(&mut Self, u8) -> u8) {
        let value = if mode == AddressingMode::Accumulator {
            self.a
        } else {
            self.read(address)
        };
        let result = f(self, value);
        self.set_zero_negative(result);
        if mode == AddressingMode::Accumulator {
            self.a = result;
        } else {
            self.write(address, result);
        }
    }

    fn branch(&mut self, taken: bool, target: u16) {
        if taken {
            self.pc = target;
        }
    }

    fn execute(
        &mut self,
        opcode: Opcode,
        mode: AddressingMode,
        address: u16,
    ) -> Result<(), CpuError> {
        let load = |cpu: &Self| cpu.read(address);
        match opcode {
            Opcode::Adc => self.add(load(self)),
            Opcode::Sbc => self.add(load(self) ^ 0xff),
            Opcode::And => {
                self.a &= load(self);
                self.set_zero_negative(self.a);
            }
            Opcode::Ora => {
                self.a |= load(self);
                self.set_zero_negative(self.a);
            }
            Opcode::Eor => {
                self.a ^= load(self);
                self.set_zero_negative(self.a);
            }
            Opcode::Asl => self.modify(mode, address, |cpu, value| {
                cpu.status.carry = value & 0x80 != 0;
                value << 1
            }),
            Opcode::Lsr => self.modify(mode, address, |cpu, value| {
                cpu.status.carry = value & 0x01 != 0;
                value >> 1
            }),
            Opcode::Rol => self.modify(mode, address, |cpu, value| {
                let carry = cpu.status.carry as u8;
                cpu.status.carry = value & 0x80 != 0;
                value << 1 | carry
            }),
            Opcode::Ror => self.modify(mode, address, |cpu, value| {
                let carry = (cpu.status.carry as u8) << 7;
                cpu.status.carry = value & 0x01 != 0;
                value >> 1 | carry
            }),
            Opcode::Inc => self.modify(mode, address, |_, value| value.wrapping_add(1)),
            Opcode::Dec => self.modify(mode, address, |_, value| value.wrapping_sub(1)),
            Opcode::Bit => {
                let value = load(self);
                self.status.zero = self.a & value == 0;
                self.status.negative = value & 0x80 != 0;
                self.status.overflow = value & 0x40 != 0;
            }
            Opcode::Bcc => self.branch(!self.status.carry, address),
            Opcode::Bcs => self.branch(self.status.carry, address),
            Opcode::Bne => self.branch(!self.status.zero, address),
            Opcode::Beq => self.branch(self.status.zero, address),
            Opcode::Bpl => self.branch(!self.status.negative, address),
            Opcode::Bmi => self.branch(self.status.negative, address),
            Opcode::Bvc => self.branch(!self.status.overflow, address),
            Opcode::Bvs => self.branch(self.status.overflow, address),
            Opcode::Clc => self.status.carry = false,
            Opcode::Sec => self.status.carry = true,
            Opcode::Cli => self.status.interrupt = false,
            Opcode::Sei => self.status.interrupt = true,
            Opcode::Cld => self.status.decimal = false,
            Opcode::Sed => self.status.decimal = true,
            Opcode::Clv => self.status.overflow = false,
            Opcode::Cmp => self.compare(self.a, load(self)),
            Opcode::Cpx => self.compare(self.x, load(self)),
            Opcode::Cpy => self.compare(self.y, load(self)),
            Opcode::Dex => {
                self.x = self.x.wrapping_sub(1);
                self.set_zero_negative(self.x);
            }
            Opcode::Dey => {
                self.y = self.y.wrapping_sub(1);
                self.set_zero_negative(self.y);
            }
            Opcode::Inx => {
                self.x = self.x.wrapping_add(1);
                self.set_zero_negative(self.x);
            }
            Opcode::Iny => {
                self.y = self.y.wrapping_add(1);
                self.set_zero_negative(self.y);
            }
            Opcode::Jmp => self.pc = address,
            Opcode::Jsr => {
                let last = self.pc.wrapping_sub(1);
                self.push((last >> 8) as u8);
                self.push(last as u8);
                self.pc = address;
            }
            Opcode::Rts => {
                let low = self.pull();
                let high = self.pull();
                self.pc = u16::from_le_bytes([low, high]).wrapping_add(1);
            }
            Opcode::Rti => {
                let status = self.pull();
                self.status = Status::from_byte(status);
                let low = self.pull();
                let high = self.pull();
                self.pc = u16::from_le_bytes([low, high]);
            }
            Opcode::Brk => {
                return Err(CpuError::Break {
                    pc: self.pc.wrapping_sub(1),
                })
            }
            Opcode::Lda => {
                self.a = load(self);
                self.set_zero_negative(self.a);
            }
            Opcode::Ldx => {
                self.x = load(self);
                self.set_zero_negative(self.x);
            }
            Opcode::Ldy => {
                self.y = load(self);
                self.set_zero_negative(self.y);
            }
            Opcode::Sta => self.write(address, self.a),
            Opcode::Stx => self.write(address, self.x),
            Opcode::Sty => self.write(address, self.y),
            Opcode::Tax => {
                self.x = self.a;
                self.set_zero_negative(self.x);
            }
            Opcode::Tay => {
                self.y = self.a;
                self.set_zero_negative(self.y);
            }
            Opcode::Txa => {
                self.a = self.x;
                self.set_zero_negative(self.a);
            }
            Opcode::Tya => {
                self.a = self.y;
                self.set_zero_negative(self.a);
            }
            Opcode::Tsx => {
                self.x = self.sp;
                self.set_zero_negative(self.x);
            }
            Opcode::Txs => self.sp = self.x,
            Opcode::Pha => self.push(self.a),
            Opcode::Php => self.push(self.status.to_byte()),
            Opcode::Pla => {
                self.a = self.pull();
                self.set_zero_negative(self.a);
            }
            Opcode::Plp => {
                let status = self.pull();
                self.status = Status::from_byte(status);
            }
            Opcode::Nop => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(origin: u16, code: &[u8]) -> Cpu {
        let mut memory = vec![0; MEMORY_SIZE];
        memory[origin as usize..origin as usize + code.len()].copy_from_slice(code);
        let mut cpu = Cpu::new(memory);
        cpu.call(origin, 10_000).unwrap();
        cpu
    }

    #[test]
    fn counts_down_and_stores() {
        // LDA #$07 / LDX #$03 / loop: STA $10,X / DEX / BNE loop / RTS
        let cpu = run(0x8000, &[0xA9, 0x07, 0xA2, 0x03, 0x95, 0x10, 0xCA, 0xD0, 0xFB, 0x60]);
        assert_eq!(cpu.x, 0);
        assert_eq!(&cpu.memory[0x10..0x14], &[0, 7, 7, 7]);
        assert_eq!(cpu.sp, 0xfd);
    }

    #[test]
    fn adc_sets_carry_and_overflow() {
        // LDA #$7F / CLC / ADC #$01 / RTS
        let cpu = run(0x8000, &[0xA9, 0x7F, 0x18, 0x69, 0x01, 0x60]);
        assert_eq!(cpu.a, 0x80);
        assert!(cpu.status.overflow);
        assert!(!cpu.status.carry);
        assert!(cpu.status.negative);
        // LDA #$00 / SEC / SBC #$01 / RTS
        let cpu = run(0x8000, &[0xA9, 0x00, 0x38, 0xE9, 0x01, 0x60]);
        assert_eq!(cpu.a, 0xff);
        assert!(!cpu.status.carry);
    }

    #[test]
    fn nested_subroutine_returns_to_caller() {
        // JSR sub / STA $00 / RTS / sub: LDA #$2A / RTS
        let cpu = run(0x8000, &[0x20, 0x06, 0x80, 0x85, 0x00, 0x60, 0xA9, 0x2A, 0x60]);
        assert_eq!(cpu.memory[0], 0x2A);
    }

    #[test]
    fn bit_skip_executes_hidden_operand_as_bit() {
        // LDA #$00 / .db $2C / LDA #$FF / STA $00 / RTS
        let cpu = run(0x8000, &[0xA9, 0x00, 0x2C, 0xA9, 0xFF, 0x85, 0x00, 0x60]);
        assert_eq!(cpu.memory[0], 0x00);
    }

    #[test]
    fn stops_at_step_limit() {
        // loop: JMP loop
        let mut memory = vec![0; MEMORY_SIZE];
        memory[0x8000..0x8003].copy_from_slice(&[0x4C, 0x00, 0x80]);
        let mut cpu = Cpu::new(memory);
        assert_eq!(cpu.call(0x8000, 100), Err(CpuError::StepLimit(100)));
    }

    #[test]
    fn status_round_trips_through_stack_byte() {
        let status = Status {
            carry: true,
            overflow: true,
            ..Status::default()
        };
        assert_eq!(status.to_byte(), 0x71);
        assert_eq!(Status::from_byte(status.to_byte()), status);
    }
}
