// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use super::{FunctionGenerator, Generated};
use crate::error::GenerationError;
use crate::semantics::{self, Shift};
use crate::state::{Binding, StackEntry, SymbolicState};
use mos6502_cfg::machine::AddressingMode;
use mos6502_cfg::program::Operand;
use mos6502_cfg::{Block, Flag, Instruction, Location, Opcode};
use structured_ir::{BinOp, Expression, Statement};

impl<'a> FunctionGenerator<'a> {
    /// Applies one instruction to `state`. Returns `None` when the instruction leaves the
    /// function.
    pub(super) fn instruction(
        &mut self,
        block: &Block,
        index: usize,
        instruction: &Instruction,
        state: SymbolicState,
        out: &mut Vec<Statement>,
    ) -> Generated<Option<SymbolicState>> {
        let name = block.name();
        let unsupported = || GenerationError::Unsupported {
            block: name.clone(),
            instruction: instruction.to_string(),
        };
        let unresolved_target = || GenerationError::UnresolvedTarget {
            block: name.clone(),
            instruction: instruction.to_string(),
        };
        let next = match instruction.opcode {
            Opcode::Lda | Opcode::Ldx | Opcode::Ldy => {
                let value = self.operand_value(&name, instruction, &state, out)?;
                let target = match instruction.opcode {
                    Opcode::Lda => Location::A,
                    Opcode::Ldx => Location::X,
                    _ => Location::Y,
                };
                self.set_register(state, target, value, out)
            }
            Opcode::Sta | Opcode::Stx | Opcode::Sty => {
                let source = match instruction.opcode {
                    Opcode::Sta => Location::A,
                    Opcode::Stx => Location::X,
                    _ => Location::Y,
                };
                let value = state.read(source, &name)?;
                let address = self.address(&name, instruction, &state, out)?;
                out.push(Statement::Store { address, value });
                state
            }
            Opcode::Tax | Opcode::Tay | Opcode::Txa | Opcode::Tya => {
                let (source, target) = match instruction.opcode {
                    Opcode::Tax => (Location::A, Location::X),
                    Opcode::Tay => (Location::A, Location::Y),
                    Opcode::Txa => (Location::X, Location::A),
                    _ => (Location::Y, Location::A),
                };
                let value = state.read(source, &name)?;
                self.set_register(state, target, value, out)
            }
            Opcode::Inx | Opcode::Iny | Opcode::Dex | Opcode::Dey => {
                let register = match instruction.opcode {
                    Opcode::Inx | Opcode::Dex => Location::X,
                    _ => Location::Y,
                };
                let value = state.read(register, &name)?;
                let value = match instruction.opcode {
                    Opcode::Inx | Opcode::Iny => semantics::increment(value),
                    _ => semantics::decrement(value),
                };
                self.set_register(state, register, value, out)
            }
            Opcode::Inc | Opcode::Dec => {
                let address = self.address(&name, instruction, &state, out)?;
                let old = self.load(address.clone(), out);
                let value = match instruction.opcode {
                    Opcode::Inc => semantics::increment(old),
                    _ => semantics::decrement(old),
                };
                let value = self.materialize(value, out);
                out.push(Statement::Store {
                    address,
                    value: value.clone(),
                });
                self.set_zero_negative(state, &value, out)
            }
            Opcode::Adc | Opcode::Sbc => {
                let a = state.read(Location::A, &name)?;
                let carry = state.read(Location::C, &name)?;
                let operand = self.operand_value(&name, instruction, &state, out)?;
                let operand = match instruction.opcode {
                    Opcode::Sbc => self.materialize(semantics::invert(operand), out),
                    _ => operand,
                };
                let sum = semantics::sum(a.clone(), operand.clone(), carry);
                let sum = self.materialize(sum, out);
                let (state, result) = self.bind(state, Location::A, sum.clone().low_byte(), out);
                let (state, _) = self.bind(state, Location::C, semantics::carry_out(&sum), out);
                let overflow = semantics::overflow(&a, &operand, &result);
                let (state, _) = self.bind(state, Location::V, overflow, out);
                self.set_zero_negative(state, &result, out)
            }
            Opcode::And | Opcode::Ora | Opcode::Eor => {
                let a = state.read(Location::A, &name)?;
                let operand = self.operand_value(&name, instruction, &state, out)?;
                let op = match instruction.opcode {
                    Opcode::And => BinOp::BitAnd,
                    Opcode::Ora => BinOp::BitOr,
                    _ => BinOp::BitXor,
                };
                self.set_register(state, Location::A, semantics::logical(op, a, operand), out)
            }
            Opcode::Cmp | Opcode::Cpx | Opcode::Cpy => {
                let register = match instruction.opcode {
                    Opcode::Cmp => Location::A,
                    Opcode::Cpx => Location::X,
                    _ => Location::Y,
                };
                let value = state.read(register, &name)?;
                let operand = self.operand_value(&name, instruction, &state, out)?;
                let (carry, zero, negative) = semantics::compare(&value, &operand);
                let (state, _) = self.bind(state, Location::C, carry, out);
                let (state, _) = self.bind(state, Location::Z, zero, out);
                let (state, _) = self.bind(state, Location::N, negative, out);
                state
            }
            Opcode::Asl | Opcode::Lsr | Opcode::Rol | Opcode::Ror => {
                let kind = match instruction.opcode {
                    Opcode::Asl => Shift::Asl,
                    Opcode::Lsr => Shift::Lsr,
                    Opcode::Rol => Shift::Rol,
                    _ => Shift::Ror,
                };
                let carry = match kind {
                    Shift::Rol | Shift::Ror => Some(state.read(Location::C, &name)?),
                    Shift::Asl | Shift::Lsr => None,
                };
                if instruction.operand.accesses_memory() {
                    let address = self.address(&name, instruction, &state, out)?;
                    let old = self.load(address.clone(), out);
                    let (value, carry_out) = semantics::shift(kind, &old, carry);
                    let value = self.materialize(value, out);
                    out.push(Statement::Store {
                        address,
                        value: value.clone(),
                    });
                    let (state, _) = self.bind(state, Location::C, carry_out, out);
                    self.set_zero_negative(state, &value, out)
                } else {
                    let a = state.read(Location::A, &name)?;
                    let (value, carry_out) = semantics::shift(kind, &a, carry);
                    let (state, _) = self.bind(state, Location::C, carry_out, out);
                    self.set_register(state, Location::A, value, out)
                }
            }
            Opcode::Bit => {
                let a = state.read(Location::A, &name)?;
                let address = self.address(&name, instruction, &state, out)?;
                let operand = self.load(address, out);
                let (zero, negative, overflow) = semantics::bit_test(&a, &operand);
                let (state, _) = self.bind(state, Location::Z, zero, out);
                let (state, _) = self.bind(state, Location::N, negative, out);
                let (state, _) = self.bind(state, Location::V, overflow, out);
                state
            }
            Opcode::Clc => state.with(Location::C, Binding::Literal(0)),
            Opcode::Sec => state.with(Location::C, Binding::Literal(1)),
            Opcode::Clv => state.with(Location::V, Binding::Literal(0)),
            // Decimal mode and the interrupt mask are not modelled.
            Opcode::Cld | Opcode::Sed | Opcode::Cli | Opcode::Sei | Opcode::Nop => state,
            Opcode::Pha => {
                let pushed = StackEntry::Byte(state.get(Location::A).clone());
                state.push(pushed)
            }
            Opcode::Php => {
                let flags = Location::FLAGS
                    .iter()
                    .map(|flag| state.get(*flag).clone())
                    .collect();
                state.push(StackEntry::Status(flags))
            }
            Opcode::Pla => {
                let (entry, state) = state.pop().ok_or_else(|| GenerationError::StackUnderflow {
                    block: name.clone(),
                    instruction: instruction.to_string(),
                })?;
                match entry {
                    StackEntry::Byte(binding) => match binding.expression(Location::A) {
                        Some(value) => self.set_register(state, Location::A, value, out),
                        None => [Location::A, Location::Z, Location::N]
                            .into_iter()
                            .fold(state, |state, location| state.with(location, binding.clone())),
                    },
                    StackEntry::Status(_) => return Err(unsupported()),
                }
            }
            Opcode::Plp => {
                let (entry, state) = state.pop().ok_or_else(|| GenerationError::StackUnderflow {
                    block: name.clone(),
                    instruction: instruction.to_string(),
                })?;
                match entry {
                    StackEntry::Status(flags) => Location::FLAGS
                        .into_iter()
                        .zip(flags)
                        .fold(state, |state, (location, binding)| state.with(location, binding)),
                    StackEntry::Byte(binding) => {
                        let status = binding.expression(Location::A).ok_or_else(|| {
                            GenerationError::Unbound {
                                block: name.clone(),
                                location: Location::A,
                                origin: "pulled as status".to_string(),
                            }
                        })?;
                        let status = self.snapshot(status, out);
                        let mut state = state;
                        for flag in Flag::ALL {
                            let value = semantics::status_bit(&status, flag.status_bit());
                            state = state.with(flag.location(), Binding::from_expression(value));
                        }
                        state
                    }
                }
            }
            Opcode::Jsr => {
                let functions = self.functions;
                let callee = block
                    .calls
                    .get(&index)
                    .and_then(|target| functions.at_entry(*target))
                    .ok_or_else(unresolved_target)?;
                self.call(callee, state, &name, out)?
            }
            Opcode::Jmp if matches!(instruction.operand, Operand::Indirect(_)) => {
                return Err(unsupported())
            }
            Opcode::Jmp => {
                if block.branch_exit.is_none() {
                    return Err(unresolved_target());
                }
                state
            }
            opcode if opcode.is_conditional_branch() => {
                if block.branch_exit.is_none() {
                    return Err(unresolved_target());
                }
                state
            }
            Opcode::Rts => {
                self.ret(&state, &name, out)?;
                return Ok(None);
            }
            _ => return Err(unsupported()),
        };
        Ok(Some(next))
    }

    /// Sets a register and the zero and negative flags from its new value.
    fn set_register(
        &mut self,
        state: SymbolicState,
        register: Location,
        value: Expression,
        out: &mut Vec<Statement>,
    ) -> SymbolicState {
        let (state, value) = self.bind(state, register, value, out);
        self.set_zero_negative(state, &value, out)
    }

    fn set_zero_negative(
        &mut self,
        state: SymbolicState,
        value: &Expression,
        out: &mut Vec<Statement>,
    ) -> SymbolicState {
        let (state, _) = self.bind(state, Location::Z, semantics::zero(value), out);
        let (state, _) = self.bind(state, Location::N, semantics::negative(value), out);
        state
    }

    /// Reads a byte of memory into a fresh temporary, fixing the point of the read.
    fn load(&mut self, address: Expression, out: &mut Vec<Statement>) -> Expression {
        let temp = self.fresh_temp();
        out.push(Statement::assign(temp, Expression::memory(address)));
        Expression::var(temp)
    }

    /// The value an instruction operates on: an immediate, the accumulator, or a memory read.
    fn operand_value(
        &mut self,
        block: &str,
        instruction: &Instruction,
        state: &SymbolicState,
        out: &mut Vec<Statement>,
    ) -> Generated<Expression> {
        match &instruction.operand {
            Operand::Immediate(immediate) => self
                .program
                .resolve_immediate(immediate)
                .map(|value| Expression::Literal(value as u32))
                .ok_or_else(|| GenerationError::UnresolvedTarget {
                    block: block.to_string(),
                    instruction: instruction.to_string(),
                }),
            Operand::Implied | Operand::Accumulator => state.read(Location::A, block),
            _ => {
                let address = self.address(block, instruction, state, out)?;
                Ok(self.load(address, out))
            }
        }
    }

    /// Effective address of a memory operand. Zero-page indexing and indirect pointers wrap
    /// within page zero.
    fn address(
        &mut self,
        block: &str,
        instruction: &Instruction,
        state: &SymbolicState,
        out: &mut Vec<Statement>,
    ) -> Generated<Expression> {
        let unresolved = || GenerationError::UnresolvedTarget {
            block: block.to_string(),
            instruction: instruction.to_string(),
        };
        let base = instruction
            .operand
            .target()
            .and_then(|target| self.program.resolve(target))
            .map(|address| Expression::Literal(address as u32))
            .ok_or_else(unresolved)?;
        let mode = instruction.mode().ok_or_else(|| GenerationError::Unsupported {
            block: block.to_string(),
            instruction: instruction.to_string(),
        })?;
        let indexed = |index: Location, mask: u32| -> Generated<Expression> {
            let index = state.read(index, block)?;
            Ok(Expression::binary(
                BinOp::BitAnd,
                Expression::binary(BinOp::Add, base.clone(), index),
                Expression::Literal(mask),
            ))
        };
        match mode {
            AddressingMode::ZeroPage | AddressingMode::Absolute => Ok(base.clone()),
            AddressingMode::ZeroPageX => indexed(Location::X, 0xff),
            AddressingMode::ZeroPageY => indexed(Location::Y, 0xff),
            AddressingMode::AbsoluteX => indexed(Location::X, 0xffff),
            AddressingMode::AbsoluteY => indexed(Location::Y, 0xffff),
            AddressingMode::IndexedIndirect => {
                let pointer = indexed(Location::X, 0xff)?;
                let pointer = self.materialize(pointer, out);
                Ok(self.pointer(pointer, out))
            }
            AddressingMode::IndirectIndexed => {
                let y = state.read(Location::Y, block)?;
                let pointer = self.pointer(base.clone(), out);
                Ok(Expression::binary(
                    BinOp::BitAnd,
                    Expression::binary(BinOp::Add, pointer, y),
                    Expression::Literal(0xffff),
                ))
            }
            _ => Err(GenerationError::Unsupported {
                block: block.to_string(),
                instruction: instruction.to_string(),
            }),
        }
    }

    /// Little-endian pointer stored at `location` in page zero.
    fn pointer(&mut self, location: Expression, out: &mut Vec<Statement>) -> Expression {
        let high_location =
            Expression::binary(BinOp::Add, location.clone(), Expression::Literal(1));
        let low = self.load(location, out);
        let high = self.load(high_location.low_byte(), out);
        Expression::binary(
            BinOp::BitOr,
            low,
            Expression::binary(BinOp::Shl, high, Expression::Literal(8)),
        )
    }
}
