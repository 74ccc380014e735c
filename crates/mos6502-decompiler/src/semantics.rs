// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Expression builders for instruction results and flag updates.
//!
//! Byte values are kept in `0..=0xff` by masking after every arithmetic step. Flags are
//! boolean expressions; [`Expression::to_int`] turns carry into `0`/`1` where it feeds
//! arithmetic.

use structured_ir::{BinOp, Expression};

fn bin(op: BinOp, lhs: Expression, rhs: impl Into<Expression>) -> Expression {
    Expression::binary(op, lhs, rhs.into())
}

/// `value == 0`
pub fn zero(value: &Expression) -> Expression {
    bin(BinOp::Eq, value.clone(), 0)
}

/// Bit 7 of a byte.
pub fn negative(value: &Expression) -> Expression {
    bin(BinOp::Ge, value.clone(), 0x80)
}

/// `a + operand + carry`, unmasked. The caller takes the low byte and the carry out.
pub fn sum(a: Expression, operand: Expression, carry: Expression) -> Expression {
    bin(BinOp::Add, bin(BinOp::Add, a, operand), Expression::to_int(carry))
}

/// `SBC` is `ADC` of the inverted operand.
pub fn invert(operand: Expression) -> Expression {
    bin(BinOp::BitXor, operand, 0xff)
}

pub fn carry_out(sum: &Expression) -> Expression {
    bin(BinOp::Ge, sum.clone(), 0x100)
}

/// Signed overflow: both inputs share a sign and the result's sign differs from it.
pub fn overflow(a: &Expression, operand: &Expression, result: &Expression) -> Expression {
    let same_sign = bin(
        BinOp::Eq,
        bin(BinOp::BitAnd, bin(BinOp::BitXor, a.clone(), operand.clone()), 0x80),
        0,
    );
    let sign_changed = bin(
        BinOp::Neq,
        bin(BinOp::BitAnd, bin(BinOp::BitXor, a.clone(), result.clone()), 0x80),
        0,
    );
    bin(BinOp::And, same_sign, sign_changed)
}

pub fn logical(op: BinOp, a: Expression, operand: Expression) -> Expression {
    bin(op, a, operand)
}

pub fn increment(value: Expression) -> Expression {
    bin(BinOp::Add, value, 1).low_byte()
}

pub fn decrement(value: Expression) -> Expression {
    bin(BinOp::Sub, value, 1).low_byte()
}

/// Flags of `CMP`/`CPX`/`CPY`: (carry, zero, negative).
pub fn compare(
    register: &Expression,
    operand: &Expression) -> (Expression, Expression, Expression,
) {
    let carry = bin(BinOp::Ge, register.clone(), operand.clone());
    let equal = bin(BinOp::Eq, register.clone(), operand.clone());
    let difference = bin(BinOp::Sub, register.clone(), operand.clone()).low_byte();
    (carry, equal, negative(&difference))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    Asl,
    Lsr,
    Rol,
    Ror,
}

/// Result and carry out of a shift or rotate of `value`.
pub fn shift(
    kind: Shift,
    value: &Expression,
    carry: Option<Expression>) -> (Expression, Expression,
) {
    let high_bit = || negative(value);
    let low_bit = || bin(BinOp::Neq, bin(BinOp::BitAnd, value.clone(), 1), 0);
    let carry_in = |position: u32| {
        let carry = Expression::to_int(carry.clone().unwrap_or(Expression::Bool(false)));
        bin(BinOp::Shl, carry, position)
    };
    match kind {
        Shift::Asl => (bin(BinOp::Shl, value.clone(), 1).low_byte(), high_bit()),
        Shift::Lsr => (bin(BinOp::Shr, value.clone(), 1), low_bit()),
        Shift::Rol => (
            bin(BinOp::BitOr, bin(BinOp::Shl, value.clone(), 1), carry_in(0)).low_byte(),
            high_bit(),
        ),
        Shift::Ror => (
            bin(BinOp::BitOr, bin(BinOp::Shr, value.clone(), 1), carry_in(7)),
            low_bit(),
        ),
    }
}

/// Flags of `BIT`: (zero, negative, overflow).
pub fn bit_test(a: &Expression, operand: &Expression) -> (Expression, Expression, Expression) {
    let zero = zero(&bin(BinOp::BitAnd, a.clone(), operand.clone()));
    let overflow = bin(BinOp::Neq, bin(BinOp::BitAnd, operand.clone(), 0x40), 0);
    (zero, negative(operand), overflow)
}

/// Bit `position` of a pulled status byte.
pub fn status_bit(status: &Expression, position: u8) -> Expression {
    bin(
        BinOp::Neq,
        bin(BinOp::BitAnd, status.clone(), 1u32 << position),
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(expression: Expression) -> u32 {
        expression.as_literal().unwrap()
    }

    #[test]
    fn addition_folds_on_literals() {
        let total = sum(0xf0.into(), 0x20.into(), Expression::Bool(false));
        assert_eq!(literal(total.clone().low_byte()), 0x10);
        assert_eq!(carry_out(&total), Expression::Bool(true));
        let result = sum(0x50.into(), 0x50.into(), Expression::Bool(false)).low_byte();
        assert_eq!(
            overflow(&0x50.into(), &0x50.into(), &result),
            Expression::Bool(true)
        );
    }

    #[test]
    fn subtraction_borrows_through_inverted_operand() {
        let total = sum(0x10.into(), invert(0x01.into()), Expression::Bool(true));
        assert_eq!(literal(total.clone().low_byte()), 0x0f);
        assert_eq!(carry_out(&total), Expression::Bool(true));
    }

    #[test]
    fn compare_sets_carry_when_not_below() {
        let (carry, zero, negative) = compare(&0x10.into(), &0x20.into());
        assert_eq!(carry, Expression::Bool(false));
        assert_eq!(zero, Expression::Bool(false));
        assert_eq!(negative, Expression::Bool(true));
    }

    #[test]
    fn rotates_carry_through() {
        let (value, carry) = shift(Shift::Rol, &0x81.into(), Some(Expression::Bool(true)));
        assert_eq!(literal(value), 0x03);
        assert_eq!(carry, Expression::Bool(true));
        let (value, carry) = shift(Shift::Ror, &0x02.into(), Some(Expression::Bool(true)));
        assert_eq!(literal(value), 0x81);
        assert_eq!(carry, Expression::Bool(false));
    }

    #[test]
    fn decrement_wraps() {
        assert_eq!(literal(decrement(0.into())), 0xff);
        assert_eq!(literal(increment(0xff.into())), 0);
    }
}
