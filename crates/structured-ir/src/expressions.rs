// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use mos6502_cfg::{Location, Register};
use serde::{Deserialize, Serialize};

/// A named value in generated code. Variables are function scoped and may be reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Variable {
    /// Immutable snapshot of a value at the point it was computed.
    Temp(usize),
    /// Carries `location` across a join or loop back edge.
    Merge { location: Location, id: usize },
    /// Register value on function entry.
    Input(Register),
    /// Current block of a dispatch-lowered function.
    Dispatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Neq,
    Lt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    /// Boolean negation.
    Not,
    /// `false`/`true` as `0`/`1`.
    ToInt,
}

/// Pure expression over literals, variables and memory reads.
///
/// Integer values are unsigned and unbounded in principle; generated code masks explicitly
/// (`& 0xff`, `& 0xffff`) wherever the machine would truncate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expression {
    Literal(u32),
    Bool(bool),
    Variable(Variable),
    /// Byte at the given 16-bit address.
    Memory(Box<Expression>),
    Binary {
        op: BinOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expression>,
    },
}

impl Expression {
    pub fn var(variable: Variable) -> Self {
        Expression::Variable(variable)
    }

    pub fn memory(address: Expression) -> Self {
        Expression::Memory(Box::new(address))
    }

    /// Builds `lhs op rhs`, folding when both sides are literals.
    pub fn binary(op: BinOp, lhs: Expression, rhs: Expression) -> Self {
        match (&lhs, &rhs) {
            (Expression::Literal(l), Expression::Literal(r)) => fold_integers(op, *l, *r),
            (Expression::Bool(l), Expression::Bool(r))
                if op.is_logical() || op == BinOp::Eq || op == BinOp::Neq =>
            {
                Expression::Bool(match op {
                    BinOp::And => *l && *r,
                    BinOp::Or => *l || *r,
                    BinOp::Eq => l == r,
                    _ => l != r,
                })
            }
            (Expression::Bool(true), _) if op == BinOp::And => rhs,
            (Expression::Bool(false), _) if op == BinOp::Or => rhs,
            (_, Expression::Bool(true)) if op == BinOp::And => lhs,
            (_, Expression::Bool(false)) if op == BinOp::Or => lhs,
            _ => Expression::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        }
    }

    pub fn not(operand: Expression) -> Self {
        match operand {
            Expression::Bool(value) => Expression::Bool(!value),
            Expression::Unary {
                op: UnOp::Not,
                operand,
            } => *operand,
            operand => Expression::Unary {
                op: UnOp::Not,
                operand: Box::new(operand),
            },
        }
    }

    pub fn to_int(operand: Expression) -> Self {
        match operand {
            Expression::Bool(value) => Expression::Literal(value as u32),
            operand => Expression::Unary {
                op: UnOp::ToInt,
                operand: Box::new(operand),
            },
        }
    }

    /// `(self & 0xff)`
    pub fn low_byte(self) -> Self {
        Expression::binary(BinOp::BitAnd, self, Expression::Literal(0xff))
    }

    pub fn as_literal(&self) -> Option<u32> {
        match self {
            Expression::Literal(value) => Some(*value),
            _ => None,
        }
    }

    /// Number of nodes.
    pub fn size(&self) -> usize {
        match self {
            Expression::Literal(_) | Expression::Bool(_) | Expression::Variable(_) => 1,
            Expression::Memory(address) => 1 + address.size(),
            Expression::Binary { lhs, rhs, .. } => 1 + lhs.size() + rhs.size(),
            Expression::Unary { operand, .. } => 1 + operand.size(),
        }
    }

    /// Calls `f` on every variable this expression reads.
    pub fn visit_variables(&self, f: &mut impl FnMut(&Variable)) {
        match self {
            Expression::Variable(variable) => f(variable),
            Expression::Memory(address) => address.visit_variables(f),
            Expression::Binary { lhs, rhs, .. } => {
                lhs.visit_variables(f);
                rhs.visit_variables(f);
            }
            Expression::Unary { operand, .. } => operand.visit_variables(f),
            Expression::Literal(_) | Expression::Bool(_) => {}
        }
    }

    pub fn mentions(&self, variable: &Variable) -> bool {
        let mut found = false;
        self.visit_variables(&mut |candidate| found |= candidate == variable);
        found
    }

    pub fn reads_memory(&self) -> bool {
        match self {
            Expression::Memory(_) => true,
            Expression::Binary { lhs, rhs, .. } => lhs.reads_memory() || rhs.reads_memory(),
            Expression::Unary { operand, .. } => operand.reads_memory(),
            Expression::Literal(_) | Expression::Bool(_) | Expression::Variable(_) => false,
        }
    }
}

impl From<Variable> for Expression {
    fn from(variable: Variable) -> Self {
        Expression::Variable(variable)
    }
}

impl From<u32> for Expression {
    fn from(value: u32) -> Self {
        Expression::Literal(value)
    }
}

fn fold_integers(op: BinOp, l: u32, r: u32) -> Expression {
    match op {
        BinOp::Add => Expression::Literal(l.wrapping_add(r)),
        BinOp::Sub => Expression::Literal(l.wrapping_sub(r)),
        BinOp::BitAnd => Expression::Literal(l & r),
        BinOp::BitOr => Expression::Literal(l | r),
        BinOp::BitXor => Expression::Literal(l ^ r),
        BinOp::Shl => Expression::Literal(l.checked_shl(r).unwrap_or(0)),
        BinOp::Shr => Expression::Literal(l.checked_shr(r).unwrap_or(0)),
        BinOp::Eq => Expression::Bool(l == r),
        BinOp::Neq => Expression::Bool(l != r),
        BinOp::Lt => Expression::Bool(l < r),
        BinOp::Ge => Expression::Bool(l >= r),
        BinOp::And | BinOp::Or => Expression::Binary {
            op,
            lhs: Box::new(Expression::Literal(l)),
            rhs: Box::new(Expression::Literal(r)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_fold() {
        let sum = Expression::binary(BinOp::Add, 0xff.into(), 1.into());
        assert_eq!(sum, Expression::Literal(0x100));
        assert_eq!(sum.low_byte(), Expression::Literal(0));
        assert_eq!(
            Expression::binary(BinOp::Eq, 0.into(), 0.into()),
            Expression::Bool(true)
        );
    }

    #[test]
    fn double_negation_cancels() {
        let flag = Expression::var(Variable::Temp(3));
        assert_eq!(Expression::not(Expression::not(flag.clone())), flag);
        assert_eq!(Expression::not(Expression::Bool(false)), Expression::Bool(true));
    }

    #[test]
    fn mentions_and_size() {
        let x = Variable::Input(Register::X);
        let address = Expression::binary(
            BinOp::BitAnd,
            Expression::binary(BinOp::Add, 0x0200.into(), x.into()),
            0xffff.into(),
        );
        let load = Expression::memory(address);
        assert!(load.mentions(&x));
        assert!(!load.mentions(&Variable::Temp(0)));
        assert!(load.reads_memory());
        assert_eq!(load.size(), 6);
    }
}
