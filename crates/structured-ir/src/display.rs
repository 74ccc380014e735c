// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Plain-text rendering: hexadecimal literals (bytes as `0x2a`, wider values as `0x0200`),
//! `mem[..]` for memory, two-space indentation.

use crate::expressions::{BinOp, Expression, UnOp, Variable};
use crate::statements::{FunctionDefinition, LoopKind, Statement};
use itertools::Itertools;
use std::fmt::{self, Display, Formatter, Write};

const INDENT: &str = "  ";

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Temp(id) => write!(f, "t{}", id),
            Variable::Merge { location, id } => write!(f, "{}_{}", location, id),
            Variable::Input(register) => write!(f, "{}_in", register),
            Variable::Dispatch => write!(f, "state"),
        }
    }
}

impl Display for BinOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        };
        f.write_str(symbol)
    }
}

fn write_expression(f: &mut Formatter<'_>, expression: &Expression, nested: bool) -> fmt::Result {
    match expression {
        Expression::Literal(value) if *value > 0xff => write!(f, "{:#06x}", value),
        Expression::Literal(value) => write!(f, "{:#04x}", value),
        Expression::Bool(value) => write!(f, "{}", value),
        Expression::Variable(variable) => write!(f, "{}", variable),
        Expression::Memory(address) => {
            f.write_str("mem[")?;
            write_expression(f, address, false)?;
            f.write_str("]")
        }
        Expression::Binary { op, lhs, rhs } => {
            if nested {
                f.write_str("(")?;
            }
            write_expression(f, lhs, true)?;
            write!(f, " {} ", op)?;
            write_expression(f, rhs, true)?;
            if nested {
                f.write_str(")")?;
            }
            Ok(())
        }
        Expression::Unary {
            op: UnOp::Not,
            operand,
        } => {
            f.write_str("!")?;
            write_expression(f, operand, true)
        }
        Expression::Unary {
            op: UnOp::ToInt,
            operand,
        } => {
            f.write_str("int(")?;
            write_expression(f, operand, false)?;
            f.write_str(")")
        }
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_expression(f, self, false)
    }
}

fn label_prefix(label: &Option<String>) -> String {
    label
        .as_ref()
        .map(|label| format!("'{}: ", label))
        .unwrap_or_default()
}

fn label_suffix(label: &Option<String>) -> String {
    label
        .as_ref()
        .map(|label| format!(" '{}", label))
        .unwrap_or_default()
}

fn write_block(out: &mut String, statements: &[Statement], depth: usize) -> fmt::Result {
    for statement in statements {
        write_statement(out, statement, depth)?;
    }
    Ok(())
}

fn write_statement(out: &mut String, statement: &Statement, depth: usize) -> fmt::Result {
    let indent = INDENT.repeat(depth);
    match statement {
        Statement::Assign { variable, value } => {
            writeln!(out, "{}{} = {}", indent, variable, value)
        }
        Statement::Store { address, value } => {
            writeln!(out, "{}mem[{}] = {}", indent, address, value)
        }
        Statement::If {
            condition,
            then_branch,
            else_branch,
        } => {
            writeln!(out, "{}if {} {{", indent, condition)?;
            write_block(out, then_branch, depth + 1)?;
            if !else_branch.is_empty() {
                writeln!(out, "{}}} else {{", indent)?;
                write_block(out, else_branch, depth + 1)?;
            }
            writeln!(out, "{}}}", indent)
        }
        Statement::Loop { kind, label, body } => {
            let prefix = label_prefix(label);
            match kind {
                LoopKind::While(condition) => {
                    writeln!(out, "{}{}while {} {{", indent, prefix, condition)?
                }
                LoopKind::DoWhile(_) => writeln!(out, "{}{}do {{", indent, prefix)?,
                LoopKind::Forever => writeln!(out, "{}{}loop {{", indent, prefix)?,
            }
            write_block(out, body, depth + 1)?;
            match kind {
                LoopKind::DoWhile(condition) => writeln!(out, "{}}} while {}", indent, condition),
                _ => writeln!(out, "{}}}", indent),
            }
        }
        Statement::Break(label) => writeln!(out, "{}break{}", indent, label_suffix(label)),
        Statement::Continue(label) => writeln!(out, "{}continue{}", indent, label_suffix(label)),
        Statement::Return { values } if values.is_empty() => writeln!(out, "{}return", indent),
        Statement::Return { values } => writeln!(
            out,
            "{}return {}",
            indent,
            values
                .iter()
                .map(|(register, value)| format!("{}: {}", register, value))
                .join(", ")
        ),
        Statement::Call {
            function,
            arguments,
            results,
        } => {
            let arguments = arguments
                .iter()
                .map(|(register, value)| format!("{}: {}", register, value))
                .join(", ");
            if results.is_empty() {
                writeln!(out, "{}{}({})", indent, function, arguments)
            } else {
                let results = results
                    .iter()
                    .map(|(register, variable)| format!("{}: {}", register, variable))
                    .join(", ");
                writeln!(out, "{}{{{}}} = {}({})", indent, results, function, arguments)
            }
        }
        Statement::Annotation(text) => writeln!(out, "{}// {}", indent, text),
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_statement(&mut out, self, 0)?;
        f.write_str(out.trim_end())
    }
}

impl Display for FunctionDefinition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if !self.structured {
            writeln!(f, "// control flow lowered to a dispatch loop")?;
        }
        let inputs = self.inputs.iter().map(|register| format!("{}_in", register)).join(", ");
        write!(f, "fn {}({})", self.name, inputs)?;
        if !self.outputs.is_empty() {
            write!(f, " -> ({})", self.outputs.iter().join(", "))?;
        }
        writeln!(f, " {{")?;
        let mut out = String::new();
        write_block(&mut out, &self.body, 1)?;
        f.write_str(&out)?;
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mos6502_cfg::{Location, Register};

    #[test]
    fn renders_indexed_memory() {
        let address = Expression::binary(
            BinOp::BitAnd,
            Expression::binary(
                BinOp::Add,
                Expression::Literal(0x0200),
                Expression::var(Variable::Merge {
                    location: Location::X,
                    id: 1,
                }),
            ),
            Expression::Literal(0xffff),
        );
        insta::assert_snapshot!(Expression::memory(address), @"mem[(0x0200 + x_1) & 0xffff]");
    }

    #[test]
    fn renders_function() {
        let function = FunctionDefinition {
            name: "Fill".to_string(),
            inputs: vec![Register::X],
            outputs: vec![Register::X],
            body: vec![
                Statement::assign(
                    Variable::Merge {
                        location: Location::X,
                        id: 0,
                    },
                    Expression::var(Variable::Input(Register::X)),
                ),
                Statement::Loop {
                    kind: LoopKind::DoWhile(Expression::binary(
                        BinOp::Neq,
                        Expression::var(Variable::Merge {
                            location: Location::X,
                            id: 0,
                        }),
                        Expression::Literal(0),
                    )),
                    label: None,
                    body: vec![
                        Statement::Store {
                            address: Expression::Literal(0x2007),
                            value: Expression::Literal(0x24),
                        },
                        Statement::Annotation("elided LDA #$FF (EntryB)".to_string()),
                    ],
                },
                Statement::Return {
                    values: vec![(Register::X, Expression::Literal(0))],
                },
            ],
            structured: true,
        };
        insta::assert_snapshot!(function, @r###"
        fn Fill(x_in) -> (x) {
          x_0 = x_in
          do {
            mem[0x2007] = 0x24
            // elided LDA #$FF (EntryB)
          } while x_0 != 0x00
          return x: 0x00
        }
        "###);
    }
}
