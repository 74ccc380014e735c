// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use crate::expressions::{Expression, Variable};
use mos6502_cfg::Register;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopKind {
    /// Condition checked before each iteration.
    While(Expression),
    /// Condition checked after each iteration.
    DoWhile(Expression),
    Forever,
}

/// Structured statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statement {
    /// `variable = value`
    Assign {
        variable: Variable,
        value: Expression,
    },
    /// `mem[address] = value`
    Store {
        address: Expression,
        value: Expression,
    },
    If {
        condition: Expression,
        then_branch: Vec<Statement>,
        else_branch: Vec<Statement>,
    },
    Loop {
        kind: LoopKind,
        label: Option<String>,
        body: Vec<Statement>,
    },
    Break(Option<String>),
    Continue(Option<String>),
    /// Leaves the function with a value for each declared output register.
    Return {
        values: Vec<(Register, Expression)>,
    },
    /// Calls another decompiled function. Arguments and results are keyed by register.
    Call {
        function: String,
        arguments: Vec<(Register, Expression)>,
        results: Vec<(Register, Variable)>,
    },
    /// Free-form note carried into the output, e.g. an instruction hidden by a BIT-skip.
    Annotation(String),
}

/// Traverse the direct child statement lists of a statement
macro_rules! traverse_children {
    ($target:expr, $action:expr) => {
        match $target {
            Statement::If {
                then_branch,
                else_branch,
                ..
            } => {
                for statement in then_branch {
                    $action(statement);
                }
                for statement in else_branch {
                    $action(statement);
                }
            }
            Statement::Loop { body, .. } => {
                for statement in body {
                    $action(statement);
                }
            }
            _ => {}
        }
    };
}

impl Statement {
    pub fn assign(variable: Variable, value: Expression) -> Self {
        Statement::Assign { variable, value }
    }

    /// This statement and every nested statement, depth first.
    pub fn iter(&self) -> StatementIter<'_> {
        StatementIter { stack: vec![self] }
    }

    /// Calls `f` on this statement and every nested statement, parents first.
    pub fn visit(&self, f: &mut impl FnMut(&Statement)) {
        f(self);
        traverse_children!(self, |child: &Statement| child.visit(f));
    }

    /// Mutably traverse the statement tree, children first.
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut Statement)) {
        traverse_children!(self, |child: &mut Statement| child.visit_mut(f));
        f(self);
    }

    /// Expressions held directly by this statement (not by nested statements).
    pub fn expressions(&self) -> Vec<&Expression> {
        match self {
            Statement::Assign { value, .. } => vec![value],
            Statement::Store { address, value } => vec![address, value],
            Statement::If { condition, .. } => vec![condition],
            Statement::Loop {
                kind: LoopKind::While(condition) | LoopKind::DoWhile(condition),
                ..
            } => vec![condition],
            Statement::Return { values } => values.iter().map(|(_, value)| value).collect(),
            Statement::Call { arguments, .. } => arguments.iter().map(|(_, value)| value).collect(),
            Statement::Loop {
                kind: LoopKind::Forever,
                ..
            }
            | Statement::Break(_)
            | Statement::Continue(_)
            | Statement::Annotation(_) => vec![],
        }
    }

    /// Variables written directly by this statement.
    pub fn defined_variables(&self) -> Vec<Variable> {
        match self {
            Statement::Assign { variable, .. } => vec![*variable],
            Statement::Call { results, .. } => {
                results.iter().map(|(_, variable)| *variable).collect()
            }
            _ => vec![],
        }
    }
}

/// A decompiled function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    /// Registers read on entry, available as [`Variable::Input`].
    pub inputs: Vec<Register>,
    pub outputs: Vec<Register>,
    pub body: Vec<Statement>,
    /// `false` when the body is a dispatch loop rather than nested structure.
    pub structured: bool,
}

impl FunctionDefinition {
    /// Every statement, depth first in source order.
    pub fn statements(&self) -> StatementIter<'_> {
        StatementIter {
            stack: self.body.iter().rev().collect(),
        }
    }
}

/// Depth-first iterator over a statement tree.
pub struct StatementIter<'a> {
    stack: Vec<&'a Statement>,
}

impl<'a> Iterator for StatementIter<'a> {
    type Item = &'a Statement;

    fn next(&mut self) -> Option<Self::Item> {
        let statement = self.stack.pop()?;
        match statement {
            Statement::If {
                then_branch,
                else_branch,
                ..
            } => {
                self.stack.extend(else_branch.iter().rev());
                self.stack.extend(then_branch.iter().rev());
            }
            Statement::Loop { body, .. } => self.stack.extend(body.iter().rev()),
            _ => {}
        }
        Some(statement)
    }
}
