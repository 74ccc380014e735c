// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! The symbolic machine state threaded through code generation.
//!
//! A state is an immutable snapshot: updates return a new state and leave the old one intact,
//! so a branch point simply hands the same state to both arms. Persistent maps keep those
//! copies cheap.

use crate::error::GenerationError;
use im::{OrdMap, Vector};
use mos6502_cfg::{Location, Register};
use structured_ir::{Expression, Variable};
use std::collections::BTreeSet;

/// What a register or flag holds at a program point. Bindings are values: copying one into
/// another location never links the two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// A byte for registers, `0`/`1` for flags.
    Literal(u32),
    /// A pure expression over literals and variables. Never reads memory.
    Expr(Expression),
    /// No single value on every path reaching this point. Reading it is an error.
    Unresolved { origin: String },
}

impl Binding {
    pub fn unresolved(origin: impl Into<String>) -> Self {
        Binding::Unresolved {
            origin: origin.into(),
        }
    }

    pub fn from_expression(expression: Expression) -> Self {
        match expression {
            Expression::Literal(value) => Binding::Literal(value),
            Expression::Bool(value) => Binding::Literal(value as u32),
            expression => Binding::Expr(expression),
        }
    }

    pub fn variable(variable: Variable) -> Self {
        Binding::Expr(Expression::var(variable))
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Binding::Unresolved { .. })
    }

    /// The bound value as an expression of the right kind for `location`: integer for
    /// registers, boolean for flags.
    pub fn expression(&self, location: Location) -> Option<Expression> {
        match self {
            Binding::Literal(value) if location.is_flag() => Some(Expression::Bool(*value != 0)),
            Binding::Literal(value) => Some(Expression::Literal(*value)),
            Binding::Expr(expression) => Some(expression.clone()),
            Binding::Unresolved { .. } => None,
        }
    }

    pub fn mentions(&self, variable: &Variable) -> bool {
        match self {
            Binding::Expr(expression) => expression.mentions(variable),
            _ => false,
        }
    }

    pub fn mentions_any<'a>(&self, variables: impl IntoIterator<Item = &'a Variable>) -> bool {
        variables.into_iter().any(|variable| self.mentions(variable))
    }
}

/// One entry of the symbolic hardware stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEntry {
    /// Pushed by `PHA`.
    Byte(Binding),
    /// Pushed by `PHP`: the four modelled flags, in [`Location::FLAGS`] order.
    Status(Vec<Binding>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicState {
    bindings: OrdMap<Location, Binding>,
    stack: Vector<StackEntry>,
}

impl SymbolicState {
    /// State on function entry: input registers are bound to their input variables, every
    /// other location is unresolved.
    pub fn entry(inputs: &BTreeSet<Register>) -> Self {
        let bindings = Location::ALL
            .iter()
            .map(|location| {
                let binding = match location.register() {
                    Some(register) if inputs.contains(&register) => {
                        Binding::variable(Variable::Input(register))
                    }
                    _ => Binding::unresolved("not set on entry"),
                };
                (*location, binding)
            })
            .collect();
        Self {
            bindings,
            stack: Vector::new(),
        }
    }

    pub fn get(&self, location: Location) -> &Binding {
        // Every location is bound from construction on.
        static MISSING: Binding = Binding::Literal(0);
        self.bindings.get(&location).unwrap_or(&MISSING)
    }

    pub fn with(&self, location: Location, binding: Binding) -> Self {
        Self {
            bindings: self.bindings.update(location, binding),
            stack: self.stack.clone(),
        }
    }

    /// Resolved value of `location`, or an error naming `block` and where the value was lost.
    pub fn read(&self, location: Location, block: &str) -> Result<Expression, GenerationError> {
        let binding = self.get(location);
        binding.expression(location).ok_or_else(|| GenerationError::Unbound {
            block: block.to_string(),
            location,
            origin: match binding {
                Binding::Unresolved { origin } => origin.clone(),
                _ => String::new(),
            },
        })
    }

    pub fn locations(&self) -> impl Iterator<Item = (Location, &Binding)> + '_ {
        self.bindings.iter().map(|(location, binding)| (*location, binding))
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn stack(&self) -> &Vector<StackEntry> {
        &self.stack
    }

    pub fn with_stack(&self, stack: Vector<StackEntry>) -> Self {
        Self {
            bindings: self.bindings.clone(),
            stack,
        }
    }

    pub fn push(&self, entry: StackEntry) -> Self {
        let mut stack = self.stack.clone();
        stack.push_back(entry);
        self.with_stack(stack)
    }

    pub fn pop(&self) -> Option<(StackEntry, Self)> {
        let mut stack = self.stack.clone();
        let entry = stack.pop_back()?;
        Some((entry, self.with_stack(stack)))
    }

    /// Locations bound differently in `other`.
    pub fn differing(&self, other: &SymbolicState) -> Vec<Location> {
        Location::ALL
            .iter()
            .copied()
            .filter(|location| self.get(*location) != other.get(*location))
            .collect()
    }
}
