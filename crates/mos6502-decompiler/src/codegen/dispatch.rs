// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Code for functions lowered to a dispatch loop.
//!
//! Each location is carried between blocks in one variable. A block starts with the carried
//! value of every location defined on all paths into it; anything else is unresolved there.

use super::{Flow, FunctionGenerator, Generated};
use crate::error::GenerationError;
use crate::state::{Binding, SymbolicState};
use mos6502_cfg::control_flow_reconstruction::{
    Condition, ControlNode, StructuredFunction, DISPATCH_LABEL,
};
use mos6502_cfg::{Block, BlockId, Location, Opcode};
use std::collections::{BTreeMap, BTreeSet};
use structured_ir::{Expression, LoopKind, Statement, Variable};

pub(super) struct DispatchContext {
    carriers: BTreeMap<Location, Variable>,
    /// Locations defined on every path into each block.
    defined: BTreeMap<BlockId, BTreeSet<Location>>,
}

impl<'a> FunctionGenerator<'a> {
    pub(super) fn dispatch(
        &mut self,
        structured: &StructuredFunction,
        entry: SymbolicState,
        out: &mut Vec<Statement>,
    ) -> Generated<()> {
        let function_entry = self.function.entry;
        let arms = match structured.nodes.as_slice() {
            [ControlNode::Loop { body, .. }] => body,
            _ => {
                return Err(GenerationError::Unsupported {
                    block: self.graph.block(function_entry).name(),
                    instruction: "dispatch lowering".to_string(),
                })
            }
        };
        let carriers = Location::ALL
            .iter()
            .map(|location| (*location, self.fresh_merge(*location)))
            .collect();
        let defined = self.must_define();
        self.dispatch = Some(DispatchContext { carriers, defined });

        self.carry_into(function_entry, &entry, out)?;
        let mut body = vec![];
        for arm in arms {
            let ControlNode::If {
                condition: condition @ Condition::Dispatch(block),
                then_branch,
                ..
            } = arm
            else {
                continue;
            };
            let state = self.dispatch_entry(*block);
            let mut arm_out = vec![];
            if self.nodes(then_branch, state, &mut arm_out)?.is_some() {
                return Err(GenerationError::Unsupported {
                    block: self.graph.block(*block).name(),
                    instruction: "block without successor in dispatch loop".to_string(),
                });
            }
            body.push(Statement::If {
                condition: self.condition(*condition, &entry)?,
                then_branch: arm_out,
                else_branch: vec![],
            });
        }
        out.push(Statement::Loop {
            kind: LoopKind::Forever,
            label: Some(DISPATCH_LABEL.to_string()),
            body,
        });
        Ok(())
    }

    /// `Goto` inside a dispatch loop: hand the carried values to `target` and select it.
    pub(super) fn dispatch_goto(
        &mut self,
        target: BlockId,
        state: SymbolicState,
        out: &mut Vec<Statement>,
    ) -> Generated<Flow> {
        self.carry_into(target, &state, out)?;
        out.push(Statement::Continue(Some(DISPATCH_LABEL.to_string())));
        Ok(None)
    }

    fn carry_into(
        &mut self,
        target: BlockId,
        state: &SymbolicState,
        out: &mut Vec<Statement>,
    ) -> Generated<()> {
        let name = self.graph.block(target).name();
        let Some(context) = &self.dispatch else {
            return Err(GenerationError::Unsupported {
                block: name,
                instruction: "jump into a structured function".to_string(),
            });
        };
        if state.depth() != 0 {
            return Err(GenerationError::StackMismatch {
                block: name,
                left: 0,
                right: state.depth(),
            });
        }
        let mut assignments = vec![];
        for location in context.defined.get(&target).into_iter().flatten() {
            let Some(carrier) = context.carriers.get(location) else {
                continue;
            };
            let value = state.read(*location, &name)?;
            if value != Expression::var(*carrier) {
                assignments.push((*carrier, value));
            }
        }
        self.assign_parallel(assignments, out);
        out.push(Statement::assign(
            Variable::Dispatch,
            Expression::Literal(target.0 as u32),
        ));
        Ok(())
    }

    fn dispatch_entry(&self, block: BlockId) -> SymbolicState {
        let name = self.graph.block(block).name();
        let mut state = SymbolicState::entry(&BTreeSet::new());
        if let Some(context) = &self.dispatch {
            let defined = context.defined.get(&block);
            for (location, carrier) in &context.carriers {
                let binding = if defined.map_or(false, |defined| defined.contains(location)) {
                    Binding::variable(*carrier)
                } else {
                    Binding::unresolved(format!("not set on every path into {}", name))
                };
                state = state.with(*location, binding);
            }
        }
        state
    }

    /// Forward must-be-defined analysis over the function's blocks.
    fn must_define(&self) -> BTreeMap<BlockId, BTreeSet<Location>> {
        let everything = Location::ALL.iter().copied().collect::<BTreeSet<_>>();
        let on_entry = self
            .function
            .inputs
            .iter()
            .map(|register| register.location())
            .collect::<BTreeSet<_>>();
        let mut defined = self
            .function
            .blocks
            .iter()
            .map(|block| (*block, everything.clone()))
            .collect::<BTreeMap<_, _>>();
        let mut changed = true;
        while changed {
            changed = false;
            for block in &self.function.blocks {
                let mut incoming = if *block == self.function.entry {
                    on_entry.clone()
                } else {
                    everything.clone()
                };
                for predecessor in self.graph.predecessors(*block) {
                    if let Some(before) = defined.get(predecessor) {
                        let after = self.defines(self.graph.block(*predecessor), before);
                        incoming = incoming.intersection(&after).copied().collect();
                    }
                }
                if defined.get(block) != Some(&incoming) {
                    defined.insert(*block, incoming);
                    changed = true;
                }
            }
        }
        defined
    }

    fn defines(&self, block: &Block, before: &BTreeSet<Location>) -> BTreeSet<Location> {
        let mut defined = before.clone();
        for (index, instruction) in block.instructions.iter().enumerate() {
            if instruction.opcode != Opcode::Jsr {
                defined.extend(instruction.effects().writes);
                continue;
            }
            for flag in Location::FLAGS {
                defined.remove(&flag);
            }
            let callee = block
                .calls
                .get(&index)
                .and_then(|target| self.functions.at_entry(*target));
            if let Some(callee) = callee {
                for register in callee.clobbers.difference(&callee.outputs) {
                    defined.remove(&register.location());
                }
                defined.extend(callee.outputs.iter().map(|register| register.location()));
            }
        }
        defined
    }
}
