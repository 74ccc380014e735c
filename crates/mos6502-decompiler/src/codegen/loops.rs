// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Loop generation.
//!
//! Every location the loop may change gets a merge variable assigned before the loop and on
//! each back edge. A location found unresolved on some back edge is dropped from that set and
//! the loop is generated again with it unresolved at the header, until nothing new turns up.
//! Loops left by `break` from several places are generated a second time so that each break
//! can assign the variables its exit state is merged into.

use super::{merge_stacks, mentions_any, Flow, FunctionGenerator, Generated};
use crate::error::GenerationError;
use crate::state::{Binding, StackEntry, SymbolicState};
use im::Vector;
use log::debug;
use mos6502_cfg::control_flow_reconstruction::{Condition, ControlNode, LoopKind};
use mos6502_cfg::{BlockId, Location, Opcode};
use std::collections::{BTreeMap, BTreeSet};
use structured_ir::{Expression, LoopKind as Repeat, Statement, Variable};

/// A loop being generated.
pub(super) struct LoopFrame {
    label: Option<String>,
    header: String,
    /// Merge variable carrying each location around the loop.
    phis: BTreeMap<Location, Variable>,
    stack: Vector<StackEntry>,
    /// Locations some back edge could not supply a value for.
    widened: BTreeSet<Location>,
    breaks: Vec<SymbolicState>,
    /// Variables each `break` assigns, once known.
    follow: Option<BTreeMap<Location, Variable>>,
}

struct LoopAttempt {
    statements: Vec<Statement>,
    widened: BTreeSet<Location>,
    breaks: Vec<SymbolicState>,
    /// State after the loop test fails, for loops that have one.
    natural_exit: Flow,
}

impl<'a> FunctionGenerator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn loop_node(
        &mut self,
        kind: LoopKind,
        header: BlockId,
        condition: Option<Condition>,
        body: &[ControlNode],
        label: &Option<String>,
        state: SymbolicState,
        out: &mut Vec<Statement>,
    ) -> Generated<Flow> {
        let header_name = self.graph.block(header).name();
        let modified = self.modified_locations(header, body);
        let (temps, merges) = (self.temps, self.merges);
        let mut reserved = merges;
        let mut widened = BTreeSet::new();
        let mut follow: Option<BTreeMap<Location, Variable>> = None;
        // Enclosing loops must not see breaks or back edges of discarded attempts.
        let saved = self
            .frames
            .iter()
            .map(|frame| (frame.breaks.len(), frame.widened.clone()))
            .collect::<Vec<_>>();
        loop {
            self.temps = temps;
            self.merges = merges;
            for (frame, (breaks, unresolved)) in self.frames.iter_mut().zip(&saved) {
                frame.breaks.truncate(*breaks);
                frame.widened = unresolved.clone();
            }
            let attempt = self.loop_attempt(
                kind,
                header,
                condition,
                body,
                label,
                &state,
                &modified,
                &widened,
                follow.clone(),
            )?;
            self.merges = self.merges.max(reserved);
            if !attempt.widened.is_subset(&widened) {
                debug!(
                    "[codegen] loop {}: no single value around the loop for {:?}",
                    header_name, attempt.widened
                );
                widened.extend(attempt.widened);
                follow = None;
                continue;
            }
            if follow.is_none() {
                let plan = self.follow_plan(&attempt.breaks);
                if !plan.is_empty() {
                    reserved = self.merges;
                    follow = Some(plan);
                    continue;
                }
            }
            out.extend(attempt.statements);
            return self.loop_exit(
                attempt.breaks,
                attempt.natural_exit,
                follow.as_ref(),
                &header_name,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn loop_attempt(
        &mut self,
        kind: LoopKind,
        header: BlockId,
        condition: Option<Condition>,
        body: &[ControlNode],
        label: &Option<String>,
        state: &SymbolicState,
        modified: &BTreeSet<Location>,
        widened: &BTreeSet<Location>,
        follow: Option<BTreeMap<Location, Variable>>,
    ) -> Generated<LoopAttempt> {
        let header_name = self.graph.block(header).name();
        let mut statements = vec![];
        let mut phis = BTreeMap::new();
        let mut entry = state.clone();
        for location in modified {
            let binding = match state.get(*location).expression(*location) {
                Some(value) if !widened.contains(location) => {
                    let phi = self.fresh_merge(*location);
                    statements.push(Statement::assign(phi, value));
                    phis.insert(*location, phi);
                    Binding::variable(phi)
                }
                _ => Binding::unresolved(format!("changed around loop {}", header_name)),
            };
            entry = entry.with(*location, binding);
        }
        self.frames.push(LoopFrame {
            label: label.clone(),
            header: header_name,
            phis,
            stack: state.stack().clone(),
            widened: BTreeSet::new(),
            breaks: vec![],
            follow,
        });
        let generated =
            self.loop_statement(kind, header, condition, body, label, entry, &mut statements);
        let frame = self.frames.pop();
        let natural_exit = generated?;
        let frame = frame.ok_or_else(|| GenerationError::Unsupported {
            block: self.graph.block(header).name(),
            instruction: "loop".to_string(),
        })?;
        Ok(LoopAttempt {
            statements,
            widened: frame.widened,
            breaks: frame.breaks,
            natural_exit,
        })
    }

    fn loop_statement(
        &mut self,
        kind: LoopKind,
        header: BlockId,
        condition: Option<Condition>,
        body: &[ControlNode],
        label: &Option<String>,
        entry: SymbolicState,
        statements: &mut Vec<Statement>,
    ) -> Generated<Flow> {
        let frame = self.frames.len() - 1;
        let header_name = self.graph.block(header).name();
        let missing_condition = || GenerationError::Unsupported {
            block: header_name.clone(),
            instruction: "loop without a test".to_string(),
        };
        let mut body_out = vec![];
        match kind {
            LoopKind::PostTest => {
                let condition = condition.ok_or_else(missing_condition)?;
                let Some(end) = self.nodes(body, entry, &mut body_out)? else {
                    statements.push(repeat(Repeat::Forever, label, body_out));
                    return Ok(None);
                };
                let phis = self.frames[frame].phis.clone();
                let carried = phis.values().copied().collect::<Vec<_>>();
                // The test and the exit state are read after the back edge has reassigned the
                // merge variables, so anything naming one is copied first.
                let mut test = self.condition(condition, &end)?;
                if mentions_any(&test, &carried) {
                    test = self.copy_to_temp(test, &mut body_out);
                }
                let mut exit = end.clone();
                for (location, binding) in end.locations() {
                    if let Some(phi) = phis.get(&location) {
                        exit = exit.with(location, Binding::variable(*phi));
                    } else if binding.mentions_any(&carried) {
                        if let Some(value) = binding.expression(location) {
                            let value = self.copy_to_temp(value, &mut body_out);
                            exit = exit.with(location, Binding::from_expression(value));
                        }
                    }
                }
                self.back_edge(frame, &end, &mut body_out)?;
                statements.push(repeat(Repeat::DoWhile(test), label, body_out));
                Ok(Some(exit))
            }
            LoopKind::PreTest => {
                let condition = condition.ok_or_else(missing_condition)?;
                let mut header_out = vec![];
                let tested = self
                    .block(header, entry, &mut header_out)?
                    .ok_or_else(missing_condition)?;
                let test = self.condition(condition, &tested)?;
                if let Some(end) = self.nodes(body, tested.clone(), &mut body_out)? {
                    self.back_edge(frame, &end, &mut body_out)?;
                }
                if header_out.is_empty() {
                    statements.push(repeat(Repeat::While(test), label, body_out));
                } else {
                    header_out.push(Statement::If {
                        condition: Expression::not(test),
                        then_branch: vec![Statement::Break(None)],
                        else_branch: vec![],
                    });
                    header_out.extend(body_out);
                    statements.push(repeat(Repeat::Forever, label, header_out));
                }
                Ok(Some(tested))
            }
            LoopKind::Infinite => {
                if let Some(end) = self.nodes(body, entry, &mut body_out)? {
                    self.back_edge(frame, &end, &mut body_out)?;
                }
                statements.push(repeat(Repeat::Forever, label, body_out));
                Ok(None)
            }
        }
    }

    /// Assigns the merge variables of frame `index` from `state` at a jump to its header.
    fn back_edge(
        &mut self,
        index: usize,
        state: &SymbolicState,
        out: &mut Vec<Statement>,
    ) -> Generated<()> {
        let frame = &mut self.frames[index];
        if state.stack() != &frame.stack {
            return Err(GenerationError::StackMismatch {
                block: frame.header.clone(),
                left: frame.stack.len(),
                right: state.depth(),
            });
        }
        let mut assignments = vec![];
        for (location, phi) in &frame.phis {
            match state.get(*location).expression(*location) {
                Some(value) if value == Expression::var(*phi) => {}
                Some(value) => assignments.push((*phi, value)),
                None => {
                    frame.widened.insert(*location);
                }
            }
        }
        self.assign_parallel(assignments, out);
        Ok(())
    }

    fn frame_index(&self, label: &Option<String>) -> Generated<usize> {
        let found = match label {
            None => self.frames.len().checked_sub(1),
            Some(label) => self
                .frames
                .iter()
                .rposition(|frame| frame.label.as_ref() == Some(label)),
        };
        found.ok_or_else(|| GenerationError::Unsupported {
            block: self.function.name.clone(),
            instruction: format!(
                "jump to loop {} from outside it",
                label.as_deref().unwrap_or("?")
            ),
        })
    }

    pub(super) fn continue_to(
        &mut self,
        label: &Option<String>,
        state: SymbolicState,
        out: &mut Vec<Statement>,
    ) -> Generated<Flow> {
        let index = self.frame_index(label)?;
        self.back_edge(index, &state, out)?;
        out.push(Statement::Continue(label.clone()));
        Ok(None)
    }

    pub(super) fn break_to(
        &mut self,
        label: &Option<String>,
        state: SymbolicState,
        out: &mut Vec<Statement>,
    ) -> Generated<Flow> {
        let index = self.frame_index(label)?;
        let frame = &self.frames[index];
        if let Some(follow) = &frame.follow {
            for (location, variable) in follow {
                let value = state.read(*location, &frame.header)?;
                out.push(Statement::assign(*variable, value));
            }
        }
        self.frames[index].breaks.push(state);
        out.push(Statement::Break(label.clone()));
        Ok(None)
    }

    /// Merge variables for locations the break states disagree on.
    fn follow_plan(&mut self, breaks: &[SymbolicState]) -> BTreeMap<Location, Variable> {
        let mut plan = BTreeMap::new();
        let Some(first) = breaks.first() else {
            return plan;
        };
        for location in Location::ALL {
            let differs = breaks.iter().any(|state| state.get(location) != first.get(location));
            let resolved = breaks.iter().all(|state| state.get(location).is_resolved());
            if differs && resolved {
                plan.insert(location, self.fresh_merge(location));
            }
        }
        plan
    }

    /// State after the loop: the state where its test fails, or the merge of its breaks.
    fn loop_exit(
        &mut self,
        breaks: Vec<SymbolicState>,
        natural_exit: Flow,
        follow: Option<&BTreeMap<Location, Variable>>,
        header: &str,
    ) -> Generated<Flow> {
        if let Some(exit) = natural_exit {
            if !breaks.is_empty() {
                return Err(GenerationError::Unsupported {
                    block: header.to_string(),
                    instruction: "loop left both by its test and by break".to_string(),
                });
            }
            return Ok(Some(exit));
        }
        let Some(first) = breaks.first() else {
            return Ok(None);
        };
        let stack = merge_stacks(&breaks.iter().collect::<Vec<_>>(), header)?;
        let mut merged = first.clone();
        for location in Location::ALL {
            let binding = match follow.and_then(|follow| follow.get(&location)) {
                Some(variable) => Binding::variable(*variable),
                None if breaks.iter().all(|state| state.get(location) == first.get(location)) => {
                    first.get(location).clone()
                }
                None => Binding::unresolved(format!("differs between exits of loop {}", header)),
            };
            merged = merged.with(location, binding);
        }
        Ok(Some(merged.with_stack(stack)))
    }

    /// Registers and flags any block of the loop may write, callees included.
    fn modified_locations(&self, header: BlockId, body: &[ControlNode]) -> BTreeSet<Location> {
        let mut blocks = vec![header];
        for node in body {
            node.visit(&mut |node| match node {
                ControlNode::Block(block) => blocks.push(*block),
                ControlNode::Loop { header, .. } => blocks.push(*header),
                _ => {}
            });
        }
        let mut modified = BTreeSet::new();
        for block in blocks {
            let block = self.graph.block(block);
            for (index, instruction) in block.instructions.iter().enumerate() {
                modified.extend(instruction.effects().writes);
                if instruction.opcode != Opcode::Jsr {
                    continue;
                }
                if let Some(callee) = block
                    .calls
                    .get(&index)
                    .and_then(|target| self.functions.at_entry(*target))
                {
                    modified.extend(callee.clobbers.iter().map(|register| register.location()));
                }
            }
        }
        modified
    }
}

fn repeat(kind: Repeat, label: &Option<String>, body: Vec<Statement>) -> Statement {
    Statement::Loop {
        kind,
        label: label.clone(),
        body,
    }
}
