// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Dataflow code generation.
//!
//! The generator walks the structured control tree of one function with a
//! [`SymbolicState`], turning each instruction into bindings and, where an effect must be
//! observed in order, into statements. Memory reads become temporaries at the point they
//! happen; register and flag results stay symbolic until a join, a loop back edge, or their
//! size forces them into a variable.

mod dispatch;
mod instructions;
mod loops;

use crate::error::GenerationError;
use crate::options::DecompilerOptions;
use crate::state::{Binding, StackEntry, SymbolicState};
use log::debug;
use mos6502_cfg::control_flow_reconstruction::{Condition, ControlNode, StructuredFunction};
use mos6502_cfg::{BlockGraph, BlockId, Function, FunctionMap, Location, Program};
use structured_ir::{BinOp, Expression, FunctionDefinition, Statement, Variable};

use self::dispatch::DispatchContext;
use self::loops::LoopFrame;

/// Result of generating a node: the state control continues with, or `None` when every path
/// through the node leaves by return, break, continue or goto.
type Flow = Option<SymbolicState>;

type Generated<T> = Result<T, GenerationError>;

pub struct FunctionGenerator<'a> {
    program: &'a Program,
    graph: &'a BlockGraph,
    functions: &'a FunctionMap,
    function: &'a Function,
    options: &'a DecompilerOptions,
    temps: usize,
    merges: usize,
    frames: Vec<LoopFrame>,
    dispatch: Option<DispatchContext>,
}

impl<'a> FunctionGenerator<'a> {
    pub fn new(
        program: &'a Program,
        graph: &'a BlockGraph,
        functions: &'a FunctionMap,
        function: &'a Function,
        options: &'a DecompilerOptions,
    ) -> Self {
        Self {
            program,
            graph,
            functions,
            function,
            options,
            temps: 0,
            merges: 0,
            frames: vec![],
            dispatch: None,
        }
    }

    pub fn generate(mut self, structured: &StructuredFunction) -> Generated<FunctionDefinition> {
        let entry = SymbolicState::entry(&self.function.inputs);
        let mut body = vec![];
        if structured.structured {
            if let Some(state) = self.nodes(&structured.nodes, entry, &mut body)? {
                let name = self.function.name.clone();
                self.ret(&state, &name, &mut body)?;
            }
        } else {
            self.dispatch(structured, entry, &mut body)?;
        }
        debug!(
            "[codegen] {}: {} temporaries, {} merge variables",
            self.function.name, self.temps, self.merges
        );
        Ok(FunctionDefinition {
            name: self.function.name.clone(),
            inputs: self.function.inputs.iter().copied().collect(),
            outputs: self.function.outputs.iter().copied().collect(),
            body,
            structured: structured.structured,
        })
    }

    fn nodes(
        &mut self,
        nodes: &[ControlNode],
        state: SymbolicState,
        out: &mut Vec<Statement>,
    ) -> Generated<Flow> {
        let mut flow = Some(state);
        for node in nodes {
            let Some(state) = flow else {
                break;
            };
            flow = self.node(node, state, out)?;
        }
        Ok(flow)
    }

    fn node(
        &mut self,
        node: &ControlNode,
        state: SymbolicState,
        out: &mut Vec<Statement>,
    ) -> Generated<Flow> {
        match node {
            ControlNode::Block(block) => self.block(*block, state, out),
            ControlNode::If {
                condition,
                then_branch,
                else_branch,
                join,
            } => self.conditional(*condition, then_branch, else_branch, *join, state, out),
            ControlNode::Loop {
                kind,
                header,
                condition,
                body,
                label,
                ..
            } => self.loop_node(*kind, *header, *condition, body, label, state, out),
            ControlNode::Goto(target) => self.goto(*target, state, out),
            ControlNode::Break(label) => self.break_to(label, state, out),
            ControlNode::Continue(label) => self.continue_to(label, state, out),
        }
    }

    fn block(
        &mut self,
        id: BlockId,
        state: SymbolicState,
        out: &mut Vec<Statement>,
    ) -> Generated<Flow> {
        let graph = self.graph;
        let block = graph.block(id);
        let mut state = state;
        for (index, instruction) in block.instructions.iter().enumerate() {
            if let Some(elision) = block.elision_at(index) {
                out.push(Statement::Annotation(format!(
                    "skips `{}` (entered at {})",
                    elision.elided, elision.label
                )));
            }
            match self.instruction(block, index, instruction, state, out)? {
                Some(next) => state = next,
                None => return Ok(None),
            }
        }
        if block.successors().is_empty() {
            self.ret(&state, &block.name(), out)?;
            return Ok(None);
        }
        Ok(Some(state))
    }

    fn conditional(
        &mut self,
        condition: Condition,
        then_branch: &[ControlNode],
        else_branch: &[ControlNode],
        join: Option<BlockId>,
        state: SymbolicState,
        out: &mut Vec<Statement>,
    ) -> Generated<Flow> {
        let test = self.condition(condition, &state)?;
        let at = match (join, condition) {
            (Some(join), _) => self.graph.block(join).name(),
            (None, Condition::Branch { block, .. } | Condition::Dispatch(block)) => {
                self.graph.block(block).name()
            }
        };
        let mut then_out = vec![];
        let mut else_out = vec![];
        let then_flow = self.nodes(then_branch, state.clone(), &mut then_out)?;
        let else_flow = self.nodes(else_branch, state, &mut else_out)?;
        let joined = self.join(then_flow, else_flow, &mut then_out, &mut else_out, &at)?;
        match (then_out.is_empty(), else_out.is_empty()) {
            (true, true) => {}
            (true, false) => out.push(Statement::If {
                condition: Expression::not(test),
                then_branch: else_out,
                else_branch: vec![],
            }),
            _ => out.push(Statement::If {
                condition: test,
                then_branch: then_out,
                else_branch: else_out,
            }),
        }
        Ok(joined)
    }

    /// The boolean an `If` or loop test evaluates, in `state`.
    fn condition(&self, condition: Condition, state: &SymbolicState) -> Generated<Expression> {
        match condition {
            Condition::Branch { block, taken } => {
                let block = self.graph.block(block);
                let (flag, when) = block
                    .terminator()
                    .and_then(|terminator| terminator.opcode.branch_condition())
                    .ok_or_else(|| GenerationError::Unsupported {
                        block: block.name(),
                        instruction: "condition without a branch".to_string(),
                    })?;
                let value = state.read(flag.location(), &block.name())?;
                let branch_taken = if when { value } else { Expression::not(value) };
                Ok(if taken {
                    branch_taken
                } else {
                    Expression::not(branch_taken)
                })
            }
            Condition::Dispatch(block) => Ok(Expression::binary(
                BinOp::Eq,
                Expression::var(Variable::Dispatch),
                Expression::Literal(block.0 as u32),
            )),
        }
    }

    /// Merges the states of two paths meeting at `at`. Locations bound differently get a fresh
    /// merge variable assigned at the end of each path; a location unresolved on either path
    /// stays unresolved.
    fn join(
        &mut self,
        left: Flow,
        right: Flow,
        left_out: &mut Vec<Statement>,
        right_out: &mut Vec<Statement>,
        at: &str,
    ) -> Generated<Flow> {
        let (left, right) = match (left, right) {
            (None, None) => return Ok(None),
            (Some(state), None) | (None, Some(state)) => return Ok(Some(state)),
            (Some(left), Some(right)) => (left, right),
        };
        let stack = merge_stacks(&[&left, &right], at)?;
        let mut merged = left.clone();
        for location in left.differing(&right) {
            let binding = match (
                left.get(location).expression(location),
                right.get(location).expression(location),
            ) {
                (Some(left_value), Some(right_value)) => {
                    let variable = self.fresh_merge(location);
                    left_out.push(Statement::assign(variable, left_value));
                    right_out.push(Statement::assign(variable, right_value));
                    Binding::variable(variable)
                }
                _ => Binding::unresolved(format!("set on only some paths into {}", at)),
            };
            merged = merged.with(location, binding);
        }
        Ok(Some(merged.with_stack(stack)))
    }

    /// Structured `Goto`: a tail call, or a step of the dispatch loop.
    fn goto(
        &mut self,
        target: BlockId,
        state: SymbolicState,
        out: &mut Vec<Statement>,
    ) -> Generated<Flow> {
        if self.function.blocks.contains(&target) {
            return self.dispatch_goto(target, state, out);
        }
        let name = self.graph.block(target).name();
        let functions = self.functions;
        let callee = functions
            .at_entry(target)
            .ok_or_else(|| GenerationError::UnresolvedTarget {
                block: name.clone(),
                instruction: format!("jump to {}", name),
            })?;
        let state = self.call(callee, state, &name, out)?;
        self.ret(&state, &name, out)?;
        Ok(None)
    }

    /// Emits a call of `callee` and returns the state after it: outputs bound to fresh
    /// temporaries, other clobbered registers and every flag unresolved.
    fn call(
        &mut self,
        callee: &Function,
        state: SymbolicState,
        block: &str,
        out: &mut Vec<Statement>,
    ) -> Generated<SymbolicState> {
        let arguments = callee
            .inputs
            .iter()
            .map(|register| Ok((*register, state.read(register.location(), block)?)))
            .collect::<Generated<Vec<_>>>()?;
        let mut next = state;
        let mut results = vec![];
        for register in &callee.outputs {
            let result = self.fresh_temp();
            results.push((*register, result));
            next = next.with(register.location(), Binding::variable(result));
        }
        for register in callee.clobbers.difference(&callee.outputs) {
            next = next.with(
                register.location(),
                Binding::unresolved(format!("clobbered by {}", callee.name)),
            );
        }
        for flag in Location::FLAGS {
            next = next.with(flag, Binding::unresolved(format!("set by {}", callee.name)));
        }
        out.push(Statement::Call {
            function: callee.name.clone(),
            arguments,
            results,
        });
        Ok(next)
    }

    fn ret(
        &mut self,
        state: &SymbolicState,
        block: &str,
        out: &mut Vec<Statement>,
    ) -> Generated<()> {
        if state.depth() != 0 {
            return Err(GenerationError::StackMismatch {
                block: block.to_string(),
                left: 0,
                right: state.depth(),
            });
        }
        let values = self
            .function
            .outputs
            .iter()
            .map(|register| Ok((*register, state.read(register.location(), block)?)))
            .collect::<Generated<Vec<_>>>()?;
        out.push(Statement::Return { values });
        Ok(())
    }

    fn fresh_temp(&mut self) -> Variable {
        self.temps += 1;
        Variable::Temp(self.temps)
    }

    fn fresh_merge(&mut self, location: Location) -> Variable {
        self.merges += 1;
        Variable::Merge {
            location,
            id: self.merges,
        }
    }

    /// Snapshots `value` into a temporary.
    fn snapshot(&mut self, value: Expression, out: &mut Vec<Statement>) -> Expression {
        match value {
            Expression::Literal(_) | Expression::Bool(_) | Expression::Variable(_) => value,
            value => {
                let temp = self.fresh_temp();
                out.push(Statement::assign(temp, value));
                Expression::var(temp)
            }
        }
    }

    /// Copies `value` into a temporary even when it is a plain variable.
    fn copy_to_temp(&mut self, value: Expression, out: &mut Vec<Statement>) -> Expression {
        let temp = self.fresh_temp();
        out.push(Statement::assign(temp, value));
        Expression::var(temp)
    }

    /// Keeps `value` inline unless it has grown past the configured size.
    fn materialize(&mut self, value: Expression, out: &mut Vec<Statement>) -> Expression {
        if value.size() > self.options.max_inline_expression {
            self.snapshot(value, out)
        } else {
            value
        }
    }

    /// Binds `location` to `value`, materializing it if needed, and returns the bound form.
    fn bind(
        &mut self,
        state: SymbolicState,
        location: Location,
        value: Expression,
        out: &mut Vec<Statement>,
    ) -> (SymbolicState, Expression) {
        let value = self.materialize(value, out);
        (state.with(location, Binding::from_expression(value.clone())), value)
    }

    /// Assigns every variable at once: a value reading a variable assigned earlier in the
    /// list is first copied into a temporary.
    fn assign_parallel(
        &mut self,
        assignments: Vec<(Variable, Expression)>,
        out: &mut Vec<Statement>,
    ) {
        let targets = assignments.iter().map(|(variable, _)| *variable).collect::<Vec<_>>();
        let mut pending = vec![];
        for (position, (variable, value)) in assignments.into_iter().enumerate() {
            let value = if mentions_any(&value, &targets[..position]) {
                self.copy_to_temp(value, out)
            } else {
                value
            };
            pending.push(Statement::assign(variable, value));
        }
        out.extend(pending);
    }
}

fn mentions_any(expression: &Expression, variables: &[Variable]) -> bool {
    variables.iter().any(|variable| expression.mentions(variable))
}

/// Stack shared by every state in `states`. Depths must agree; entries that differ become
/// unresolved.
fn merge_stacks(states: &[&SymbolicState], at: &str) -> Generated<im::Vector<StackEntry>> {
    let Some(first) = states.first() else {
        return Ok(im::Vector::new());
    };
    if let Some(other) = states.iter().find(|state| state.depth() != first.depth()) {
        return Err(GenerationError::StackMismatch {
            block: at.to_string(),
            left: first.depth(),
            right: other.depth(),
        });
    }
    let lost = || Binding::unresolved(format!("pushed differently on paths into {}", at));
    Ok(first
        .stack()
        .iter()
        .enumerate()
        .map(|(position, entry)| {
            let agree = states.iter().all(|state| state.stack().get(position) == Some(entry));
            match entry {
                _ if agree => entry.clone(),
                StackEntry::Status(flags) => {
                    StackEntry::Status(flags.iter().map(|_| lost()).collect())
                }
                StackEntry::Byte(_) => StackEntry::Byte(lost()),
            }
        })
        .collect())
}
