// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0
use crate::blocks::{BlockGraph, BlockId};
use crate::dominance::DominatorTree;
use crate::functions::Function;
use crate::loops::{LoopForest, NaturalLoop};
use log::{debug, warn};
use std::collections::BTreeSet;

use super::dispatch::lower_to_dispatch;
use super::helpers::*;
use super::types::{Condition, ControlNode, LoopKind, StructuredFunction};

/// Structuring gave up; the function is lowered to a dispatch loop instead.
#[derive(Debug)]
struct Irreducible(String);

type Structured<T> = Result<T, Irreducible>;

/// How an edge is rendered from the current position.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Edge {
    /// Continue structuring at the target.
    Normal,
    /// The target is where an enclosing construct resumes; emit nothing.
    Stop,
    /// Leaves the innermost loop somewhere other than its follow; the exit path is inlined.
    Exit,
    /// A single node ends the path.
    Jump(ControlNode),
}

#[derive(Debug)]
struct LoopContext {
    header: BlockId,
    follow: Option<BlockId>,
    body: BTreeSet<BlockId>,
    label: String,
}

/// The context for control flow reconstruction of one function.
struct ReconstructionContext<'ctx> {
    graph: &'ctx BlockGraph,
    function: &'ctx Function,
    dominators: &'ctx DominatorTree,
    loops: &'ctx LoopForest,
    emitted: BTreeSet<BlockId>,
    enclosing: Vec<LoopContext>,
    /// Headers of loops some labelled jump refers to.
    labelled: BTreeSet<BlockId>,
}

/// Reconstructs structured control flow for `function`. Irreducible flow, and any shape the
/// structurer would have to duplicate code for, falls back to a dispatch loop.
pub fn reconstruct_control_flow(
    graph: &BlockGraph,
    function: &Function,
    dominators: &DominatorTree,
    loops: &LoopForest,
) -> StructuredFunction {
    if let Some((from, to)) = find_retreating_edge(graph, dominators, &function.blocks) {
        warn!(
            "[reconstruct] {}: irreducible edge {} -> {}, using dispatch loop",
            function.name,
            graph.block(from).name(),
            graph.block(to).name()
        );
        return lower_to_dispatch(graph, function, dominators);
    }

    let mut ctx = ReconstructionContext {
        graph,
        function,
        dominators,
        loops,
        emitted: BTreeSet::new(),
        enclosing: vec![],
        labelled: BTreeSet::new(),
    };
    let mut nodes = vec![];
    match ctx.sequence(function.entry, &BTreeSet::new(), &mut nodes) {
        Ok(()) => StructuredFunction {
            nodes,
            structured: true,
        },
        Err(Irreducible(reason)) => {
            warn!(
                "[reconstruct] {}: {}, using dispatch loop",
                function.name, reason
            );
            lower_to_dispatch(graph, function, dominators)
        }
    }
}

impl<'ctx> ReconstructionContext<'ctx> {
    fn classify(&mut self, target: BlockId, stops: &BTreeSet<BlockId>) -> Edge {
        if !self.function.blocks.contains(&target) {
            return Edge::Jump(ControlNode::Goto(target));
        }
        let innermost = self.enclosing.len();
        for (depth, context) in self.enclosing.iter().enumerate().rev() {
            let label = if depth + 1 == innermost {
                None
            } else {
                Some(context.label.clone())
            };
            if context.header == target {
                if label.is_some() {
                    self.labelled.insert(context.header);
                }
                return Edge::Jump(ControlNode::Continue(label));
            }
            if context.follow == Some(target) {
                if label.is_some() {
                    self.labelled.insert(context.header);
                }
                return Edge::Jump(ControlNode::Break(label));
            }
        }
        if stops.contains(&target) {
            return Edge::Stop;
        }
        match self.enclosing.last() {
            Some(context) if !context.body.contains(&target) => Edge::Exit,
            _ => Edge::Normal,
        }
    }

    /// Structures the path starting at `target` as seen from the current position.
    fn branch(
        &mut self,
        target: BlockId,
        stops: &BTreeSet<BlockId>,
    ) -> Structured<Vec<ControlNode>> {
        let mut nodes = vec![];
        match self.classify(target, stops) {
            Edge::Normal => self.sequence(target, stops, &mut nodes)?,
            Edge::Exit => self.sequence(target, &BTreeSet::new(), &mut nodes)?,
            Edge::Stop => {}
            Edge::Jump(node) => nodes.push(node),
        }
        Ok(nodes)
    }

    /// Appends the structured form of everything from `start` up to (excluding) a block in
    /// `stops`, a jump out of the current construct, or the end of the path.
    fn sequence(
        &mut self,
        start: BlockId,
        stops: &BTreeSet<BlockId>,
        nodes: &mut Vec<ControlNode>,
    ) -> Structured<()> {
        let mut cursor = start;
        loop {
            let next = if self.loops.is_header(cursor) && !self.is_enclosing(cursor) {
                let (node, follow) = self.structure_loop(cursor)?;
                nodes.push(node);
                follow
            } else {
                self.structure_block(cursor, stops, nodes)?
            };
            let Some(next) = next else {
                return Ok(());
            };
            match self.classify(next, stops) {
                Edge::Normal => cursor = next,
                Edge::Exit => return self.sequence(next, &BTreeSet::new(), nodes),
                Edge::Stop => return Ok(()),
                Edge::Jump(node) => {
                    nodes.push(node);
                    return Ok(());
                }
            }
        }
    }

    /// Emits `block` and the conditional it ends with. Returns the target to continue at, if
    /// the path goes on.
    fn structure_block(
        &mut self,
        block: BlockId,
        stops: &BTreeSet<BlockId>,
        nodes: &mut Vec<ControlNode>,
    ) -> Structured<Option<BlockId>> {
        self.emit(block)?;
        nodes.push(ControlNode::Block(block));

        let graph = self.graph.block(block);
        let (taken, fall) = match (graph.branch_exit, graph.fall_through_exit) {
            (Some(taken), Some(fall)) if taken != fall && graph.ends_in_conditional_branch() => {
                (taken, fall)
            }
            _ => return Ok(self.graph.successors(block).first().copied()),
        };

        let taken_edge = self.classify(taken, stops);
        let fall_edge = self.classify(fall, stops);
        let condition = Condition::branch_taken(block);
        match (taken_edge, fall_edge) {
            (Edge::Normal, Edge::Normal) => self.structure_if(block, taken, fall, stops, nodes),
            (Edge::Normal, Edge::Stop) => {
                let then_branch = self.branch(taken, stops)?;
                nodes.push(if_then(condition, then_branch, Some(fall)));
                Ok(None)
            }
            (Edge::Stop, Edge::Normal) => {
                let then_branch = self.branch(fall, stops)?;
                nodes.push(if_then(condition.negate(), then_branch, Some(taken)));
                Ok(None)
            }
            (Edge::Stop, Edge::Stop) => Ok(None),
            (taken_edge, fall_edge) if terminates(&taken_edge) && !terminates(&fall_edge) => {
                let then_branch = self.branch(taken, stops)?;
                nodes.push(if_then(condition, then_branch, None));
                Ok(Some(fall).filter(|_| fall_edge == Edge::Normal))
            }
            (taken_edge, fall_edge) if terminates(&fall_edge) && !terminates(&taken_edge) => {
                let then_branch = self.branch(fall, stops)?;
                nodes.push(if_then(condition.negate(), then_branch, None));
                Ok(Some(taken).filter(|_| taken_edge == Edge::Normal))
            }
            _ => {
                let then_branch = self.branch(taken, stops)?;
                let else_branch = self.branch(fall, stops)?;
                nodes.push(ControlNode::If {
                    condition,
                    then_branch,
                    else_branch,
                    join: None,
                });
                Ok(None)
            }
        }
    }

    /// Both arms continue inside the current construct.
    fn structure_if(
        &mut self,
        block: BlockId,
        taken: BlockId,
        fall: BlockId,
        stops: &BTreeSet<BlockId>,
        nodes: &mut Vec<ControlNode>,
    ) -> Structured<Option<BlockId>> {
        let join = {
            let follow_edge = |from: BlockId, to: BlockId| self.is_forward_edge(from, to);
            find_merge_point(self.graph, self.dominators, block, taken, fall, &follow_edge)
        };
        let mut inner_stops = stops.clone();
        inner_stops.extend(join);

        let mut condition = Condition::branch_taken(block);
        let mut then_branch = self.branch(taken, &inner_stops)?;
        let mut else_branch = self.branch(fall, &inner_stops)?;
        if then_branch.is_empty() {
            std::mem::swap(&mut then_branch, &mut else_branch);
            condition = condition.negate();
        }
        debug!(
            "[reconstruct] if at {} join={:?}",
            self.graph.block(block).name(),
            join.map(|join| self.graph.block(join).name())
        );
        nodes.push(ControlNode::If {
            condition,
            then_branch,
            else_branch,
            join,
        });
        Ok(join)
    }

    /// Edges join search may walk: inside the function and the innermost loop body, skipping
    /// back edges and jumps to enclosing headers.
    fn is_forward_edge(&self, from: BlockId, to: BlockId) -> bool {
        if !self.function.blocks.contains(&to) || self.loops.is_back_edge(from, to) {
            return false;
        }
        if self.enclosing.iter().any(|context| context.header == to) {
            return false;
        }
        match self.enclosing.last() {
            Some(context) => context.body.contains(&to),
            None => true,
        }
    }

    fn structure_loop(&mut self, header: BlockId) -> Structured<(ControlNode, Option<BlockId>)> {
        let natural = self
            .loops
            .get(header)
            .cloned()
            .ok_or_else(|| Irreducible(format!("no loop at {}", header)))?;
        let follow = choose_follow(self.graph, self.dominators, &natural, &self.function.blocks);
        let kind = self.loop_kind(&natural, follow);
        debug!(
            "[reconstruct] {:?} loop at {} follow={:?}",
            kind,
            self.graph.block(header).name(),
            follow.map(|follow| self.graph.block(follow).name())
        );

        self.enclosing.push(LoopContext {
            header,
            follow,
            body: natural.body.clone(),
            label: self.graph.block(header).name(),
        });
        let structured = self.loop_body(kind, &natural);
        let context = self.enclosing.pop();
        let (condition, mut body) = structured?;

        if body.last() == Some(&ControlNode::Continue(None)) {
            body.pop();
        }
        let label = context
            .filter(|context| self.labelled.contains(&context.header))
            .map(|context| context.label);
        Ok((
            ControlNode::Loop {
                kind,
                header,
                condition,
                body,
                label,
                follow,
            },
            follow,
        ))
    }

    fn loop_body(
        &mut self,
        kind: LoopKind,
        natural: &NaturalLoop,
    ) -> Structured<(Option<Condition>, Vec<ControlNode>)> {
        let header = natural.header;
        let mut body = vec![];
        match kind {
            LoopKind::PostTest => {
                let latch = natural
                    .latches()
                    .into_iter()
                    .next()
                    .ok_or_else(|| Irreducible(format!("loop at {} has no latch", header)))?;
                if latch == header {
                    self.emit(header)?;
                    body.push(ControlNode::Block(header));
                } else {
                    self.sequence(header, &BTreeSet::from([latch]), &mut body)?;
                    self.emit(latch)?;
                    body.push(ControlNode::Block(latch));
                }
                let stays = self.graph.block(latch).branch_exit == Some(header);
                let condition = Condition::Branch {
                    block: latch,
                    taken: stays,
                };
                Ok((Some(condition), body))
            }
            LoopKind::PreTest => {
                self.emit(header)?;
                let block = self.graph.block(header);
                let inside = block
                    .successors()
                    .into_iter()
                    .find(|successor| natural.contains(*successor))
                    .ok_or_else(|| Irreducible(format!("loop at {} has an empty body", header)))?;
                let condition = Condition::Branch {
                    block: header,
                    taken: block.branch_exit == Some(inside),
                };
                body = self.branch(inside, &BTreeSet::new())?;
                Ok((Some(condition), body))
            }
            LoopKind::Infinite => {
                self.sequence(header, &BTreeSet::new(), &mut body)?;
                Ok((None, body))
            }
        }
    }

    fn loop_kind(&self, natural: &NaturalLoop, follow: Option<BlockId>) -> LoopKind {
        let exits = natural.exit_edges(self.graph);
        let Some(follow) = follow else {
            return LoopKind::Infinite;
        };
        if exits.len() != 1 || exits[0].1 != follow {
            return LoopKind::Infinite;
        }
        let latches = natural.latches();
        if latches.len() == 1 {
            let latch = *latches.iter().next().unwrap_or(&natural.header);
            let block = self.graph.block(latch);
            let own_loop = self
                .loops
                .innermost(latch)
                .map_or(false, |innermost| innermost.header == natural.header);
            if own_loop
                && block.ends_in_conditional_branch()
                && exits[0].0 == latch
                && BTreeSet::from_iter(block.successors())
                    == BTreeSet::from([natural.header, follow])
            {
                return LoopKind::PostTest;
            }
        }
        let header = self.graph.block(natural.header);
        let successors = header.successors();
        if successors.len() == 2
            && header.ends_in_conditional_branch()
            && exits[0].0 == natural.header
            && header.instructions.iter().all(|instruction| instruction.is_register_only())
        {
            return LoopKind::PreTest;
        }
        LoopKind::Infinite
    }

    fn is_enclosing(&self, header: BlockId) -> bool {
        self.enclosing.iter().any(|context| context.header == header)
    }

    fn emit(&mut self, block: BlockId) -> Structured<()> {
        if self.emitted.insert(block) {
            Ok(())
        } else {
            Err(Irreducible(format!(
                "block {} would be emitted twice",
                self.graph.block(block).name()
            )))
        }
    }
}

fn terminates(edge: &Edge) -> bool {
    matches!(edge, Edge::Jump(_) | Edge::Exit)
}

fn if_then(
    condition: Condition,
    then_branch: Vec<ControlNode>,
    join: Option<BlockId>,
) -> ControlNode {
    ControlNode::If {
        condition,
        then_branch,
        else_branch: vec![],
        join,
    }
}
