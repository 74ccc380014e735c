// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Natural loop detection.
//!
//! Every back edge `P -> H` (with `H` dominating `P`) is grouped by its header, so several
//! branches to one label form a single loop with several latches rather than a stack of
//! nested loops.

use crate::blocks::{BlockGraph, BlockId};
use crate::dominance::DominatorTree;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalLoop {
    pub header: BlockId,
    /// `(latch, header)` pairs; all share `header`.
    pub back_edges: BTreeSet<(BlockId, BlockId)>,
    /// Includes the header.
    pub body: BTreeSet<BlockId>,
    /// Blocks outside the body with a direct edge from inside it.
    pub exits: BTreeSet<BlockId>,
}

impl NaturalLoop {
    pub fn latches(&self) -> BTreeSet<BlockId> {
        self.back_edges.iter().map(|(latch, _)| *latch).collect()
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.body.contains(&block)
    }

    /// Edges leaving the body, in block order.
    pub fn exit_edges(&self, graph: &BlockGraph) -> Vec<(BlockId, BlockId)> {
        let mut edges = vec![];
        for block in &self.body {
            for successor in graph.successors(*block) {
                if !self.body.contains(&successor) {
                    edges.push((*block, successor));
                }
            }
        }
        edges
    }
}

/// All natural loops of a function, indexed by header.
#[derive(Debug, Clone, Default)]
pub struct LoopForest {
    loops: BTreeMap<BlockId, NaturalLoop>,
}

impl LoopForest {
    pub fn compute(graph: &BlockGraph, dominators: &DominatorTree) -> Self {
        let mut back_edges: BTreeMap<BlockId, BTreeSet<(BlockId, BlockId)>> = BTreeMap::new();
        for &block in dominators.reverse_postorder() {
            for successor in graph.successors(block) {
                if dominators.dominates(successor, block) {
                    back_edges.entry(successor).or_default().insert((block, successor));
                }
            }
        }

        let mut loops = BTreeMap::new();
        for (header, edges) in back_edges {
            let body = loop_body(graph, dominators, header, &edges);
            let exits: BTreeSet<BlockId> = body
                .iter()
                .flat_map(|block| graph.successors(*block))
                .filter(|successor| !body.contains(successor))
                .collect();
            debug!(
                "[loops] header={} latches={:?} body={:?} exits={:?}",
                header,
                edges.iter().map(|(latch, _)| latch.0).collect::<Vec<_>>(),
                body,
                exits
            );
            loops.insert(
                header,
                NaturalLoop {
                    header,
                    back_edges: edges,
                    body,
                    exits,
                },
            );
        }
        Self { loops }
    }

    pub fn loops(&self) -> impl Iterator<Item = &NaturalLoop> {
        self.loops.values()
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn get(&self, header: BlockId) -> Option<&NaturalLoop> {
        self.loops.get(&header)
    }

    pub fn is_header(&self, block: BlockId) -> bool {
        self.loops.contains_key(&block)
    }

    /// The smallest loop whose body holds `block`.
    pub fn innermost(&self, block: BlockId) -> Option<&NaturalLoop> {
        self.loops
            .values()
            .filter(|natural| natural.contains(block))
            .min_by_key(|natural| natural.body.len())
    }

    pub fn is_back_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.loops
            .get(&to)
            .map_or(false, |natural| natural.back_edges.contains(&(from, to)))
    }
}

/// Blocks that reach a latch backwards without passing through the header.
fn loop_body(
    graph: &BlockGraph,
    dominators: &DominatorTree,
    header: BlockId,
    back_edges: &BTreeSet<(BlockId, BlockId)>,
) -> BTreeSet<BlockId> {
    let mut body = BTreeSet::from([header]);
    let mut work: Vec<BlockId> = back_edges.iter().map(|(latch, _)| *latch).collect();
    while let Some(block) = work.pop() {
        if !body.insert(block) {
            continue;
        }
        for predecessor in graph.predecessors(block) {
            if dominators.is_reachable(*predecessor)
                && dominators.dominates(header, *predecessor)
                && !body.contains(predecessor)
            {
                work.push(*predecessor);
            }
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::build_blocks;
    use crate::machine::Opcode;
    use crate::program::ProgramBuilder;

    fn forest_for(program: &crate::program::Program) -> (BlockGraph, LoopForest) {
        let graph = build_blocks(program).unwrap();
        let members: BTreeSet<BlockId> = graph.ids().collect();
        let entry = graph.entry().unwrap();
        let dominators = DominatorTree::compute(&graph, entry, &members);
        let forest = LoopForest::compute(&graph, &dominators);
        (graph, forest)
    }

    #[test]
    fn countdown_loop() {
        let program = ProgramBuilder::new(0x8000)
            .label("Start")
            .immediate(Opcode::Ldx, 5)
            .label("Loop")
            .implied(Opcode::Dex)
            .to_label(Opcode::Bne, "Loop")
            .implied(Opcode::Rts)
            .build();
        let (graph, forest) = forest_for(&program);
        let start = graph.block_for_label("Start").unwrap();
        let header = graph.block_for_label("Loop").unwrap();
        assert_eq!(forest.len(), 1);
        let natural = forest.get(header).unwrap();
        assert_eq!(natural.body, BTreeSet::from([header]));
        assert_eq!(graph.block(header).entered_from, BTreeSet::from([start, header]));
        assert_eq!(natural.exits.len(), 1);
    }

    #[test]
    fn two_branches_to_one_label_are_one_loop() {
        let program = ProgramBuilder::new(0x8000)
            .immediate(Opcode::Ldx, 0x04)
            .immediate(Opcode::Ldy, 0xC0)
            .immediate(Opcode::Lda, 0x24)
            .label("InitNTLoop")
            .absolute(Opcode::Sta, 0x2007)
            .implied(Opcode::Dey)
            .to_label(Opcode::Bne, "InitNTLoop")
            .implied(Opcode::Dex)
            .to_label(Opcode::Bne, "InitNTLoop")
            .implied(Opcode::Rts)
            .build();
        let (graph, forest) = forest_for(&program);
        let header = graph.block_for_label("InitNTLoop").unwrap();
        assert_eq!(forest.len(), 1);
        let natural = forest.get(header).unwrap();
        assert_eq!(natural.back_edges.len(), 2);
        assert_eq!(natural.body.len(), 2);
        assert_eq!(natural.exits.len(), 1);
    }

    #[test]
    fn outer_loop_contains_inner_header() {
        let program = ProgramBuilder::new(0x8000)
            .immediate(Opcode::Ldx, 3)
            .label("Outer")
            .immediate(Opcode::Ldy, 3)
            .label("Inner")
            .implied(Opcode::Dey)
            .to_label(Opcode::Bne, "Inner")
            .implied(Opcode::Dex)
            .to_label(Opcode::Bne, "Outer")
            .implied(Opcode::Rts)
            .build();
        let (graph, forest) = forest_for(&program);
        let outer = graph.block_for_label("Outer").unwrap();
        let inner = graph.block_for_label("Inner").unwrap();
        assert_eq!(forest.len(), 2);
        assert!(forest.get(outer).unwrap().contains(inner));
        assert!(!forest.get(inner).unwrap().contains(outer));
        assert_eq!(forest.innermost(inner).unwrap().header, inner);
        assert_eq!(forest.innermost(outer).unwrap().header, outer);
    }
}
