// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Dominance analysis over one function's blocks.
//!
//! Iterative dataflow in reverse postorder with the two-finger `intersect` walk
//! ("A Simple, Fast Dominance Algorithm", Cooper, Harvey & Kennedy). Blocks not reachable
//! from the entry get no dominator and are left out of the ordering, so later stages skip
//! them without special cases.

use crate::blocks::{BlockGraph, BlockId};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: BlockId,
    /// Immediate dominators; the entry maps to itself.
    idom: BTreeMap<BlockId, BlockId>,
    order: Vec<BlockId>,
    rpo_index: BTreeMap<BlockId, usize>,
}

impl DominatorTree {
    /// Computes dominators rooted at `entry`, following only edges between `members`.
    pub fn compute(graph: &BlockGraph, entry: BlockId, members: &BTreeSet<BlockId>) -> Self {
        let successors = |block: BlockId| -> Vec<BlockId> {
            graph
                .successors(block)
                .into_iter()
                .filter(|successor| members.contains(successor))
                .collect()
        };
        let order = reverse_postorder(entry, successors);
        let rpo_index: BTreeMap<BlockId, usize> =
            order.iter().enumerate().map(|(index, block)| (*block, index)).collect();

        let mut tree = Self {
            entry,
            idom: BTreeMap::new(),
            order,
            rpo_index,
        };
        tree.idom.insert(entry, entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in tree.order.iter().skip(1) {
                let mut new_idom = None;
                for predecessor in graph.predecessors(block) {
                    if !tree.idom.contains_key(predecessor) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => *predecessor,
                        Some(current) => tree.intersect(*predecessor, current),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if tree.idom.get(&block) != Some(&new_idom) {
                        tree.idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }
        tree
    }

    fn intersect(&self, mut b1: BlockId, mut b2: BlockId) -> BlockId {
        while b1 != b2 {
            while self.rpo_index[&b1] > self.rpo_index[&b2] {
                b1 = self.idom[&b1];
            }
            while self.rpo_index[&b2] > self.rpo_index[&b1] {
                b2 = self.idom[&b2];
            }
        }
        b1
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// `None` for the entry and for unreachable blocks.
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        if block == self.entry {
            return None;
        }
        self.idom.get(&block).copied()
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_index.contains_key(&block)
    }

    /// Reflexive dominance. Unreachable blocks dominate and are dominated by nothing.
    pub fn dominates(&self, dominator: BlockId, block: BlockId) -> bool {
        if !self.is_reachable(dominator) || !self.is_reachable(block) {
            return false;
        }
        let mut current = block;
        loop {
            if current == dominator {
                return true;
            }
            match self.immediate_dominator(current) {
                Some(idom) => current = idom,
                None => return false,
            }
        }
    }

    pub fn reverse_postorder(&self) -> &[BlockId] {
        &self.order
    }

    pub fn rpo_index(&self, block: BlockId) -> Option<usize> {
        self.rpo_index.get(&block).copied()
    }
}

/// Iterative depth-first reverse postorder from `entry`.
pub fn reverse_postorder(
    entry: BlockId,
    successors: impl Fn(BlockId) -> Vec<BlockId>,
) -> Vec<BlockId> {
    let mut visited = BTreeSet::from([entry]);
    let mut postorder = vec![];
    let mut stack = vec![(entry, successors(entry), 0usize)];
    while let Some((block, next, cursor)) = stack.last_mut() {
        if let Some(successor) = next.get(*cursor).copied() {
            *cursor += 1;
            if visited.insert(successor) {
                let successor_edges = successors(successor);
                stack.push((successor, successor_edges, 0));
            }
        } else {
            postorder.push(*block);
            stack.pop();
        }
    }
    postorder.reverse();
    postorder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::build_blocks;
    use crate::machine::Opcode;
    use crate::program::ProgramBuilder;

    #[test]
    fn diamond_join_is_dominated_by_branch() {
        let program = ProgramBuilder::new(0x8000)
            .label("Top")
            .implied(Opcode::Clc)
            .to_label(Opcode::Bcc, "Right")
            .label("Left")
            .implied(Opcode::Inx)
            .to_label(Opcode::Jmp, "Join")
            .label("Right")
            .implied(Opcode::Iny)
            .label("Join")
            .implied(Opcode::Rts)
            .label("Orphan")
            .implied(Opcode::Rts)
            .build();
        let graph = build_blocks(&program).unwrap();
        let id = |name: &str| graph.block_for_label(name).unwrap();
        let members: BTreeSet<BlockId> = graph.ids().collect();
        let tree = DominatorTree::compute(&graph, id("Top"), &members);

        assert_eq!(tree.immediate_dominator(id("Top")), None);
        assert_eq!(tree.immediate_dominator(id("Left")), Some(id("Top")));
        assert_eq!(tree.immediate_dominator(id("Right")), Some(id("Top")));
        assert_eq!(tree.immediate_dominator(id("Join")), Some(id("Top")));
        assert!(tree.dominates(id("Top"), id("Join")));
        assert!(!tree.dominates(id("Left"), id("Join")));

        assert!(!tree.is_reachable(id("Orphan")));
        assert_eq!(tree.immediate_dominator(id("Orphan")), None);
        assert_eq!(tree.reverse_postorder().len(), 4);
    }

    #[test]
    fn loop_header_dominates_latch() {
        let program = ProgramBuilder::new(0x8000)
            .label("Start")
            .immediate(Opcode::Ldx, 5)
            .label("Loop")
            .implied(Opcode::Dex)
            .to_label(Opcode::Bne, "Loop")
            .implied(Opcode::Rts)
            .build();
        let graph = build_blocks(&program).unwrap();
        let id = |name: &str| graph.block_for_label(name).unwrap();
        let members: BTreeSet<BlockId> = graph.ids().collect();
        let tree = DominatorTree::compute(&graph, id("Start"), &members);
        assert_eq!(tree.immediate_dominator(id("Loop")), Some(id("Start")));
        assert!(tree.dominates(id("Loop"), id("Loop")));
        assert_eq!(tree.rpo_index(id("Start")), Some(0));
    }
}
