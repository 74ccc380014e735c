// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0
use crate::blocks::{BlockGraph, BlockId};
use crate::dominance::DominatorTree;
use crate::loops::NaturalLoop;
use std::collections::{BTreeMap, BTreeSet};

/// Whether `to` is reachable from `from` along edges accepted by `follow_edge`, never entering
/// `avoid`. A block reaches itself.
pub(super) fn can_reach(
    graph: &BlockGraph,
    from: BlockId,
    to: BlockId,
    avoid: BlockId,
    follow_edge: &impl Fn(BlockId, BlockId) -> bool,
) -> bool {
    let mut visited = BTreeSet::new();
    let mut work = vec![from];
    while let Some(block) = work.pop() {
        if block == to {
            return true;
        }
        if block == avoid || !visited.insert(block) {
            continue;
        }
        for successor in graph.successors(block) {
            if follow_edge(block, successor) {
                work.push(successor);
            }
        }
    }
    false
}

/// Finds the block where the two arms of the conditional ending `branch` meet again.
///
/// An arm target that the other arm reaches, and that `branch` dominates, is the join (an `if`
/// without `else`). Otherwise the join is the first block in reverse postorder immediately
/// dominated by `branch` that both arms reach.
pub(super) fn find_merge_point(
    graph: &BlockGraph,
    dominators: &DominatorTree,
    branch: BlockId,
    taken: BlockId,
    fall: BlockId,
    follow_edge: &impl Fn(BlockId, BlockId) -> bool,
) -> Option<BlockId> {
    let idom_is_branch = |block: BlockId| dominators.immediate_dominator(block) == Some(branch);
    if idom_is_branch(fall) && can_reach(graph, taken, fall, branch, follow_edge) {
        return Some(fall);
    }
    if idom_is_branch(taken) && can_reach(graph, fall, taken, branch, follow_edge) {
        return Some(taken);
    }
    dominators
        .reverse_postorder()
        .iter()
        .copied()
        .filter(|candidate| *candidate != taken && *candidate != fall)
        .filter(|candidate| idom_is_branch(*candidate))
        .find(|candidate| {
            can_reach(graph, taken, *candidate, branch, follow_edge)
                && can_reach(graph, fall, *candidate, branch, follow_edge)
        })
}

/// The block control reaches after leaving `natural`: the only exit target inside the
/// function, or else the one with the most exit edges (lowest reverse-postorder position on
/// ties).
pub(super) fn choose_follow(
    graph: &BlockGraph,
    dominators: &DominatorTree,
    natural: &NaturalLoop,
    members: &BTreeSet<BlockId>,
) -> Option<BlockId> {
    let mut counts: BTreeMap<BlockId, usize> = BTreeMap::new();
    for (_, target) in natural.exit_edges(graph) {
        if members.contains(&target) && dominators.is_reachable(target) {
            *counts.entry(target).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|(a, a_count), (b, b_count)| {
            a_count.cmp(b_count).then_with(|| {
                let a_index = dominators.rpo_index(*a).unwrap_or(usize::MAX);
                let b_index = dominators.rpo_index(*b).unwrap_or(usize::MAX);
                b_index.cmp(&a_index)
            })
        })
        .map(|(target, _)| target)
}

/// An edge that goes backwards in reverse postorder without its target dominating its source.
pub(super) fn find_retreating_edge(
    graph: &BlockGraph,
    dominators: &DominatorTree,
    members: &BTreeSet<BlockId>,
) -> Option<(BlockId, BlockId)> {
    for &block in dominators.reverse_postorder() {
        let Some(index) = dominators.rpo_index(block) else {
            continue;
        };
        for successor in graph.successors(block) {
            if !members.contains(&successor) {
                continue;
            }
            let Some(successor_index) = dominators.rpo_index(successor) else {
                continue;
            };
            if successor_index <= index && !dominators.dominates(successor, block) {
                return Some((block, successor));
            }
        }
    }
    None
}
