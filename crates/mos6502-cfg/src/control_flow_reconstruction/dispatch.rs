// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Lowering for functions the structurer cannot express with nested constructs: one labelled
//! infinite loop whose body selects the current block through a dispatch variable. Each arm
//! runs its block and then either names the next block with a `Goto` or leaves the function.

use crate::blocks::BlockGraph;
use crate::dominance::DominatorTree;
use crate::functions::Function;

use super::types::{Condition, ControlNode, LoopKind, StructuredFunction};

/// Label of the loop wrapping a lowered function.
pub const DISPATCH_LABEL: &str = "dispatch";

pub(super) fn lower_to_dispatch(
    graph: &BlockGraph,
    function: &Function,
    dominators: &DominatorTree,
) -> StructuredFunction {
    let mut arms = vec![];
    for &id in dominators.reverse_postorder() {
        let block = graph.block(id);
        let mut arm = vec![ControlNode::Block(id)];
        match (block.branch_exit, block.fall_through_exit) {
            (Some(taken), Some(fall)) if taken != fall && block.ends_in_conditional_branch() => {
                arm.push(ControlNode::If {
                    condition: Condition::branch_taken(id),
                    then_branch: vec![ControlNode::Goto(taken)],
                    else_branch: vec![ControlNode::Goto(fall)],
                    join: None,
                });
            }
            _ => arm.extend(block.successors().first().map(|next| ControlNode::Goto(*next))),
        }
        arms.push(ControlNode::If {
            condition: Condition::Dispatch(id),
            then_branch: arm,
            else_branch: vec![],
            join: None,
        });
    }
    StructuredFunction {
        nodes: vec![ControlNode::Loop {
            kind: LoopKind::Infinite,
            header: function.entry,
            condition: None,
            body: arms,
            label: Some(DISPATCH_LABEL.to_string()),
            follow: None,
        }],
        structured: false,
    }
}
