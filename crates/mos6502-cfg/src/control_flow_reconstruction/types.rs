// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0
use crate::blocks::BlockId;
use std::fmt;

/// What a structured test branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// The flag test ending `block`. With `taken` the condition holds when the branch is
    /// taken; without, when it falls through.
    Branch { block: BlockId, taken: bool },
    /// The dispatch variable of a lowered irreducible function names `block`.
    Dispatch(BlockId),
}

impl Condition {
    pub fn branch_taken(block: BlockId) -> Self {
        Condition::Branch { block, taken: true }
    }

    pub fn negate(self) -> Self {
        match self {
            Condition::Branch { block, taken } => Condition::Branch {
                block,
                taken: !taken,
            },
            dispatch => dispatch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// The header only computes the condition; the body runs while it holds.
    PreTest,
    /// The single latch tests the condition after the body.
    PostTest,
    /// Left only through `Break` or a return.
    Infinite,
}

/// A node of the structured control tree. Every reachable block of a function appears in
/// exactly one `Block` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlNode {
    Block(BlockId),
    If {
        condition: Condition,
        then_branch: Vec<ControlNode>,
        else_branch: Vec<ControlNode>,
        /// Where both branches meet again, if they do.
        join: Option<BlockId>,
    },
    Loop {
        kind: LoopKind,
        header: BlockId,
        /// The condition that keeps the loop running; `None` for infinite loops.
        condition: Option<Condition>,
        body: Vec<ControlNode>,
        /// Set only when a labelled `Break`/`Continue` refers to this loop.
        label: Option<String>,
        follow: Option<BlockId>,
    },
    /// Transfer to a block outside the structure: a tail call, or a dispatch step.
    Goto(BlockId),
    Break(Option<String>),
    Continue(Option<String>),
}

impl ControlNode {
    /// Calls `f` on this node and every nested node, parents first.
    pub fn visit(&self, f: &mut impl FnMut(&ControlNode)) {
        f(self);
        match self {
            ControlNode::If {
                then_branch,
                else_branch,
                ..
            } => {
                for node in then_branch.iter().chain(else_branch) {
                    node.visit(f);
                }
            }
            ControlNode::Loop { body, .. } => {
                for node in body {
                    node.visit(f);
                }
            }
            ControlNode::Block(_)
            | ControlNode::Goto(_)
            | ControlNode::Break(_)
            | ControlNode::Continue(_) => {}
        }
    }
}

/// The structured form of one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredFunction {
    pub nodes: Vec<ControlNode>,
    /// `false` when the function was lowered to a dispatch loop.
    pub structured: bool,
}

impl StructuredFunction {
    /// Blocks in the order their `Block` nodes appear.
    pub fn blocks(&self) -> Vec<BlockId> {
        let mut blocks = vec![];
        for node in &self.nodes {
            node.visit(&mut |node| {
                if let ControlNode::Block(block) = node {
                    blocks.push(*block);
                }
            });
        }
        blocks
    }
}

impl fmt::Display for ControlNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlNode::Block(block) => write!(f, "block {}", block),
            ControlNode::If { condition, .. } => write!(f, "if {:?}", condition),
            ControlNode::Loop { kind, header, .. } => write!(f, "{:?} loop at {}", kind, header),
            ControlNode::Goto(block) => write!(f, "goto {}", block),
            ControlNode::Break(label) => write!(f, "break {}", label.as_deref().unwrap_or("")),
            ControlNode::Continue(label) => {
                write!(f, "continue {}", label.as_deref().unwrap_or(""))
            }
        }
    }
}
