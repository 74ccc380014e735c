// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Control flow reconstruction module
//!
//! Turns the blocks of one function into a tree of `if`, loops, `break`, `continue` and
//! tail-call `goto`s, guided by dominators and natural loops. Irreducible functions become a
//! single dispatch loop.

mod dispatch;
mod helpers;
mod reconstructor;
mod types;

pub use dispatch::DISPATCH_LABEL;
pub use reconstructor::reconstruct_control_flow;
pub use types::{Condition, ControlNode, LoopKind, StructuredFunction};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{build_blocks, BlockGraph, BlockId};
    use crate::dominance::DominatorTree;
    use crate::functions::resolve_functions;
    use crate::loops::LoopForest;
    use crate::machine::Opcode;
    use crate::program::{Program, ProgramBuilder};

    fn structure(program: &Program, function: &str) -> (BlockGraph, StructuredFunction) {
        let graph = build_blocks(program).unwrap();
        let entry = graph.entry().unwrap();
        let functions = resolve_functions(&graph, &[entry]);
        let function = functions.by_name(function).unwrap();
        let dominators = DominatorTree::compute(&graph, function.entry, &function.blocks);
        let loops = LoopForest::compute(&graph, &dominators);
        let structured = reconstruct_control_flow(&graph, function, &dominators, &loops);
        (graph, structured)
    }

    fn find_loops(nodes: &[ControlNode]) -> Vec<ControlNode> {
        let mut found = vec![];
        for node in nodes {
            node.visit(&mut |node| {
                if matches!(node, ControlNode::Loop { .. }) {
                    found.push(node.clone());
                }
            });
        }
        found
    }

    fn contains(nodes: &[ControlNode], wanted: &ControlNode) -> bool {
        let mut hit = false;
        for node in nodes {
            node.visit(&mut |node| hit |= node == wanted);
        }
        hit
    }

    #[test]
    fn branch_free_block_is_itself() {
        let program = ProgramBuilder::new(0x8000)
            .label("Main")
            .immediate(Opcode::Lda, 1)
            .zero_page(Opcode::Sta, 0x10)
            .implied(Opcode::Rts)
            .build();
        let (_, structured) = structure(&program, "Main");
        assert!(structured.structured);
        assert_eq!(structured.nodes, vec![ControlNode::Block(BlockId(0))]);
    }

    #[test]
    fn if_then_skips_to_join() {
        let program = ProgramBuilder::new(0x8000)
            .label("Start")
            .zero_page(Opcode::Lda, 0x10)
            .to_label(Opcode::Beq, "Skip")
            .zero_page(Opcode::Inc, 0x01)
            .label("Skip")
            .implied(Opcode::Rts)
            .build();
        let (graph, structured) = structure(&program, "Start");
        let start = graph.block_for_label("Start").unwrap();
        let skip = graph.block_for_label("Skip").unwrap();
        let inc = graph.block(start).fall_through_exit.unwrap();
        assert_eq!(
            structured.nodes,
            vec![
                ControlNode::Block(start),
                ControlNode::If {
                    condition: Condition::Branch {
                        block: start,
                        taken: false
                    },
                    then_branch: vec![ControlNode::Block(inc)],
                    else_branch: vec![],
                    join: Some(skip),
                },
                ControlNode::Block(skip),
            ]
        );
    }

    #[test]
    fn diamond_has_both_arms() {
        let program = ProgramBuilder::new(0x8000)
            .label("Top")
            .zero_page(Opcode::Lda, 0x10)
            .to_label(Opcode::Beq, "Right")
            .label("Left")
            .implied(Opcode::Inx)
            .to_label(Opcode::Jmp, "Join")
            .label("Right")
            .implied(Opcode::Iny)
            .label("Join")
            .implied(Opcode::Rts)
            .build();
        let (graph, structured) = structure(&program, "Top");
        let id = |name: &str| graph.block_for_label(name).unwrap();
        assert_eq!(
            structured.nodes,
            vec![
                ControlNode::Block(id("Top")),
                ControlNode::If {
                    condition: Condition::branch_taken(id("Top")),
                    then_branch: vec![ControlNode::Block(id("Right"))],
                    else_branch: vec![ControlNode::Block(id("Left"))],
                    join: Some(id("Join")),
                },
                ControlNode::Block(id("Join")),
            ]
        );
    }

    #[test]
    fn countdown_is_post_test() {
        let program = ProgramBuilder::new(0x8000)
            .label("Start")
            .immediate(Opcode::Ldx, 5)
            .label("Loop")
            .implied(Opcode::Dex)
            .to_label(Opcode::Bne, "Loop")
            .implied(Opcode::Rts)
            .build();
        let (graph, structured) = structure(&program, "Start");
        let header = graph.block_for_label("Loop").unwrap();
        let loops = find_loops(&structured.nodes);
        assert_eq!(loops.len(), 1);
        let ControlNode::Loop {
            kind,
            condition,
            body,
            label,
            ..
        } = &loops[0]
        else {
            unreachable!()
        };
        assert_eq!(*kind, LoopKind::PostTest);
        assert_eq!(*condition, Some(Condition::branch_taken(header)));
        assert_eq!(body, &vec![ControlNode::Block(header)]);
        assert_eq!(*label, None);
        assert_eq!(structured.nodes.len(), 3);
    }

    #[test]
    fn jump_to_own_entry_is_a_loop() {
        let program = ProgramBuilder::new(0x8000)
            .label("RenderUnderPart")
            .absolute(Opcode::Sta, 0x2007)
            .implied(Opcode::Dex)
            .to_label(Opcode::Bpl, "RenderUnderPart")
            .implied(Opcode::Rts)
            .build();
        let (_, structured) = structure(&program, "RenderUnderPart");
        assert!(structured.structured);
        assert!(matches!(
            structured.nodes[0],
            ControlNode::Loop {
                kind: LoopKind::PostTest,
                ..
            }
        ));
        assert!(!contains(&structured.nodes, &ControlNode::Goto(BlockId(0))));
    }

    #[test]
    fn register_only_header_is_pre_test() {
        let program = ProgramBuilder::new(0x8000)
            .label("Start")
            .immediate(Opcode::Ldx, 4)
            .label("Loop")
            .immediate(Opcode::Cpx, 0)
            .to_label(Opcode::Beq, "Done")
            .absolute(Opcode::Sta, 0x2007)
            .implied(Opcode::Dex)
            .to_label(Opcode::Jmp, "Loop")
            .label("Done")
            .implied(Opcode::Rts)
            .build();
        let (graph, structured) = structure(&program, "Start");
        let header = graph.block_for_label("Loop").unwrap();
        let body_block = graph.block(header).fall_through_exit.unwrap();
        let loops = find_loops(&structured.nodes);
        let ControlNode::Loop {
            kind,
            condition,
            body,
            ..
        } = &loops[0]
        else {
            unreachable!()
        };
        assert_eq!(*kind, LoopKind::PreTest);
        assert_eq!(
            *condition,
            Some(Condition::Branch {
                block: header,
                taken: false
            })
        );
        assert_eq!(body, &vec![ControlNode::Block(body_block)]);
    }

    #[test]
    fn two_latches_make_infinite_loop_with_break() {
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
        let (_, structured) = structure(&program, "block_0");
        let loops = find_loops(&structured.nodes);
        assert_eq!(loops.len(), 1);
        let ControlNode::Loop {
            kind, body, label, ..
        } = &loops[0]
        else {
            unreachable!()
        };
        assert_eq!(*kind, LoopKind::Infinite);
        assert_eq!(*label, None);
        assert!(contains(body, &ControlNode::Break(None)));
        assert!(contains(body, &ControlNode::Continue(None)));
    }

    #[test]
    fn exit_from_inner_loop_breaks_outer_by_label() {
        let program = ProgramBuilder::new(0x8000)
            .label("Start")
            .immediate(Opcode::Ldx, 3)
            .label("Outer")
            .immediate(Opcode::Ldy, 3)
            .label("Inner")
            .implied(Opcode::Dey)
            .to_label(Opcode::Beq, "Done")
            .immediate(Opcode::Cpy, 1)
            .to_label(Opcode::Bne, "Inner")
            .implied(Opcode::Dex)
            .to_label(Opcode::Bne, "Outer")
            .label("Done")
            .implied(Opcode::Rts)
            .build();
        let (_, structured) = structure(&program, "Start");
        assert!(structured.structured);
        let loops = find_loops(&structured.nodes);
        assert_eq!(loops.len(), 2);
        assert!(matches!(
            &loops[0],
            ControlNode::Loop { label: Some(label), .. } if label == "Outer"
        ));
        assert!(matches!(&loops[1], ControlNode::Loop { label: None, .. }));
        assert!(contains(
            &structured.nodes,
            &ControlNode::Break(Some("Outer".to_string()))
        ));
    }

    #[test]
    fn irreducible_cycle_is_dispatched() {
        let program = ProgramBuilder::new(0x8000)
            .label("Start")
            .zero_page(Opcode::Lda, 0x10)
            .to_label(Opcode::Beq, "B")
            .label("A")
            .implied(Opcode::Inx)
            .to_label(Opcode::Beq, "Done")
            .label("B")
            .implied(Opcode::Dey)
            .to_label(Opcode::Bne, "A")
            .label("Done")
            .implied(Opcode::Rts)
            .build();
        let (graph, structured) = structure(&program, "Start");
        assert!(!structured.structured);
        assert!(matches!(
            &structured.nodes[..],
            [ControlNode::Loop { label: Some(label), kind: LoopKind::Infinite, .. }]
                if label == DISPATCH_LABEL
        ));
        let mut blocks = structured.blocks();
        blocks.sort();
        assert_eq!(blocks, graph.ids().collect::<Vec<_>>());
    }

    #[test]
    fn jump_to_other_entry_is_goto() {
        let program = ProgramBuilder::new(0x8000)
            .label("Main")
            .to_label(Opcode::Jsr, "Helper")
            .to_label(Opcode::Jmp, "Helper")
            .label("Helper")
            .implied(Opcode::Inx)
            .implied(Opcode::Rts)
            .build();
        let (graph, structured) = structure(&program, "Main");
        let main = graph.block_for_label("Main").unwrap();
        let helper = graph.block_for_label("Helper").unwrap();
        assert_eq!(
            structured.nodes,
            vec![ControlNode::Block(main), ControlNode::Goto(helper)]
        );
    }
}
