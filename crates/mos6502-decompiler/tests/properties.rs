// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::{fixture, fixtures, listing};
use mos6502_cfg::control_flow_reconstruction::{reconstruct_control_flow, ControlNode};
use mos6502_cfg::dominance::DominatorTree;
use mos6502_cfg::loops::LoopForest;
use mos6502_cfg::{build_blocks, resolve_functions, BlockId, Location};
use mos6502_decompiler::{decompile, roots, DecompilerOptions, GenerationError};
use structured_ir::{Expression, FunctionDefinition, LoopKind, Statement};

fn conditions(function: &FunctionDefinition) -> Vec<&Expression> {
    function
        .statements()
        .filter_map(|statement| match statement {
            Statement::If { condition, .. } => Some(condition),
            Statement::Loop {
                kind: LoopKind::While(condition) | LoopKind::DoWhile(condition),
                ..
            } => Some(condition),
            _ => None,
        })
        .collect()
}

fn loops(function: &FunctionDefinition) -> usize {
    function
        .statements()
        .filter(|statement| matches!(statement, Statement::Loop { .. }))
        .count()
}

#[test]
fn edges_are_bidirectional_in_every_fixture() {
    for fixture in fixtures() {
        let graph = build_blocks(&fixture.program).unwrap();
        graph.verify().unwrap();
        for block in graph.blocks() {
            for target in [block.fall_through_exit, block.branch_exit].into_iter().flatten() {
                assert!(
                    graph.block(target).entered_from.contains(&block.id),
                    "{}: {} -> {}",
                    fixture.name(),
                    block.name(),
                    graph.block(target).name()
                );
            }
            for predecessor in &block.entered_from {
                assert!(graph.block(*predecessor).successors().contains(&block.id));
            }
        }
    }
}

#[test]
fn straight_line_structures_to_itself() {
    let program = listing(
        "
            .org $8000
        Start:  LDA #$01
                STA $10
                INC $11
                RTS
        ",
    );
    let graph = build_blocks(&program).unwrap();
    assert_eq!(graph.len(), 1);
    let entry = BlockId(0);
    assert!(graph.block(entry).successors().is_empty());
    assert!(graph.block(entry).entered_from.is_empty());

    let functions = resolve_functions(&graph, &[entry]);
    let function = &functions.functions()[0];
    let dominators = DominatorTree::compute(&graph, function.entry, &function.blocks);
    let loops = LoopForest::compute(&graph, &dominators);
    let structured = reconstruct_control_flow(&graph, function, &dominators, &loops);
    assert_eq!(structured.nodes, vec![ControlNode::Block(entry)]);
    assert!(structured.structured);
}

#[test]
fn two_branches_to_one_label_make_one_loop() {
    let fixture = fixture("nametable");
    let graph = build_blocks(&fixture.program).unwrap();
    let functions = resolve_functions(&graph, &roots(&graph, &fixture.options()).unwrap());
    let function = &functions.functions()[0];
    let dominators = DominatorTree::compute(&graph, function.entry, &function.blocks);
    let loops = LoopForest::compute(&graph, &dominators);
    assert_eq!(loops.len(), 1);
    let header = graph.block_for_label("InitNTLoop").unwrap();
    assert!(loops.is_header(header));

    let decompiled = decompile(&fixture.program, &fixture.options()).unwrap();
    let init = decompiled.function("InitNT").unwrap();
    assert_eq!(crate::loops(init), 1);
    for condition in conditions(init) {
        assert!(
            !matches!(condition, Expression::Bool(_)),
            "constant condition in\n{}",
            init
        );
    }
}

#[test]
fn back_edge_to_own_entry_is_a_loop_not_a_self_call() {
    let decompiled =
        decompile(&fixture("render_under").program, &DecompilerOptions::default()).unwrap();
    assert!(decompiled.failures.is_empty(), "{:?}", decompiled.failures);
    let render = decompiled.function("RenderUnderPart").unwrap();
    assert!(loops(render) >= 1, "{}", render);
    assert!(
        !render.statements().any(|statement| matches!(
            statement,
            Statement::Call { function, .. } if function == "RenderUnderPart"
        )),
        "{}",
        render
    );
    let start = decompiled.function("Start").unwrap();
    assert!(start.statements().any(|statement| matches!(
        statement,
        Statement::Call { function, .. } if function == "RenderUnderPart"
    )));
}

#[test]
fn bit_skip_entries_decompile_independently() {
    let fixture = fixture("bit_skip");
    let decompiled = decompile(&fixture.program, &fixture.options()).unwrap();
    assert!(decompiled.failures.is_empty());
    insta::assert_snapshot!(decompiled.function("EntryA").unwrap(), @r###"
    fn EntryA() -> (a) {
      // skips `LDA #$FF` (entered at EntryB)
      t1 = mem[0xffa9]
      mem[0x00] = 0x00
      return a: 0x00
    }
    "###);
    insta::assert_snapshot!(decompiled.function("EntryB").unwrap(), @r###"
    fn EntryB() -> (a) {
      mem[0x00] = 0xff
      return a: 0xff
    }
    "###);
}

#[test]
fn transfers_copy_the_current_value() {
    let decompiled =
        decompile(&fixture("transfers").program, &DecompilerOptions::default()).unwrap();
    insta::assert_snapshot!(decompiled.function("Transfers").unwrap(), @r###"
    fn Transfers() -> (a, x, y) {
      mem[0x10] = 0x01
      mem[0x11] = 0x02
      mem[0x12] = 0x02
      return a: 0x01, x: 0x01, y: 0x02
    }
    "###);
}

#[test]
fn terminating_branch_does_not_unbind_loop_flag() {
    let program = listing(
        "
            .org $8000
        Scan:   LDY #$05
        Next:   LDA $0300,Y
                BNE Keep
                RTS
        Keep:   STA $0400,Y
                DEY
                BPL Next
                RTS
        ",
    );
    let decompiled = decompile(&program, &DecompilerOptions::default()).unwrap();
    assert!(decompiled.failures.is_empty(), "{:?}", decompiled.failures);
    let scan = decompiled.function("Scan").unwrap();
    assert_eq!(loops(scan), 1, "{}", scan);
}

#[test]
fn irreducible_cycle_is_flagged() {
    let decompiled =
        decompile(&fixture("irreducible").program, &DecompilerOptions::default()).unwrap();
    let start = decompiled.function("Start").unwrap();
    assert!(!start.structured);
    assert!(start.to_string().starts_with("// control flow lowered to a dispatch loop"));
}

#[test]
fn flag_read_before_any_write_fails_only_that_function() {
    let program = listing(
        "
            .org $8000
        Main:   JSR Good
                JSR Carry
                RTS
        Good:   LDA #$01
                STA $10
                RTS
        Carry:  BCC Skip
                INC $11
        Skip:   RTS
        ",
    );
    let decompiled = decompile(&program, &DecompilerOptions::default()).unwrap();
    assert!(decompiled.function("Main").is_some());
    assert!(decompiled.function("Good").is_some());
    let failure = decompiled.failure("Carry").unwrap();
    assert!(matches!(
        &failure.error,
        GenerationError::Unbound { location: Location::C, .. }
    ));
    assert!(decompiled.to_string().contains("// Carry not decompiled: "));
}

#[test]
fn unsupported_and_stack_errors_are_reported() {
    let program = listing(
        "
            .org $8000
        Main:   JSR Bad
                JSR Uneven
                RTS
        Bad:    TSX
                STX $11
                RTS
        Uneven: LDA $00
                BEQ Skip
                PHA
        Skip:   RTS
        ",
    );
    let decompiled = decompile(&program, &DecompilerOptions::default()).unwrap();
    assert!(decompiled.function("Main").is_some());
    assert!(matches!(
        &decompiled.failure("Bad").unwrap().error,
        GenerationError::Unsupported { block, .. } if block == "Bad"
    ));
    assert!(matches!(
        &decompiled.failure("Uneven").unwrap().error,
        GenerationError::StackMismatch { .. }
    ));
}

#[test]
fn unknown_entry_label_is_an_error() {
    let options = DecompilerOptions {
        entry: Some("Nowhere".to_string()),
        ..DecompilerOptions::default()
    };
    let error = decompile(&fixture("countdown").program, &options).unwrap_err();
    insta::assert_snapshot!(error.to_string(), @"unknown entry label `Nowhere`");
}

#[test]
fn empty_program_decompiles_to_nothing() {
    let decompiled =
        decompile(&listing("; nothing here\n"), &DecompilerOptions::default()).unwrap();
    assert!(decompiled.functions.is_empty());
    assert!(decompiled.failures.is_empty());
}

#[test]
fn flag_set_on_one_path_into_join_fails_at_the_join() {
    let program = listing(
        "
            .org $8000
        Main:   LDA $00
                BEQ Skip
                CMP #$10
        Skip:   BCC Out
                STA $01
        Out:    RTS
        ",
    );
    let decompiled = decompile(&program, &DecompilerOptions::default()).unwrap();
    assert!(decompiled.functions.is_empty());
    let failure = decompiled.failure("Main").unwrap();
    let GenerationError::Unbound {
        block,
        location,
        origin,
    } = &failure.error
    else {
        panic!("{:?}", failure.error);
    };
    assert_eq!(block, "Skip");
    assert_eq!(*location, Location::C);
    assert!(origin.contains("only some paths"), "{}", origin);
}

#[test]
fn flag_differing_between_loop_exits_is_unbound_after_it() {
    let program = listing(
        "
            .org $8000
        Scan:   LDX #$00
        Next:   LDA $0300,X
                BEQ Done
                CMP #$40
                BCS Done
                INX
                JMP Next
        Done:   BCC Low
                STA $10
        Low:    RTS
        ",
    );
    let decompiled = decompile(&program, &DecompilerOptions::default()).unwrap();
    let failure = decompiled.failure("Scan").unwrap();
    let GenerationError::Unbound {
        block,
        location,
        origin,
    } = &failure.error
    else {
        panic!("{:?}", failure.error);
    };
    assert_eq!(block, "Done");
    assert_eq!(*location, Location::C);
    assert!(origin.contains("differs between exits of loop Next"), "{}", origin);
}
