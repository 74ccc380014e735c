// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Basic block construction.
//!
//! Blocks live in an arena ([`BlockGraph`]) and refer to each other by [`BlockId`]. Every edge
//! is inserted through [`BlockGraph::add_edge`], which keeps `entered_from` in step with the
//! two exit fields; [`BlockGraph::verify`] re-checks that after construction.
//!
//! A one-byte `BIT` opcode in a data directive (`.db $2c` or `.db $24`) followed by a labelled
//! instruction of the matching length yields two views of the same bytes: control falling into
//! the data byte executes a `BIT` whose operand is the hidden instruction, while a jump to the
//! label executes the hidden instruction normally. The earlier view gets its own copy of the
//! instructions following the hidden one, up to the next label or block end.

use crate::error::CfgError;
use crate::machine::Opcode;
use crate::program::{Instruction, LineKind, Operand, Program, Target, Width};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    FallThrough,
    Branch,
}

/// An instruction present in the bytes but not executed on this view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Elision {
    /// Index of the synthesised `BIT` in the block's instruction list.
    pub at: usize,
    pub elided: Instruction,
    /// Label under which the elided instruction is reachable.
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub label: Option<String>,
    /// Byte offset of the first instruction.
    pub offset: u16,
    pub instructions: Vec<Instruction>,
    pub elisions: Vec<Elision>,
    /// Resolved `JSR` targets by instruction index.
    pub calls: BTreeMap<usize, BlockId>,
    pub fall_through_exit: Option<BlockId>,
    pub branch_exit: Option<BlockId>,
    pub entered_from: BTreeSet<BlockId>,
}

impl Block {
    fn new(id: BlockId, label: Option<String>, offset: u16) -> Self {
        Self {
            id,
            label,
            offset,
            instructions: vec![],
            elisions: vec![],
            calls: BTreeMap::new(),
            fall_through_exit: None,
            branch_exit: None,
            entered_from: BTreeSet::new(),
        }
    }

    /// Human-readable name: the label, or a synthetic one.
    pub fn name(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => format!("block_{}", self.id),
        }
    }

    /// Fall-through first, then branch; a target reached both ways is listed once.
    pub fn successors(&self) -> Vec<BlockId> {
        let mut successors = vec![];
        for exit in [self.fall_through_exit, self.branch_exit].into_iter().flatten() {
            if !successors.contains(&exit) {
                successors.push(exit);
            }
        }
        successors
    }

    /// The last instruction, if it transfers control.
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions
            .last()
            .filter(|instruction| instruction.opcode.is_control_transfer())
    }

    pub fn ends_in_conditional_branch(&self) -> bool {
        self.terminator()
            .map_or(false, |instruction| instruction.opcode.is_conditional_branch())
    }

    pub fn elision_at(&self, index: usize) -> Option<&Elision> {
        self.elisions.iter().find(|elision| elision.at == index)
    }
}

/// Arena of blocks for one program.
#[derive(Debug, Clone, Default)]
pub struct BlockGraph {
    blocks: Vec<Block>,
    labels: BTreeMap<String, BlockId>,
    entry: Option<BlockId>,
}

impl BlockGraph {
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.iter().map(|block| block.id)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The block holding the first instruction of the program.
    pub fn entry(&self) -> Option<BlockId> {
        self.entry
    }

    pub fn block_for_label(&self, label: &str) -> Option<BlockId> {
        self.labels.get(label).copied()
    }

    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        self.block(id).successors()
    }

    pub fn predecessors(&self, id: BlockId) -> &BTreeSet<BlockId> {
        &self.block(id).entered_from
    }

    fn add_block(&mut self, label: Option<String>, offset: u16) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(Block::new(id, label, offset));
        id
    }

    /// Inserts an edge and its reverse entry.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) {
        let previous = match kind {
            EdgeKind::FallThrough => self.blocks[from.0].fall_through_exit.replace(to),
            EdgeKind::Branch => self.blocks[from.0].branch_exit.replace(to),
        };
        if let Some(previous) = previous {
            if previous != to && !self.blocks[from.0].successors().contains(&previous) {
                self.blocks[previous.0].entered_from.remove(&from);
            }
        }
        self.blocks[to.0].entered_from.insert(from);
    }

    /// Checks that exits and `entered_from` describe the same edge set.
    pub fn verify(&self) -> Result<(), CfgError> {
        for block in &self.blocks {
            for successor in block.successors() {
                if !self.block(successor).entered_from.contains(&block.id) {
                    return Err(CfgError::MissingReverseEdge {
                        from: block.name(),
                        to: self.block(successor).name(),
                    });
                }
            }
            for predecessor in &block.entered_from {
                if !self.block(*predecessor).successors().contains(&block.id) {
                    return Err(CfgError::DanglingPredecessor {
                        block: block.name(),
                        predecessor: self.block(*predecessor).name(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Code-relevant view of a line.
#[derive(Debug)]
enum Item<'a> {
    Code(&'a Instruction),
    Data(&'a [u8]),
    /// Labels with nothing after them.
    End,
}

#[derive(Debug)]
struct Slot<'a> {
    labels: Vec<String>,
    offset: u16,
    item: Item<'a>,
}

#[derive(Debug)]
enum PendingTarget {
    /// The block starting at this slot.
    Slot(usize),
    Target(Target),
}

/// Splits a program into basic blocks.
pub struct BlockBuilder<'a> {
    program: &'a Program,
    slots: Vec<Slot<'a>>,
    graph: BlockGraph,
    starts: BTreeMap<usize, BlockId>,
    pending: Vec<(BlockId, EdgeKind, PendingTarget)>,
    pending_calls: Vec<(BlockId, usize, Target)>,
}

impl<'a> BlockBuilder<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self {
            program,
            slots: collect_slots(program),
            graph: BlockGraph::default(),
            starts: BTreeMap::new(),
            pending: vec![],
            pending_calls: vec![],
        }
    }

    pub fn build(mut self) -> Result<BlockGraph, CfgError> {
        let mut current: Option<BlockId> = None;
        let mut index = 0;
        while index < self.slots.len() {
            let labelled = !self.slots[index].labels.is_empty();
            match self.slots[index].item {
                Item::Code(instruction) => {
                    let block = match current {
                        Some(open) if !labelled => open,
                        open => {
                            let block = self.start_block(index);
                            if let Some(open) = open {
                                self.graph.add_edge(open, block, EdgeKind::FallThrough);
                            }
                            block
                        }
                    };
                    self.push_instruction(block, index, instruction.clone());
                    current = if instruction.opcode.is_control_transfer() {
                        None
                    } else {
                        Some(block)
                    };
                }
                Item::Data(bytes) => {
                    let open = match current {
                        Some(open) if labelled => {
                            let block = self.start_block(index);
                            self.graph.add_edge(open, block, EdgeKind::FallThrough);
                            Some(block)
                        }
                        None if labelled && self.hidden_instruction(index, bytes).is_some() => {
                            Some(self.start_block(index))
                        }
                        open => open,
                    };
                    if let Some(block) = open {
                        self.extend_bit_skip(block, index, bytes)?;
                    }
                    current = None;
                }
                Item::End => {
                    let block = self.start_block(index);
                    if let Some(open) = current {
                        self.graph.add_edge(open, block, EdgeKind::FallThrough);
                    }
                    current = None;
                }
            }
            index += 1;
        }
        self.resolve_pending();
        self.graph.verify()?;
        debug!("[blocks] built {} blocks", self.graph.len());
        Ok(self.graph)
    }

    fn start_block(&mut self, slot: usize) -> BlockId {
        let label = self.slots[slot].labels.first().cloned();
        let block = self.graph.add_block(label, self.slots[slot].offset);
        for label in &self.slots[slot].labels {
            self.graph.labels.insert(label.clone(), block);
        }
        if self.graph.entry.is_none() && matches!(self.slots[slot].item, Item::Code(_)) {
            self.graph.entry = Some(block);
        }
        self.starts.insert(slot, block);
        block
    }

    /// Appends an instruction and queues the edges its transfer implies. `slot` is the
    /// instruction's own slot; the fall-through of a conditional branch is the slot after it.
    fn push_instruction(&mut self, block: BlockId, slot: usize, instruction: Instruction) {
        let opcode = instruction.opcode;
        if let Some(target) = instruction.transfer_target() {
            if opcode == Opcode::Jsr {
                let position = self.graph.blocks[block.0].instructions.len();
                self.pending_calls.push((block, position, target.clone()));
            } else {
                self.pending
                    .push((block, EdgeKind::Branch, PendingTarget::Target(target.clone())));
            }
        }
        if opcode.is_conditional_branch() {
            self.pending
                .push((block, EdgeKind::FallThrough, PendingTarget::Slot(slot + 1)));
        }
        self.graph.blocks[block.0].instructions.push(instruction);
    }

    /// The labelled instruction hidden behind a one-byte `BIT` opcode, with the operand
    /// address the `BIT` would see.
    fn hidden_instruction(&self, slot: usize, bytes: &[u8]) -> Option<(Width, u16)> {
        let width = match bytes {
            [0x2C] => Width::Absolute,
            [0x24] => Width::ZeroPage,
            _ => return None,
        };
        let next = self.slots.get(slot + 1)?;
        let Item::Code(hidden) = next.item else {
            return None;
        };
        if next.labels.is_empty() {
            return None;
        }
        let skipped = if width == Width::Absolute { 2 } else { 1 };
        let encoded = self.program.encode(hidden, next.offset).ok()?;
        if encoded.len() != skipped {
            return None;
        }
        let address = encoded
            .iter()
            .rev()
            .fold(0u16, |acc, byte| (acc << 8) | *byte as u16);
        Some((width, address))
    }

    fn extend_bit_skip(
        &mut self,
        block: BlockId,
        slot: usize,
        bytes: &[u8],
    ) -> Result<(), CfgError> {
        let Some((width, address)) = self.hidden_instruction(slot, bytes) else {
            debug!("[blocks] block {} runs into data at offset {}", block, self.slots[slot].offset);
            return Ok(());
        };
        let hidden_slot = slot + 1;
        let Item::Code(hidden) = self.slots[hidden_slot].item else {
            return Ok(());
        };
        let position = self.graph.blocks[block.0].instructions.len();
        let bit = Instruction::new(
            Opcode::Bit,
            Operand::Direct {
                target: Target::address(address),
                width,
            },
        );
        debug!("[blocks] BIT-skip in block {}: `{}` hides `{}`", block, bit, hidden);
        self.graph.blocks[block.0].elisions.push(Elision {
            at: position,
            elided: hidden.clone(),
            label: self.slots[hidden_slot].labels[0].clone(),
        });
        self.graph.blocks[block.0].instructions.push(bit);

        // Private copy of the code after the hidden instruction.
        let mut index = hidden_slot + 1;
        while index < self.slots.len() {
            if !self.slots[index].labels.is_empty() {
                self.pending
                    .push((block, EdgeKind::FallThrough, PendingTarget::Slot(index)));
                break;
            }
            let Item::Code(instruction) = self.slots[index].item else {
                break;
            };
            self.push_instruction(block, index, instruction.clone());
            if instruction.opcode.is_control_transfer() {
                break;
            }
            index += 1;
        }
        Ok(())
    }

    fn resolve_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (from, kind, target) in pending {
            let to = match &target {
                PendingTarget::Slot(slot) => self.starts.get(slot).copied(),
                PendingTarget::Target(target) => self.resolve_target(target),
            };
            match to {
                Some(to) => self.graph.add_edge(from, to, kind),
                None => debug!(
                    "[blocks] unresolved {:?} exit of block {}: {:?}",
                    kind, from, target
                ),
            }
        }
        let calls = std::mem::take(&mut self.pending_calls);
        for (from, position, target) in calls {
            if let Some(callee) = self.resolve_target(&target) {
                self.graph.blocks[from.0].calls.insert(position, callee);
            } else {
                debug!("[blocks] unresolved call target {} in block {}", target, from);
            }
        }
    }

    fn resolve_target(&self, target: &Target) -> Option<BlockId> {
        if let Some(block) = target.label().and_then(|label| self.graph.block_for_label(label)) {
            return Some(block);
        }
        let address = self.program.resolve(target)?;
        let offset = address.wrapping_sub(self.program.origin);
        self.starts
            .iter()
            .find(|(slot, _)| {
                let slot = &self.slots[**slot];
                slot.offset == offset && matches!(slot.item, Item::Code(_))
            })
            .map(|(_, block)| *block)
    }
}

fn collect_slots(program: &Program) -> Vec<Slot<'_>> {
    let mut slots = vec![];
    let mut labels: Vec<String> = vec![];
    let mut offset = 0;
    for line in program.lines() {
        if let Some(label) = &line.label {
            if !matches!(line.kind, LineKind::Constant { .. }) {
                labels.push(label.clone());
            }
        }
        let item = match &line.kind {
            LineKind::Instruction(instruction) => Item::Code(instruction),
            LineKind::Data(bytes) => Item::Data(bytes),
            LineKind::Empty | LineKind::Constant { .. } => {
                offset = line.offset;
                continue;
            }
        };
        slots.push(Slot {
            labels: std::mem::take(&mut labels),
            offset: line.offset,
            item,
        });
        offset = line.offset;
    }
    if !labels.is_empty() {
        slots.push(Slot {
            labels,
            offset,
            item: Item::End,
        });
    }
    slots
}

/// Convenience wrapper over [`BlockBuilder`].
pub fn build_blocks(program: &Program) -> Result<BlockGraph, CfgError> {
    BlockBuilder::new(program).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramBuilder;

    fn names(graph: &BlockGraph, ids: impl IntoIterator<Item = BlockId>) -> Vec<String> {
        ids.into_iter().map(|id| graph.block(id).name()).collect()
    }

    #[test]
    fn straight_line_is_one_block() {
        let program = ProgramBuilder::new(0x8000)
            .immediate(Opcode::Lda, 1)
            .zero_page(Opcode::Sta, 0x10)
            .implied(Opcode::Inx)
            .implied(Opcode::Tay)
            .build();
        let graph = build_blocks(&program).unwrap();
        assert_eq!(graph.len(), 1);
        let block = graph.block(BlockId(0));
        assert_eq!(block.instructions.len(), 4);
        assert_eq!(block.fall_through_exit, None);
        assert_eq!(block.branch_exit, None);
        assert!(block.entered_from.is_empty());
    }

    #[test]
    fn conditional_skip_yields_three_blocks() {
        let program = ProgramBuilder::new(0x8000)
            .label("Start")
            .immediate(Opcode::Lda, 0)
            .to_label(Opcode::Beq, "Skip")
            .zero_page(Opcode::Inc, 0x01)
            .label("Skip")
            .implied(Opcode::Rts)
            .build();
        let graph = build_blocks(&program).unwrap();
        assert_eq!(graph.len(), 3);
        let start = graph.block_for_label("Start").unwrap();
        let skip = graph.block_for_label("Skip").unwrap();
        let inc = graph.block(start).fall_through_exit.unwrap();
        assert_eq!(graph.block(inc).instructions[0].opcode, Opcode::Inc);
        assert_eq!(graph.block(start).branch_exit, Some(skip));
        assert_eq!(graph.block(inc).fall_through_exit, Some(skip));
        assert_eq!(
            graph.block(skip).entered_from,
            BTreeSet::from([start, inc])
        );
    }

    #[test]
    fn unresolvable_target_records_no_edge() {
        let program = ProgramBuilder::new(0x8000)
            .to_label(Opcode::Jmp, "Nowhere")
            .build();
        let graph = build_blocks(&program).unwrap();
        assert_eq!(graph.len(), 1);
        assert!(graph.block(BlockId(0)).successors().is_empty());
    }

    #[test]
    fn trailing_label_makes_empty_block() {
        let program = ProgramBuilder::new(0x8000)
            .implied(Opcode::Inx)
            .label("End")
            .build();
        let graph = build_blocks(&program).unwrap();
        assert_eq!(graph.len(), 2);
        let end = graph.block_for_label("End").unwrap();
        assert!(graph.block(end).instructions.is_empty());
        assert_eq!(graph.block(BlockId(0)).fall_through_exit, Some(end));
    }

    #[test]
    fn bit_skip_produces_two_views() {
        let program = ProgramBuilder::new(0x8000)
            .label("EntryA")
            .immediate(Opcode::Lda, 0x00)
            .data(&[0x2C])
            .label("EntryB")
            .immediate(Opcode::Lda, 0xFF)
            .zero_page(Opcode::Sta, 0x00)
            .implied(Opcode::Rts)
            .build();
        let graph = build_blocks(&program).unwrap();
        let a = graph.block(graph.block_for_label("EntryA").unwrap());
        let b = graph.block(graph.block_for_label("EntryB").unwrap());
        assert_eq!(
            a.instructions.iter().map(|i| i.to_string()).collect::<Vec<_>>(),
            vec!["LDA #$00", "BIT $FFA9", "STA $00", "RTS"]
        );
        assert_eq!(a.elisions.len(), 1);
        assert_eq!(a.elisions[0].at, 1);
        assert_eq!(a.elisions[0].elided.to_string(), "LDA #$FF");
        assert_eq!(a.elisions[0].label, "EntryB");
        assert_eq!(
            b.instructions.iter().map(|i| i.to_string()).collect::<Vec<_>>(),
            vec!["LDA #$FF", "STA $00", "RTS"]
        );
        assert!(a.successors().is_empty());
        assert!(b.entered_from.is_empty());
    }

    #[test]
    fn data_without_hidden_instruction_ends_block() {
        let program = ProgramBuilder::new(0x8000)
            .implied(Opcode::Inx)
            .data(&[0x01, 0x02])
            .label("Next")
            .implied(Opcode::Rts)
            .build();
        let graph = build_blocks(&program).unwrap();
        let next = graph.block_for_label("Next").unwrap();
        assert!(graph.block(next).entered_from.is_empty());
        assert_eq!(names(&graph, graph.ids()), vec!["block_0", "Next"]);
    }

    #[test]
    fn self_branch_is_consistent() {
        let program = ProgramBuilder::new(0x8000)
            .label("Loop")
            .implied(Opcode::Dex)
            .to_label(Opcode::Bne, "Loop")
            .build();
        let graph = build_blocks(&program).unwrap();
        let looping = graph.block_for_label("Loop").unwrap();
        assert_eq!(graph.block(looping).branch_exit, Some(looping));
        assert!(graph.block(looping).entered_from.contains(&looping));
        graph.verify().unwrap();
    }
}
