// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Function boundary resolution and the register interface of each function.
//!
//! Entries are the roots (program start plus any requested entry labels), every `JSR` target,
//! and every block that one function's flood-fill reaches inside another function's territory.
//! Floods run roots first, then the remaining entries in program order; the first flood to
//! claim a block owns it. A flood never walks into another entry: such an edge is a tail call.
//! An edge back to the flood's own entry stays inside the function and becomes a loop.
//!
//! Blocks no flood reaches are attached to the closest preceding entry, where the dominance
//! analysis sees them as unreachable and drops them.

use crate::blocks::{BlockGraph, BlockId};
use crate::machine::{Opcode, Register};
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FunctionId(pub usize);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    pub entry: BlockId,
    /// Owned blocks, disjoint across functions.
    pub blocks: BTreeSet<BlockId>,
    /// Decompiled without a known caller: every register it may change is an output.
    pub is_root: bool,
    /// Registers read before being written.
    pub inputs: BTreeSet<Register>,
    /// Registers handed back to callers.
    pub outputs: BTreeSet<Register>,
    /// Registers possibly written, including by callees.
    pub clobbers: BTreeSet<Register>,
}

#[derive(Debug, Clone, Default)]
pub struct FunctionMap {
    functions: Vec<Function>,
    owner: BTreeMap<BlockId, FunctionId>,
    by_entry: BTreeMap<BlockId, FunctionId>,
}

impl FunctionMap {
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0]
    }

    pub fn owner(&self, block: BlockId) -> Option<FunctionId> {
        self.owner.get(&block).copied()
    }

    /// The function whose entry is `block`.
    pub fn at_entry(&self, block: BlockId) -> Option<&Function> {
        self.by_entry.get(&block).map(|id| self.function(*id))
    }

    pub fn by_name(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.name == name)
    }

    /// An edge from `from` to `to` that leaves `from`'s function for another function's entry.
    pub fn is_tail_call(&self, from: BlockId, to: BlockId) -> bool {
        match (self.owner(from), self.by_entry.get(&to)) {
            (Some(caller), Some(callee)) => caller != *callee,
            _ => false,
        }
    }
}

/// Partitions the blocks of `graph` into functions. `roots[0]` is the primary entry.
pub fn resolve_functions(graph: &BlockGraph, roots: &[BlockId]) -> FunctionMap {
    let roots: Vec<BlockId> = roots.iter().copied().unique().collect();
    let mut entries: BTreeSet<BlockId> = roots.iter().copied().collect();
    let (order, owner) = loop {
        let order: Vec<BlockId> = roots
            .iter()
            .copied()
            .chain(entries.iter().copied().filter(|entry| !roots.contains(entry)))
            .collect();
        let (owner, calls) = claim(graph, &order);

        let mut promoted: BTreeSet<BlockId> = calls
            .into_iter()
            .filter(|callee| !entries.contains(callee))
            .collect();
        for (block, function) in &owner {
            for successor in graph.successors(*block) {
                if let Some(other) = owner.get(&successor) {
                    if other != function && !entries.contains(&successor) {
                        promoted.insert(successor);
                    }
                }
            }
        }
        if promoted.is_empty() {
            break (order, owner);
        }
        debug!("[functions] promoting entries {:?}", promoted);
        entries.extend(promoted);
    };

    let mut map = FunctionMap::default();
    for (index, entry) in order.iter().enumerate() {
        let id = FunctionId(index);
        map.by_entry.insert(*entry, id);
        map.functions.push(Function {
            id,
            name: graph.block(*entry).name(),
            entry: *entry,
            blocks: BTreeSet::new(),
            is_root: roots.contains(entry),
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
            clobbers: BTreeSet::new(),
        });
    }
    if map.functions.is_empty() {
        return map;
    }
    for block in graph.ids() {
        let function = match owner.get(&block) {
            Some(index) => FunctionId(*index),
            None => order
                .iter()
                .enumerate()
                .filter(|(_, entry)| **entry <= block)
                .max_by_key(|(_, entry)| **entry)
                .map(|(index, _)| FunctionId(index))
                .unwrap_or(FunctionId(0)),
        };
        map.owner.insert(block, function);
        map.functions[function.0].blocks.insert(block);
    }
    for function in &map.functions {
        debug!(
            "[functions] {} entry={} blocks={:?}",
            function.name, function.entry, function.blocks
        );
    }
    let interfaces = RegisterInterface::new(graph, &map).solve();
    for (function, interface) in map.functions.iter_mut().zip(interfaces) {
        function.inputs = interface.inputs;
        function.outputs = interface.outputs;
        function.clobbers = interface.clobbers;
        debug!(
            "[functions] {} inputs={:?} outputs={:?} clobbers={:?}",
            function.name, function.inputs, function.outputs, function.clobbers
        );
    }
    map
}

/// Floods from each entry in order. Returns block ownership (as an index into `order`) and
/// every resolved call target seen in claimed blocks.
fn claim(graph: &BlockGraph, order: &[BlockId]) -> (BTreeMap<BlockId, usize>, BTreeSet<BlockId>) {
    let entries: BTreeSet<BlockId> = order.iter().copied().collect();
    let mut owner: BTreeMap<BlockId, usize> = BTreeMap::new();
    let mut calls = BTreeSet::new();
    for (index, entry) in order.iter().enumerate() {
        let mut work = vec![*entry];
        while let Some(block) = work.pop() {
            if owner.contains_key(&block) {
                continue;
            }
            owner.insert(block, index);
            calls.extend(graph.block(block).calls.values().copied());
            for successor in graph.successors(block) {
                if successor != *entry && entries.contains(&successor) {
                    continue;
                }
                if !owner.contains_key(&successor) {
                    work.push(successor);
                }
            }
        }
    }
    (owner, calls)
}

/// Fixed point over the call graph for `clobbers`, `outputs` and `inputs`.
struct RegisterInterface<'a> {
    graph: &'a BlockGraph,
    map: &'a FunctionMap,
    reachable: Vec<BTreeSet<BlockId>>,
}

impl<'a> RegisterInterface<'a> {
    fn new(graph: &'a BlockGraph, map: &'a FunctionMap) -> Self {
        let reachable = map
            .functions
            .iter()
            .map(|function| {
                let mut seen = BTreeSet::new();
                let mut work = vec![function.entry];
                while let Some(block) = work.pop() {
                    if !function.blocks.contains(&block) || !seen.insert(block) {
                        continue;
                    }
                    work.extend(graph.successors(block));
                }
                seen
            })
            .collect();
        Self {
            graph,
            map,
            reachable,
        }
    }

    fn solve(self) -> Vec<Interface> {
        let count = self.map.functions.len();
        let clobbers = self.clobbers();
        let mut outputs: Vec<BTreeSet<Register>> = vec![BTreeSet::new(); count];
        let mut inputs: Vec<BTreeSet<Register>>;

        // Outputs only grow. For each candidate, inputs are recomputed from scratch as the
        // least fixed point of the liveness equations.
        loop {
            inputs = vec![BTreeSet::new(); count];
            let mut changed = true;
            while changed {
                changed = false;
                for function in &self.map.functions {
                    let liveness = self.liveness(function, &inputs, &outputs);
                    if liveness.entry != inputs[function.id.0] {
                        inputs[function.id.0] = liveness.entry;
                        changed = true;
                    }
                }
            }

            let mut wanted: Vec<BTreeSet<Register>> = vec![BTreeSet::new(); count];
            for function in &self.map.functions {
                let liveness = self.liveness(function, &inputs, &outputs);
                for (callee, live) in liveness.after_calls {
                    wanted[callee.0].extend(live);
                }
                for callee in liveness.tail_callees {
                    wanted[callee.0].extend(outputs[function.id.0].iter().copied());
                }
            }
            let mut grown = false;
            for function in &self.map.functions {
                let index = function.id.0;
                let next: BTreeSet<Register> = if function.is_root {
                    clobbers[index].clone()
                } else {
                    clobbers[index].intersection(&wanted[index]).copied().collect()
                };
                if !next.is_subset(&outputs[index]) {
                    outputs[index].extend(next);
                    grown = true;
                }
            }
            if !grown {
                break;
            }
        }

        clobbers
            .into_iter()
            .zip(inputs)
            .zip(outputs)
            .map(|((clobbers, inputs), outputs)| Interface {
                inputs,
                outputs,
                clobbers,
            })
            .collect()
    }

    /// Registers each function may write, directly or through calls and tail calls.
    fn clobbers(&self) -> Vec<BTreeSet<Register>> {
        let mut clobbers: Vec<BTreeSet<Register>> = vec![BTreeSet::new(); self.map.functions.len()];
        let mut changed = true;
        while changed {
            changed = false;
            for function in &self.map.functions {
                let mut written = clobbers[function.id.0].clone();
                for block in &self.reachable[function.id.0] {
                    let instructions = &self.graph.block(*block).instructions;
                    for (index, instruction) in instructions.iter().enumerate() {
                        let writes = instruction.effects().writes;
                        written.extend(writes.iter().filter_map(|location| location.register()));
                        if let Some(callee) = self.callee(*block, index) {
                            written.extend(clobbers[callee.0].iter().copied());
                        }
                    }
                    for successor in self.graph.successors(*block) {
                        if let Some(callee) = self.tail_callee(*block, successor) {
                            written.extend(clobbers[callee.0].iter().copied());
                        }
                    }
                }
                if written != clobbers[function.id.0] {
                    clobbers[function.id.0] = written;
                    changed = true;
                }
            }
        }
        clobbers
    }

    fn callee(&self, block: BlockId, index: usize) -> Option<FunctionId> {
        let target = self.graph.block(block).calls.get(&index)?;
        self.map.by_entry.get(target).copied()
    }

    fn tail_callee(&self, from: BlockId, to: BlockId) -> Option<FunctionId> {
        if self.map.is_tail_call(from, to) {
            self.map.by_entry.get(&to).copied()
        } else {
            None
        }
    }

    /// Backward register liveness over the reachable blocks of `function`.
    fn liveness(
        &self,
        function: &Function,
        inputs: &[BTreeSet<Register>],
        outputs: &[BTreeSet<Register>],
    ) -> Liveness {
        let own_outputs = &outputs[function.id.0];
        let reachable = &self.reachable[function.id.0];
        let mut live_in: BTreeMap<BlockId, BTreeSet<Register>> = BTreeMap::new();
        let mut result = Liveness::default();

        let mut changed = true;
        while changed {
            changed = false;
            result.after_calls.clear();
            result.tail_callees.clear();
            for block_id in reachable.iter().rev() {
                let block = self.graph.block(*block_id);
                let mut live: BTreeSet<Register> = BTreeSet::new();
                let successors = block.successors();
                let returns = block
                    .terminator()
                    .map_or(successors.is_empty(), |terminator| {
                        terminator.opcode.is_return()
                            || (successors.is_empty() && terminator.opcode != Opcode::Jmp)
                    });
                if returns {
                    live.extend(own_outputs.iter().copied());
                }
                for successor in successors {
                    if let Some(callee) = self.tail_callee(*block_id, successor) {
                        live.extend(inputs[callee.0].iter().copied());
                        live.extend(own_outputs.iter().copied());
                        result.tail_callees.insert(callee);
                    } else if let Some(successor_live) = live_in.get(&successor) {
                        live.extend(successor_live.iter().copied());
                    }
                }
                for (index, instruction) in block.instructions.iter().enumerate().rev() {
                    if let Some(callee) = self.callee(*block_id, index) {
                        result.after_calls.push((callee, live.clone()));
                        for register in &outputs[callee.0] {
                            live.remove(register);
                        }
                        live.extend(inputs[callee.0].iter().copied());
                        continue;
                    }
                    let effects = instruction.effects();
                    for written in effects.writes.iter().filter_map(|l| l.register()) {
                        live.remove(&written);
                    }
                    live.extend(effects.reads.iter().filter_map(|l| l.register()));
                }
                if live_in.get(block_id) != Some(&live) {
                    live_in.insert(*block_id, live);
                    changed = true;
                }
            }
        }
        result.entry = live_in.remove(&function.entry).unwrap_or_default();
        result
    }
}

struct Interface {
    inputs: BTreeSet<Register>,
    outputs: BTreeSet<Register>,
    clobbers: BTreeSet<Register>,
}

#[derive(Debug, Default)]
struct Liveness {
    entry: BTreeSet<Register>,
    after_calls: Vec<(FunctionId, BTreeSet<Register>)>,
    tail_callees: BTreeSet<FunctionId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::build_blocks;
    use crate::program::ProgramBuilder;

    #[test]
    fn jump_to_own_entry_stays_inside_function() {
        let program = ProgramBuilder::new(0x8000)
            .label("RenderUnderPart")
            .absolute(Opcode::Sta, 0x2007)
            .implied(Opcode::Dex)
            .to_label(Opcode::Bpl, "RenderUnderPart")
            .implied(Opcode::Rts)
            .build();
        let graph = build_blocks(&program).unwrap();
        let entry = graph.block_for_label("RenderUnderPart").unwrap();
        let map = resolve_functions(&graph, &[entry]);
        assert_eq!(map.functions().len(), 1);
        assert_eq!(map.function(FunctionId(0)).blocks.len(), 2);
        assert!(!map.is_tail_call(entry, entry));
    }

    #[test]
    fn calls_create_functions_with_outputs() {
        let program = ProgramBuilder::new(0x8000)
            .label("Main")
            .to_label(Opcode::Jsr, "Load")
            .zero_page(Opcode::Sta, 0x10)
            .immediate(Opcode::Ldx, 0)
            .implied(Opcode::Rts)
            .label("Load")
            .immediate(Opcode::Lda, 7)
            .immediate(Opcode::Ldx, 1)
            .implied(Opcode::Rts)
            .build();
        let graph = build_blocks(&program).unwrap();
        let main = graph.block_for_label("Main").unwrap();
        let map = resolve_functions(&graph, &[main]);
        assert_eq!(map.functions().len(), 2);

        let load = map.by_name("Load").unwrap();
        assert!(!load.is_root);
        assert_eq!(load.clobbers, BTreeSet::from([Register::A, Register::X]));
        assert_eq!(load.outputs, BTreeSet::from([Register::A]));
        assert!(load.inputs.is_empty());

        let main = map.by_name("Main").unwrap();
        assert!(main.is_root);
        assert_eq!(main.outputs, BTreeSet::from([Register::A, Register::X]));
    }

    #[test]
    fn jump_into_claimed_code_promotes_entry() {
        let program = ProgramBuilder::new(0x8000)
            .label("First")
            .implied(Opcode::Inx)
            .label("Shared")
            .implied(Opcode::Iny)
            .implied(Opcode::Rts)
            .label("Second")
            .to_label(Opcode::Jsr, "Helper")
            .to_label(Opcode::Jmp, "Shared")
            .label("Helper")
            .implied(Opcode::Rts)
            .build();
        let graph = build_blocks(&program).unwrap();
        let first = graph.block_for_label("First").unwrap();
        let second = graph.block_for_label("Second").unwrap();
        let shared = graph.block_for_label("Shared").unwrap();
        let map = resolve_functions(&graph, &[first, second]);
        assert!(map.at_entry(shared).is_some());
        assert!(map.is_tail_call(first, shared));
        let owners: BTreeSet<FunctionId> = graph.ids().filter_map(|b| map.owner(b)).collect();
        assert_eq!(owners.len(), map.functions().len());
    }

    #[test]
    fn orphan_blocks_join_preceding_function() {
        let program = ProgramBuilder::new(0x8000)
            .label("Main")
            .implied(Opcode::Rts)
            .label("Dead")
            .implied(Opcode::Inx)
            .implied(Opcode::Rts)
            .build();
        let graph = build_blocks(&program).unwrap();
        let main = graph.block_for_label("Main").unwrap();
        let dead = graph.block_for_label("Dead").unwrap();
        let map = resolve_functions(&graph, &[main]);
        assert_eq!(map.functions().len(), 1);
        assert_eq!(map.owner(dead), Some(FunctionId(0)));
        assert!(map.function(FunctionId(0)).clobbers.is_empty());
    }
}
