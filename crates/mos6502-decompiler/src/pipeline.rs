// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use crate::codegen::FunctionGenerator;
use crate::error::{DecompileFailure, GenerationError};
use crate::options::DecompilerOptions;
use anyhow::Context;
use log::{info, warn};
use mos6502_cfg::control_flow_reconstruction::reconstruct_control_flow;
use mos6502_cfg::dominance::DominatorTree;
use mos6502_cfg::loops::LoopForest;
use mos6502_cfg::{
    build_blocks, resolve_functions, BlockGraph, BlockId, CfgError, Function, FunctionMap, Program,
};
use rayon::prelude::*;
use std::fmt;
use structured_ir::FunctionDefinition;

/// Everything decompiled from one program: the functions that succeeded, in entry order, and
/// the ones that failed with their reason.
#[derive(Debug, Clone, Default)]
pub struct DecompiledProgram {
    pub functions: Vec<FunctionDefinition>,
    pub failures: Vec<DecompileFailure>,
}

impl DecompiledProgram {
    pub fn function(&self, name: &str) -> Option<&FunctionDefinition> {
        self.functions.iter().find(|function| function.name == name)
    }

    pub fn failure(&self, name: &str) -> Option<&DecompileFailure> {
        self.failures.iter().find(|failure| failure.function == name)
    }
}

impl fmt::Display for DecompiledProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, function) in self.functions.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}", function)?;
        }
        for failure in &self.failures {
            writeln!(f, "// {} not decompiled: {}", failure.function, failure.error)?;
        }
        Ok(())
    }
}

/// Blocks decompiled as roots: the configured entry label, or the first block, followed by
/// any extra entries.
pub fn roots(graph: &BlockGraph, options: &DecompilerOptions) -> Result<Vec<BlockId>, CfgError> {
    let lookup = |label: &str| {
        graph
            .block_for_label(label)
            .ok_or_else(|| CfgError::UnknownEntry(label.to_string()))
    };
    let mut roots = vec![];
    match &options.entry {
        Some(label) => roots.push(lookup(label)?),
        None => roots.extend(graph.entry()),
    }
    for label in &options.extra_entries {
        let root = lookup(label)?;
        if !roots.contains(&root) {
            roots.push(root);
        }
    }
    Ok(roots)
}

/// Decompiles every function of `program`. A function that cannot be generated is reported
/// in [`DecompiledProgram::failures`] without affecting the others.
pub fn decompile(
    program: &Program,
    options: &DecompilerOptions,
) -> anyhow::Result<DecompiledProgram> {
    let graph = build_blocks(program).context("cannot build basic blocks")?;
    let roots = roots(&graph, options)?;
    if roots.is_empty() {
        return Ok(DecompiledProgram::default());
    }
    let functions = resolve_functions(&graph, &roots);
    info!(
        "[decompile] {} blocks in {} functions",
        graph.len(),
        functions.functions().len()
    );

    let generate = |function: &Function| {
        decompile_function(program, &graph, &functions, function, options).map_err(|error| {
            warn!("[decompile] {}: {}", function.name, error);
            DecompileFailure {
                function: function.name.clone(),
                error,
            }
        })
    };
    let results: Vec<_> = if options.parallel {
        functions.functions().par_iter().map(generate).collect()
    } else {
        functions.functions().iter().map(generate).collect()
    };

    let mut decompiled = DecompiledProgram::default();
    for result in results {
        match result {
            Ok(function) => decompiled.functions.push(function),
            Err(failure) => decompiled.failures.push(failure),
        }
    }
    Ok(decompiled)
}

/// Dominators, loops, structure and code for a single function.
pub fn decompile_function(
    program: &Program,
    graph: &BlockGraph,
    functions: &FunctionMap,
    function: &Function,
    options: &DecompilerOptions,
) -> Result<FunctionDefinition, GenerationError> {
    let dominators = DominatorTree::compute(graph, function.entry, &function.blocks);
    let loops = LoopForest::compute(graph, &dominators);
    let structured = reconstruct_control_flow(graph, function, &dominators, &loops);
    FunctionGenerator::new(program, graph, functions, function, options).generate(&structured)
}
