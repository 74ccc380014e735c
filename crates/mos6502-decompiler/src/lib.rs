// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Turns 6502 assembly into structured functions over variables, memory reads and calls.
//!
//! [`decompile`] runs the whole pipeline: basic blocks and function boundaries from
//! `mos6502-cfg`, then per function dominators, loops, control-flow structuring, and the
//! dataflow code generator in [`codegen`].

pub mod codegen;
pub mod error;
pub mod options;
pub mod pipeline;
pub mod semantics;
pub mod state;

pub use error::{DecompileFailure, GenerationError};
pub use options::DecompilerOptions;
pub use pipeline::{decompile, decompile_function, roots, DecompiledProgram};
