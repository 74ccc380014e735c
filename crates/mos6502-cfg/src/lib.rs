// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Control-flow analysis for 6502 assembly programs.
//!
//! The stages run in order: [`blocks::build_blocks`] splits a [`program::Program`] into basic
//! blocks, [`functions::resolve_functions`] partitions them into functions, and for each
//! function [`dominance::DominatorTree`], [`loops::LoopForest`] and
//! [`control_flow_reconstruction::reconstruct_control_flow`] produce the structured tree the
//! code generator walks.

pub mod blocks;
pub mod control_flow_reconstruction;
pub mod dominance;
pub mod error;
pub mod functions;
pub mod loops;
pub mod machine;
pub mod program;

pub use blocks::{build_blocks, Block, BlockGraph, BlockId, Elision};
pub use error::CfgError;
pub use functions::{resolve_functions, Function, FunctionId, FunctionMap};
pub use machine::{Flag, Location, Opcode, Register};
pub use program::{Instruction, Program, ProgramBuilder};
