// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! The statement tree emitted for each decompiled function.

mod display;
pub mod expressions;
pub mod statements;

pub use expressions::{BinOp, Expression, UnOp, Variable};
pub use statements::{FunctionDefinition, LoopKind, Statement, StatementIter};
