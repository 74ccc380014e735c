// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use mos6502_cfg::Location;
use thiserror::Error;

/// Why code generation gave up on a function. Each variant names the block it was raised in.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// A read of a register or flag whose value differs by path, or was never set.
    #[error("block {block}: `{location}` has no single value here ({origin})")]
    Unbound {
        block: String,
        location: Location,
        origin: String,
    },

    #[error("block {block}: stack differs where paths meet (depth {left} vs {right})")]
    StackMismatch {
        block: String,
        left: usize,
        right: usize,
    },

    #[error("block {block}: `{instruction}` pulls from an empty stack")]
    StackUnderflow { block: String, instruction: String },

    #[error("block {block}: `{instruction}` is not supported")]
    Unsupported { block: String, instruction: String },

    #[error("block {block}: target of `{instruction}` is not known")]
    UnresolvedTarget { block: String, instruction: String },
}

/// A function the generator could not translate. Other functions are unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecompileFailure {
    pub function: String,
    pub error: GenerationError,
}
