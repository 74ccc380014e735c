// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// A listing line that could not be read. Line numbers start at 1.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ListingError {
    #[error("line {line}: cannot parse `{text}`")]
    Syntax { line: usize, text: String },

    #[error("line {line}: unknown mnemonic `{mnemonic}`")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("line {line}: unknown directive `.{directive}`")]
    UnknownDirective { line: usize, directive: String },

    #[error("line {line}: `{operand}` is not a valid operand")]
    BadOperand { line: usize, operand: String },

    #[error("line {line}: `{instruction}` has no encoding")]
    Unencodable { line: usize, instruction: String },

    #[error("line {line}: value {value:#x} does not fit")]
    OutOfRange { line: usize, value: i64 },

    #[error("line {line}: unknown symbol `{symbol}`")]
    UnknownSymbol { line: usize, symbol: String },

    #[error("line {line}: label `{label}` is already defined")]
    DuplicateLabel { line: usize, label: String },

    #[error("line {line}: `.org {origin:#06x}` is behind the current address")]
    OrgBackwards { line: usize, origin: u16 },
}
