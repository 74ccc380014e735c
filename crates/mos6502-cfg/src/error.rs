// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CfgError {
    #[error("edge {from} -> {to} has no matching entry in the successor's predecessor set")]
    MissingReverseEdge { from: String, to: String },

    #[error("block {block} lists {predecessor} as a predecessor but no such edge exists")]
    DanglingPredecessor { block: String, predecessor: String },

    #[error("unknown entry label `{0}`")]
    UnknownEntry(String),

    #[error("instruction `{instruction}` cannot be encoded")]
    Unencodable { instruction: String },

    #[error("branch `{instruction}` is out of range")]
    BranchOutOfRange { instruction: String },
}
