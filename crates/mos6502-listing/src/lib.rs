// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Reads 6502 assembly listings into the line model of `mos6502-cfg`.
//!
//! Supported syntax: `Label:`, `NAME = value`, `.org`, `.db`/`.byte`, `.dw`/`.word`, `;`
//! comments, and the usual operand forms (`#imm`, `#<sym`, `#>sym`, `(zp,X)`, `(zp),Y`,
//! `(abs)`, `e,X`, `e,Y`, `e`, `A`). Numbers are decimal, `$hex` or `%binary`.

pub mod error;
pub mod reader;

use anyhow::Context;
use mos6502_cfg::Program;
use std::path::Path;

pub use error::ListingError;
pub use reader::parse_listing;

/// Reads and parses a listing file.
pub fn read_listing(path: &Path) -> anyhow::Result<Program> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read listing {}", path.display()))?;
    parse_listing(&source).with_context(|| format!("in listing {}", path.display()))
}
