// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use mos6502_cfg::Program;
use mos6502_decompiler::DecompilerOptions;
use mos6502_listing::{parse_listing, read_listing};
use std::path::{Path, PathBuf};

/// A listing under `tests/inputs` with the header directives it declares:
/// `; entries: A B` adds decompilation roots, `; check: A B` names the functions run
/// against the reference interpreter.
pub struct Fixture {
    pub path: PathBuf,
    pub program: Program,
    pub entries: Vec<String>,
    pub checks: Vec<String>,
}

impl Fixture {
    pub fn load(path: &Path) -> Fixture {
        let source = std::fs::read_to_string(path).unwrap();
        let directive = |name: &str| -> Vec<String> {
            source
                .lines()
                .filter_map(|line| line.trim().strip_prefix(';'))
                .filter_map(|comment| comment.trim().strip_prefix(name))
                .flat_map(|names| names.split_whitespace().map(str::to_string))
                .collect()
        };
        Fixture {
            path: path.to_path_buf(),
            program: read_listing(path).unwrap(),
            entries: directive("entries:"),
            checks: directive("check:"),
        }
    }

    pub fn name(&self) -> String {
        self.path.file_stem().unwrap().to_string_lossy().to_string()
    }

    pub fn options(&self) -> DecompilerOptions {
        DecompilerOptions {
            extra_entries: self.entries.clone(),
            ..DecompilerOptions::default()
        }
    }
}

pub fn fixtures() -> Vec<Fixture> {
    let fixtures: Vec<_> = glob::glob("tests/inputs/*.asm")
        .expect("Invalid glob pattern")
        .map(|entry| Fixture::load(&entry.expect("Failed to read file path")))
        .collect();
    assert!(!fixtures.is_empty(), "no fixtures under tests/inputs");
    fixtures
}

pub fn fixture(name: &str) -> Fixture {
    Fixture::load(&Path::new("tests/inputs").join(format!("{}.asm", name)))
}

pub fn listing(source: &str) -> Program {
    parse_listing(source).unwrap()
}
