// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options for one decompilation run. Read from a toml source; the command line overrides
/// individual fields.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecompilerOptions {
    /// Label decompiled as the main root. Defaults to the first block of the program.
    pub entry: Option<String>,
    /// Further labels treated as roots, e.g. interrupt vectors.
    pub extra_entries: Vec<String>,
    /// Largest expression kept inline before it is snapshotted into a temporary.
    pub max_inline_expression: usize,
    /// Generate functions on the rayon thread pool.
    pub parallel: bool,
    /// Verbosity level for logging.
    pub verbosity_level: LevelFilter,
}

impl Default for DecompilerOptions {
    fn default() -> Self {
        Self {
            entry: None,
            extra_entries: vec![],
            max_inline_expression: 12,
            parallel: false,
            verbosity_level: LevelFilter::Warn,
        }
    }
}

impl DecompilerOptions {
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        toml::from_str(source).context("invalid decompiler options")
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read options from {}", path.display()))?;
        Self::from_toml_str(&source)
    }

    /// Renders the effective options back to toml.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string(self).context("cannot render decompiler options")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let options =
            DecompilerOptions::from_toml_str("entry = \"Reset\"\nparallel = true\n").unwrap();
        assert_eq!(options.entry.as_deref(), Some("Reset"));
        assert!(options.parallel);
        assert_eq!(options.max_inline_expression, 12);
        assert_eq!(options.verbosity_level, LevelFilter::Warn);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(DecompilerOptions::from_toml_str("entyr = \"Reset\"\n").is_err());
    }

    #[test]
    fn renders_back_to_toml() {
        let options = DecompilerOptions {
            extra_entries: vec!["Nmi".to_string()],
            ..DecompilerOptions::default()
        };
        let rendered = options.to_toml().unwrap();
        assert_eq!(DecompilerOptions::from_toml_str(&rendered).unwrap(), options);
    }
}
