// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use clap::{ArgAction, Args};
use colored::Colorize;
use log::{debug, info, LevelFilter};
use mos6502_cfg::{build_blocks, Program};
use mos6502_decompiler::{decompile, roots, DecompiledProgram, DecompilerOptions};
use mos6502_testkit::Oracle;
use std::path::{Path, PathBuf};

/// Decompiler options
#[derive(Args, Debug, Default)]
#[clap(next_help_heading = "Decompiler Options")]
pub struct DecompileConfig {
    /// TOML file with decompiler options; the flags below override it
    #[clap(long = "config", short = 'c')]
    pub config: Option<PathBuf>,

    /// Label decompiled as the main entry (default: the first instruction)
    #[clap(long = "entry", short = 'e')]
    pub entry: Option<String>,

    /// Further entry label, e.g. an interrupt handler; may be repeated
    #[clap(long = "extra-entry", short = 'x')]
    pub extra_entries: Vec<String>,

    /// Largest expression kept inline before it is stored in a temporary
    #[clap(long = "max-inline-expression")]
    pub max_inline_expression: Option<usize>,

    /// Generate functions in parallel
    #[clap(long = "parallel", short = 'j')]
    pub parallel: bool,

    /// More logging; repeat for debug and trace output
    #[clap(long = "verbose", short = 'v', action = ArgAction::Count)]
    pub verbose: u8,
}

impl DecompileConfig {
    /// Options from the config file, if any, with the flags applied on top.
    pub fn options(&self) -> anyhow::Result<DecompilerOptions> {
        let options = match &self.config {
            Some(path) => DecompilerOptions::from_file(path)?,
            None => DecompilerOptions::default(),
        };
        Ok(self.apply(options))
    }

    fn apply(&self, mut options: DecompilerOptions) -> DecompilerOptions {
        if let Some(entry) = &self.entry {
            options.entry = Some(entry.clone());
        }
        for entry in &self.extra_entries {
            if !options.extra_entries.contains(entry) {
                options.extra_entries.push(entry.clone());
            }
        }
        if let Some(size) = self.max_inline_expression {
            options.max_inline_expression = size;
        }
        options.parallel |= self.parallel;
        options.verbosity_level = match self.verbose {
            0 => options.verbosity_level,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };
        options
    }
}

/// Output options
#[derive(Args, Debug, Default)]
#[clap(next_help_heading = "Output Options")]
pub struct OutputConfig {
    /// Write the decompiled program here instead of stdout
    #[clap(long = "output", short = 'o')]
    pub output: Option<PathBuf>,

    /// Print the effective options as TOML and exit
    #[clap(long = "print-options")]
    pub print_options: bool,

    /// Compare each entry against the reference interpreter on this many random states
    #[clap(long = "verify", value_name = "RUNS")]
    pub verify: Option<usize>,

    /// Seed for --verify
    #[clap(long = "seed", default_value_t = 0x6502)]
    pub seed: u64,
}

/// Decompiles `listing`. Returns whether every function was decompiled (and verified, if asked).
pub fn execute(
    listing: &Path,
    options: &DecompilerOptions,
    output: &OutputConfig,
) -> anyhow::Result<bool> {
    if output.print_options {
        print!("{}", options.to_toml()?);
        return Ok(true);
    }

    let program = mos6502_listing::read_listing(listing)?;
    debug!("[cli] {} lines read from {}", program.lines().len(), listing.display());
    let decompiled = decompile(&program, options)?;

    let rendered = decompiled.to_string();
    match &output.output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("cannot write {}", path.display()))?,
        None => print!("{}", rendered),
    }

    let mut success = report_failures(&decompiled);
    if let Some(runs) = output.verify {
        success &= verify(&program, &decompiled, options, runs, output.seed)?;
    }
    Ok(success)
}

fn report_failures(decompiled: &DecompiledProgram) -> bool {
    for failure in &decompiled.failures {
        eprintln!(
            "{} {}: {}",
            "not decompiled:".bold().yellow(),
            failure.function,
            failure.error
        );
    }
    info!(
        "[cli] {} functions decompiled, {} failed",
        decompiled.functions.len(),
        decompiled.failures.len()
    );
    decompiled.failures.is_empty()
}

/// Root functions return every register they clobber, so only they can be compared as a whole.
fn verify(
    program: &Program,
    decompiled: &DecompiledProgram,
    options: &DecompilerOptions,
    runs: usize,
    seed: u64,
) -> anyhow::Result<bool> {
    let graph = build_blocks(program)?;
    let oracle = Oracle::new(program)?;
    let mut success = true;
    for root in roots(&graph, options)? {
        let name = graph.block(root).name();
        if decompiled.failure(&name).is_some() {
            continue;
        }
        match oracle.check(&decompiled.functions, &name, seed, runs) {
            Ok(()) => eprintln!("{} {} ({} runs)", "verified".bold().green(), name, runs),
            Err(err) => {
                eprintln!("{} {:?}", "mismatch:".bold().red(), err);
                success = false;
            }
        }
    }
    Ok(success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[clap(flatten)]
        config: DecompileConfig,
    }

    fn config(args: &[&str]) -> DecompileConfig {
        Cli::try_parse_from(std::iter::once("mos6502-decompile").chain(args.iter().copied()))
            .unwrap()
            .config
    }

    #[test]
    fn flags_override_file_options() {
        let file = DecompilerOptions::from_toml_str(
            "entry = \"Reset\"\nextra_entries = [\"Nmi\"]\nmax_inline_expression = 4\n",
        )
        .unwrap();
        let options = config(&["-e", "Main", "-x", "Irq", "-x", "Nmi", "-j", "-vv"]).apply(file);
        assert_eq!(options.entry.as_deref(), Some("Main"));
        assert_eq!(options.extra_entries, vec!["Nmi".to_string(), "Irq".to_string()]);
        assert_eq!(options.max_inline_expression, 4);
        assert!(options.parallel);
        assert_eq!(options.verbosity_level, LevelFilter::Debug);
    }

    #[test]
    fn no_flags_keep_file_options() {
        let file =
            DecompilerOptions::from_toml_str("parallel = true\nverbosity_level = \"ERROR\"\n")
                .unwrap();
        let options = config(&[]).apply(file.clone());
        assert_eq!(options, file);
    }

    #[test]
    fn inline_limit_flag() {
        let options = config(&["--max-inline-expression", "1"]).apply(DecompilerOptions::default());
        assert_eq!(options.max_inline_expression, 1);
    }
}
