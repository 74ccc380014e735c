// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::*;
use colored::Colorize;
use log::debug;
use run::{execute, DecompileConfig, OutputConfig};
use simplelog::{Config, SimpleLogger, TermLogger, TerminalMode};

mod run;

#[derive(Parser)]
#[clap(
    name = env!("CARGO_BIN_NAME"),
    about = "Decompiles a 6502 assembly listing into structured functions",
    rename_all = "kebab-case",
    author,
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Args {
    /// Assembly listing to decompile
    pub listing: PathBuf,

    #[clap(flatten)]
    pub decompile_config: DecompileConfig,

    #[clap(flatten)]
    pub output_config: OutputConfig,
}

fn try_main(args: Args) -> anyhow::Result<bool> {
    let options = args.decompile_config.options()?;
    if TermLogger::init(options.verbosity_level, Config::default(), TerminalMode::Mixed).is_err() {
        let _ = SimpleLogger::init(options.verbosity_level, Config::default());
    }
    debug!("mos6502-decompile version: {}", env!("CARGO_PKG_VERSION"));
    execute(&args.listing, &options, &args.output_config)
}

fn main() {
    #[cfg(windows)]
    let _ = colored::control::set_virtual_terminal(true);

    match try_main(Args::parse()) {
        Ok(true) => (),
        Ok(false) => std::process::exit(2),
        Err(err) => {
            let err = format!("{:?}", err);
            eprintln!("{}", err.bold().red());
            std::process::exit(1);
        }
    }
}
