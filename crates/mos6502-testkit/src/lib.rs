// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Test support for the decompiler: a reference interpreter, an evaluator for the decompiled
//! statement tree, and the harness comparing the two.

pub mod cpu;
pub mod evaluator;
pub mod harness;

pub use cpu::{Cpu, CpuError};
pub use evaluator::{EvalError, Evaluator};
pub use harness::{MachineState, Oracle};

use simplelog::{Config, LevelFilter, TestLogger};

/// Routes `log` output to the test harness. Repeated calls are ignored.
pub fn init_test_logger() {
    let _ = TestLogger::init(LevelFilter::Debug, Config::default());
}
