// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Oracle equivalence: run the assembled program on the reference interpreter and the
//! decompiled functions on the evaluator from the same pseudo-random state, then compare
//! `A`, `X`, `Y` and all memory outside the stack page.

use crate::cpu::{Cpu, Status, MEMORY_SIZE};
use crate::evaluator::Evaluator;
use anyhow::{anyhow, bail, Context};
use log::debug;
use mos6502_cfg::program::Target;
use mos6502_cfg::{Program, Register};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::ops::Range;
use structured_ir::FunctionDefinition;

pub const STACK_PAGE: Range<usize> = 0x0100..0x0200;
pub const STEP_LIMIT: usize = 200_000;

/// Registers and memory at a point where both sides can be compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineState {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub status: Status,
    pub memory: Vec<u8>,
}

impl MachineState {
    pub fn random(rng: &mut StdRng) -> Self {
        let mut memory = vec![0u8; MEMORY_SIZE];
        rng.fill(&mut memory[..]);
        Self {
            a: rng.gen(),
            x: rng.gen(),
            y: rng.gen(),
            status: Status {
                carry: rng.gen(),
                zero: rng.gen(),
                interrupt: true,
                decimal: false,
                overflow: rng.gen(),
                negative: rng.gen(),
            },
            memory,
        }
    }

    pub fn register(&self, register: Register) -> u8 {
        match register {
            Register::A => self.a,
            Register::X => self.x,
            Register::Y => self.y,
        }
    }

    fn set_register(&mut self, register: Register, value: u8) {
        match register {
            Register::A => self.a = value,
            Register::X => self.x = value,
            Register::Y => self.y = value,
        }
    }

    /// Human-readable differences in registers and non-stack memory.
    pub fn differences(&self, other: &MachineState) -> Vec<String> {
        let mut differences = vec![];
        for register in [Register::A, Register::X, Register::Y] {
            let (left, right) = (self.register(register), other.register(register));
            if left != right {
                differences.push(format!("{}: {:#04x} vs {:#04x}", register, left, right));
            }
        }
        for (address, (left, right)) in self.memory.iter().zip(&other.memory).enumerate() {
            if left != right && !STACK_PAGE.contains(&address) {
                differences.push(format!("mem[{:#06x}]: {:#04x} vs {:#04x}", address, left, right));
            }
        }
        differences
    }
}

pub struct Oracle<'p> {
    program: &'p Program,
    image: Vec<u8>,
}

impl<'p> Oracle<'p> {
    pub fn new(program: &'p Program) -> anyhow::Result<Self> {
        let image = program.assemble().context("cannot assemble program")?;
        if program.origin as usize + image.len() > MEMORY_SIZE {
            bail!("program does not fit below 0x10000");
        }
        Ok(Self { program, image })
    }

    /// A random state with the program image in place.
    pub fn initial_state(&self, rng: &mut StdRng) -> MachineState {
        let mut state = MachineState::random(rng);
        let origin = self.program.origin as usize;
        state.memory[origin..origin + self.image.len()].copy_from_slice(&self.image);
        state
    }

    fn entry_address(&self, entry: &str) -> anyhow::Result<u16> {
        self.program
            .resolve(&Target::symbol(entry))
            .ok_or_else(|| anyhow!("unknown entry label `{}`", entry))
    }

    pub fn run_reference(&self, entry: &str, state: &MachineState) -> anyhow::Result<MachineState> {
        let address = self.entry_address(entry)?;
        let mut cpu = Cpu::new(state.memory.clone());
        cpu.a = state.a;
        cpu.x = state.x;
        cpu.y = state.y;
        cpu.status = state.status;
        cpu.call(address, STEP_LIMIT)
            .with_context(|| format!("reference run of {}", entry))?;
        debug!("[oracle] {} ran {} instructions", entry, cpu.steps);
        Ok(MachineState {
            a: cpu.a,
            x: cpu.x,
            y: cpu.y,
            status: cpu.status,
            memory: cpu.memory,
        })
    }

    pub fn run_decompiled(
        &self,
        functions: &[FunctionDefinition],
        entry: &str,
        state: &MachineState,
    ) -> anyhow::Result<MachineState> {
        let function = functions
            .iter()
            .find(|function| function.name == entry)
            .ok_or_else(|| anyhow!("`{}` was not decompiled", entry))?;
        let arguments: BTreeMap<Register, u8> = function
            .inputs
            .iter()
            .map(|register| (*register, state.register(*register)))
            .collect();
        let mut evaluator = Evaluator::new(functions, state.memory.clone(), STEP_LIMIT);
        let outputs = evaluator
            .call(entry, &arguments)
            .with_context(|| format!("decompiled run of {}", entry))?;
        let mut result = MachineState {
            memory: evaluator.memory,
            ..state.clone()
        };
        for (register, value) in outputs {
            result.set_register(register, value);
        }
        Ok(result)
    }

    /// Compares both runs from `runs` initial states drawn from `seed`.
    pub fn check(
        &self,
        functions: &[FunctionDefinition],
        entry: &str,
        seed: u64,
        runs: usize,
    ) -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(seed);
        for run in 0..runs {
            let initial = self.initial_state(&mut rng);
            let expected = self.run_reference(entry, &initial)?;
            let actual = self.run_decompiled(functions, entry, &initial)?;
            let differences = expected.differences(&actual);
            if !differences.is_empty() {
                bail!(
                    "{} differs from the reference on run {} of seed {}:\n  {}",
                    entry,
                    run,
                    seed,
                    differences.iter().take(8).cloned().collect::<Vec<_>>().join("\n  ")
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mos6502_listing::parse_listing;
    use structured_ir::{Expression, Statement};

    fn store_answer(value: u32) -> Vec<FunctionDefinition> {
        vec![FunctionDefinition {
            name: "Start".to_string(),
            inputs: vec![],
            outputs: vec![Register::A],
            body: vec![
                Statement::Store {
                    address: Expression::Literal(0x10),
                    value: Expression::Literal(value),
                },
                Statement::Return {
                    values: vec![(Register::A, Expression::Literal(value))],
                },
            ],
            structured: true,
        }]
    }

    #[test]
    fn hand_written_translation_matches() {
        let program = parse_listing(
            "
                .org $8000
            Start: LDA #$2A
                   STA $10
                   RTS
            ",
        )
        .unwrap();
        let oracle = Oracle::new(&program).unwrap();
        oracle.check(&store_answer(0x2A), "Start", 7, 16).unwrap();
    }

    #[test]
    fn wrong_translation_is_reported() {
        let program = parse_listing(
            "
                .org $8000
            Start: LDA #$2A
                   STA $10
                   RTS
            ",
        )
        .unwrap();
        let oracle = Oracle::new(&program).unwrap();
        let message = oracle.check(&store_answer(0x2B), "Start", 7, 1).unwrap_err().to_string();
        assert!(message.contains("a: 0x2a vs 0x2b"), "{}", message);
        assert!(message.contains("mem[0x0010]: 0x2a vs 0x2b"), "{}", message);
    }

    #[test]
    fn stack_page_is_ignored() {
        let mut rng = StdRng::seed_from_u64(1);
        let state = MachineState::random(&mut rng);
        let mut other = state.clone();
        other.memory[0x01ff] ^= 0xff;
        assert!(state.differences(&other).is_empty());
        other.memory[0x0200] ^= 0xff;
        assert_eq!(state.differences(&other).len(), 1);
    }
}
