// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

//! Executes decompiled functions directly on a memory image.
//!
//! Every value is a `u32`; booleans are `0`/`1`. Memory addresses and stored values must
//! already be in range, so a missing mask in the generated code shows up as an error.

use mos6502_cfg::Register;
use std::collections::BTreeMap;
use structured_ir::{BinOp, Expression, FunctionDefinition, LoopKind, Statement, UnOp, Variable};
use thiserror::Error;

const MAX_CALL_DEPTH: usize = 256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("no function named `{0}`")]
    UnknownFunction(String),

    #[error("{function}: `{variable:?}` read before assignment")]
    Unassigned { function: String, variable: Variable },

    #[error("{function}: argument {register} not passed")]
    MissingArgument { function: String, register: Register },

    #[error("{function}: address {address:#x} is outside memory")]
    AddressOutOfRange { function: String, address: u32 },

    #[error("{function}: stored value {value:#x} is not a byte")]
    NotAByte { function: String, value: u32 },

    #[error("{function}: ends without returning")]
    NoReturn { function: String },

    #[error("{function}: `{statement}` escapes every enclosing loop")]
    StrayJump { function: String, statement: String },

    #[error("no return after {0} statements")]
    StepLimit(usize),

    #[error("calls nested deeper than 256")]
    CallDepth,
}

/// Outcome of running a statement list.
enum Control {
    Normal,
    Break(Option<String>),
    Continue(Option<String>),
    Return(BTreeMap<Register, u32>),
}

struct Frame<'f> {
    function: &'f str,
    variables: BTreeMap<Variable, u32>,
}

pub struct Evaluator<'a> {
    functions: BTreeMap<&'a str, &'a FunctionDefinition>,
    pub memory: Vec<u8>,
    pub steps: usize,
    step_limit: usize,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(functions: &'a [FunctionDefinition], memory: Vec<u8>, step_limit: usize) -> Self {
        Self {
            functions: functions
                .iter()
                .map(|function| (function.name.as_str(), function))
                .collect(),
            memory,
            steps: 0,
            step_limit,
            depth: 0,
        }
    }

    /// Runs `name` with the given input registers and returns its outputs. The step limit
    /// applies to each call separately.
    pub fn call(
        &mut self,
        name: &str,
        arguments: &BTreeMap<Register, u8>,
    ) -> Result<BTreeMap<Register, u8>, EvalError> {
        self.steps = 0;
        let arguments = arguments
            .iter()
            .map(|(register, value)| (*register, *value as u32))
            .collect();
        self.invoke(name, &arguments)?
            .into_iter()
            .map(|(register, value)| {
                u8::try_from(value)
                    .map(|value| (register, value))
                    .map_err(|_| EvalError::NotAByte {
                        function: name.to_string(),
                        value,
                    })
            })
            .collect()
    }

    fn invoke(
        &mut self,
        name: &str,
        arguments: &BTreeMap<Register, u32>,
    ) -> Result<BTreeMap<Register, u32>, EvalError> {
        let function = *self
            .functions
            .get(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
        if self.depth >= MAX_CALL_DEPTH {
            return Err(EvalError::CallDepth);
        }
        let mut frame = Frame {
            function: &function.name,
            variables: BTreeMap::new(),
        };
        for register in &function.inputs {
            let value = arguments.get(register).ok_or_else(|| EvalError::MissingArgument {
                function: name.to_string(),
                register: *register,
            })?;
            frame.variables.insert(Variable::Input(*register), *value);
        }
        self.depth += 1;
        let result = self.statements(&function.body, &mut frame);
        self.depth -= 1;
        match result? {
            Control::Return(values) => Ok(values),
            Control::Normal => Err(EvalError::NoReturn {
                function: name.to_string(),
            }),
            Control::Break(label) | Control::Continue(label) => Err(EvalError::StrayJump {
                function: name.to_string(),
                statement: format!("jump to {}", label.as_deref().unwrap_or("innermost loop")),
            }),
        }
    }

    fn tick(&mut self) -> Result<(), EvalError> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(EvalError::StepLimit(self.step_limit));
        }
        Ok(())
    }

    fn statements(
        &mut self,
        statements: &[Statement],
        frame: &mut Frame,
    ) -> Result<Control, EvalError> {
        for statement in statements {
            match self.statement(statement, frame)? {
                Control::Normal => {}
                control => return Ok(control),
            }
        }
        Ok(Control::Normal)
    }

    fn statement(
        &mut self,
        statement: &Statement,
        frame: &mut Frame,
    ) -> Result<Control, EvalError> {
        self.tick()?;
        match statement {
            Statement::Assign { variable, value } => {
                let value = self.expression(value, frame)?;
                frame.variables.insert(*variable, value);
            }
            Statement::Store { address, value } => {
                let address = self.address(address, frame)?;
                let value = self.expression(value, frame)?;
                self.memory[address] = u8::try_from(value).map_err(|_| EvalError::NotAByte {
                    function: frame.function.to_string(),
                    value,
                })?;
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let branch = if self.expression(condition, frame)? != 0 {
                    then_branch
                } else {
                    else_branch
                };
                return self.statements(branch, frame);
            }
            Statement::Loop { kind, label, body } => return self.repeat(kind, label, body, frame),
            Statement::Break(label) => return Ok(Control::Break(label.clone())),
            Statement::Continue(label) => return Ok(Control::Continue(label.clone())),
            Statement::Return { values } => {
                let mut returned = BTreeMap::new();
                for (register, value) in values {
                    returned.insert(*register, self.expression(value, frame)?);
                }
                return Ok(Control::Return(returned));
            }
            Statement::Call {
                function,
                arguments,
                results,
            } => {
                let mut passed = BTreeMap::new();
                for (register, value) in arguments {
                    passed.insert(*register, self.expression(value, frame)?);
                }
                let returned = self.invoke(function, &passed)?;
                for (register, variable) in results {
                    let value = returned.get(register).ok_or_else(|| EvalError::MissingArgument {
                        function: function.clone(),
                        register: *register,
                    })?;
                    frame.variables.insert(*variable, *value);
                }
            }
            Statement::Annotation(_) => {}
        }
        Ok(Control::Normal)
    }

    fn repeat(
        &mut self,
        kind: &LoopKind,
        label: &Option<String>,
        body: &[Statement],
        frame: &mut Frame,
    ) -> Result<Control, EvalError> {
        let targets_this = |target: &Option<String>| target.is_none() || target == label;
        loop {
            self.tick()?;
            if let LoopKind::While(condition) = kind {
                if self.expression(condition, frame)? == 0 {
                    return Ok(Control::Normal);
                }
            }
            match self.statements(body, frame)? {
                Control::Normal => {}
                Control::Break(target) if targets_this(&target) => return Ok(Control::Normal),
                Control::Continue(target) if targets_this(&target) => {}
                control => return Ok(control),
            }
            if let LoopKind::DoWhile(condition) = kind {
                if self.expression(condition, frame)? == 0 {
                    return Ok(Control::Normal);
                }
            }
        }
    }

    fn address(&self, address: &Expression, frame: &Frame) -> Result<usize, EvalError> {
        let address = self.expression(address, frame)?;
        if address as usize >= self.memory.len() {
            return Err(EvalError::AddressOutOfRange {
                function: frame.function.to_string(),
                address,
            });
        }
        Ok(address as usize)
    }

    fn expression(&self, expression: &Expression, frame: &Frame) -> Result<u32, EvalError> {
        Ok(match expression {
            Expression::Literal(value) => *value,
            Expression::Bool(value) => *value as u32,
            Expression::Variable(variable) => {
                *frame
                    .variables
                    .get(variable)
                    .ok_or_else(|| EvalError::Unassigned {
                        function: frame.function.to_string(),
                        variable: *variable,
                    })?
            }
            Expression::Memory(address) => self.memory[self.address(address, frame)?] as u32,
            Expression::Unary { op, operand } => {
                let value = self.expression(operand, frame)?;
                match op {
                    UnOp::Not => (value == 0) as u32,
                    UnOp::ToInt => value,
                }
            }
            Expression::Binary { op, lhs, rhs } => {
                let lhs = self.expression(lhs, frame)?;
                let rhs = self.expression(rhs, frame)?;
                match op {
                    BinOp::Add => lhs.wrapping_add(rhs),
                    BinOp::Sub => lhs.wrapping_sub(rhs),
                    BinOp::BitAnd => lhs & rhs,
                    BinOp::BitOr => lhs | rhs,
                    BinOp::BitXor => lhs ^ rhs,
                    BinOp::Shl => lhs.checked_shl(rhs).unwrap_or(0),
                    BinOp::Shr => lhs.checked_shr(rhs).unwrap_or(0),
                    BinOp::Eq => (lhs == rhs) as u32,
                    BinOp::Neq => (lhs != rhs) as u32,
                    BinOp::Lt => (lhs < rhs) as u32,
                    BinOp::Ge => (lhs >= rhs) as u32,
                    BinOp::And => (lhs != 0 && rhs != 0) as u32,
                    BinOp::Or => (lhs != 0 || rhs != 0) as u32,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(
        name: &str,
        inputs: Vec<Register>,
        outputs: Vec<Register>,
        body: Vec<Statement>,
    ) -> FunctionDefinition {
        FunctionDefinition {
            name: name.to_string(),
            inputs,
            outputs,
            body,
            structured: true,
        }
    }

    #[test]
    fn loops_and_stores() {
        let x = Variable::Merge {
            location: mos6502_cfg::Location::X,
            id: 0,
        };
        let body = vec![
            Statement::assign(x, Expression::Literal(3)),
            Statement::Loop {
                kind: LoopKind::DoWhile(Expression::binary(BinOp::Neq, x.into(), 0.into())),
                label: None,
                body: vec![
                    Statement::Store {
                        address: Expression::binary(BinOp::Add, 0x10.into(), x.into()),
                        value: Expression::Literal(7),
                    },
                    Statement::assign(
                        x,
                        Expression::binary(BinOp::Sub, x.into(), 1.into()).low_byte(),
                    ),
                ],
            },
            Statement::Return {
                values: vec![(Register::X, x.into())],
            },
        ];
        let functions = vec![function("Fill", vec![], vec![Register::X], body)];
        let mut evaluator = Evaluator::new(&functions, vec![0; 0x10000], 1000);
        let outputs = evaluator.call("Fill", &BTreeMap::new()).unwrap();
        assert_eq!(outputs.get(&Register::X), Some(&0));
        assert_eq!(&evaluator.memory[0x10..0x14], &[0, 7, 7, 7]);
    }

    #[test]
    fn calls_pass_inputs_and_bind_results() {
        let double = function(
            "Double",
            vec![Register::A],
            vec![Register::A],
            vec![Statement::Return {
                values: vec![(
                    Register::A,
                    Expression::binary(BinOp::Shl, Variable::Input(Register::A).into(), 1.into())
                        .low_byte(),
                )],
            }],
        );
        let main = function(
            "Main",
            vec![],
            vec![Register::A],
            vec![
                Statement::Call {
                    function: "Double".to_string(),
                    arguments: vec![(Register::A, Expression::Literal(0x81))],
                    results: vec![(Register::A, Variable::Temp(1))],
                },
                Statement::Return {
                    values: vec![(Register::A, Variable::Temp(1).into())],
                },
            ],
        );
        let functions = vec![main, double];
        let mut evaluator = Evaluator::new(&functions, vec![0; 0x10000], 1000);
        let outputs = evaluator.call("Main", &BTreeMap::new()).unwrap();
        assert_eq!(outputs.get(&Register::A), Some(&0x02));
    }

    #[test]
    fn labelled_break_leaves_outer_loop() {
        let body = vec![
            Statement::Loop {
                kind: LoopKind::Forever,
                label: Some("outer".to_string()),
                body: vec![Statement::Loop {
                    kind: LoopKind::Forever,
                    label: None,
                    body: vec![Statement::Break(Some("outer".to_string()))],
                }],
            },
            Statement::Return { values: vec![] },
        ];
        let functions = vec![function("F", vec![], vec![], body)];
        let mut evaluator = Evaluator::new(&functions, vec![0; 0x10000], 100);
        assert_eq!(evaluator.call("F", &BTreeMap::new()), Ok(BTreeMap::new()));
    }

    #[test]
    fn reports_generation_mistakes() {
        let functions = vec![
            function(
                "Unmasked",
                vec![],
                vec![],
                vec![Statement::Store {
                    address: Expression::Literal(0),
                    value: Expression::Literal(0x100),
                }],
            ),
            function(
                "Spin",
                vec![],
                vec![],
                vec![Statement::Loop {
                    kind: LoopKind::Forever,
                    label: None,
                    body: vec![],
                }],
            ),
            function("Falls", vec![], vec![], vec![]),
        ];
        let mut evaluator = Evaluator::new(&functions, vec![0; 0x10000], 50);
        assert!(matches!(
            evaluator.call("Unmasked", &BTreeMap::new()),
            Err(EvalError::NotAByte { value: 0x100, .. })
        ));
        assert_eq!(evaluator.call("Spin", &BTreeMap::new()), Err(EvalError::StepLimit(50)));
        assert!(matches!(
            evaluator.call("Falls", &BTreeMap::new()),
            Err(EvalError::NoReturn { .. })
        ));
    }
}
