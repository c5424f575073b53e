use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::value::{TaskId, Value};
use crate::MachineConfig;

use super::builtins::{invoke_builtin, is_builtin};
use super::executable::{Executable, FunctionInfo};
use super::instruction::Opcode;
use super::state::{Frame, Session, SessionStatus, TaskState, World};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MachineError {
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("unbound name `{0}`")]
    UnboundName(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("instruction pointer {0} is outside the code")]
    InvalidInstructionPointer(usize),
    #[error("jump from {from} by {offset} leaves the code")]
    BadJump { from: usize, offset: i64 },
    #[error("`{function}` expects {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: usize,
        got: usize,
    },
    #[error("`{function}` has no parameter named `{keyword}`")]
    UnknownKeyword { function: String, keyword: String },
    #[error("parameter `{param}` of `{function}` bound twice")]
    DuplicateArgument { function: String, param: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("awaited task {task} failed: {message}")]
    TaskFailed { task: TaskId, message: String },
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
    #[error("unknown session {0}")]
    UnknownSession(TaskId),
    #[error("session {0} is not runnable")]
    NotRunnable(TaskId),
    #[error("deadlock: sessions {0:?} wait on tasks that can never resolve")]
    Deadlock(Vec<TaskId>),
}

/// What a session did when the machine stopped driving it.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Halted(Value),
    Suspended { on: TaskId },
    /// Used up its step budget; still runnable.
    Preempted,
    Failed(MachineError),
}

enum Flow {
    Halted(Value),
    Suspended(TaskId),
    Preempted,
}

/// Executes sessions of one executable against a shared [`World`].
pub struct Machine<'a> {
    executable: &'a Executable,
    config: &'a MachineConfig,
}

impl<'a> Machine<'a> {
    pub fn new(executable: &'a Executable, config: &'a MachineConfig) -> Self {
        Self { executable, config }
    }

    /// Create a session that calls `function` with positional `args`.
    pub fn spawn_entry(
        &self,
        world: &mut World,
        function: &str,
        args: Vec<Value>,
    ) -> Result<TaskId, MachineError> {
        let info = self
            .executable
            .function(function)
            .ok_or_else(|| MachineError::UnknownFunction(function.to_string()))?;
        let keywords = vec![Value::Null; args.len()];
        let frame = bind_arguments(function, info, BTreeMap::new(), args, &keywords)?;
        let id = world.spawn(info.location, frame);
        debug!(session = id, function, "spawned session");
        Ok(id)
    }

    /// Run one session until it halts, suspends on an unresolved task, or fails.
    pub fn run_session(&self, world: &mut World, id: TaskId) -> SessionOutcome {
        let mut session = match world.sessions.remove(&id) {
            Some(session) => session,
            None => return SessionOutcome::Failed(MachineError::UnknownSession(id)),
        };
        let outcome = if session.halted() {
            SessionOutcome::Failed(MachineError::NotRunnable(id))
        } else {
            session.status = SessionStatus::Running;
            match self.execute(world, &mut session) {
                Ok(Flow::Halted(value)) => {
                    debug!(session = id, result = %value, "session halted");
                    session.status = SessionStatus::Halted;
                    session.result = Some(value.clone());
                    SessionOutcome::Halted(value)
                }
                Ok(Flow::Suspended(task)) => {
                    debug!(session = id, task, "session suspended");
                    session.status = SessionStatus::Suspended { on: task };
                    SessionOutcome::Suspended { on: task }
                }
                Ok(Flow::Preempted) => {
                    debug!(
                        session = id,
                        ip = session.instruction_pointer,
                        "session preempted"
                    );
                    SessionOutcome::Preempted
                }
                Err(err) => {
                    warn!(
                        session = id,
                        ip = session.instruction_pointer,
                        error = %err,
                        "session failed"
                    );
                    session.status = SessionStatus::Failed {
                        message: err.to_string(),
                    };
                    SessionOutcome::Failed(err)
                }
            }
        };
        world.sessions.insert(id, session);
        outcome
    }

    fn execute(&self, world: &mut World, session: &mut Session) -> Result<Flow, MachineError> {
        let budget = self.config.step_limit.max(1);
        let mut steps: u64 = 0;
        loop {
            if steps == budget {
                return Ok(Flow::Preempted);
            }
            steps += 1;
            let ip = session.instruction_pointer;
            let instruction = self
                .executable
                .instruction(ip)
                .ok_or(MachineError::InvalidInstructionPointer(ip))?;
            if self.config.trace {
                trace!(session = session.id, ip, %instruction, "exec");
            }
            match instruction.opcode() {
                Opcode::PushV => {
                    session.operand_stack.push(instruction.operand(0).clone());
                }
                Opcode::PushB => {
                    let name = string_operand(instruction.operand(0))?;
                    let value = self.lookup(session, name)?;
                    session.operand_stack.push(value);
                }
                Opcode::Bind => {
                    let name = string_operand(instruction.operand(0))?;
                    let value = peek(session)?.clone();
                    current_frame(session)?
                        .bindings
                        .insert(name.to_string(), value);
                }
                Opcode::Pop => {
                    pop(session)?;
                }
                Opcode::Jump => {
                    session.instruction_pointer = self.jump_target(ip, instruction.operand(0))?;
                    continue;
                }
                Opcode::JumpIf => {
                    let condition = pop(session)?;
                    if condition.is_truthy() {
                        session.instruction_pointer =
                            self.jump_target(ip, instruction.operand(0))?;
                        continue;
                    }
                }
                Opcode::Call => {
                    let (callee, args, keywords) = pop_call(session, instruction.operands())?;
                    self.enter(session, callee, args, &keywords, ip + 1)?;
                    continue;
                }
                Opcode::ACall => {
                    let (callee, args, keywords) = pop_call(session, instruction.operands())?;
                    let handle = self.spawn_task(world, session, callee, args, &keywords)?;
                    session.operand_stack.push(Value::Future(handle));
                }
                Opcode::Wait => match pop(session)? {
                    Value::Future(task) => match world.task(task).cloned() {
                        Some(TaskState::Resolved { value }) => {
                            session.operand_stack.push(value);
                        }
                        Some(TaskState::Failed { message }) => {
                            return Err(MachineError::TaskFailed { task, message });
                        }
                        Some(TaskState::Pending { .. }) => {
                            world.add_waiter(task, session.id);
                            // Leave the handle and the pointer in place: on
                            // resume the same Wait finds the task settled.
                            session.operand_stack.push(Value::Future(task));
                            return Ok(Flow::Suspended(task));
                        }
                        None => return Err(MachineError::UnknownTask(task)),
                    },
                    other => session.operand_stack.push(other),
                },
                Opcode::Return => {
                    let value = pop(session)?;
                    let frame = session
                        .call_frames
                        .pop()
                        .ok_or(MachineError::StackUnderflow)?;
                    match frame.return_ip {
                        Some(return_ip) => {
                            session.instruction_pointer = return_ip;
                            session.operand_stack.push(value);
                            continue;
                        }
                        None => return Ok(Flow::Halted(value)),
                    }
                }
                Opcode::MakeClosure => {
                    let function = string_operand(instruction.operand(0))?;
                    if self.executable.function(function).is_none() {
                        return Err(MachineError::UnknownFunction(function.to_string()));
                    }
                    let captured = current_frame(session)?.bindings.clone();
                    session.operand_stack.push(Value::Closure {
                        function: function.to_string(),
                        captured,
                    });
                }
                op @ (Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Eq
                | Opcode::Gt
                | Opcode::Lt
                | Opcode::And
                | Opcode::Or) => {
                    let rhs = pop(session)?;
                    let lhs = pop(session)?;
                    session.operand_stack.push(execute_binary(op, lhs, rhs)?);
                }
            }
            session.instruction_pointer = ip + 1;
        }
    }

    fn lookup(&self, session: &Session, name: &str) -> Result<Value, MachineError> {
        if let Some(value) = session
            .call_frames
            .last()
            .and_then(|frame| frame.bindings.get(name))
        {
            return Ok(value.clone());
        }
        if self.executable.function(name).is_some() || is_builtin(name) {
            return Ok(Value::Function(name.to_string()));
        }
        Err(MachineError::UnboundName(name.to_string()))
    }

    fn jump_target(&self, ip: usize, offset: &Value) -> Result<usize, MachineError> {
        let offset = offset
            .as_integer()
            .ok_or_else(|| MachineError::TypeMismatch("jump offset must be an integer".into()))?;
        let target = i64::try_from(ip)
            .ok()
            .and_then(|ip| ip.checked_add(offset))
            .and_then(|target| usize::try_from(target).ok())
            .filter(|target| *target < self.executable.code.len())
            .ok_or(MachineError::BadJump { from: ip, offset })?;
        Ok(target)
    }

    fn resolve_callee(
        &self,
        callee: Value,
    ) -> Result<(String, Option<&'a FunctionInfo>, BTreeMap<String, Value>), MachineError> {
        match callee {
            Value::Function(name) => {
                let info = self.executable.function(&name);
                if info.is_none() && !is_builtin(&name) {
                    return Err(MachineError::UnknownFunction(name));
                }
                Ok((name, info, BTreeMap::new()))
            }
            Value::Closure { function, captured } => {
                let info = self
                    .executable
                    .function(&function)
                    .ok_or_else(|| MachineError::UnknownFunction(function.clone()))?;
                Ok((function, Some(info), captured))
            }
            other => Err(MachineError::TypeMismatch(format!(
                "cannot call a value of type {}",
                other.type_name()
            ))),
        }
    }

    fn enter(
        &self,
        session: &mut Session,
        callee: Value,
        args: Vec<Value>,
        keywords: &[Value],
        return_ip: usize,
    ) -> Result<(), MachineError> {
        let (name, info, captured) = self.resolve_callee(callee)?;
        match info {
            Some(info) => {
                let mut frame = bind_arguments(&name, info, captured, args, keywords)?;
                frame.return_ip = Some(return_ip);
                session.call_frames.push(frame);
                session.instruction_pointer = info.location;
            }
            None => {
                reject_keywords(&name, keywords)?;
                let value = invoke_builtin(&name, args, &mut session.output)?;
                session.operand_stack.push(value);
                session.instruction_pointer = return_ip;
            }
        }
        Ok(())
    }

    fn spawn_task(
        &self,
        world: &mut World,
        session: &mut Session,
        callee: Value,
        args: Vec<Value>,
        keywords: &[Value],
    ) -> Result<TaskId, MachineError> {
        let (name, info, captured) = self.resolve_callee(callee)?;
        let id = match info {
            Some(info) => {
                let frame = bind_arguments(&name, info, captured, args, keywords)?;
                world.spawn(info.location, frame)
            }
            None => {
                reject_keywords(&name, keywords)?;
                let value = invoke_builtin(&name, args, &mut session.output)?;
                world.spawn_settled(TaskState::Resolved { value })
            }
        };
        debug!(parent = session.id, task = id, function = %name, "spawned task");
        Ok(id)
    }
}

/// Bind call arguments to parameters. Keyword arguments claim their named
/// parameter first; positional arguments fill the rest in order.
fn bind_arguments(
    function: &str,
    info: &FunctionInfo,
    mut bindings: BTreeMap<String, Value>,
    args: Vec<Value>,
    keywords: &[Value],
) -> Result<Frame, MachineError> {
    if keywords.len() != args.len() {
        return Err(MachineError::TypeMismatch(format!(
            "call to `{function}` has {} argument(s) but {} keyword slot(s)",
            args.len(),
            keywords.len()
        )));
    }
    let mut claimed = vec![false; info.params.len()];
    let mut positional = Vec::new();
    for (arg, keyword) in args.into_iter().zip(keywords) {
        match keyword {
            Value::Null => positional.push(arg),
            Value::Symbol(key) | Value::String(key) => {
                let index = info
                    .params
                    .iter()
                    .position(|param| param == key)
                    .ok_or_else(|| MachineError::UnknownKeyword {
                        function: function.to_string(),
                        keyword: key.clone(),
                    })?;
                if claimed[index] {
                    return Err(MachineError::DuplicateArgument {
                        function: function.to_string(),
                        param: key.clone(),
                    });
                }
                claimed[index] = true;
                bindings.insert(key.clone(), arg);
            }
            other => {
                return Err(MachineError::TypeMismatch(format!(
                    "keyword tag must be a symbol, got {}",
                    other.type_name()
                )))
            }
        }
    }
    let open: Vec<&String> = info
        .params
        .iter()
        .zip(&claimed)
        .filter(|(_, taken)| !**taken)
        .map(|(param, _)| param)
        .collect();
    if open.len() != positional.len() {
        return Err(MachineError::Arity {
            function: function.to_string(),
            expected: info.params.len(),
            got: info.params.len() - open.len() + positional.len(),
        });
    }
    for (param, value) in open.into_iter().zip(positional) {
        bindings.insert(param.clone(), value);
    }
    Ok(Frame::new(function, bindings))
}

fn reject_keywords(function: &str, keywords: &[Value]) -> Result<(), MachineError> {
    match keywords.iter().find_map(|k| k.as_str()) {
        Some(keyword) => Err(MachineError::UnknownKeyword {
            function: function.to_string(),
            keyword: keyword.to_string(),
        }),
        None => Ok(()),
    }
}

fn string_operand(value: &Value) -> Result<&str, MachineError> {
    match value {
        Value::String(text) => Ok(text),
        other => Err(MachineError::TypeMismatch(format!(
            "expected string operand, got {}",
            other.type_name()
        ))),
    }
}

fn current_frame(session: &mut Session) -> Result<&mut Frame, MachineError> {
    session
        .call_frames
        .last_mut()
        .ok_or(MachineError::StackUnderflow)
}

fn pop(session: &mut Session) -> Result<Value, MachineError> {
    session
        .operand_stack
        .pop()
        .ok_or(MachineError::StackUnderflow)
}

fn peek(session: &Session) -> Result<&Value, MachineError> {
    session
        .operand_stack
        .last()
        .ok_or(MachineError::StackUnderflow)
}

fn pop_call(
    session: &mut Session,
    operands: &[Value],
) -> Result<(Value, Vec<Value>, Vec<Value>), MachineError> {
    let count = operands
        .first()
        .and_then(Value::as_integer)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| MachineError::TypeMismatch("argument count must be a natural".into()))?;
    let keywords = match operands.get(1) {
        Some(Value::List(items)) => items.clone(),
        _ => {
            return Err(MachineError::TypeMismatch(
                "keyword operand must be a list".into(),
            ))
        }
    };
    let callee = pop(session)?;
    if count > session.operand_stack.len() {
        return Err(MachineError::StackUnderflow);
    }
    let start = session.operand_stack.len() - count;
    let args = session.operand_stack.drain(start..).collect();
    Ok((callee, args, keywords))
}

fn execute_binary(opcode: Opcode, lhs: Value, rhs: Value) -> Result<Value, MachineError> {
    match opcode {
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
            execute_arithmetic(opcode, lhs, rhs)
        }
        Opcode::Eq => Ok(Value::Boolean(values_equal(&lhs, &rhs))),
        Opcode::Gt | Opcode::Lt => execute_comparison(opcode, lhs, rhs),
        Opcode::And => Ok(Value::Boolean(lhs.is_truthy() && rhs.is_truthy())),
        Opcode::Or => Ok(Value::Boolean(lhs.is_truthy() || rhs.is_truthy())),
        other => Err(MachineError::TypeMismatch(format!(
            "{other} is not a binary operator"
        ))),
    }
}

fn execute_arithmetic(opcode: Opcode, lhs: Value, rhs: Value) -> Result<Value, MachineError> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => execute_integer_arithmetic(opcode, a, b),
        (Value::Float(a), Value::Float(b)) => execute_float_arithmetic(opcode, a, b),
        (Value::Integer(a), Value::Float(b)) => execute_float_arithmetic(opcode, a as f64, b),
        (Value::Float(a), Value::Integer(b)) => execute_float_arithmetic(opcode, a, b as f64),
        (Value::String(a), Value::String(b)) if opcode == Opcode::Add => {
            Ok(Value::String(a + &b))
        }
        (Value::List(mut a), Value::List(b)) if opcode == Opcode::Add => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (a, b) => Err(MachineError::TypeMismatch(format!(
            "unsupported operands for {opcode}: {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn execute_integer_arithmetic(opcode: Opcode, lhs: i64, rhs: i64) -> Result<Value, MachineError> {
    let result = match opcode {
        Opcode::Add => lhs.checked_add(rhs),
        Opcode::Sub => lhs.checked_sub(rhs),
        Opcode::Mul => lhs.checked_mul(rhs),
        Opcode::Div => {
            if rhs == 0 {
                return Err(MachineError::DivisionByZero);
            }
            lhs.checked_div(rhs)
        }
        _ => None,
    };
    result.map(Value::Integer).ok_or(MachineError::Overflow)
}

/// Floats stay finite so every value keeps a JSON form.
fn execute_float_arithmetic(opcode: Opcode, lhs: f64, rhs: f64) -> Result<Value, MachineError> {
    let result = match opcode {
        Opcode::Add => lhs + rhs,
        Opcode::Sub => lhs - rhs,
        Opcode::Mul => lhs * rhs,
        Opcode::Div if rhs == 0.0 => return Err(MachineError::DivisionByZero),
        Opcode::Div => lhs / rhs,
        other => {
            return Err(MachineError::TypeMismatch(format!(
                "{other} is not arithmetic"
            )))
        }
    };
    if result.is_finite() {
        Ok(Value::Float(result))
    } else {
        Err(MachineError::Overflow)
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
            (*a as f64) == *b
        }
        _ => lhs == rhs,
    }
}

fn execute_comparison(opcode: Opcode, lhs: Value, rhs: Value) -> Result<Value, MachineError> {
    let ordering = match (&lhs, &rhs) {
        (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => a.partial_cmp(b),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            as_f64(&lhs).partial_cmp(&as_f64(&rhs))
        }
        _ => {
            return Err(MachineError::TypeMismatch(format!(
                "cannot compare {} with {}",
                lhs.type_name(),
                rhs.type_name()
            )))
        }
    };
    let result = match (opcode, ordering) {
        (Opcode::Gt, Some(order)) => order.is_gt(),
        (Opcode::Lt, Some(order)) => order.is_lt(),
        _ => false,
    };
    Ok(Value::Boolean(result))
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Integer(int) => *int as f64,
        Value::Float(float) => *float,
        _ => f64::NAN,
    }
}
