use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::value::{TaskId, Value};
use crate::vm::executable::Executable;
use crate::vm::machine::{Machine, MachineError, SessionOutcome};
use crate::vm::state::{SessionStatus, TaskState, World};
use crate::MachineConfig;

/// Where the top-level session of a world currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum TopLevelStatus {
    Finished(Value),
    Failed(String),
    /// Not halted, and at least one session is runnable.
    Pending,
    /// Not halted, and nothing is runnable.
    Blocked(Vec<TaskId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub result: Value,
    pub output: BTreeMap<TaskId, Vec<String>>,
    /// Number of times any session suspended on an unresolved task.
    pub suspensions: u64,
    /// Number of times a session was put back in the queue after using up
    /// its step budget.
    pub preemptions: u64,
}

impl RunReport {
    /// Output lines of every session, ordered by session id.
    pub fn all_output(&self) -> Vec<String> {
        self.output.values().flatten().cloned().collect()
    }
}

/// Cooperative driver: pulls runnable sessions off the world's queue, runs
/// each until it stops, settles finished tasks and re-queues their waiters.
pub struct Controller {
    executable: Arc<Executable>,
    config: MachineConfig,
    world: World,
    failures: BTreeMap<TaskId, MachineError>,
    suspensions: u64,
    preemptions: u64,
}

impl Controller {
    pub fn new(executable: Arc<Executable>, config: MachineConfig) -> Self {
        Self::from_world(executable, config, World::new())
    }

    /// Continue driving previously persisted state.
    pub fn from_world(executable: Arc<Executable>, config: MachineConfig, world: World) -> Self {
        Self {
            executable,
            config,
            world,
            failures: BTreeMap::new(),
            suspensions: 0,
            preemptions: 0,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn into_world(self) -> World {
        self.world
    }

    pub fn suspensions(&self) -> u64 {
        self.suspensions
    }

    /// Create the top-level session calling `entry` with `args`.
    pub fn start(&mut self, entry: &str, args: Vec<Value>) -> Result<TaskId, MachineError> {
        if let Some(existing) = self.world.top_level {
            return Err(MachineError::NotRunnable(existing));
        }
        let machine = Machine::new(&self.executable, &self.config);
        let id = machine.spawn_entry(&mut self.world, entry, args)?;
        self.world.top_level = Some(id);
        info!(session = id, entry, "started top-level session");
        Ok(id)
    }

    /// Run the next runnable session until it halts, suspends or fails.
    /// Returns `None` when the run queue is empty.
    pub fn run_quantum(&mut self) -> Option<(TaskId, SessionOutcome)> {
        let id = self.world.run_queue.pop_front()?;
        let machine = Machine::new(&self.executable, &self.config);
        let outcome = machine.run_session(&mut self.world, id);
        match &outcome {
            SessionOutcome::Halted(value) => {
                let waiters = self.world.settle(
                    id,
                    TaskState::Resolved {
                        value: value.clone(),
                    },
                );
                self.wake(id, waiters);
            }
            SessionOutcome::Failed(err) => {
                let waiters = self.world.settle(
                    id,
                    TaskState::Failed {
                        message: err.to_string(),
                    },
                );
                self.failures.insert(id, err.clone());
                self.wake(id, waiters);
            }
            SessionOutcome::Suspended { .. } => {
                self.suspensions += 1;
            }
            SessionOutcome::Preempted => {
                self.preemptions += 1;
                self.world.run_queue.push_back(id);
            }
        }
        Some((id, outcome))
    }

    fn wake(&mut self, task: TaskId, waiters: Vec<TaskId>) {
        for waiter in waiters {
            debug!(task, waiter, "resuming waiter");
            self.world.run_queue.push_back(waiter);
        }
    }

    pub fn status(&self) -> TopLevelStatus {
        let session = match self.world.top_level.and_then(|id| self.world.session(id)) {
            Some(session) => session,
            None => return TopLevelStatus::Blocked(Vec::new()),
        };
        match &session.status {
            SessionStatus::Halted => {
                TopLevelStatus::Finished(session.result.clone().unwrap_or(Value::Null))
            }
            SessionStatus::Failed { message } => TopLevelStatus::Failed(message.clone()),
            _ if !self.world.run_queue.is_empty() => TopLevelStatus::Pending,
            _ => TopLevelStatus::Blocked(
                self.world
                    .sessions
                    .values()
                    .filter(|s| matches!(s.status, SessionStatus::Suspended { .. }))
                    .map(|s| s.id)
                    .collect(),
            ),
        }
    }

    /// Drive every session until the run queue drains, then report the
    /// top-level result.
    pub fn run_until_complete(&mut self) -> Result<RunReport, MachineError> {
        while self.run_quantum().is_some() {}
        self.report()
    }

    pub fn report(&self) -> Result<RunReport, MachineError> {
        let top = self
            .world
            .top_level
            .ok_or(MachineError::Deadlock(Vec::new()))?;
        match self.status() {
            TopLevelStatus::Finished(result) => Ok(RunReport {
                result,
                output: self
                    .world
                    .sessions
                    .iter()
                    .map(|(id, session)| (*id, session.output.clone()))
                    .collect(),
                suspensions: self.suspensions,
                preemptions: self.preemptions,
            }),
            TopLevelStatus::Failed(message) => Err(self
                .failures
                .get(&top)
                .cloned()
                .unwrap_or(MachineError::TaskFailed { task: top, message })),
            TopLevelStatus::Pending => Err(MachineError::NotRunnable(top)),
            TopLevelStatus::Blocked(waiting) => Err(MachineError::Deadlock(waiting)),
        }
    }
}

/// Build an executable-backed controller, start `entry` and run it to the end.
pub fn run_to_completion(
    executable: Arc<Executable>,
    config: MachineConfig,
    entry: &str,
    args: Vec<Value>,
) -> Result<RunReport, MachineError> {
    let mut controller = Controller::new(executable, config);
    controller.start(entry, args)?;
    controller.run_until_complete()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::executable::FunctionInfo;
    use crate::vm::instruction::{Instruction, Opcode};

    fn op(opcode: Opcode, operands: Vec<Value>) -> Instruction {
        Instruction::new(opcode, operands).unwrap()
    }

    fn no_keywords(n: usize) -> Value {
        Value::List(vec![Value::Null; n])
    }

    /// main() { h = async f(); await h }   f() { 42 }
    fn async_program() -> Arc<Executable> {
        let code = vec![
            op(Opcode::PushB, vec![Value::from("f")]),
            op(Opcode::ACall, vec![Value::Integer(0), no_keywords(0)]),
            op(Opcode::Bind, vec![Value::from("h")]),
            op(Opcode::Pop, vec![]),
            op(Opcode::PushB, vec![Value::from("h")]),
            op(Opcode::Wait, vec![]),
            op(Opcode::Return, vec![]),
            op(Opcode::PushV, vec![Value::Integer(42)]),
            op(Opcode::Return, vec![]),
        ];
        let mut functions = BTreeMap::new();
        for (name, location) in [("main", 0), ("f", 7)] {
            functions.insert(
                name.to_string(),
                FunctionInfo {
                    location,
                    params: Vec::new(),
                    attribute: None,
                },
            );
        }
        Arc::new(Executable::new(functions, code))
    }

    #[test]
    fn await_suspends_exactly_once() {
        let report =
            run_to_completion(async_program(), MachineConfig::default(), "main", vec![]).unwrap();
        assert_eq!(report.result, Value::Integer(42));
        assert_eq!(report.suspensions, 1);
    }

    #[test]
    fn small_step_budget_interleaves_but_still_finishes() {
        let config = MachineConfig {
            step_limit: 2,
            trace: false,
        };
        let report = run_to_completion(async_program(), config, "main", vec![]).unwrap();
        assert_eq!(report.result, Value::Integer(42));
        assert_eq!(report.suspensions, 0);
        assert_eq!(report.preemptions, 3);
    }

    #[test]
    fn quantum_by_quantum_through_serialized_state() {
        let exe = async_program();
        let mut controller = Controller::new(exe.clone(), MachineConfig::default());
        controller.start("main", vec![]).unwrap();
        loop {
            let text = serde_json::to_string(&controller.world().to_serial().unwrap()).unwrap();
            let world = World::from_serial(serde_json::from_str(&text).unwrap()).unwrap();
            controller = Controller::from_world(exe.clone(), MachineConfig::default(), world);
            if controller.run_quantum().is_none() {
                break;
            }
        }
        assert_eq!(controller.status(), TopLevelStatus::Finished(Value::Integer(42)));
    }

    #[test]
    fn failed_task_propagates_only_through_await() {
        // f() divides by zero; main awaits it.
        let code = vec![
            op(Opcode::PushB, vec![Value::from("f")]),
            op(Opcode::ACall, vec![Value::Integer(0), no_keywords(0)]),
            op(Opcode::Wait, vec![]),
            op(Opcode::Return, vec![]),
            op(Opcode::PushV, vec![Value::Integer(1)]),
            op(Opcode::PushV, vec![Value::Integer(0)]),
            op(Opcode::Div, vec![]),
            op(Opcode::Return, vec![]),
        ];
        let mut functions = BTreeMap::new();
        for (name, location) in [("main", 0), ("f", 4)] {
            functions.insert(
                name.to_string(),
                FunctionInfo {
                    location,
                    params: Vec::new(),
                    attribute: None,
                },
            );
        }
        let exe = Arc::new(Executable::new(functions, code));
        let err = run_to_completion(exe, MachineConfig::default(), "main", vec![]).unwrap_err();
        assert!(matches!(err, MachineError::TaskFailed { task: 1, .. }));
    }
}
