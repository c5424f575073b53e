use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::value::{TaskId, Value};

/// Activation record for one function invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub function: String,
    pub bindings: BTreeMap<String, Value>,
    /// Where the caller continues; `None` for a session's root frame.
    pub return_ip: Option<usize>,
}

impl Frame {
    pub fn new(function: impl Into<String>, bindings: BTreeMap<String, Value>) -> Self {
        Self {
            function: function.into(),
            bindings,
            return_ip: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Suspended { on: TaskId },
    Halted,
    Failed { message: String },
}

/// One independently schedulable execution of the instruction sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: TaskId,
    pub instruction_pointer: usize,
    pub operand_stack: Vec<Value>,
    pub call_frames: Vec<Frame>,
    pub status: SessionStatus,
    pub result: Option<Value>,
    #[serde(default)]
    pub output: Vec<String>,
}

impl Session {
    pub fn new(id: TaskId, entry: usize, frame: Frame) -> Self {
        Self {
            id,
            instruction_pointer: entry,
            operand_stack: Vec::new(),
            call_frames: vec![frame],
            status: SessionStatus::Running,
            result: None,
            output: Vec::new(),
        }
    }

    pub fn halted(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Halted | SessionStatus::Failed { .. }
        )
    }
}

/// Resolution state of the task handle owned by a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Pending { waiters: Vec<TaskId> },
    Resolved { value: Value },
    Failed { message: String },
}

impl TaskState {
    pub fn pending() -> Self {
        TaskState::Pending {
            waiters: Vec::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, TaskState::Pending { .. })
    }
}

/// Complete machine state for one top-level invocation: every session, the
/// task table and the run queue. This is the unit that gets persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub sessions: BTreeMap<TaskId, Session>,
    pub pending_tasks: BTreeMap<TaskId, TaskState>,
    pub run_queue: VecDeque<TaskId>,
    pub top_level: Option<TaskId>,
    next_id: TaskId,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new runnable session and its task handle.
    pub fn spawn(&mut self, entry: usize, frame: Frame) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        self.sessions.insert(id, Session::new(id, entry, frame));
        self.pending_tasks.insert(id, TaskState::pending());
        self.run_queue.push_back(id);
        id
    }

    /// Register a task that is settled from the start, such as an async call
    /// to a builtin. It has no session.
    pub fn spawn_settled(&mut self, outcome: TaskState) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        self.pending_tasks.insert(id, outcome);
        id
    }

    pub fn session(&self, id: TaskId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskState> {
        self.pending_tasks.get(&id)
    }

    /// Settle a task and hand back the sessions that were waiting on it.
    /// The waiter list is drained, so each waiter is returned exactly once.
    pub fn settle(&mut self, id: TaskId, outcome: TaskState) -> Vec<TaskId> {
        let previous = self.pending_tasks.insert(id, outcome);
        match previous {
            Some(TaskState::Pending { waiters }) => waiters,
            _ => Vec::new(),
        }
    }

    /// Record `waiter` as blocked on `task`. Returns false when the task is
    /// already settled and the waiter should simply continue.
    pub fn add_waiter(&mut self, task: TaskId, waiter: TaskId) -> bool {
        match self.pending_tasks.get_mut(&task) {
            Some(TaskState::Pending { waiters }) => {
                if !waiters.contains(&waiter) {
                    waiters.push(waiter);
                }
                true
            }
            _ => false,
        }
    }

    /// Fails when any live value has no JSON form.
    pub fn to_serial(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_serial(data: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiters_are_released_once() {
        let mut world = World::new();
        let a = world.spawn(0, Frame::new("main", BTreeMap::new()));
        let b = world.spawn(4, Frame::new("f", BTreeMap::new()));
        assert!(world.add_waiter(b, a));
        assert!(world.add_waiter(b, a));
        let released = world.settle(
            b,
            TaskState::Resolved {
                value: Value::Integer(42),
            },
        );
        assert_eq!(released, vec![a]);
        assert!(!world.add_waiter(b, a));
        let again = world.settle(
            b,
            TaskState::Resolved {
                value: Value::Integer(42),
            },
        );
        assert!(again.is_empty());
    }

    #[test]
    fn every_waiter_on_a_task_is_released_together() {
        let mut world = World::new();
        let a = world.spawn(0, Frame::new("main", BTreeMap::new()));
        let b = world.spawn(0, Frame::new("main", BTreeMap::new()));
        let task = world.spawn(4, Frame::new("f", BTreeMap::new()));
        assert!(world.add_waiter(task, a));
        assert!(world.add_waiter(task, b));
        let released = world.settle(
            task,
            TaskState::Resolved {
                value: Value::Integer(42),
            },
        );
        assert_eq!(released, vec![a, b]);
    }

    #[test]
    fn world_serializes_with_integer_keys() {
        let mut world = World::new();
        let mut bindings = BTreeMap::new();
        bindings.insert("x".to_string(), Value::Integer(1));
        world.spawn(3, Frame::new("main", bindings));
        let text = serde_json::to_string(&world.to_serial().unwrap()).unwrap();
        let back = World::from_serial(serde_json::from_str(&text).unwrap()).unwrap();
        assert_eq!(back, world);
    }

    #[test]
    fn world_holding_an_infinite_float_does_not_serialize() {
        let mut world = World::new();
        let mut bindings = BTreeMap::new();
        bindings.insert("x".to_string(), Value::Float(f64::INFINITY));
        world.spawn(0, Frame::new("main", bindings));
        assert!(world.to_serial().is_err());
    }
}
