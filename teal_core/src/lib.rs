#![forbid(unsafe_code)]

//! Teal core – the bytecode model and suspendable virtual machine.
//!
//! * [`value`] – the tagged runtime value type and its plain serialized form.
//! * [`vm`] – the closed instruction set, linked executables, per-session state
//!   and the step machine that runs a session until it halts or suspends.
//! * [`concurrency`] – the cooperative controller that schedules sessions,
//!   settles tasks and wakes waiters, plus bounded invocations over a store.
//! * [`store`] – the save/load capability suspended state is persisted through.
//!
//! The machine never depends on a host runtime to pause a call stack: every
//! suspension point leaves the complete state in a [`vm::World`], which can be
//! serialized, dropped, reloaded in another process and driven further.

pub mod concurrency;
pub mod store;
pub mod value;
pub mod vm;

pub use concurrency::{Controller, Invocation, InvocationStatus, RunReport};
pub use store::{FileStore, MemoryStore, SessionStore, StoreError};
pub use value::{TaskId, Value, ValueKind};
pub use vm::{Executable, Instruction, MachineError, Opcode};

/// Configuration for the machine.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Instructions one session may execute per quantum before it is put
    /// back at the end of the run queue.
    pub step_limit: u64,
    /// Emit a `trace` event for every executed instruction.
    pub trace: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            step_limit: 10_000,
            trace: false,
        }
    }
}
