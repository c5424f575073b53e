use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::store::{SessionStore, StoreError};
use crate::value::Value;
use crate::vm::executable::Executable;
use crate::vm::machine::MachineError;
use crate::vm::state::World;
use crate::MachineConfig;

use super::controller::{Controller, TopLevelStatus};

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Machine(#[from] MachineError),
    #[error("saved state is not a machine world: {0}")]
    State(#[from] serde_json::Error),
    #[error("machine state cannot be saved: {0}")]
    Checkpoint(serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvocationStatus {
    Finished { result: Value, output: Vec<String> },
    Failed(String),
    Pending,
}

/// One bounded run of a persisted world: load, drive up to `max_quanta`
/// scheduling quanta, save. Nothing survives between calls except what the
/// store holds.
pub struct Invocation<'s> {
    store: &'s dyn SessionStore,
    executable: Arc<Executable>,
    config: MachineConfig,
}

impl<'s> Invocation<'s> {
    pub fn new(
        store: &'s dyn SessionStore,
        executable: Arc<Executable>,
        config: MachineConfig,
    ) -> Self {
        Self {
            store,
            executable,
            config,
        }
    }

    /// Create a fresh world for `entry(args)` and persist it without running.
    pub fn start(
        &self,
        session_id: &str,
        entry: &str,
        args: Vec<Value>,
    ) -> Result<(), InvocationError> {
        let mut controller = Controller::new(self.executable.clone(), self.config.clone());
        controller.start(entry, args)?;
        self.checkpoint(session_id, &controller)?;
        info!(session_id, entry, "invocation started");
        Ok(())
    }

    fn checkpoint(&self, session_id: &str, controller: &Controller) -> Result<(), InvocationError> {
        let state = controller
            .world()
            .to_serial()
            .map_err(InvocationError::Checkpoint)?;
        self.store.save(session_id, &state)?;
        Ok(())
    }

    pub fn resume(
        &self,
        session_id: &str,
        max_quanta: usize,
    ) -> Result<InvocationStatus, InvocationError> {
        let world = World::from_serial(self.store.load(session_id)?)?;
        let mut controller =
            Controller::from_world(self.executable.clone(), self.config.clone(), world);
        let mut ran = 0;
        while ran < max_quanta && controller.run_quantum().is_some() {
            ran += 1;
        }
        self.checkpoint(session_id, &controller)?;
        info!(session_id, quanta = ran, "invocation checkpointed");
        match controller.status() {
            TopLevelStatus::Finished(result) => {
                let output = controller
                    .world()
                    .sessions
                    .values()
                    .flat_map(|session| session.output.iter().cloned())
                    .collect();
                Ok(InvocationStatus::Finished { result, output })
            }
            TopLevelStatus::Failed(message) => Ok(InvocationStatus::Failed(message)),
            TopLevelStatus::Pending => Ok(InvocationStatus::Pending),
            TopLevelStatus::Blocked(waiting) => Err(MachineError::Deadlock(waiting).into()),
        }
    }
}
