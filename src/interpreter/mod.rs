//! Source-to-result pipeline: parse, compile, then drive the machine.

pub mod errors;

use std::sync::Arc;

use teal_core::concurrency::{RunReport, run_to_completion};
use teal_core::{Executable, MachineConfig, Value};

use crate::compiler::compile;
use crate::parser::parse_source;

pub use errors::{ErrorCode, ScriptError};

/// Parse and compile one source unit.
pub fn compile_source(filename: &str, source: &str) -> Result<Executable, ScriptError> {
    let nodes = parse_source(filename, source)?;
    Ok(compile(&nodes)?)
}

/// Run `entry(args)` of an executable until the top-level session halts.
pub fn run_executable(
    executable: Arc<Executable>,
    config: MachineConfig,
    entry: &str,
    args: Vec<Value>,
) -> Result<RunReport, ScriptError> {
    Ok(run_to_completion(executable, config, entry, args)?)
}

/// Compile and run a source unit in one step.
pub fn run_source(
    filename: &str,
    source: &str,
    entry: &str,
    args: Vec<Value>,
    config: MachineConfig,
) -> Result<RunReport, ScriptError> {
    let executable = Arc::new(compile_source(filename, source)?);
    run_executable(executable, config, entry, args)
}
