pub mod controller;
pub mod invocation;

pub use controller::{run_to_completion, Controller, RunReport, TopLevelStatus};
pub use invocation::{Invocation, InvocationError, InvocationStatus};
