//! Teal: a small language with first-class `async`/`await`, compiled to a
//! typed bytecode and run on the suspendable `teal_core` machine.
//!
//! Pipeline: [`tokenizer`] → [`tokenizer::normalize`] → [`parser`] →
//! [`compiler`] → `teal_core`. [`interpreter`] strings the stages together and
//! maps every failure onto a coded [`interpreter::ScriptError`].

pub mod ast;
pub mod compiler;
pub mod config;
pub mod diagnostic;
pub mod interpreter;
pub mod logging;
pub mod parser;
pub mod tokenizer;

pub use interpreter::{ErrorCode, ScriptError, compile_source, run_source};
pub use teal_core;
