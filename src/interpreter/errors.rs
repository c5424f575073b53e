use std::fmt;

use teal_core::concurrency::InvocationError;
use teal_core::vm::{ExecutableError, InstructionError};
use teal_core::{MachineError, StoreError};

use crate::compiler::CompileError;
use crate::diagnostic::Diagnostic;
use crate::parser::ParseError;
use crate::tokenizer::LexError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Syntax,
    Compile,
    Bytecode,
    Machine,
    Store,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Syntax => "E001",
            ErrorCode::Compile => "E002",
            ErrorCode::Bytecode => "E003",
            ErrorCode::Machine => "E004",
            ErrorCode::Store => "E005",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any failure of the Teal pipeline, tagged with a stable error code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct ScriptError {
    pub code: ErrorCode,
    pub message: String,
    /// Present for lex and parse errors.
    pub diagnostic: Option<Diagnostic>,
}

impl ScriptError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            diagnostic: None,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    /// Caret display for positional errors, the plain message otherwise.
    pub fn render(&self) -> String {
        match &self.diagnostic {
            Some(diagnostic) => format!("[{}] {}", self.code, diagnostic.render()),
            None => format!("error: {self}\n"),
        }
    }
}

impl From<LexError> for ScriptError {
    fn from(value: LexError) -> Self {
        ScriptError {
            code: ErrorCode::Syntax,
            message: value.to_string(),
            diagnostic: Some(value.diagnostic),
        }
    }
}

impl From<ParseError> for ScriptError {
    fn from(value: ParseError) -> Self {
        ScriptError {
            code: ErrorCode::Syntax,
            message: value.to_string(),
            diagnostic: Some(value.diagnostic().clone()),
        }
    }
}

impl From<CompileError> for ScriptError {
    fn from(value: CompileError) -> Self {
        ScriptError::new(ErrorCode::Compile, value.to_string())
    }
}

impl From<InstructionError> for ScriptError {
    fn from(value: InstructionError) -> Self {
        ScriptError::new(ErrorCode::Bytecode, value.to_string())
    }
}

impl From<ExecutableError> for ScriptError {
    fn from(value: ExecutableError) -> Self {
        ScriptError::new(ErrorCode::Bytecode, value.to_string())
    }
}

impl From<MachineError> for ScriptError {
    fn from(value: MachineError) -> Self {
        ScriptError::new(ErrorCode::Machine, value.to_string())
    }
}

impl From<StoreError> for ScriptError {
    fn from(value: StoreError) -> Self {
        ScriptError::new(ErrorCode::Store, value.to_string())
    }
}

impl From<InvocationError> for ScriptError {
    fn from(value: InvocationError) -> Self {
        match value {
            InvocationError::Machine(err) => err.into(),
            InvocationError::Store(err) => err.into(),
            InvocationError::State(err) | InvocationError::Checkpoint(err) => {
                ScriptError::new(ErrorCode::Store, err.to_string())
            }
        }
    }
}
