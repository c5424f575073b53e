use std::sync::Arc;

use teal::interpreter::{ErrorCode, ScriptError, compile_source, run_executable};
use teal_core::vm::{Instruction, Opcode};
use teal_core::{Executable, Invocation, MachineConfig, MemoryStore, Value};

#[test]
fn lex_error_uses_e001() {
    let err = compile_source("lex.tl", "fn main() { 1 ? 2 }").unwrap_err();
    assert_eq!(err.code_str(), "E001");
    let diagnostic = err.diagnostic.as_ref().expect("positional error");
    assert_eq!(diagnostic.column, 15);
}

#[test]
fn parse_error_uses_e001_and_renders_a_caret() {
    let err = compile_source("parse.tl", "fn demo(").unwrap_err();
    assert_eq!(err.code, ErrorCode::Syntax);
    let rendered = err.render();
    assert!(rendered.starts_with("[E001] error: "), "{rendered}");
    assert!(rendered.contains("--> parse.tl:1:"), "{rendered}");
    assert!(rendered.contains('^'));
}

#[test]
fn compile_error_uses_e002() {
    let err = compile_source("dup.tl", "fn a() { 1 }\nfn a() { 2 }").unwrap_err();
    assert_eq!(err.code_str(), "E002");
    assert!(err.message.contains("more than once"), "{}", err.message);
    assert!(err.diagnostic.is_none());
}

#[test]
fn bad_operands_use_e003() {
    let err: ScriptError = Instruction::new(Opcode::Bind, Vec::new()).unwrap_err().into();
    assert_eq!(err.code_str(), "E003");
    let err: ScriptError = Instruction::new(Opcode::Jump, vec![Value::from("far")])
        .unwrap_err()
        .into();
    assert_eq!(err.code_str(), "E003");
    let err: ScriptError = Executable::decode(&b"{\"format\": \"other\"}"[..])
        .unwrap_err()
        .into();
    assert_eq!(err.code_str(), "E003");
}

#[test]
fn runtime_faults_use_e004() {
    let executable = Arc::new(compile_source("rt.tl", "fn main() { 1 + \"a\" }").unwrap());
    let err = run_executable(executable, MachineConfig::default(), "main", Vec::new()).unwrap_err();
    assert_eq!(err.code_str(), "E004");
    assert_eq!(err.to_string(), format!("[E004] {}", err.message));
}

#[test]
fn missing_session_uses_e005() {
    let executable = Arc::new(compile_source("st.tl", "fn main() { 1 }").unwrap());
    let store = MemoryStore::new();
    let err: ScriptError = Invocation::new(&store, executable, MachineConfig::default())
        .resume("never-started", 1)
        .unwrap_err()
        .into();
    assert_eq!(err.code, ErrorCode::Store);
    assert_eq!(err.code_str(), "E005");
}
