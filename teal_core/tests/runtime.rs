//===================================================
// Teal Core Runtime
//===================================================
// Goal: Exercise hand-assembled executables end to end
// Objective: Recursion, closures, async tasks and persisted resumption
//===================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use teal_core::concurrency::{run_to_completion, InvocationError};
use teal_core::vm::{FunctionInfo, Instruction, Opcode};
use teal_core::{
    Executable, FileStore, Invocation, InvocationStatus, MachineConfig, MachineError,
    MemoryStore, Value,
};

fn op(opcode: Opcode, operands: Vec<Value>) -> Instruction {
    Instruction::new(opcode, operands).expect("valid instruction")
}

fn positional(n: usize) -> Value {
    Value::List(vec![Value::Null; n])
}

fn link(code: Vec<Instruction>, functions: &[(&str, usize, &[&str])]) -> Arc<Executable> {
    let functions = functions
        .iter()
        .map(|(name, location, params)| {
            (
                name.to_string(),
                FunctionInfo {
                    location: *location,
                    params: params.iter().map(|p| p.to_string()).collect(),
                    attribute: None,
                },
            )
        })
        .collect::<BTreeMap<_, _>>();
    Arc::new(Executable::new(functions, code))
}

fn factorial() -> Arc<Executable> {
    let code = vec![
        // main
        op(Opcode::PushV, vec![Value::Integer(5)]),
        op(Opcode::PushB, vec![Value::from("fact")]),
        op(Opcode::Call, vec![Value::Integer(1), positional(1)]),
        op(Opcode::Return, vec![]),
        // fact(n)
        op(Opcode::PushB, vec![Value::from("n")]),
        op(Opcode::PushV, vec![Value::Integer(2)]),
        op(Opcode::Lt, vec![]),
        op(Opcode::JumpIf, vec![Value::Integer(9)]),
        op(Opcode::PushB, vec![Value::from("n")]),
        op(Opcode::PushB, vec![Value::from("n")]),
        op(Opcode::PushV, vec![Value::Integer(1)]),
        op(Opcode::Sub, vec![]),
        op(Opcode::PushB, vec![Value::from("fact")]),
        op(Opcode::Call, vec![Value::Integer(1), positional(1)]),
        op(Opcode::Mul, vec![]),
        op(Opcode::Jump, vec![Value::Integer(2)]),
        op(Opcode::PushV, vec![Value::Integer(1)]),
        op(Opcode::Return, vec![]),
    ];
    link(code, &[("main", 0, &[]), ("fact", 4, &["n"])])
}

fn async_compute() -> Arc<Executable> {
    let code = vec![
        // main
        op(Opcode::PushB, vec![Value::from("compute")]),
        op(Opcode::ACall, vec![Value::Integer(0), positional(0)]),
        op(Opcode::Wait, vec![]),
        op(Opcode::Return, vec![]),
        // compute()
        op(Opcode::PushV, vec![Value::from("computing")]),
        op(Opcode::PushB, vec![Value::from("print")]),
        op(Opcode::Call, vec![Value::Integer(1), positional(1)]),
        op(Opcode::Pop, vec![]),
        op(Opcode::PushV, vec![Value::Integer(42)]),
        op(Opcode::Return, vec![]),
    ];
    link(code, &[("main", 0, &[]), ("compute", 4, &[])])
}

#[test]
fn executes_recursive_function() {
    let report = run_to_completion(factorial(), MachineConfig::default(), "main", vec![])
        .expect("factorial runs");
    assert_eq!(report.result, Value::Integer(120));
    assert_eq!(report.suspensions, 0);
}

#[test]
fn closures_capture_defining_frame() {
    let code = vec![
        op(Opcode::PushV, vec![Value::Integer(10)]),
        op(Opcode::Bind, vec![Value::from("x")]),
        op(Opcode::Pop, vec![]),
        op(Opcode::MakeClosure, vec![Value::from("lambda:0")]),
        op(Opcode::Bind, vec![Value::from("g")]),
        op(Opcode::Pop, vec![]),
        op(Opcode::PushV, vec![Value::Integer(5)]),
        op(Opcode::PushB, vec![Value::from("g")]),
        op(Opcode::Call, vec![Value::Integer(1), positional(1)]),
        op(Opcode::Return, vec![]),
        op(Opcode::PushB, vec![Value::from("x")]),
        op(Opcode::PushB, vec![Value::from("y")]),
        op(Opcode::Add, vec![]),
        op(Opcode::Return, vec![]),
    ];
    let exe = link(code, &[("main", 0, &[]), ("lambda:0", 10, &["y"])]);
    let report = run_to_completion(exe, MachineConfig::default(), "main", vec![]).expect("runs");
    assert_eq!(report.result, Value::Integer(15));
}

#[test]
fn unknown_entry_is_reported() {
    let err = run_to_completion(factorial(), MachineConfig::default(), "nope", vec![])
        .expect_err("no such function");
    assert_eq!(err, MachineError::UnknownFunction("nope".into()));
}

#[test]
fn async_task_output_is_collected() {
    let report = run_to_completion(async_compute(), MachineConfig::default(), "main", vec![])
        .expect("async program runs");
    assert_eq!(report.result, Value::Integer(42));
    assert_eq!(report.all_output(), vec!["computing".to_string()]);
    assert_eq!(report.suspensions, 1);
}

#[test]
fn resumes_across_fresh_invocations_from_file_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exe = async_compute();

    {
        let store = FileStore::new(dir.path()).expect("store");
        Invocation::new(&store, exe.clone(), MachineConfig::default())
            .start("job", "main", vec![])
            .expect("start");
    }

    let mut rounds = 0;
    let status = loop {
        rounds += 1;
        assert!(rounds < 10, "invocation never finished");
        // A new store handle and invocation per round: only the files carry state.
        let store = FileStore::new(dir.path()).expect("store");
        let status = Invocation::new(&store, exe.clone(), MachineConfig::default())
            .resume("job", 1)
            .expect("resume");
        if status != InvocationStatus::Pending {
            break status;
        }
    };

    assert_eq!(
        status,
        InvocationStatus::Finished {
            result: Value::Integer(42),
            output: vec!["computing".to_string()],
        }
    );
    // main suspends, compute runs, main resumes.
    assert_eq!(rounds, 3);
}

#[test]
fn uninterrupted_and_checkpointed_runs_agree() {
    let exe = factorial();
    let direct = run_to_completion(exe.clone(), MachineConfig::default(), "main", vec![])
        .expect("direct run");

    let store = MemoryStore::new();
    let invocation = Invocation::new(&store, exe, MachineConfig::default());
    invocation.start("f", "main", vec![]).expect("start");
    let status = invocation.resume("f", usize::MAX).expect("resume");
    assert_eq!(
        status,
        InvocationStatus::Finished {
            result: direct.result,
            output: Vec::new(),
        }
    );
}

#[test]
fn unsavable_arguments_fail_the_checkpoint() {
    let store = MemoryStore::new();
    let err = Invocation::new(&store, factorial(), MachineConfig::default())
        .start("inf", "fact", vec![Value::Float(f64::INFINITY)])
        .unwrap_err();
    assert!(matches!(err, InvocationError::Checkpoint(_)), "{err:?}");
}
