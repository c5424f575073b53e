use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use teal::interpreter::{compile_source, run_executable};
use teal_core::{MachineConfig, Value};

const FIB: &str = "\
fn fib(n) {
  if n < 2 { n } else { fib(n - 1) + fib(n - 2) }
}
";

const FAN_OUT: &str = "\
fn fib(n) {
  if n < 2 { n } else { fib(n - 1) + fib(n - 2) }
}
fn main() {
  a = async fib(12)
  b = async fib(13)
  await a + await b
}
";

fn bench_compile(c: &mut Criterion) {
    c.bench_function("fib_compile", |b| {
        b.iter(|| compile_source("fib.tl", FIB).unwrap());
    });
}

fn bench_interpreter(c: &mut Criterion) {
    let executable = Arc::new(compile_source("fib.tl", FIB).unwrap());
    c.bench_function("fib_interpret", |b| {
        b.iter(|| {
            let report = run_executable(
                executable.clone(),
                MachineConfig::default(),
                "fib",
                vec![Value::Integer(15)],
            )
            .unwrap();
            assert_eq!(report.result, Value::Integer(610));
        })
    });
}

fn bench_tasks(c: &mut Criterion) {
    let executable = Arc::new(compile_source("fan_out.tl", FAN_OUT).unwrap());
    c.bench_function("fib_tasks", |b| {
        b.iter(|| {
            let _ = run_executable(executable.clone(), MachineConfig::default(), "main", Vec::new())
                .unwrap();
        })
    });
}

criterion_group!(benches, bench_compile, bench_interpreter, bench_tasks);
criterion_main!(benches);
