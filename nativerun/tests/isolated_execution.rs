//! Batches run through the `nativerun` launcher binary.
#![cfg(all(unix, any(target_arch = "x86_64", target_arch = "aarch64")))]

use std::env;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use nativerun::core::batch::{ExecutionMethod, RunBatch};
use nativerun::core::invocation::InvocationDescriptor;
use nativerun::core::signature::Executable;
use nativerun::core::types::Scalar;
use nativerun::error::RunError;
use nativerun::exit_codes;
use nativerun::io::config::InvokerConfig;
use nativerun::io::execution::{IsolatedExecution, SubprocessLauncher};
use nativerun::io::wire::{BatchEnvelope, Outcome, read_results, write_batch};
use nativerun::test_support::build_fixture;

fn fixture() -> (tempfile::TempDir, Arc<Executable>) {
    let temp = tempfile::tempdir().expect("tempdir");
    let exe = build_fixture(temp.path()).expect("build fixture");
    (temp, Arc::new(exe))
}

fn isolated(work_dir: &Path) -> IsolatedExecution {
    IsolatedExecution::new(
        InvokerConfig::default(),
        work_dir.join(".nativerun"),
        Box::new(SubprocessLauncher::new(vec![
            env!("CARGO_BIN_EXE_nativerun").to_string(),
        ])),
    )
}

fn double_it(exe: &Arc<Executable>, a: i64) -> InvocationDescriptor {
    InvocationDescriptor::builder(Arc::clone(exe), "double_it")
        .argument("a", a)
        .build()
        .expect("valid")
}

#[test]
fn results_come_back_in_order_with_equal_descriptors() {
    let (temp, exe) = fixture();
    let mut batch = RunBatch::new(vec![double_it(&exe, 1), double_it(&exe, 2), double_it(&exe, 3)]);
    let submitted = batch.invocations().to_vec();
    let results = batch.execute(&isolated(temp.path())).expect("execute");

    assert_eq!(results.len(), 3);
    for ((result, descriptor), expected) in results.iter().zip(&submitted).zip([2, 4, 6]) {
        assert_eq!(result.invocation(), descriptor);
        assert_eq!(result.return_value(), Some(&Scalar::Int(expected)));
    }
}

#[test]
fn non_finite_floats_survive_the_launcher() {
    let (temp, exe) = fixture();
    let scale = |x: f64| {
        InvocationDescriptor::builder(Arc::clone(&exe), "scale")
            .argument("x", x)
            .argument("factor", 1.0)
            .build()
            .expect("valid")
    };
    let mut batch = RunBatch::new(vec![
        scale(f64::INFINITY),
        scale(f64::NEG_INFINITY),
        scale(f64::NAN),
    ]);
    let submitted = batch.invocations().to_vec();
    let results = batch.execute(&isolated(temp.path())).expect("execute");

    assert_eq!(results[0].return_value(), Some(&Scalar::Float(f64::INFINITY)));
    assert_eq!(results[1].return_value(), Some(&Scalar::Float(f64::NEG_INFINITY)));
    assert!(matches!(results[2].return_value(), Some(Scalar::Float(v)) if v.is_nan()));
    assert_eq!(results[2].invocation(), &submitted[2]);
}

#[test]
fn crash_in_the_child_leaves_the_caller_running() {
    let (temp, exe) = fixture();
    let batch = RunBatch::new(vec![
        InvocationDescriptor::builder(exe, "crash")
            .build()
            .expect("valid"),
    ]);
    let err = isolated(temp.path()).execute(&batch).unwrap_err();
    assert!(err.is_execution_failure());
    match err {
        RunError::ExecutionMethod { signal, .. } => assert_eq!(signal, Some(6)),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn child_errors_are_reraised_with_their_kind() {
    let (temp, exe) = fixture();
    let batch = RunBatch::new(vec![
        InvocationDescriptor::builder(exe, "double_it")
            .argument("a", 1)
            .perf_counters(["BOGUS"])
            .build()
            .expect("valid"),
    ]);
    let err = isolated(temp.path()).execute(&batch).unwrap_err();
    assert_eq!(err, RunError::UnknownPerformanceCounter("BOGUS".to_string()));
}

#[test]
fn run_options_apply_in_the_child_only() {
    let (temp, exe) = fixture();
    let batch = RunBatch::new(vec![
        InvocationDescriptor::builder(exe, "env_number")
            .run_option("NUMBER", 11)
            .build()
            .expect("valid"),
    ]);
    let results = isolated(temp.path()).execute(&batch).expect("execute");
    assert_eq!(results[0].return_value(), Some(&Scalar::Int(11)));
    assert!(env::var_os("NUMBER").is_none());
}

#[test]
fn unknown_function_is_rejected_before_dispatch() {
    let (temp, exe) = fixture();
    let err = InvocationDescriptor::builder(exe, "no_such_function")
        .build()
        .unwrap_err();
    match err {
        RunError::Runner(message) => {
            assert!(message.contains("couldn't find a prototype for 'no_such_function'"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!temp.path().join(".nativerun").exists());
}

#[test]
fn launcher_exit_codes() {
    let (temp, exe) = fixture();
    let batch_path = temp.path().join("batch.json");
    let results_path = temp.path().join("results.json");

    std::fs::write(&batch_path, "{").expect("write");
    let status = Command::new(env!("CARGO_BIN_EXE_nativerun"))
        .arg("--batch")
        .arg(&batch_path)
        .arg("--results")
        .arg(&results_path)
        .status()
        .expect("launcher");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
    assert!(!results_path.exists());

    let batch = RunBatch::new(vec![double_it(&exe, 5)]);
    write_batch(&batch_path, &BatchEnvelope::new(InvokerConfig::default(), batch))
        .expect("write batch");
    let status = Command::new(env!("CARGO_BIN_EXE_nativerun"))
        .arg("--batch")
        .arg(&batch_path)
        .arg("--results")
        .arg(&results_path)
        .status()
        .expect("launcher");
    assert_eq!(status.code(), Some(exit_codes::OK));
    match read_results(&results_path).expect("results").outcome {
        Outcome::Completed(results) => {
            assert_eq!(results[0].return_value(), Some(&Scalar::Int(10)));
        }
        Outcome::Failed(err) => panic!("unexpected failure {err}"),
    }
}
