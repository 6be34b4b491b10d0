//! In-process invocations against a compiled C fixture.
#![cfg(all(unix, any(target_arch = "x86_64", target_arch = "aarch64")))]

use std::env;
use std::sync::Arc;

use nativerun::core::batch::{ExecutionMethod, RunBatch};
use nativerun::core::invocation::InvocationDescriptor;
use nativerun::core::signature::Executable;
use nativerun::core::sweep::{Sweep, arg_map};
use nativerun::core::types::Scalar;
use nativerun::error::RunError;
use nativerun::io::config::InvokerConfig;
use nativerun::io::execution::DirectExecution;
use nativerun::test_support::build_fixture;

fn fixture() -> (tempfile::TempDir, Arc<Executable>) {
    let temp = tempfile::tempdir().expect("tempdir");
    let exe = build_fixture(temp.path()).expect("build fixture");
    (temp, Arc::new(exe))
}

fn run_one(descriptor: InvocationDescriptor) -> Result<Option<Scalar>, RunError> {
    let method = DirectExecution::new(InvokerConfig::default());
    let mut results = method.execute(&RunBatch::new(vec![descriptor]))?;
    Ok(results.remove(0).return_value().cloned())
}

#[test]
fn integer_float_and_string_returns() {
    let (_temp, exe) = fixture();
    let call = |function: &str, args: &[(&str, Scalar)]| {
        let mut builder = InvocationDescriptor::builder(Arc::clone(&exe), function);
        for (name, value) in args {
            builder = builder.argument(*name, value.clone());
        }
        run_one(builder.build().expect("valid")).expect("invoke")
    };

    assert_eq!(call("double_it", &[("a", Scalar::Int(21))]), Some(Scalar::Int(42)));
    assert_eq!(
        call(
            "sum",
            &[
                ("a", Scalar::Int(1)),
                ("b", Scalar::Int(-2)),
                ("c", Scalar::Int(1 << 40)),
            ]
        ),
        Some(Scalar::Int((1 << 40) - 1))
    );
    assert_eq!(
        call(
            "scale",
            &[("x", Scalar::Float(2.0)), ("factor", Scalar::Float(1.5))]
        ),
        Some(Scalar::Float(3.0))
    );
    assert_eq!(call("greet", &[]), Some(Scalar::from("hello")));
    assert_eq!(
        call(
            "apply",
            &[("f", Scalar::from("double_it")), ("x", Scalar::Int(5))]
        ),
        Some(Scalar::Int(10))
    );
}

#[test]
fn sweep_results_follow_descriptor_order() {
    let (_temp, exe) = fixture();
    let descriptors = Sweep::new(vec![exe], ["double_it"])
        .arguments(arg_map([(
            "a",
            vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3)],
        )]))
        .descriptors()
        .expect("descriptors");
    let mut batch = RunBatch::new(descriptors);
    let results = batch
        .execute(&DirectExecution::new(InvokerConfig::default()))
        .expect("execute");
    let values: Vec<_> = results
        .iter()
        .map(|r| r.return_value().cloned())
        .collect();
    assert_eq!(
        values,
        vec![
            Some(Scalar::Int(2)),
            Some(Scalar::Int(4)),
            Some(Scalar::Int(6))
        ]
    );
    assert_eq!(batch.results().map(<[_]>::len), Some(3));
}

#[test]
fn counters_produce_measurement_rows() {
    let (_temp, exe) = fixture();
    let descriptor = InvocationDescriptor::builder(Arc::clone(&exe), "double_it")
        .argument("a", 4)
        .perf_counters(["CYCLES"])
        .build()
        .expect("valid");
    let method = DirectExecution::new(InvokerConfig::default());
    let results = method
        .execute(&RunBatch::new(vec![descriptor]))
        .expect("invoke");
    let rows = results[0].measurement_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["calls"], "1");
    assert_eq!(rows[0]["CYCLES"], "1000");
    assert_eq!(results[0].field_names(), vec!["calls", "CYCLES"]);
}

#[test]
fn nan_and_overflowing_floats_complete_a_batch() {
    let (_temp, exe) = fixture();
    let scale = |x: f64, factor: f64| {
        InvocationDescriptor::builder(Arc::clone(&exe), "scale")
            .argument("x", x)
            .argument("factor", factor)
            .perf_counters(["CYCLES"])
            .build()
            .expect("valid")
    };
    let mut batch = RunBatch::new(vec![scale(f64::NAN, 1.0), scale(1e308, 10.0)]);
    let results = batch
        .execute(&DirectExecution::new(InvokerConfig::default()))
        .expect("execute");

    assert!(matches!(results[0].return_value(), Some(Scalar::Float(v)) if v.is_nan()));
    assert_eq!(results[1].return_value(), Some(&Scalar::Float(f64::INFINITY)));
    for result in results {
        assert_eq!(result.measurement_rows().len(), 1);
    }
}

#[test]
fn long_string_arguments_still_collect_measurements() {
    let (temp, exe) = fixture();
    let path = temp.path().join("n".repeat(250));
    let descriptor = InvocationDescriptor::builder(exe, "read_number")
        .argument("path", path.to_str().expect("utf-8 path"))
        .perf_counters(["CYCLES"])
        .build()
        .expect("valid");
    let results = DirectExecution::new(InvokerConfig::default())
        .execute(&RunBatch::new(vec![descriptor]))
        .expect("invoke");
    assert_eq!(results[0].return_value(), Some(&Scalar::Int(-1)));
    assert_eq!(results[0].measurement_rows()[0]["CYCLES"], "1000");
}

#[test]
fn unknown_counter_is_rejected_by_the_runtime() {
    let (_temp, exe) = fixture();
    let descriptor = InvocationDescriptor::builder(exe, "double_it")
        .argument("a", 4)
        .perf_counters(["BOGUS"])
        .build()
        .expect("valid");
    assert_eq!(
        run_one(descriptor).unwrap_err(),
        RunError::UnknownPerformanceCounter("BOGUS".to_string())
    );
}

#[test]
fn declared_but_unexported_function_is_a_missing_symbol() {
    let (_temp, exe) = fixture();
    let descriptor = InvocationDescriptor::builder(exe, "not_exported")
        .build()
        .expect("valid");
    match run_one(descriptor).unwrap_err() {
        RunError::Runner(message) => assert!(message.contains("missing symbol 'not_exported'")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn run_options_are_visible_only_during_the_call() {
    let (_temp, exe) = fixture();
    assert!(env::var_os("NUMBER").is_none());
    let descriptor = InvocationDescriptor::builder(exe, "env_number")
        .run_option("NUMBER", 7)
        .build()
        .expect("valid");
    assert_eq!(run_one(descriptor).expect("invoke"), Some(Scalar::Int(7)));
    assert!(env::var_os("NUMBER").is_none());
}

#[test]
fn argument_errors_surface_before_any_call() {
    let (_temp, exe) = fixture();
    let err = InvocationDescriptor::builder(Arc::clone(&exe), "double_it")
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        RunError::MissingArgument {
            name: "a".to_string()
        }
    );

    let err = InvocationDescriptor::builder(exe, "double_it")
        .argument("a", 1)
        .argument("b", 2)
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        RunError::UnusedArgument {
            name: "b".to_string()
        }
    );
}
