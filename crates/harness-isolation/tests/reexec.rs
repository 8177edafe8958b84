//! Isolation through re-running this test binary filtered to one test.
//!
//! Each test names itself so the worker process can find its way back to
//! the same function.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use harness_isolation::{
    isolated_test, skip, test_path, HarnessError, IsolatedTest, WorkerExit, WorkerStrategy,
};
use harness_process::live_group_members;

fn isolated(name: &str) -> IsolatedTest {
    IsolatedTest::new(test_path(module_path!(), name)).strategy(WorkerStrategy::Reexec)
}

fn leak_file(runner_pid: u32) -> PathBuf {
    std::env::temp_dir().join(format!("harness-isolation-leak-{}", runner_pid))
}

#[test]
fn passing_body_exits_zero() {
    let result = isolated("passing_body_exits_zero").run(|| ()).unwrap();
    assert!(result.is_success());
    assert_eq!(result.exit, WorkerExit::Exited(0));
}

#[test]
fn panicking_body_is_reported_with_args() {
    let err = isolated("panicking_body_is_reported_with_args")
        .with_args(&("facebook/opt-125m", 2))
        .run_and_assert(|| panic!("kaboom"))
        .unwrap_err();

    match err {
        HarnessError::TestIsolationFailure { test, args, exit } => {
            assert_eq!(test, "panicking_body_is_reported_with_args");
            assert!(args.contains("facebook/opt-125m"));
            assert_eq!(exit, WorkerExit::Exited(1));
        }
        other => panic!("expected TestIsolationFailure, got {:?}", other),
    }
}

#[test]
fn err_return_fails() {
    let result = isolated("err_return_fails")
        .run_returning(|| -> Result<(), String> { Err("model not found".to_string()) })
        .unwrap();
    assert_eq!(result.exit, WorkerExit::Exited(1));
}

#[test]
fn skipped_body_passes() {
    let result = isolated("skipped_body_passes")
        .run(|| skip("no accelerator available"))
        .unwrap();
    assert_eq!(result.exit, WorkerExit::Exited(0));
}

#[test]
fn abort_is_reported_as_signal() {
    let result = isolated("abort_is_reported_as_signal")
        .run(|| std::process::abort())
        .unwrap();
    match result.exit {
        WorkerExit::Signaled { name, .. } => assert_eq!(name, "SIGABRT"),
        other => panic!("expected a signal, got {:?}", other),
    }
}

#[test]
fn leaked_children_are_cleaned_up() {
    let result = isolated("leaked_children_are_cleaned_up")
        .run(|| {
            let child = Command::new("sleep").arg("30").spawn().unwrap();
            let runner = nix::unistd::getppid().as_raw() as u32;
            fs::write(leak_file(runner), child.id().to_string()).unwrap();
            // Exit without waiting; the sleep stays in the worker's group.
        })
        .unwrap();

    assert!(result.is_success());
    let leaked: u32 = fs::read_to_string(leak_file(std::process::id()))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let _ = fs::remove_file(leak_file(std::process::id()));

    let members = live_group_members(result.process_group).unwrap();
    assert!(members.is_empty(), "group still has {:?}", members);
    assert!(!members.contains(&leaked));
}

#[test]
fn unknown_test_name_is_rejected() {
    let err = IsolatedTest::new("no_such_test")
        .strategy(WorkerStrategy::Reexec)
        .run(|| ())
        .unwrap_err();
    assert!(matches!(err, HarnessError::Configuration { .. }), "{:?}", err);
}

isolated_test! {
    /// Generated by the macro; runs with the default fork strategy.
    fn macro_declared_test_passes() {
        assert_eq!(1 + 1, 2);
    }

    fn macro_declared_test_may_return_result() -> Result<(), std::num::ParseIntError> {
        let port: u16 = "8000".parse()?;
        assert_eq!(port, 8000);
        Ok(())
    }
}
