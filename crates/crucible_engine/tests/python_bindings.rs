//! End-to-end Python path tests. Skipped when no interpreter is present.

use crucible_engine::{python, ExecutionEngine};
use crucible_protocol::{ErrorKind, SecurityTier};

fn engine() -> (tempfile::TempDir, ExecutionEngine) {
    let dir = tempfile::tempdir().unwrap();
    let engine = ExecutionEngine::new(dir.path().join("workspaces"), SecurityTier::Moderate);
    (dir, engine)
}

fn have_python() -> bool {
    python::find_interpreter().is_some()
}

#[test]
fn test_persistent_bindings_across_calls() {
    if !have_python() {
        eprintln!("skipping: no python interpreter");
        return;
    }
    let (_dir, engine) = engine();

    let first = engine.execute_python("ws1", "x = 21", Some(30));
    assert!(first.success, "first call failed: {:?}", first.error);
    assert_eq!(first.output, "");

    let second = engine.execute_python("ws1", "print(x * 2)", Some(30));
    assert!(second.success, "second call failed: {:?}", second.error);
    assert_eq!(second.output, "42\n");
}

#[test]
fn test_bindings_never_cross_workspaces() {
    if !have_python() {
        eprintln!("skipping: no python interpreter");
        return;
    }
    let (_dir, engine) = engine();

    let set = engine.execute_python("ws_a", "secret = 'a-only'", Some(30));
    assert!(set.success);

    let probe = engine.execute_python("ws_b", "print(secret)", Some(30));
    assert!(!probe.success);
    assert_eq!(probe.error_kind, Some(ErrorKind::RuntimeFailure));
}

#[test]
fn test_cleanup_clears_bindings() {
    if !have_python() {
        eprintln!("skipping: no python interpreter");
        return;
    }
    let (_dir, engine) = engine();

    assert!(engine.execute_python("ws1", "x = 21", Some(30)).success);
    assert!(engine.cleanup_context("ws1"));

    let after = engine.execute_python("ws1", "print(x * 2)", Some(30));
    assert!(!after.success);
    assert_eq!(after.error_kind, Some(ErrorKind::RuntimeFailure));
    assert!(after
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("NameError"));
}

#[test]
fn test_infinite_loop_times_out() {
    if !have_python() {
        eprintln!("skipping: no python interpreter");
        return;
    }
    let (_dir, engine) = engine();

    let result = engine.execute_python("ws1", "while True: pass", Some(2));
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(result.duration_ms >= 2000, "got {}ms", result.duration_ms);
    assert!(result.duration_ms <= 4000, "got {}ms", result.duration_ms);

    // The context survives a timeout.
    let after = engine.execute_python("ws1", "print('ok')", Some(30));
    assert!(after.success);
    assert_eq!(after.output, "ok\n");
}

#[test]
fn test_runtime_failure_captures_exception() {
    if !have_python() {
        eprintln!("skipping: no python interpreter");
        return;
    }
    let (_dir, engine) = engine();

    let result = engine.execute_python("ws1", "raise ValueError('bad input')", Some(30));
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::RuntimeFailure));
    assert!(result.error.as_deref().unwrap().contains("ValueError"));
    assert_eq!(
        result.metadata.get("exception_type").and_then(|v| v.as_str()),
        Some("ValueError")
    );
}

#[test]
fn test_written_files_are_harvested() {
    if !have_python() {
        eprintln!("skipping: no python interpreter");
        return;
    }
    let (_dir, engine) = engine();

    let result = engine.execute_python(
        "ws1",
        "with open('numbers.csv', 'w') as fh:\n    fh.write('1,2,3\\n')",
        Some(30),
    );
    assert!(result.success, "write failed: {:?}", result.error);
    assert!(result.artifacts.contains(&"numbers.csv".to_string()));
}
