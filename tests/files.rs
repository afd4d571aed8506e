//! File-level entry points: scripts, REAP files and config files.

use std::fs;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use reaper::config::EngineConfig;
use reaper::error::ReaperError;
use reaper::interpreter::{Completion, Value};
use reaper::ExecutionMode;

const SCRIPT: &str = r#"
infect fact(corpse n) { if (n <= 1) { reap 1; } reap n * fact(n - 1); }
fact(6);
"#;

#[test]
fn test_run_file_in_both_modes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fact.reaper");
    fs::write(&path, SCRIPT).unwrap();

    let config = EngineConfig::default();
    for mode in [ExecutionMode::TreeWalk, ExecutionMode::Bytecode] {
        let report = reaper::run_file(&path, mode, &config, &[]).unwrap();
        assert_eq!(report.completion, Completion::Finished(Value::Int(720)));
    }
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let result = reaper::run_file(
        &dir.path().join("absent.reaper"),
        ExecutionMode::TreeWalk,
        &EngineConfig::default(),
        &[],
    );
    assert!(matches!(result, Err(ReaperError::Io(_))));
}

#[test]
fn test_compiled_file_executes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fact.reap");
    fs::write(&path, reaper::compile_to_bytes(SCRIPT).unwrap()).unwrap();

    let bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], b"REAP");
    let report = reaper::exec_bytes(&bytes, &EngineConfig::default(), &[]).unwrap();
    assert_eq!(report.completion, Completion::Finished(Value::Int(720)));
}

#[test]
fn test_config_file_limits_apply() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("limits.json");
    fs::write(&path, r#"{ "max_call_depth": 3 }"#).unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert_eq!(config.max_call_depth, 3);
    assert_eq!(config.max_stack_size, EngineConfig::default().max_stack_size);

    let err = reaper::run_with_options(SCRIPT, ExecutionMode::Bytecode, &config, &[]).unwrap_err();
    match err {
        ReaperError::Runtime(err) => assert!(err.message.starts_with("Call stack overflow")),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_script_arguments_are_visible() {
    let args = vec!["alpha".to_string(), "beta".to_string()];
    for mode in [ExecutionMode::TreeWalk, ExecutionMode::Bytecode] {
        let report =
            reaper::run_with_options("ritual_args[1];", mode, &EngineConfig::default(), &args)
                .unwrap();
        assert_eq!(report.completion, Completion::Finished(Value::text("beta")));
    }
}
