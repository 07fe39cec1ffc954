// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

//! `codebox exec` end to end. Tests needing an interpreter return early
//! when `python3` is missing.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

fn codebox_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_codebox"))
}

fn python_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn config_file(dir: &Path, extra: &serde_json::Value) -> PathBuf {
    let mut config = serde_json::json!({ "data_directory": dir });
    if let (Some(base), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    let path = dir.join("engine.json");
    fs::write(&path, config.to_string()).unwrap();
    path
}

#[test]
fn ordinary_caller_is_not_permitted_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_file(dir.path(), &serde_json::json!({}));
    let output = codebox_bin()
        .arg("--config")
        .arg(&config)
        .args(["exec", "--json", "--code", "print(1)"])
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(3));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["status"], "not_permitted");
}

#[test]
fn restricted_code_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_file(dir.path(), &serde_json::json!({ "allow_all_users": true }));
    let output = codebox_bin()
        .arg("--config")
        .arg(&config)
        .args(["exec", "--code", "import subprocess"])
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stdout).contains("subprocess"));
}

#[test]
fn privileged_exec_prints_output_and_records_history() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let config = config_file(dir.path(), &serde_json::json!({}));
    let output = codebox_bin()
        .arg("--config")
        .arg(&config)
        .args([
            "exec",
            "--json",
            "--privileged",
            "--sender-id",
            "ops",
            "--code",
            "print('hello from codebox')",
        ])
        .output()
        .expect("failed to execute");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["status"], "completed");
    assert_eq!(value["outcome"]["success"], true);
    assert_eq!(value["outcome"]["output"], "hello from codebox\n");
    assert_eq!(value["record_id"], 1);

    let history = fs::read_to_string(dir.path().join("execution_history.jsonl")).unwrap();
    assert!(history.contains("\"sender_id\":\"ops\""));
}

#[test]
fn code_is_read_from_stdin() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let config = config_file(dir.path(), &serde_json::json!({}));
    let mut child = codebox_bin()
        .arg("--config")
        .arg(&config)
        .args(["exec", "--privileged", "--no-history"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"print(2 ** 10)\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("execution succeeded"));
    assert!(stdout.contains("1024"));
    assert!(!dir.path().join("execution_history.jsonl").exists());
}

#[test]
fn runtime_errors_exit_with_runtime_code() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let config = config_file(dir.path(), &serde_json::json!({}));
    let output = codebox_bin()
        .arg("--config")
        .arg(&config)
        .args(["exec", "--privileged", "--code", "raise KeyError('nope')"])
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(5));
    assert!(String::from_utf8_lossy(&output.stdout).contains("KeyError"));
}

#[test]
fn timeout_flag_bounds_execution() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let config = config_file(dir.path(), &serde_json::json!({}));
    let output = codebox_bin()
        .arg("--config")
        .arg(&config)
        .args([
            "exec",
            "--privileged",
            "--timeout",
            "1",
            "--code",
            "import time\ntime.sleep(60)",
        ])
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&output.stdout).contains("timed out"));
}
