//! Runs the `delaytask` binary and checks its output and exit status

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output};

use tempfile::NamedTempFile;

fn delaytask_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_delaytask"))
}

fn run(args: &[&str]) -> Output {
    Command::new(delaytask_bin())
        .args(args)
        .env_remove("DELAYTASK_CONFIG")
        .output()
        .expect("failed to run delaytask")
}

fn stdout_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_run_prints_every_iteration() {
    let output = run(&["run", "--iterations", "3", "--interval-ms", "10"]);

    assert!(output.status.success(), "status: {:?}", output.status);
    assert_eq!(
        stdout_lines(&output),
        vec![
            "Loop iteration 0",
            "Loop iteration 1",
            "Loop iteration 2",
            "Loop finished"
        ]
    );
}

#[test]
fn test_error_after_first_resume_terminates_process() {
    let output = run(&[
        "run",
        "--iterations",
        "5",
        "--interval-ms",
        "10",
        "--fail-after",
        "1",
    ]);

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stdout_lines(&output), vec!["Loop iteration 0"]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("injected failure after resume 1"), "stderr: {stderr}");
}

#[test]
fn test_panic_terminates_process() {
    let output = run(&[
        "run",
        "--iterations",
        "5",
        "--interval-ms",
        "10",
        "--fail-after",
        "2",
        "--panic",
    ]);

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(
        stdout_lines(&output),
        vec!["Loop iteration 0", "Loop iteration 1"]
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("injected panic after resume 2"), "stderr: {stderr}");
}

#[test]
fn test_configured_exit_code() {
    let config = config_file("[task]\nfailure_exit_code = 3\n");
    let path = config.path().to_str().unwrap();

    let output = run(&[
        "--config",
        path,
        "run",
        "--iterations",
        "2",
        "--interval-ms",
        "5",
        "--fail-after",
        "1",
    ]);

    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn test_failure_exit_code_never_races_launcher() {
    let config = config_file("[task]\nfailure_exit_code = 3\n");
    let path = config.path().to_str().unwrap();

    for round in 0..50 {
        let output = run(&[
            "--config",
            path,
            "run",
            "--iterations",
            "2",
            "--interval-ms",
            "0",
            "--fail-after",
            "1",
        ]);
        assert_eq!(output.status.code(), Some(3), "round {round}");
        assert!(!stdout_lines(&output).iter().any(|l| l == "Loop finished"));
    }
}

#[test]
fn test_fixed_wait_keeps_failure_exit_code() {
    let output = run(&[
        "run",
        "--iterations",
        "3",
        "--interval-ms",
        "0",
        "--fail-after",
        "1",
        "--wait",
        "fixed",
        "--fixed-wait-ms",
        "300",
    ]);

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stdout_lines(&output), vec!["Loop iteration 0"]);
}

#[test]
fn test_config_from_environment() {
    let config = config_file("[task]\nfailure_exit_code = 4\n");

    let output = Command::new(delaytask_bin())
        .args(["run", "--iterations", "2", "--interval-ms", "5", "--fail-after", "1"])
        .env("DELAYTASK_CONFIG", config.path())
        .output()
        .expect("failed to run delaytask");

    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn test_zero_exit_code_is_rejected() {
    let config = config_file("[task]\nfailure_exit_code = 0\n");
    let path = config.path().to_str().unwrap();

    let output = run(&["--config", path, "run", "--iterations", "1"]);

    assert!(!output.status.success());
    assert!(stdout_lines(&output).is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid config"), "stderr: {stderr}");
}

#[test]
fn test_fixed_wait() {
    let output = run(&[
        "run",
        "--iterations",
        "2",
        "--interval-ms",
        "10",
        "--wait",
        "fixed",
        "--fixed-wait-ms",
        "500",
    ]);

    assert!(output.status.success());
    assert_eq!(stdout_lines(&output).last().map(String::as_str), Some("Loop finished"));
}

#[test]
fn test_version() {
    let output = run(&["version"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("delaytask "));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}
