//! CLI tests for `orchestrator run` and `orchestrator init`.
//!
//! Spawns the orchestrator binary against a shell-script "model" and checks
//! exit codes and the streamed JSON lines.
#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::Command;

use orchestrator::core::event::Event;
use orchestrator::exit_codes;
use orchestrator::io::config::{CONFIG_FILE, InvokerConfig, PipelineConfig, write_config};

fn write_project(root: &Path, reply: &str) {
    let config = PipelineConfig {
        max_iterations: 2,
        invoker: InvokerConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("cat > /dev/null; printf '%s' '{reply}'"),
            ],
            trailing_args: Vec::new(),
            output_file_flag: None,
            output_schema_flag: None,
            attachment_flag: None,
        },
        ..PipelineConfig::default()
    };
    write_config(&root.join(CONFIG_FILE), &config).expect("write config");
    fs::write(root.join("arch.md"), "Browser -> API -> Postgres").expect("write input");
}

fn run_cli(root: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_orchestrator"))
        .current_dir(root)
        .args(["run", "--input", "arch.md"])
        .output()
        .expect("orchestrator run")
}

#[test]
fn certified_run_exits_ok_and_writes_report() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_project(temp.path(), r#"{"status": "pass", "feedback": "ok"}"#);

    let output = run_cli(temp.path());
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let stdout = String::from_utf8(output.stdout).expect("utf8");
    let events: Vec<Event> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("event json"))
        .collect();
    assert_eq!(events.first().map(|e| e.author.as_str()), Some("user"));
    assert_eq!(
        events.last().map(|e| e.author.as_str()),
        Some("verification_loop")
    );

    let reports: Vec<_> = fs::read_dir(temp.path().join("reports"))
        .expect("reports dir")
        .filter_map(|entry| entry.ok())
        .collect();
    assert_eq!(reports.len(), 1);
}

#[test]
fn uncertified_run_exits_with_uncertified_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_project(temp.path(), r#"{"status": "fail", "feedback": "thin"}"#);

    let output = run_cli(temp.path());
    assert_eq!(output.status.code(), Some(exit_codes::UNCERTIFIED));
}

#[test]
fn missing_input_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = Command::new(env!("CARGO_BIN_EXE_orchestrator"))
        .current_dir(temp.path())
        .args(["run", "--input", "missing.md"])
        .status()
        .expect("orchestrator run");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn init_twice_requires_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    let init = |force: bool| {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_orchestrator"));
        cmd.current_dir(temp.path()).arg("init");
        if force {
            cmd.arg("--force");
        }
        cmd.status().expect("orchestrator init")
    };
    assert_eq!(init(false).code(), Some(exit_codes::OK));
    assert!(temp.path().join(CONFIG_FILE).is_file());
    assert!(temp.path().join("instructions").join("verify.md").is_file());
    assert_eq!(init(false).code(), Some(exit_codes::INVALID));
    assert_eq!(init(true).code(), Some(exit_codes::OK));
}
