//! CLI tests for `robot-runner`.
//!
//! Spawns the binary in a temp dir and checks exit codes plus the execution
//! record it leaves behind.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use robot_runner::core::types::{ExecStatus, Execution};
use robot_runner::exit_codes;
use robot_runner::io::config::{CONFIG_FILE, RunnerConfig, load_config, write_config};

/// Assistant stand-in: answers by the `assistant_id` in the request on stdin.
const ASSISTANT_SCRIPT: &str = r#"req=$(cat)
case "$req" in
  *'"assistant_id":"__yao.goals"'*) echo '1. Summarize Q4 sales' ;;
  *'"assistant_id":"__yao.tasks"'*) echo '{"next":{"tasks":[{"id":"t1","executor_type":"agent","executor_id":"analyst","description":"Summarize Q4"}]}}' ;;
  *'"assistant_id":"analyst"'*) echo 'Q4 sales were up 12%' ;;
  *'"assistant_id":"__yao.delivery"'*) echo '{"next":{"summary":"Q4 up","body":"Q4 sales were up 12%"}}' ;;
  *) echo 'Q4 summaries are quick' ;;
esac
"#;

fn runner(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_robot-runner"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn robot-runner")
}

fn init(dir: &Path) {
    let output = runner(dir, &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
}

fn use_assistant(dir: &Path, command: Vec<String>) {
    let path = dir.join(CONFIG_FILE);
    let mut config: RunnerConfig = load_config(&path).expect("load config");
    config.assistant.command = command;
    write_config(&path, &config).expect("write config");
}

#[test]
fn init_then_check_succeeds() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    assert!(temp.path().join("robot-runner.toml").exists());
    assert!(temp.path().join("robot.toml").exists());

    let output = runner(temp.path(), &["check"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
}

#[test]
fn check_without_robot_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = runner(temp.path(), &["check"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("robot.toml"));
}

#[test]
fn malformed_event_data_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    let output = runner(
        temp.path(),
        &["run", "--trigger", "event", "--event-type", "x", "--data", "{bad"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn human_run_completes_and_records_execution() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    fs::write(temp.path().join("assistant.sh"), ASSISTANT_SCRIPT).expect("write script");
    use_assistant(
        temp.path(),
        vec!["sh".to_string(), "assistant.sh".to_string()],
    );

    let output = runner(
        temp.path(),
        &["run", "--trigger", "human", "--message", "Summarize Q4"],
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{stderr}");

    let printed: Execution = serde_json::from_slice(&output.stdout).expect("execution json");
    assert_eq!(printed.status, ExecStatus::Completed);
    let record = temp
        .path()
        .join(".robot/executions")
        .join(&printed.id)
        .join("execution.json");
    let recorded: Execution =
        serde_json::from_str(&fs::read_to_string(record).expect("read record")).expect("parse");
    assert_eq!(recorded.id, printed.id);
    assert_eq!(recorded.results.len(), 1);

    // The sample robot delivers to a JSONL file.
    let deliveries =
        fs::read_to_string(temp.path().join(".robot/deliveries.jsonl")).expect("deliveries");
    assert!(deliveries.contains("Q4 up"));
}

#[test]
fn failing_assistant_exits_with_failed_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    use_assistant(temp.path(), vec!["false".to_string()]);

    let output = runner(temp.path(), &["run", "--trigger", "clock"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let printed: Execution = serde_json::from_slice(&output.stdout).expect("execution json");
    assert_eq!(printed.status, ExecStatus::Failed);
    assert!(
        printed
            .error
            .as_deref()
            .is_some_and(|e| e.contains("inspiration agent"))
    );
}
