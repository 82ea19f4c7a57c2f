//! End-to-end runs of the `nexus` binary against a temp registry.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn nexus_binary() -> String {
    env!("CARGO_BIN_EXE_nexus").to_string()
}

fn run_nexus(workdir: &Path, args: &[&str]) -> Output {
    Command::new(nexus_binary())
        .arg("-w")
        .arg(workdir)
        .args(args)
        .env("RUST_LOG", "warn")
        // Keep a developer's own settings out of the run.
        .env_remove("LOCAL_NEXUS_DB_PATH")
        .env_remove("LOCAL_NEXUS_LOG_DIR")
        .env("LOCAL_NEXUS_PORT_RANGE_START", "43100")
        .env("LOCAL_NEXUS_PORT_RANGE_END", "43199")
        .output()
        .expect("Failed to run nexus")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_import_list_show_delete() {
    let dir = TempDir::new().unwrap();
    let bundle = dir.path().join("api.json");
    std::fs::write(
        &bundle,
        r#"{"service": {"name": "api", "start_command": "run --port {PORT}"},
            "keys": [{"key_name": "OpenAI", "env_var": "OPENAI_API_KEY"}],
            "requested_port": 43150}"#,
    )
    .unwrap();

    let output = run_nexus(dir.path(), &["import", bundle.to_str().unwrap()]);
    assert!(output.status.success(), "{:?}", output);
    assert!(dir.path().join("data/local_nexus.db").exists());

    let output = run_nexus(dir.path(), &["list", "--json"]);
    assert!(output.status.success());
    let services: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(services[0]["name"], "api");
    assert_eq!(services[0]["port"], 43150);
    assert_eq!(services[0]["status"], "stopped");

    let output = run_nexus(dir.path(), &["show", "api"]);
    assert!(stdout(&output).contains("OPENAI_API_KEY"));

    let output = run_nexus(dir.path(), &["env-example"]);
    assert!(stdout(&output).contains("OPENAI_API_KEY= # OpenAI"));

    let output = run_nexus(dir.path(), &["delete", "api"]);
    assert!(output.status.success());
    let output = run_nexus(dir.path(), &["show", "api"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Service not found"));
}

#[test]
fn test_start_without_command_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let bundle = dir.path().join("blank.json");
    std::fs::write(&bundle, r#"{"service": {"name": "blank"}, "auto_assign_port": false}"#).unwrap();
    assert!(run_nexus(dir.path(), &["import", bundle.to_str().unwrap()])
        .status
        .success());

    let output = run_nexus(dir.path(), &["start", "blank"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("start_command is empty"));

    let output = run_nexus(dir.path(), &["summary", "--json"]);
    let summary: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(summary["totals"]["error"], 1);
    assert_eq!(summary["alerts"][0]["type"], "missing_start_command");
}

#[test]
fn test_ports_next_respects_range() {
    let dir = TempDir::new().unwrap();
    let output = run_nexus(dir.path(), &["ports", "next"]);
    assert!(output.status.success(), "{:?}", output);
    let port: u16 = stdout(&output).trim().parse().unwrap();
    assert!((43100..=43199).contains(&port));
}
