use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

const MANIFEST: &str = r#"
[group]
auto_tag = "branching"

[[session]]
function = "check_tests"

[[session.param]]
name = "number"
type = "int"
default = 0

[[session.param]]
name = "verbose"
type = "bool"
default = false

[[session]]
function = "check_style"
tags = ["lint"]

[[session]]
function = "build_docs"

[[session.param]]
name = "python"
type = "str"

[session.param.option]
flags = ["-p", "--python"]
choices = ["3.11", "3.12"]
"#;

fn bin() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_sessopt"));
    command.env_remove("SESSOPT_FILE").env_remove("SESSOPT_LOG");
    command
}

fn write_manifest(dir: &Path, content: &str) {
    fs::write(dir.join("sessopt.toml"), content).expect("write manifest");
}

fn run_in(dir: &Path, args: &[&str]) -> Output {
    bin().current_dir(dir).args(args).output().expect("run sessopt")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json output")
}

#[test]
fn list_json_reports_names_tags_and_flags() {
    let temp = TempDir::new().expect("tempdir");
    write_manifest(temp.path(), MANIFEST);

    let json = stdout_json(&run_in(temp.path(), &["list", "--json"]));
    let sessions = json.as_array().expect("array");
    assert_eq!(sessions.len(), 3);
    assert_eq!(sessions[0]["name"], "check-tests");
    assert_eq!(sessions[0]["tags"], serde_json::json!(["check"]));
    assert_eq!(
        sessions[0]["flags"],
        serde_json::json!(["--number", "--verbose"])
    );
    assert_eq!(sessions[1]["tags"], serde_json::json!(["check", "lint"]));
    assert_eq!(sessions[2]["name"], "build-docs");
    assert_eq!(sessions[2]["flags"], serde_json::json!(["-p", "--python"]));
}

#[test]
fn tags_json_maps_tags_to_sessions() {
    let temp = TempDir::new().expect("tempdir");
    write_manifest(temp.path(), MANIFEST);

    let json = stdout_json(&run_in(temp.path(), &["tags", "--json"]));
    assert_eq!(
        json,
        serde_json::json!({
            "check": ["check-tests", "check-style"],
            "lint": ["check-style"],
        })
    );
}

#[test]
fn resolve_parses_posargs_for_one_session() {
    let temp = TempDir::new().expect("tempdir");
    write_manifest(temp.path(), MANIFEST);

    let json = stdout_json(&run_in(
        temp.path(),
        &["resolve", "check-tests", "--json", "--", "--number", "7", "--python", "3.12"],
    ));
    assert_eq!(json, serde_json::json!({ "number": 7, "verbose": false }));

    let output = run_in(temp.path(), &["resolve", "build-docs"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--python"), "stderr: {stderr}");

    let output = run_in(temp.path(), &["resolve", "build-docs", "--", "-p", "3.12"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "python=\"3.12\"");
}

#[test]
fn manifest_is_found_from_a_subdirectory_or_by_flag() {
    let temp = TempDir::new().expect("tempdir");
    write_manifest(temp.path(), MANIFEST);
    let nested = temp.path().join("src").join("deep");
    fs::create_dir_all(&nested).expect("nested");

    let output = run_in(&nested, &["check"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("ok: 3 sessions, 3 options"), "{stdout}");

    let elsewhere = TempDir::new().expect("elsewhere");
    let manifest = temp.path().join("sessopt.toml");
    let output = bin()
        .current_dir(elsewhere.path())
        .arg("--file")
        .arg(&manifest)
        .arg("check")
        .output()
        .expect("check with file");
    assert!(output.status.success());
}

#[test]
fn check_fails_on_conflicting_declarations() {
    let temp = TempDir::new().expect("tempdir");
    write_manifest(
        temp.path(),
        r#"
[[session]]
name = "one"
[[session.param]]
name = "level"
type = "int"
default = 0

[[session]]
name = "two"
[[session.param]]
name = "level"
type = "str"
default = "high"
"#,
    );
    let output = run_in(temp.path(), &["check"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Conflicting session options"), "stderr: {stderr}");
}

#[test]
fn missing_manifest_is_reported() {
    let temp = TempDir::new().expect("tempdir");
    let output = run_in(temp.path(), &["list"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No sessopt.toml found"), "stderr: {stderr}");
}

#[test]
fn version_command_prints_full_version() {
    let output = bin().arg("version").output().expect("version");
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("sessopt {}", env!("CARGO_PKG_VERSION"))
    );
}
