use std::{fs, path::Path};

use duct::cmd;
use serde_json::{json, Value};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const MUX_BIN: &str = env!("CARGO_BIN_EXE_channel-mux");

/// Run the owner with `args`, using this binary's `request-secret` as the worker
fn run_owner_with_worker(config_path: &Path, args: &[&str]) -> std::io::Result<std::process::Output> {
    let mut argv = vec!["run", "--config"];
    argv.push(config_path.to_str().unwrap());
    argv.extend_from_slice(args);
    argv.extend_from_slice(&["--", MUX_BIN, "request-secret", "--timeout", "5"]);

    cmd(MUX_BIN, argv)
        .env_remove("CHANNEL_MUX_TOKEN")
        .stdin_null()
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
}

fn stdout_messages(output: &std::process::Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
#[cfg(unix)]
fn worker_receives_token_and_owner_hides_control_traffic() -> TestResult {
    let dir = tempfile::tempdir()?;
    let output = run_owner_with_worker(&dir.path().join("missing.toml"), &["--token", "tok123"])?;

    println!("stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(output.status.success());
    // Only the worker's ordinary message reaches stdout; the control request never does
    assert_eq!(
        stdout_messages(&output),
        vec![json!({"type": "secret", "value": "tok123"})]
    );

    Ok(())
}

#[test]
#[cfg(unix)]
fn worker_gets_null_without_token() -> TestResult {
    let dir = tempfile::tempdir()?;
    let output = run_owner_with_worker(&dir.path().join("missing.toml"), &[])?;

    assert!(output.status.success());
    assert_eq!(
        stdout_messages(&output),
        vec![json!({"type": "secret", "value": null})]
    );

    Ok(())
}

#[test]
#[cfg(unix)]
fn token_read_from_config_file() -> TestResult {
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("channel-mux.toml");
    fs::write(&config_path, "log_level = \"debug\"\ntoken = \"from-file\"\n")?;

    let output = run_owner_with_worker(&config_path, &[])?;

    assert!(output.status.success());
    assert_eq!(
        stdout_messages(&output),
        vec![json!({"type": "secret", "value": "from-file"})]
    );
    // log_level from the file applies to the owner's stderr logging
    assert!(String::from_utf8_lossy(&output.stderr).contains("Starting channel-mux version"));

    Ok(())
}

#[test]
#[cfg(unix)]
fn worker_exit_code_is_propagated() -> TestResult {
    let dir = tempfile::tempdir()?;
    let output = cmd!(
        MUX_BIN,
        "run",
        "--config",
        dir.path().join("missing.toml"),
        "--",
        "sh",
        "-c",
        "echo '{\"type\":\"hello\"}'; exit 7"
    )
    .stdin_null()
    .stdout_capture()
    .stderr_capture()
    .unchecked()
    .run()?;

    assert_eq!(output.status.code(), Some(7));
    assert_eq!(stdout_messages(&output), vec![json!({"type": "hello"})]);

    Ok(())
}

#[test]
fn run_without_worker_fails() -> TestResult {
    let dir = tempfile::tempdir()?;
    let output = cmd!(MUX_BIN, "run", "--config", dir.path().join("missing.toml"))
        .stdin_null()
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()?;

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No worker program given"));

    Ok(())
}
