use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn distill() -> Command {
    Command::cargo_bin("distill").unwrap()
}

fn write_recording(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("run.csv");
    fs::write(
        &path,
        "Timestamp,Temperature 1,Temperature 2,Composition x_1 1,Composition x_1 2,\
         Composition y_1 1,Composition y_1 2,Distilled mass\n\
         1000,78,90,0.30,0.40,0.60,0.70,0\n\
         1010,79,91,0.31,0.41,0.61,0.71,5\n\
         1020,80,92,0.32,0.42,0.62,0.72,12\n",
    )
    .unwrap();
    path
}

// =============================================================================
// GENERAL
// =============================================================================

#[test]
fn test_no_args_shows_help() {
    distill()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_version_flag() {
    distill()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("distill"));
}

#[test]
fn test_speeds_subcommand() {
    distill()
        .arg("speeds")
        .assert()
        .success()
        .stdout(predicate::str::contains("15x"))
        .stdout(predicate::str::contains("500 ms"))
        .stdout(predicate::str::contains("(default)"));
}

// =============================================================================
// REPLAY SUBCOMMAND
// =============================================================================

#[test]
fn test_replay_prints_final_projections() {
    let dir = TempDir::new().unwrap();
    let path = write_recording(&dir);

    distill()
        .args(["replay", "--speed", "15", "--interval-ms", "1", "--quiet"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("[00:20] filePaused 3 entries, 100.0% complete"))
        .stdout(predicate::str::contains("plate  2:   92.00 C  x=0.420 y=0.720"))
        .stdout(predicate::str::contains("distilled mass: 12.00 (axis 0..13)"));
}

#[test]
fn test_replay_json_output() {
    let dir = TempDir::new().unwrap();
    let path = write_recording(&dir);

    distill()
        .args(["replay", "--speed", "10", "--interval-ms", "1", "--json", "--quiet"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\": \"filePaused\""))
        .stdout(predicate::str::contains("\"progress\": 100.0"));
}

#[test]
fn test_replay_exports_csv() {
    let dir = TempDir::new().unwrap();
    let path = write_recording(&dir);
    let export = dir.path().join("export.csv");

    distill()
        .args(["replay", "--interval-ms", "1", "--speed", "15", "--quiet", "--export"])
        .arg(&export)
        .arg(&path)
        .assert()
        .success();

    let content = fs::read_to_string(&export).unwrap();
    assert!(content.starts_with("Timestamp,Temperature 1,Temperature 2"));
    assert_eq!(content.lines().count(), 4);
}

#[test]
fn test_replay_rejects_unsupported_speed() {
    let dir = TempDir::new().unwrap();
    let path = write_recording(&dir);

    distill()
        .args(["replay", "--speed", "3"])
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unsupported playback speed"));
}

#[test]
fn test_replay_missing_file() {
    distill()
        .args(["replay", "/nonexistent/run.csv"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("File not found"));
}

#[test]
fn test_replay_unsupported_format_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.xlsx");
    fs::write(&path, "not a recording").unwrap();

    distill()
        .args(["replay", "--interval-ms", "1"])
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to start replay"));
}

#[test]
fn test_replay_rejects_unfinishable_recording() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.csv");
    fs::write(&path, "Timestamp,Temperature 1\n0,80\n5,81\n10,NaN\n").unwrap();

    distill()
        .args(["replay", "--interval-ms", "1", "--speed", "15"])
        .arg(&path)
        .timeout(std::time::Duration::from_secs(10))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("row 4: plate 1 temperature is not finite"));
}

// =============================================================================
// VALIDATE-SETTINGS SUBCOMMAND
// =============================================================================

#[test]
fn test_validate_settings_ok() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(
        &path,
        r#"{"modbus": {"usbPort": "/dev/ttyUSB0", "baudrate": 19200, "timeout": 500}}"#,
    )
    .unwrap();

    distill()
        .arg("validate-settings")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("/dev/ttyUSB0 at 19200 baud"));
}

#[test]
fn test_validate_settings_rejects_baudrate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(&path, r#"{"modbus": {"usbPort": "COM3", "baudrate": 4800}}"#).unwrap();

    distill()
        .args(["validate-settings", "--json"])
        .arg(&path)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"valid\": false"))
        .stdout(predicate::str::contains("unsupported baudrate 4800"));
}

#[test]
fn test_validate_settings_bad_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(&path, "{ nope").unwrap();

    distill()
        .arg("validate-settings")
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid settings JSON"));
}
