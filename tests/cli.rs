use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_describes_the_host() {
    Command::cargo_bin("stationd")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("service host"));
}

#[test]
fn step_runs_each_enabled_worker_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("stationd.yaml");
    std::fs::write(&config, "thread_count: 2\nintervals: [1, -1]\n").unwrap();

    Command::cargo_bin("stationd")
        .unwrap()
        .args(["--config", config.to_str().unwrap(), "step"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("A0: step complete")
                .and(predicate::str::contains("A1: disabled")),
        );
}

#[test]
fn malformed_settings_exit_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("stationd.yaml");
    std::fs::write(&config, "intervals: \"not-a-list\"\n").unwrap();

    Command::cargo_bin("stationd")
        .unwrap()
        .args(["--config", config.to_str().unwrap(), "step"])
        .assert()
        .failure();
}

#[test]
fn missing_settings_file_is_not_fatal() {
    Command::cargo_bin("stationd")
        .unwrap()
        .args(["--config", "/nonexistent/stationd.yaml", "step"])
        .assert()
        .success()
        .stdout(predicate::str::contains("A0: step complete"));
}
