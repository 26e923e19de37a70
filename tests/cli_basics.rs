use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn gascp(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("gascp").unwrap();
    cmd.env("GASCP_CONFIG_DIR", config_dir.path());
    cmd
}

#[test]
fn help_lists_the_tool_surface() {
    let tmp = TempDir::new().unwrap();
    gascp(&tmp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("worktree"))
        .stdout(predicate::str::contains("mcp-server"));
}

#[test]
fn list_on_a_fresh_config_is_empty() {
    let tmp = TempDir::new().unwrap();
    gascp(&tmp)
        .args(["list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn config_set_and_get_round_trip() {
    let tmp = TempDir::new().unwrap();
    gascp(&tmp)
        .args(["config", "set", "local_root", "/tmp/gas-mirrors"])
        .assert()
        .success();
    gascp(&tmp)
        .args(["config", "get", "local_root"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/gas-mirrors"));
}

#[test]
fn auth_reports_missing_token() {
    let tmp = TempDir::new().unwrap();
    gascp(&tmp)
        .arg("auth")
        .env_remove("GASCP_ACCESS_TOKEN")
        .assert()
        .success()
        .stdout(predicate::str::contains("not authenticated"));
}

#[test]
fn completions_emit_a_script() {
    let tmp = TempDir::new().unwrap();
    gascp(&tmp)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gascp"));
}

#[test]
fn unknown_config_key_fails() {
    let tmp = TempDir::new().unwrap();
    gascp(&tmp)
        .args(["config", "get", "no_such_key"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown key"));
}
