use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

use tagwatch_core::{registry, Account, AccountName};
use tagwatch_poller::{cache, migration};

fn tagwatch_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tagwatch"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("RUST_LOG");
    cmd
}

fn add_unreachable_account(home: &Path, name: &str) {
    let mut account = Account::new(name, "127.0.0.1:9");
    account.address = Some("http://127.0.0.1:9".to_string());
    account.repositories = vec!["app".to_string()];
    registry::add_account_at(home, account).expect("add account");
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout json")
}

#[test]
fn account_add_then_list() {
    let home = TempDir::new().expect("home");

    tagwatch_cmd(home.path())
        .args([
            "account",
            "add",
            "acme",
            "--registry",
            "ghcr.io",
            "--repo",
            "acme/api",
            "--repo",
            "acme/worker",
            "--threshold",
            "50",
        ])
        .assert()
        .success()
        .stdout(contains("Added account 'acme' (2 repositories)"));

    let stored =
        registry::load_account_at(home.path(), &AccountName::from("acme")).expect("load account");
    assert_eq!(stored.repositories, vec!["acme/api", "acme/worker"]);
    assert_eq!(stored.item_upper_threshold, Some(50));
    assert!(stored.track_digests);

    tagwatch_cmd(home.path())
        .args(["account", "list"])
        .assert()
        .success()
        .stdout(contains("acme"))
        .stdout(contains("ghcr.io"))
        .stdout(contains("acme/api, acme/worker"));
}

#[test]
fn account_add_rejects_separator_in_name() {
    let home = TempDir::new().expect("home");

    tagwatch_cmd(home.path())
        .args(["account", "add", "bad:name", "--registry", "ghcr.io", "--repo", "x"])
        .assert()
        .failure();

    assert!(registry::list_accounts_at(home.path())
        .expect("list")
        .is_empty());
}

#[test]
fn account_add_rejects_separator_in_repository() {
    let home = TempDir::new().expect("home");

    tagwatch_cmd(home.path())
        .args(["account", "add", "acme", "--registry", "ghcr.io", "--repo", "acme:api"])
        .assert()
        .failure()
        .stderr(contains("acme:api"));

    assert!(registry::list_accounts_at(home.path())
        .expect("list")
        .is_empty());
}

#[test]
fn account_list_when_empty() {
    let home = TempDir::new().expect("home");

    tagwatch_cmd(home.path())
        .args(["account", "list"])
        .assert()
        .success()
        .stdout(contains("No accounts registered."));
}

#[test]
fn poll_with_no_accounts_is_a_no_op() {
    let home = TempDir::new().expect("home");

    tagwatch_cmd(home.path())
        .arg("poll")
        .assert()
        .success()
        .stdout(contains("No accounts registered."));
}

#[test]
fn poll_unknown_account_fails() {
    let home = TempDir::new().expect("home");

    tagwatch_cmd(home.path())
        .args(["poll", "ghost"])
        .assert()
        .failure()
        .stderr(contains("unknown account 'ghost'"));
}

#[test]
fn poll_rejects_dry_run_with_fast_forward() {
    let home = TempDir::new().expect("home");

    tagwatch_cmd(home.path())
        .args(["poll", "--dry-run", "--fast-forward"])
        .assert()
        .failure();
}

#[test]
fn poll_reports_unreachable_account_and_writes_nothing() {
    let home = TempDir::new().expect("home");
    add_unreachable_account(home.path(), "acme");

    let output = tagwatch_cmd(home.path())
        .args(["poll", "--json"])
        .output()
        .expect("run poll");

    assert!(!output.status.success());
    let report = stdout_json(&output);
    assert_eq!(report["accounts"][0]["account"], "acme");
    assert_eq!(report["accounts"][0]["outcome"]["status"], "failed");
    assert!(!cache::cache_path_at(home.path(), &AccountName::from("acme")).exists());
}

#[test]
fn poll_skipped_while_migration_runs() {
    let home = TempDir::new().expect("home");
    add_unreachable_account(home.path(), "acme");
    let marker = migration::marker_path_at(home.path());
    fs::create_dir_all(marker.parent().expect("run dir")).expect("create run dir");
    fs::write(&marker, "").expect("write marker");

    tagwatch_cmd(home.path())
        .arg("poll")
        .assert()
        .success()
        .stdout(contains("migration in progress"));
}

#[test]
fn status_json_counts_cached_images() {
    let home = TempDir::new().expect("home");
    add_unreachable_account(home.path(), "acme");

    let mut file = cache::load_at(home.path(), &AccountName::from("acme")).expect("load cache");
    file.entries.insert(
        "tagwatch:dockerRegistry:v2:acme:app:v1".to_string(),
        Some("sha256:aaa".to_string()),
    );
    file.entries
        .insert("tagwatch:dockerRegistry:v2:acme:app:v2".to_string(), None);
    cache::save_at(home.path(), &AccountName::from("acme"), &file).expect("save cache");

    let output = tagwatch_cmd(home.path())
        .args(["status", "--json"])
        .output()
        .expect("run status");
    assert!(output.status.success());

    let status = stdout_json(&output);
    assert_eq!(status["migration_in_progress"], false);
    assert_eq!(status["default_threshold"], 1000);
    let acme = &status["accounts"][0];
    assert_eq!(acme["account"], "acme");
    assert_eq!(acme["cached_images"], 2);
    assert_eq!(acme["unresolved_digests"], 1);
    assert_eq!(acme["threshold"], 1000);
}

#[test]
fn threshold_prefers_account_ceiling() {
    let home = TempDir::new().expect("home");
    let mut account = Account::new("acme", "ghcr.io");
    account.item_upper_threshold = Some(25);
    registry::add_account_at(home.path(), account).expect("add account");
    registry::add_account_at(home.path(), Account::new("globex", "ghcr.io"))
        .expect("add account");

    tagwatch_cmd(home.path())
        .args(["threshold", "acme"])
        .assert()
        .success()
        .stdout(contains("acme: 25 item(s) per cycle (account)"));

    tagwatch_cmd(home.path())
        .args(["threshold", "globex"])
        .assert()
        .success()
        .stdout(contains("globex: 1000 item(s) per cycle (default)"));
}

#[test]
fn daemon_status_when_not_running() {
    let home = TempDir::new().expect("home");

    let output = tagwatch_cmd(home.path())
        .args(["daemon", "status"])
        .output()
        .expect("run daemon status");
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["running"], false);
}
