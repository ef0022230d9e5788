//! Integration tests for meter-cli
//!
//! These tests verify the CLI commands work end-to-end against a temporary
//! database. Tests run serially to avoid database lock conflicts.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// Get a Command for the meter binary using the database in `dir`
fn meter(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("meter").unwrap();
    cmd.env("METER_DB_PATH", dir.path().join("meter.db"))
        .env_remove("METER_BILLING_URL")
        .env_remove("METER_KEY_PREFIX")
        .env_remove("RUST_LOG");
    cmd
}

/// Run a command with `--format json --quiet` and parse stdout
fn json(dir: &TempDir, args: &[&str]) -> serde_json::Value {
    let output = meter(dir)
        .args(args)
        .args(["--format", "json", "--quiet"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn issue(dir: &TempDir, args: &[&str]) -> String {
    let mut full = vec!["key", "issue"];
    full.extend_from_slice(args);
    json(dir, &full)["api_key"].as_str().unwrap().to_string()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
#[serial]
fn test_cli_help() {
    let dir = TempDir::new().unwrap();
    meter(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("meter"))
        .stdout(predicate::str::contains("COMMAND").or(predicate::str::contains("Commands")));
}

#[test]
#[serial]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    meter(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("meter"));
}

#[test]
#[serial]
fn test_subcommand_help() {
    let dir = TempDir::new().unwrap();
    for sub in ["key", "usage", "authorize", "billing", "config"] {
        meter(&dir)
            .args([sub, "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains(sub));
    }
}

// =============================================================================
// Key Command Tests
// =============================================================================

#[test]
#[serial]
fn test_issue_and_show_key() {
    let dir = TempDir::new().unwrap();
    let api_key = issue(
        &dir,
        &["--type", "metered", "--email", "Buyer@Example.com", "--limit", "5000", "--overage"],
    );

    let record = json(&dir, &["key", "show", &api_key]);
    assert_eq!(record["email"], "buyer@example.com");
    assert_eq!(record["key_type"], "metered_subscriber");
    assert_eq!(record["character_limit"], 5000);
    assert_eq!(record["overage_allowed"], true);

    meter(&dir)
        .args(["key", "list", "--type", "metered"])
        .assert()
        .success()
        .stdout(predicate::str::contains(api_key.as_str()));
}

#[test]
#[serial]
fn test_trial_issued_once_per_email() {
    let dir = TempDir::new().unwrap();
    let first = issue(&dir, &["--type", "trial", "--email", "t@example.com"]);
    let second = issue(&dir, &["--type", "trial", "--email", "T@example.com"]);
    assert_eq!(first, second);
}

#[test]
#[serial]
fn test_trial_rejects_plan_flags() {
    let dir = TempDir::new().unwrap();
    meter(&dir)
        .args(["key", "issue", "--type", "trial", "--email", "t@example.com", "--limit", "5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--limit cannot be used with trial keys"));

    meter(&dir)
        .args([
            "key", "issue", "--type", "trial", "--email", "t@example.com", "--overage",
            "--expires-in-days", "3",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--overage, --expires-in-days"));

    // nothing was claimed, so a plain request still issues
    assert!(!issue(&dir, &["--type", "trial", "--email", "t@example.com"]).is_empty());
}

#[test]
#[serial]
fn test_issue_requires_limit() {
    let dir = TempDir::new().unwrap();
    meter(&dir)
        .args(["key", "issue", "--type", "patreon", "--email", "p@example.com"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--limit"));
}

#[test]
#[serial]
fn test_show_unknown_key_fails() {
    let dir = TempDir::new().unwrap();
    meter(&dir)
        .args(["key", "show", "doesnotexist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

// =============================================================================
// Authorize and Billing Tests
// =============================================================================

#[test]
#[serial]
fn test_trial_quota_enforced() {
    let dir = TempDir::new().unwrap();
    let api_key = issue(&dir, &["--type", "trial", "--email", "quota@example.com"]);
    meter(&dir)
        .args(["key", "set-limit", &api_key, "100", "--quiet"])
        .assert()
        .success();

    let auth = |chars: &str| {
        json(
            &dir,
            &["authorize", &api_key, "--service", "Azure", "--request-type", "translation", "--chars", chars],
        )
    };

    let first = auth("60");
    assert_eq!(first["allowed"], true);
    assert_eq!(first["charged_counter"]["characters"], 60);

    let second = auth("60");
    assert_eq!(second["allowed"], false);
    assert_eq!(second["deny_reason"], "quota_exceeded");

    let slice = json(&dir, &["billing", "slice", &api_key]);
    assert_eq!(slice["characters"], 60);

    let reset = json(&dir, &["billing", "reset", &api_key]);
    assert_eq!(reset["characters"], 60);
    assert_eq!(json(&dir, &["billing", "slice", &api_key])["characters"], 0);
}

#[test]
#[serial]
fn test_canceled_key_denied() {
    let dir = TempDir::new().unwrap();
    let api_key = issue(&dir, &["--type", "lifetime", "--email", "g@example.com"]);
    meter(&dir)
        .args(["key", "cancel", &api_key])
        .assert()
        .success()
        .stdout(predicate::str::contains("canceled"));

    meter(&dir)
        .args(["authorize", &api_key, "-s", "Azure", "-t", "audio", "-c", "5"])
        .assert()
        .success()
        .stderr(predicate::str::contains("key inactive"));
}

#[test]
#[serial]
fn test_usage_show_after_authorize() {
    let dir = TempDir::new().unwrap();
    let api_key = issue(&dir, &["--type", "lifetime", "--email", "u@example.com"]);
    json(
        &dir,
        &["authorize", &api_key, "-s", "Google", "-t", "audio", "-c", "12", "--language", "ja"],
    );

    let rows = json(&dir, &["usage", "show", &api_key]);
    let rows = rows.as_array().unwrap();
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|r| r["characters"] == 12));

    let global = json(&dir, &["usage", "list", "--scope", "global", "--period", "daily"]);
    assert_eq!(global.as_array().unwrap().len(), 1);
    assert_eq!(global[0]["service"], "Google");
}

#[test]
#[serial]
fn test_reset_cycle_restores_metered_quota() {
    let dir = TempDir::new().unwrap();
    let api_key = issue(&dir, &["--type", "metered", "--email", "c@example.com", "--limit", "50"]);
    let auth = || {
        json(
            &dir,
            &["authorize", &api_key, "-s", "Azure", "-t", "translation", "-c", "40"],
        )
    };

    assert_eq!(auth()["allowed"], true);
    assert_eq!(auth()["deny_reason"], "quota_exceeded");

    let previous = json(&dir, &["usage", "reset-cycle", &api_key]);
    assert_eq!(previous["characters"], 40);
    assert_eq!(auth()["allowed"], true);
}

#[test]
#[serial]
fn test_reset_cycle_rejects_trial() {
    let dir = TempDir::new().unwrap();
    let api_key = issue(&dir, &["--type", "trial", "--email", "r@example.com"]);
    meter(&dir)
        .args(["usage", "reset-cycle", &api_key])
        .assert()
        .failure()
        .stderr(predicate::str::contains("only metered keys"));
}

#[test]
#[serial]
fn test_billing_report_requires_provider() {
    let dir = TempDir::new().unwrap();
    meter(&dir)
        .args(["billing", "report"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("METER_BILLING_URL"));
}

// =============================================================================
// Config Command Tests
// =============================================================================

#[test]
#[serial]
fn test_config_show() {
    let dir = TempDir::new().unwrap();
    meter(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("METER_DB_PATH"))
        .stdout(predicate::str::contains("METER_KEY_PREFIX"));
}
