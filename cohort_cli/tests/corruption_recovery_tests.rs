//! Corruption handling tests for cohortctl.
//!
//! A damaged store is reported, never silently replaced. A damaged journal
//! line is skipped and the rest of the journal still replays.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn setup_test_dir() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = dir.path().join("config.toml");
    fs::write(&config, "[audit]\ndefault_actor = \"tester\"\n").expect("Failed to write config");
    (dir, config)
}

fn cli(data_dir: &Path, config: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cohortctl"));
    cmd.arg("--data-dir").arg(data_dir).arg("--config").arg(config);
    cmd
}

#[test]
fn test_corrupt_store_is_reported_and_left_intact() {
    let (temp_dir, config) = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();
    let store_path = data_dir.join("store.json");

    fs::write(&store_path, "{ this is not valid json !!!").unwrap();

    cli(&data_dir, &config)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Store error"));

    cli(&data_dir, &config)
        .args(["create", "--name", "Should not land"])
        .assert()
        .failure();

    assert_eq!(
        fs::read_to_string(&store_path).unwrap(),
        "{ this is not valid json !!!"
    );
}

#[test]
fn test_empty_store_file_is_reported() {
    let (temp_dir, config) = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    fs::write(data_dir.join("store.json"), "").unwrap();

    cli(&data_dir, &config)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_failed_mutation_leaves_store_unchanged() {
    let (temp_dir, config) = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();
    let store_path = data_dir.join("store.json");

    cli(&data_dir, &config)
        .args(["create", "--name", "Stable", "--patients", "1"])
        .assert()
        .success();
    let before = fs::read_to_string(&store_path).unwrap();

    cli(&data_dir, &config)
        .args(["void", "1", "--reason", ""])
        .assert()
        .failure();

    assert_eq!(fs::read_to_string(&store_path).unwrap(), before);
}

#[test]
fn test_partial_journal_line_is_skipped_on_replay() {
    let (temp_dir, config) = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();
    let journal_path = data_dir.join("patient_events.jsonl");

    cli(&data_dir, &config)
        .args(["create", "--name", "Replayed", "--patients", "1,2"])
        .assert()
        .success();
    cli(&data_dir, &config)
        .args(["patient", "void", "1", "--reason", "entered in error"])
        .assert()
        .success();

    // Simulate a crash mid-append
    let mut journal = OpenOptions::new().append(true).open(&journal_path).unwrap();
    write!(journal, "{{\"event\":\"voided\",\"patient\":2,\"by\":\"tes").unwrap();
    drop(journal);

    cli(&data_dir, &config)
        .arg("replay")
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ Replayed 1 event(s)"))
        .stdout(predicate::str::contains("0 membership(s) changed"));

    // Patient 2 was never voided
    cli(&data_dir, &config)
        .args(["containing", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Replayed"));
}

#[test]
fn test_replay_reapplies_journaled_void() {
    let (temp_dir, config) = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    cli(&data_dir, &config)
        .args(["create", "--name", "Rebuilt", "--patients", "5"])
        .assert()
        .success();
    cli(&data_dir, &config)
        .args(["patient", "void", "5", "--reason", "duplicate"])
        .assert()
        .success();

    // Undo the cascade, then drop the unvoid from the journal
    cli(&data_dir, &config)
        .args(["patient", "unvoid", "5"])
        .assert()
        .success();
    let journal_path = data_dir.join("patient_events.jsonl");
    let journal = fs::read_to_string(&journal_path).unwrap();
    let first = journal.lines().next().unwrap().to_string();
    fs::write(&journal_path, format!("{}\n", first)).unwrap();

    cli(&data_dir, &config)
        .arg("replay")
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ Replayed 1 event(s)"))
        .stdout(predicate::str::contains("1 membership(s) changed"));

    cli(&data_dir, &config)
        .args(["containing", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Patient 5 is not in any cohort."));
}
