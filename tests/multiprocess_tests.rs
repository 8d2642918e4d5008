//! End-to-end runs: fork, pin, barrier, reap
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests

use predicates::prelude::*;
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

fn meter(work_dir: &std::path::Path, args: &[&str]) -> assert_cmd::assert::Assert {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("syscallmeter");
    cmd.args(["-j", "2"]).args(args).arg("-d").arg(work_dir).assert()
}

#[test]
#[serial]
fn test_open_run_reports_workers() {
    let tmp = TempDir::new().unwrap();
    let work_dir = tmp.path().join("open");

    meter(&work_dir, &["-m", "open", "-c", "16", "-f", "8", "-s", "64"])
        .success()
        .stdout(predicate::str::starts_with("Found "))
        .stdout(predicate::str::contains("Settings:"))
        .stdout(predicate::str::contains("CYCLES = 16"))
        .stdout(predicate::str::contains("Starting..."))
        .stdout(predicate::str::contains("Worker is done with 16 in"))
        .stdout(predicate::str::is_match(r"avg\.time = \d+\.\d{6} ns\)").unwrap())
        .stdout(predicate::str::contains("Done"));

    for i in 0..8 {
        let meta = fs::metadata(work_dir.join(format!("file_{}", i))).unwrap();
        assert_eq!(meta.len(), 64);
    }
}

#[test]
#[serial]
fn test_open_reuses_existing_dir() {
    let tmp = TempDir::new().unwrap();
    let work_dir = tmp.path().join("again");
    fs::create_dir(&work_dir).unwrap();

    meter(&work_dir, &["-m", "open", "-c", "4", "-f", "2", "-s", "32"]).success();
}

#[test]
#[serial]
fn test_rename_run() {
    let tmp = TempDir::new().unwrap();
    let work_dir = tmp.path().join("rename");

    meter(&work_dir, &["-m", "rename", "-c", "10", "-f", "1", "-s", "32"])
        .success()
        .stdout(predicate::str::contains("Worker is done with 10 in"));

    assert!(work_dir.join("rename_0_a").exists());
}

#[test]
#[serial]
fn test_write_unlink_run_leaves_no_files() {
    let tmp = TempDir::new().unwrap();
    let work_dir = tmp.path().join("unlink");

    meter(&work_dir, &["-m", "write_unlink", "-c", "5", "-f", "1", "-s", "128"]).success();

    assert_eq!(fs::read_dir(&work_dir).unwrap().count(), 0);
}

#[test]
#[serial]
fn test_write_sync_onlywrite_fills_file_set() {
    let tmp = TempDir::new().unwrap();
    let work_dir = tmp.path().join("ws");

    meter(
        &work_dir,
        &["-m", "write_sync", "-c", "1", "-f", "4", "-s", "1024", "-o", "onlywrite"],
    )
    .success()
    .stdout(predicate::str::contains("Done"));

    for i in 0..4 {
        let meta = fs::metadata(work_dir.join(format!("file_{}", i))).unwrap();
        assert_eq!(meta.len(), 1024);
    }
    assert!(!work_dir.join("file_4").exists());
}

#[test]
#[serial]
fn test_write_sync_sharesync_run() {
    let tmp = TempDir::new().unwrap();
    let work_dir = tmp.path().join("ws_shared");

    meter(
        &work_dir,
        &["-m", "write_sync", "-c", "1", "-f", "3", "-s", "4096", "-o", "sharesync2,doublelast"],
    )
    .success();

    assert!(!work_dir.join("file_3").exists());
}

#[test]
#[serial]
fn test_clock_gettime_run() {
    let tmp = TempDir::new().unwrap();
    let work_dir = tmp.path().join("clock");

    meter(&work_dir, &["-m", "clock_gettime", "-c", "1", "-o", "show,histo"])
        .success()
        .stdout(predicate::str::contains("Mode clock_gettime"))
        .stdout(predicate::str::contains("Log2 histogram"));
}

#[test]
#[serial]
fn test_progress_flag_accepted() {
    let tmp = TempDir::new().unwrap();
    let work_dir = tmp.path().join("progress");

    meter(&work_dir, &["-p", "-m", "open", "-c", "8", "-f", "2", "-s", "16"])
        .success()
        .stdout(predicate::str::contains("Done"));
}
