//! End-to-end tests against a local destination ("localhost" host sentinel)
//!
//! Transfer tests shell out to a real rsync and are skipped when one is not
//! installed; verification tests only need coreutils/findutils.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn rsync_available() -> bool {
    std::process::Command::new("rsync")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// source tree `foo` with three top-level files
fn setup_source(dir: &std::path::Path) -> std::path::PathBuf {
    let src = dir.join("foo");
    std::fs::create_dir(&src).unwrap();
    std::fs::write(src.join("a.txt"), "alpha").unwrap();
    std::fs::write(src.join("b.txt"), "bravo").unwrap();
    std::fs::write(src.join("c.txt"), "charlie").unwrap();
    src
}

#[test]
fn missing_destination_exits_with_dedicated_code() {
    let dir = tempdir().unwrap();
    let src = setup_source(dir.path());
    Command::cargo_bin("pmv")
        .unwrap()
        .arg(&src)
        .arg("localhost")
        .arg("/nonexistent/pmv/dest")
        .assert()
        .code(3);
}

#[test]
fn transfer_three_files_over_two_streams() {
    if !rsync_available() {
        eprintln!("skipping: rsync not installed");
        return;
    }
    let dir = tempdir().unwrap();
    let src = setup_source(dir.path());
    let dst = dir.path().join("dst");
    std::fs::create_dir(&dst).unwrap();
    Command::cargo_bin("pmv")
        .unwrap()
        .args(["-n", "2", "--timeout", "1", "--summary"])
        .arg(&src)
        .arg("localhost")
        .arg(&dst)
        .assert()
        .code(154)
        .stdout(predicate::str::contains("tasks executed:"));
    let mirrored = dst.join("foo");
    for (name, contents) in [("a.txt", "alpha"), ("b.txt", "bravo"), ("c.txt", "charlie")] {
        assert_eq!(std::fs::read_to_string(mirrored.join(name)).unwrap(), contents);
    }
}

#[test]
fn dry_run_copies_nothing() {
    if !rsync_available() {
        eprintln!("skipping: rsync not installed");
        return;
    }
    let dir = tempdir().unwrap();
    let src = setup_source(dir.path());
    let dst = dir.path().join("dst");
    std::fs::create_dir(&dst).unwrap();
    Command::cargo_bin("pmv")
        .unwrap()
        .arg("--dry-run")
        .arg(&src)
        .arg("localhost")
        .arg(&dst)
        .assert()
        .code(154);
    assert!(!dst.join("foo").exists());
}

#[test]
fn hidden_entries_are_not_transferred() {
    if !rsync_available() {
        eprintln!("skipping: rsync not installed");
        return;
    }
    let dir = tempdir().unwrap();
    let src = setup_source(dir.path());
    std::fs::write(src.join(".secret"), "hidden").unwrap();
    let dst = dir.path().join("dst");
    std::fs::create_dir(&dst).unwrap();
    Command::cargo_bin("pmv")
        .unwrap()
        .arg(&src)
        .arg("localhost")
        .arg(&dst)
        .assert()
        .code(154);
    let mirrored = dst.join("foo");
    assert!(mirrored.join("a.txt").exists());
    assert!(!mirrored.join(".secret").exists());
}

/// mirror `src` under `dst/<basename>` without rsync
fn mirror(src: &std::path::Path, dst: &std::path::Path) -> std::path::PathBuf {
    let target = dst.join(src.file_name().unwrap());
    std::fs::create_dir_all(&target).unwrap();
    for entry in std::fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        std::fs::copy(entry.path(), target.join(entry.file_name())).unwrap();
    }
    target
}

#[test]
fn checksum_mode_passes_on_identical_trees() {
    let dir = tempdir().unwrap();
    let src = setup_source(dir.path());
    let dst = dir.path().join("dst");
    std::fs::create_dir(&dst).unwrap();
    mirror(&src, &dst);
    Command::cargo_bin("pmv")
        .unwrap()
        .args(["--checksum", "--repair", "never"])
        .arg(&src)
        .arg("localhost")
        .arg(&dst)
        .assert()
        .code(0);
}

#[test]
fn checksum_mode_flags_corruption() {
    let dir = tempdir().unwrap();
    let src = setup_source(dir.path());
    let dst = dir.path().join("dst");
    std::fs::create_dir(&dst).unwrap();
    let mirrored = mirror(&src, &dst);
    std::fs::write(mirrored.join("b.txt"), "corrupted").unwrap();
    Command::cargo_bin("pmv")
        .unwrap()
        .args(["--checksum", "--repair", "never"])
        .arg(&src)
        .arg("localhost")
        .arg(&dst)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("checksum mismatch"));
}

#[test]
fn checksum_mode_reports_missing_files() {
    let dir = tempdir().unwrap();
    let src = setup_source(dir.path());
    let dst = dir.path().join("dst");
    std::fs::create_dir(&dst).unwrap();
    let mirrored = mirror(&src, &dst);
    std::fs::remove_file(mirrored.join("c.txt")).unwrap();
    Command::cargo_bin("pmv")
        .unwrap()
        .args(["--checksum", "--repair", "never"])
        .arg(&src)
        .arg("localhost")
        .arg(&dst)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("missing on destination: c.txt"));
}

#[test]
fn checksum_mode_fails_when_repair_transfer_fails() {
    use std::os::unix::fs::PermissionsExt;
    let dir = tempdir().unwrap();
    let src = setup_source(dir.path());
    let dst = dir.path().join("dst");
    std::fs::create_dir(&dst).unwrap();
    let mirrored = mirror(&src, &dst);
    std::fs::remove_file(mirrored.join("b.txt")).unwrap();
    // rsync stand-in that always fails, so the repair cannot succeed
    let bin = dir.path().join("bin");
    std::fs::create_dir(&bin).unwrap();
    let fake_rsync = bin.join("rsync");
    std::fs::write(&fake_rsync, "#!/bin/sh\nexit 23\n").unwrap();
    std::fs::set_permissions(&fake_rsync, std::fs::Permissions::from_mode(0o755)).unwrap();
    let path = format!(
        "{}:{}",
        bin.display(),
        std::env::var("PATH").unwrap_or_default()
    );
    Command::cargo_bin("pmv")
        .unwrap()
        .env("PATH", path)
        .args(["--checksum", "--repair", "always"])
        .arg(&src)
        .arg("localhost")
        .arg(&dst)
        .assert()
        .code(1);
    // the destination is still incomplete
    assert!(!mirrored.join("b.txt").exists());
}

#[test]
fn checksum_mode_repairs_missing_files() {
    if !rsync_available() {
        eprintln!("skipping: rsync not installed");
        return;
    }
    let dir = tempdir().unwrap();
    let src = setup_source(dir.path());
    let dst = dir.path().join("dst");
    std::fs::create_dir(&dst).unwrap();
    let mirrored = mirror(&src, &dst);
    std::fs::remove_file(mirrored.join("c.txt")).unwrap();
    Command::cargo_bin("pmv")
        .unwrap()
        .args(["--checksum", "--repair", "always"])
        .arg(&src)
        .arg("localhost")
        .arg(&dst)
        .assert()
        .code(0);
    assert_eq!(
        std::fs::read_to_string(mirrored.join("c.txt")).unwrap(),
        "charlie"
    );
}
