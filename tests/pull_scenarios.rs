//! End-to-end pull scenarios driven against a [`FakeAdb`] instead of a
//! real device, mirroring the literal-value scenarios the engine is
//! expected to reproduce.

mod common;

use abackup::exclude::ExcludeSet;
use abackup::orchestrator::{pull_with, PullOptions};
use common::{dir, file, FakeAdb};
use std::sync::atomic::AtomicBool;

fn options(
    remote_root: &str,
    local_root: &std::path::Path,
    excludes: ExcludeSet,
) -> PullOptions {
    PullOptions::new(
        "FAKESERIAL".to_string(),
        remote_root.to_string(),
        local_root.to_path_buf(),
        None,
        excludes,
    )
}

#[test]
fn empty_remote_creates_only_the_directory() {
    let local = tempfile::tempdir().unwrap();
    let adb = FakeAdb::new(vec![dir("/sdcard/src/a")]);
    let opts = options("/sdcard/src", local.path(), ExcludeSet::empty());
    let cancel = AtomicBool::new(false);

    let summary = pull_with(&adb, &opts, &cancel).unwrap();

    assert!(summary.failures.is_empty());
    assert!(local.path().join("a").is_dir());
    assert_eq!(std::fs::read_dir(local.path()).unwrap().count(), 1);
}

fn set_mtime(path: &std::path::Path, unix_secs: i64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(std::time::UNIX_EPOCH + std::time::Duration::from_secs(unix_secs as u64))
        .unwrap();
}

#[test]
fn unchanged_file_is_skipped_changed_file_is_pulled() {
    let local = tempfile::tempdir().unwrap();
    std::fs::write(local.path().join("x.jpg"), vec![0u8; 1000]).unwrap();
    std::fs::write(local.path().join("y.jpg"), vec![0u8; 2000]).unwrap();
    set_mtime(&local.path().join("x.jpg"), 1_700_000_000);
    set_mtime(&local.path().join("y.jpg"), 1_700_000_100);

    let adb = FakeAdb::new(vec![
        file("/sdcard/src/x.jpg", 1000, 1_700_000_000, &[0u8; 1000]),
        file("/sdcard/src/y.jpg", 2500, 1_700_000_500, &[1u8; 2500]),
    ]);
    let opts = options("/sdcard/src", local.path(), ExcludeSet::empty());
    let cancel = AtomicBool::new(false);

    let summary = pull_with(&adb, &opts, &cancel).unwrap();

    assert_eq!(summary.files_pulled, 1);
    assert_eq!(summary.files_linked, 0);
    assert_eq!(summary.files_copied, 0);
}

#[test]
fn excluded_directory_is_never_pulled() {
    let local = tempfile::tempdir().unwrap();
    let adb = FakeAdb::new(vec![
        dir("/sdcard/DCIM"),
        dir("/sdcard/DCIM/.thumbnails"),
        file("/sdcard/DCIM/.thumbnails/a.bin", 10, 1_700_000_000, b"0123456789"),
        file("/sdcard/DCIM/IMG_1.jpg", 5, 1_700_000_000, b"hello"),
    ]);
    let excludes = ExcludeSet::from_patterns(&[".thumbnails/".to_string()]).unwrap();
    let opts = options("/sdcard/DCIM", local.path(), excludes);
    let cancel = AtomicBool::new(false);

    let summary = pull_with(&adb, &opts, &cancel).unwrap();

    assert_eq!(summary.files_pulled, 1);
    assert!(local.path().join("IMG_1.jpg").exists());
    assert!(!local.path().join(".thumbnails").exists());
}

#[test]
fn extraneous_local_file_deleted_when_requested() {
    let local = tempfile::tempdir().unwrap();
    std::fs::write(local.path().join("old.txt"), b"stale").unwrap();
    let adb = FakeAdb::new(vec![]);
    let mut opts = options("/sdcard/src", local.path(), ExcludeSet::empty());
    opts.delete_extraneous = true;
    let cancel = AtomicBool::new(false);

    let summary = pull_with(&adb, &opts, &cancel).unwrap();

    assert_eq!(summary.files_deleted, 1);
    assert!(!local.path().join("old.txt").exists());
}

#[test]
fn extraneous_local_file_kept_when_delete_disabled() {
    let local = tempfile::tempdir().unwrap();
    std::fs::write(local.path().join("old.txt"), b"stale").unwrap();
    let adb = FakeAdb::new(vec![]);
    let mut opts = options("/sdcard/src", local.path(), ExcludeSet::empty());
    opts.delete_extraneous = false;
    let cancel = AtomicBool::new(false);

    let summary = pull_with(&adb, &opts, &cancel).unwrap();

    assert_eq!(summary.files_deleted, 0);
    assert!(local.path().join("old.txt").exists());
}

#[test]
fn transient_pull_failure_recovers_with_no_staging_remnant() {
    let local = tempfile::tempdir().unwrap();
    let adb = FakeAdb::new(vec![file("/sdcard/src/big.bin", 5, 1_700_000_000, b"hello")])
        .fail_pulls("/sdcard/src/big.bin", 2);
    let opts = options("/sdcard/src", local.path(), ExcludeSet::empty());
    let cancel = AtomicBool::new(false);

    let summary = pull_with(&adb, &opts, &cancel).unwrap();

    assert_eq!(summary.files_pulled, 1);
    assert!(summary.failures.is_empty());
    assert!(local.path().join("big.bin").exists());
    assert!(std::fs::read_dir(local.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .all(|e| !e.file_name().to_string_lossy().starts_with(".tmp-")));
}

#[test]
fn reference_snapshot_reuses_unchanged_file_via_link_or_copy() {
    let local = tempfile::tempdir().unwrap();
    let reference = tempfile::tempdir().unwrap();
    std::fs::write(reference.path().join("photo.jpg"), vec![7u8; 5_000_000]).unwrap();
    set_mtime(&reference.path().join("photo.jpg"), 1_700_000_000);

    let adb = FakeAdb::new(vec![file(
        "/sdcard/src/photo.jpg",
        5_000_000,
        1_700_000_000,
        &[],
    )]);
    let mut opts = options("/sdcard/src", local.path(), ExcludeSet::empty());
    opts.reference_snapshot = Some(reference.path().to_path_buf());
    opts.delete_extraneous = false;
    let cancel = AtomicBool::new(false);

    let summary = pull_with(&adb, &opts, &cancel).unwrap();

    assert_eq!(summary.files_linked + summary.files_copied, 1);
    assert!(local.path().join("photo.jpg").exists());
}

#[test]
fn printf_unsupported_device_falls_back_to_stat_and_still_pulls() {
    let local = tempfile::tempdir().unwrap();
    let adb = FakeAdb::new(vec![
        dir("/sdcard/src"),
        file("/sdcard/src/a.jpg", 5, 1_700_000_000, b"hello"),
    ])
    .without_printf_support();
    let opts = options("/sdcard/src", local.path(), ExcludeSet::empty());
    let cancel = AtomicBool::new(false);

    let summary = pull_with(&adb, &opts, &cancel).unwrap();

    assert!(summary.failures.is_empty());
    assert_eq!(summary.files_pulled, 1);
    assert!(local.path().join("a.jpg").exists());
}

#[test]
fn dry_run_pulls_nothing_and_leaves_local_root_untouched() {
    let local = tempfile::tempdir().unwrap();
    std::fs::remove_dir(local.path()).unwrap();
    let adb = FakeAdb::new(vec![
        dir("/sdcard/src/a"),
        file("/sdcard/src/new.jpg", 5, 1_700_000_000, b"hello"),
    ]);
    let mut opts = options("/sdcard/src", local.path(), ExcludeSet::empty());
    opts.dry_run = true;
    let cancel = AtomicBool::new(false);

    let summary = pull_with(&adb, &opts, &cancel).unwrap();

    assert_eq!(summary.files_pulled, 0);
    assert!(summary.failures.is_empty());
    assert!(!local.path().exists());
}

#[test]
fn cancellation_before_execution_reports_cancelled() {
    let local = tempfile::tempdir().unwrap();
    let adb = FakeAdb::new(vec![file(
        "/sdcard/src/a.jpg",
        5,
        1_700_000_000,
        b"hello",
    )]);
    let opts = options("/sdcard/src", local.path(), ExcludeSet::empty());
    let cancel = AtomicBool::new(true);

    let err = pull_with(&adb, &opts, &cancel).unwrap_err();

    assert!(matches!(err, abackup::error::EngineError::Cancelled));
    assert!(std::fs::read_dir(local.path()).unwrap().next().is_none());
}
