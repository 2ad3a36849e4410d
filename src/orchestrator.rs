//! Pull orchestrator (C8): the top-level `pull()` entry point that
//! sequences C2–C6 (spec §4.8).

use crate::adb::{Adb, AdbFacade, AdbFault};
use crate::error::EngineError;
use crate::exclude::ExcludeSet;
use crate::executor::{self, ExecutionSummary, ExecutorConfig};
use crate::hardlink::{self, LinkSupport};
use crate::local_scan;
use crate::reconcile::{self};
use crate::record::MtimeTolerance;
use crate::remote_scan;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Mirrors spec §3 `PullOptions`.
pub struct PullOptions {
    pub device_serial: String,
    pub remote_root: String,
    pub local_root: PathBuf,
    pub reference_snapshot: Option<PathBuf>,
    pub excludes: ExcludeSet,
    pub delete_extraneous: bool,
    pub concurrency: usize,
    pub dry_run: bool,
    pub mtime_tolerance: MtimeTolerance,
}

impl PullOptions {
    /// `delete_extraneous` defaults to `true` in single-version mode
    /// (no reference snapshot) and `false` in multi-version mode, per
    /// spec §3; callers that want to override this explicitly should
    /// set the field directly after construction.
    pub fn new(
        device_serial: String,
        remote_root: String,
        local_root: PathBuf,
        reference_snapshot: Option<PathBuf>,
        excludes: ExcludeSet,
    ) -> Self {
        let delete_extraneous = reference_snapshot.is_none();
        Self {
            device_serial,
            remote_root,
            local_root,
            reference_snapshot,
            excludes,
            delete_extraneous,
            concurrency: 4,
            dry_run: false,
            mtime_tolerance: MtimeTolerance::OneSecond,
        }
    }
}

/// Top-level summary returned from a successful (possibly
/// partially-failed) run (spec §4.8).
#[derive(Debug, Default)]
pub struct Summary {
    pub files_pulled: u64,
    pub files_linked: u64,
    pub files_copied: u64,
    pub files_deleted: u64,
    pub bytes_transferred: u64,
    pub failures: Vec<(PathBuf, EngineError)>,
}

impl From<ExecutionSummary> for Summary {
    fn from(s: ExecutionSummary) -> Self {
        Self {
            files_pulled: s.files_pulled,
            files_linked: s.files_linked,
            files_copied: s.files_copied,
            files_deleted: s.files_deleted,
            bytes_transferred: s.bytes_transferred,
            failures: s.failures,
        }
    }
}

/// Deletes any `.tmp-*` staging remnant in `local_root` before scanning.
/// Spec §6: "on startup, any file matching this pattern ... is deleted
/// before scanning"; the crash-recovery guarantee staging naming exists
/// to provide.
fn cleanup_stale_staging(local_root: &Path) {
    let Ok(entries) = std::fs::read_dir(local_root) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(".tmp-") {
            let path = entry.path();
            if path.is_dir() {
                let _ = std::fs::remove_dir_all(&path);
            } else {
                let _ = std::fs::remove_file(&path);
            }
            warn!(path = %path.display(), "removed stale staging file from a previous run");
        }
    }
    // Recurse one level at a time as directories are visited normally by
    // the local scanner; staging files are only ever written beside their
    // destination, so a shallow top-level sweep plus per-directory sweeps
    // during the scan below is sufficient. Subdirectories are covered by
    // repeating the same check while walking.
    if let Ok(entries) = std::fs::read_dir(local_root) {
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                cleanup_stale_staging(&entry.path());
            }
        }
    }
}

/// Runs one incremental pull against a real adb binary.
pub fn pull(options: &PullOptions, cancel: &AtomicBool) -> Result<Summary, EngineError> {
    pull_with(&Adb::default(), options, cancel)
}

/// Runs one incremental pull. See spec §4.8 for the exact sequencing.
/// Generic over [`AdbFacade`] so tests can drive a fake device instead of
/// shelling out to a real one.
pub fn pull_with<A: AdbFacade>(
    adb: &A,
    options: &PullOptions,
    cancel: &AtomicBool,
) -> Result<Summary, EngineError> {
    if !options.dry_run {
        std::fs::create_dir_all(&options.local_root)?;
        cleanup_stale_staging(&options.local_root);
    }

    if cancel.load(Ordering::Relaxed) {
        return Err(EngineError::Cancelled);
    }

    // The probe itself writes and removes a scratch file; skip it in
    // dry-run mode (--dry-run promises not to touch the filesystem) since
    // the executor's dry-run branch never consults `hardlink_supported`.
    let link_support = match &options.reference_snapshot {
        Some(reference) if !options.dry_run => hardlink::probe(reference, &options.local_root),
        _ => LinkSupport::Unsupported,
    };
    if matches!(link_support, LinkSupport::Unsupported) && options.reference_snapshot.is_some() {
        info!("reference snapshot present but hard links are unsupported here; falling back to copy");
    }

    // C2/C3 (and C3 again on the reference) conceptually run in parallel;
    // each is I/O-bound on a different resource (one adb round trip, two
    // independent local walks) so plain scoped threads are enough.
    let (remote_result, local_result, reference_result) = std::thread::scope(|scope| {
        let remote_handle = scope.spawn(|| {
            remote_scan::scan(adb, &options.device_serial, &options.remote_root, &options.excludes)
        });
        let local_handle =
            scope.spawn(|| local_scan::scan(&options.local_root, &options.excludes));
        let reference_handle = options.reference_snapshot.as_ref().map(|reference| {
            scope.spawn(|| local_scan::scan(reference, &options.excludes))
        });
        (
            remote_handle.join().expect("remote scan thread did not panic"),
            local_handle.join().expect("local scan thread did not panic"),
            reference_handle.map(|h| h.join().expect("reference scan thread did not panic")),
        )
    });

    let remote = remote_result?;
    let local = local_result;
    let reference = reference_result;

    if cancel.load(Ordering::Relaxed) {
        return Err(EngineError::Cancelled);
    }

    let actions = reconcile::plan(
        &remote,
        &local,
        reference.as_ref(),
        options.mtime_tolerance,
        options.delete_extraneous,
    );

    let exec_cfg = ExecutorConfig {
        concurrency: options.concurrency,
        dry_run: options.dry_run,
        hardlink_supported: matches!(link_support, LinkSupport::Supported),
    };
    let exec_summary = executor::execute(
        actions,
        adb,
        &options.device_serial,
        &options.remote_root,
        &options.local_root,
        options.reference_snapshot.as_deref(),
        &exec_cfg,
        cancel,
    )?;

    Ok(exec_summary.into())
}

/// Guidance the CLI prints on a [`EngineError::Transport`] failure (spec
/// §7 "`TransportError` prints guidance").
pub const TRANSPORT_GUIDANCE: &str =
    "check `adb devices`, authorize this host on the device if prompted, or re-plug the cable";

/// Resolves a device serial when the caller did not supply one: if
/// exactly one device is visible to `adb devices`, use it; otherwise
/// return a `TransportError` with the guidance text above (the
/// "supplemented" device-selection behavior; see SPEC_FULL.md).
pub fn resolve_device_serial(explicit: Option<String>) -> Result<String, EngineError> {
    if let Some(serial) = explicit {
        return Ok(serial);
    }
    let adb = Adb::default();
    match adb.start_server() {
        Ok(()) => {}
        Err(AdbFault::Permanent(msg)) if msg.contains("daemon not running") => {}
        Err(fault) => return Err(fault.into()),
    }
    let devices = adb
        .devices()
        .map_err(EngineError::from)?;
    match devices.len() {
        1 => Ok(devices.into_iter().next().unwrap()),
        0 => Err(EngineError::Transport(format!(
            "no device found; {TRANSPORT_GUIDANCE}"
        ))),
        _ => Err(EngineError::Transport(format!(
            "multiple devices found; pass --device <serial>. {TRANSPORT_GUIDANCE}"
        ))),
    }
}
