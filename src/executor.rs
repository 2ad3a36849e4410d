//! Action executor (C6): runs the reconciler's plan with bounded
//! parallelism (spec §4.6, §5).
//!
//! The bounded worker pool is a `rayon` thread pool sized to
//! `options.concurrency`, grounded in the `rayon`-based parallel file
//! operations of `adevice` (`msft-mirror-aosp-platform.tools.asuite`, a
//! sibling adb-driving tool in this pack) and `rustic_core`/`httm`'s use of
//! `rayon::prelude::*` for parallel backup-file work (`other_examples`).
//! Per-file staging uses `tempfile::NamedTempFile`, generalizing the
//! `.tmp-<random>-<basename>` guarantee spec §6 names into an atomic
//! `persist()` rename.

use crate::adb::{AdbFacade, AdbFault};
use crate::error::{ActionErrorKind, EngineError};
use crate::reconcile::{local_dest, Action};
use rayon::ThreadPool;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{info, warn};

const RETRY_BACKOFFS: [Duration; 3] = [
    Duration::from_millis(250),
    Duration::from_secs(1),
    Duration::from_secs(4),
];

/// Tunable knobs the orchestrator passes down from [`PullOptions`].
pub struct ExecutorConfig {
    pub concurrency: usize,
    pub dry_run: bool,
    pub hardlink_supported: bool,
}

/// Per-run totals reported back to the orchestrator (spec §4.8).
#[derive(Debug, Default)]
pub struct ExecutionSummary {
    pub files_pulled: u64,
    pub files_linked: u64,
    pub files_copied: u64,
    pub files_deleted: u64,
    pub bytes_transferred: u64,
    pub failures: Vec<(PathBuf, EngineError)>,
}

struct Counters {
    files_pulled: AtomicU64,
    files_linked: AtomicU64,
    files_copied: AtomicU64,
    files_deleted: AtomicU64,
    bytes_transferred: AtomicU64,
    failures: Mutex<Vec<(PathBuf, EngineError)>>,
    hardlink_available: AtomicBool,
}

impl Counters {
    fn new(hardlink_supported: bool) -> Self {
        Self {
            files_pulled: AtomicU64::new(0),
            files_linked: AtomicU64::new(0),
            files_copied: AtomicU64::new(0),
            files_deleted: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            failures: Mutex::new(Vec::new()),
            hardlink_available: AtomicBool::new(hardlink_supported),
        }
    }

    fn into_summary(self) -> ExecutionSummary {
        ExecutionSummary {
            files_pulled: self.files_pulled.load(Ordering::Relaxed),
            files_linked: self.files_linked.load(Ordering::Relaxed),
            files_copied: self.files_copied.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            failures: self.failures.into_inner().expect("mutex not poisoned"),
        }
    }

    fn record_failure(&self, path: PathBuf, err: EngineError) {
        self.failures.lock().expect("mutex not poisoned").push((path, err));
    }
}

/// Executes `actions` against `local_root`, pulling file content from
/// `serial`'s `remote_root` and linking/copying unchanged files out of
/// `reference_root` when present. Returns once every action has either
/// completed or exhausted its retries; individual failures do not abort
/// the run (spec §7 propagation policy for `ActionError`).
#[allow(clippy::too_many_arguments)]
pub fn execute<A: AdbFacade>(
    actions: Vec<Action>,
    adb: &A,
    serial: &str,
    remote_root: &str,
    local_root: &Path,
    reference_root: Option<&Path>,
    cfg: &ExecutorConfig,
    cancel: &AtomicBool,
) -> Result<ExecutionSummary, EngineError> {
    let pool = build_pool(cfg.concurrency);
    let counters = Counters::new(cfg.hardlink_supported);

    let (deletes, rest): (Vec<Action>, Vec<Action>) =
        actions.into_iter().partition(|a| matches!(a, Action::Delete(_)));

    // Group CreateDir/PullFile/LinkOrCopy by target depth; shallower
    // depths complete (as a pool-wide barrier) before deeper ones start,
    // so a directory always exists before anything inside it runs.
    let mut by_depth: BTreeMap<usize, Vec<Action>> = BTreeMap::new();
    for action in rest {
        by_depth.entry(action.depth()).or_default().push(action);
    }

    for (_, group) in by_depth {
        if cancel.load(Ordering::Relaxed) {
            return Err(EngineError::Cancelled);
        }
        pool.install(|| {
            use rayon::prelude::*;
            group.par_iter().for_each(|action| {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                run_one(
                    action,
                    adb,
                    serial,
                    remote_root,
                    local_root,
                    reference_root,
                    cfg.dry_run,
                    &counters,
                );
            });
        });
    }

    if cancel.load(Ordering::Relaxed) {
        return Err(EngineError::Cancelled);
    }

    // Deletes run last, strictly after every other action (spec §4.6).
    for action in &deletes {
        if cancel.load(Ordering::Relaxed) {
            return Err(EngineError::Cancelled);
        }
        run_one(
            action,
            adb,
            serial,
            remote_root,
            local_root,
            reference_root,
            cfg.dry_run,
            &counters,
        );
    }

    Ok(counters.into_summary())
}

fn build_pool(concurrency: usize) -> ThreadPool {
    rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .build()
        .expect("thread pool builds")
}

#[allow(clippy::too_many_arguments)]
fn run_one<A: AdbFacade>(
    action: &Action,
    adb: &A,
    serial: &str,
    remote_root: &str,
    local_root: &Path,
    reference_root: Option<&Path>,
    dry_run: bool,
    counters: &Counters,
) {
    match action {
        Action::CreateDir(rel) => {
            let dest = local_dest(local_root, rel);
            if dry_run {
                info!(path = %rel.as_str(), "would create directory");
                return;
            }
            if let Err(e) = fs::create_dir_all(&dest) {
                counters.record_failure(dest, EngineError::Filesystem(e));
            } else {
                info!(path = %rel.as_str(), "created directory");
            }
        }
        Action::PullFile {
            remote_path,
            local_path,
            expected_size,
            expected_mtime,
        } => {
            let dest = local_dest(local_root, local_path);
            warn_on_windows_dot_suffix(local_path.as_str());
            if dry_run {
                info!(path = %local_path.as_str(), "would pull");
                return;
            }
            if let Some(parent) = dest.parent() {
                let _ = fs::create_dir_all(parent);
            }
            match pull_with_retry(adb, serial, remote_root, remote_path.as_str(), &dest) {
                Ok(()) => {
                    if let Err(e) = set_mtime(&dest, *expected_mtime) {
                        counters.record_failure(
                            dest.clone(),
                            EngineError::Action {
                                path: dest,
                                kind: ActionErrorKind::MtimeFailed(e.to_string()),
                            },
                        );
                        return;
                    }
                    counters.files_pulled.fetch_add(1, Ordering::Relaxed);
                    counters
                        .bytes_transferred
                        .fetch_add(*expected_size, Ordering::Relaxed);
                    info!(path = %local_path.as_str(), "pulled");
                }
                Err(e) => counters.record_failure(
                    dest.clone(),
                    EngineError::Action {
                        path: dest,
                        kind: ActionErrorKind::PullFailed(e),
                    },
                ),
            }
        }
        Action::LinkOrCopy {
            source_path,
            local_path,
            expected_size,
            expected_mtime,
        } => {
            let dest = local_dest(local_root, local_path);
            warn_on_windows_dot_suffix(local_path.as_str());
            if dry_run {
                info!(path = %local_path.as_str(), "would link or copy");
                return;
            }
            if let Some(parent) = dest.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let reference_root = match reference_root {
                Some(r) => r,
                None => {
                    counters.record_failure(
                        dest.clone(),
                        EngineError::Action {
                            path: dest,
                            kind: ActionErrorKind::LinkFailed(
                                "no reference snapshot configured".to_string(),
                            ),
                        },
                    );
                    return;
                }
            };
            let src = local_dest(reference_root, source_path);

            let try_link = counters.hardlink_available.load(Ordering::Relaxed);
            let linked = if try_link {
                match fs::hard_link(&src, &dest) {
                    Ok(()) => true,
                    Err(e) => {
                        if is_link_fallback_errno(&e) {
                            counters.hardlink_available.store(false, Ordering::Relaxed);
                        }
                        false
                    }
                }
            } else {
                false
            };

            if linked {
                counters.files_linked.fetch_add(1, Ordering::Relaxed);
                info!(path = %local_path.as_str(), "linked to reference snapshot");
                return;
            }

            match fs::copy(&src, &dest) {
                Ok(bytes) => {
                    if let Err(e) = set_mtime(&dest, *expected_mtime) {
                        counters.record_failure(
                            dest.clone(),
                            EngineError::Action {
                                path: dest,
                                kind: ActionErrorKind::MtimeFailed(e.to_string()),
                            },
                        );
                        return;
                    }
                    counters.files_copied.fetch_add(1, Ordering::Relaxed);
                    counters
                        .bytes_transferred
                        .fetch_add(bytes.max(*expected_size), Ordering::Relaxed);
                    info!(path = %local_path.as_str(), "copied from reference snapshot");
                }
                Err(e) => counters.record_failure(
                    dest.clone(),
                    EngineError::Action {
                        path: dest,
                        kind: ActionErrorKind::CopyFailed(e.to_string()),
                    },
                ),
            }
        }
        Action::Delete(rel) => {
            let dest = local_dest(local_root, rel);
            if dry_run {
                info!(path = %rel.as_str(), "would delete");
                return;
            }
            let result = if dest.is_dir() {
                fs::remove_dir(&dest)
            } else {
                fs::remove_file(&dest)
            };
            match result {
                Ok(()) => {
                    counters.files_deleted.fetch_add(1, Ordering::Relaxed);
                    info!(path = %rel.as_str(), "deleted");
                }
                Err(e) if e.kind() == std::io::ErrorKind::DirectoryNotEmpty => {
                    info!(path = %rel.as_str(), "directory holds only excluded files; left in place");
                }
                Err(e) => {
                    warn!(path = %rel.as_str(), error = %e, "could not delete");
                    counters.record_failure(
                        dest.clone(),
                        EngineError::Action {
                            path: dest,
                            kind: ActionErrorKind::DeleteFailed(e.to_string()),
                        },
                    );
                }
            }
        }
        Action::SetMtime(rel, mtime) => {
            let dest = local_dest(local_root, rel);
            if dry_run {
                return;
            }
            if let Err(e) = set_mtime(&dest, *mtime) {
                counters.record_failure(
                    dest.clone(),
                    EngineError::Action {
                        path: dest,
                        kind: ActionErrorKind::MtimeFailed(e.to_string()),
                    },
                );
            }
        }
    }
}

/// `adb pull -a <remote> <staging>` into a temp file beside `dest`, then
/// an atomic rename into place. Retried up to 3 times with exponential
/// backoff on transient failure (spec §4.6).
fn pull_with_retry<A: AdbFacade>(
    adb: &A,
    serial: &str,
    remote_root: &str,
    remote_rel: &str,
    dest: &Path,
) -> Result<(), String> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let remote_full = format!("{}/{}", remote_root.trim_end_matches('/'), remote_rel);

    let mut last_err = String::new();
    for (attempt, backoff) in std::iter::once(None)
        .chain(RETRY_BACKOFFS.iter().map(Some))
        .enumerate()
    {
        if let Some(backoff) = backoff {
            std::thread::sleep(*backoff);
        }
        let staging = match tempfile::Builder::new()
            .prefix(".tmp-")
            .suffix(&format!("-{}", file_name_of(dest)))
            .tempfile_in(dir)
        {
            Ok(f) => f,
            Err(e) => {
                last_err = e.to_string();
                continue;
            }
        };
        let staging_path = staging.path().to_path_buf();
        drop(staging); // adb pull needs to create the file itself via its own path

        match adb.run(serial, &["pull", "-a", &remote_full, staging_path.to_str().unwrap_or("")]) {
            Ok(_) => match fs::rename(&staging_path, dest) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let _ = fs::remove_file(&staging_path);
                    last_err = e.to_string();
                }
            },
            Err(AdbFault::Retryable(msg)) | Err(AdbFault::Permanent(msg)) => {
                let _ = fs::remove_file(&staging_path);
                last_err = msg;
                if attempt == RETRY_BACKOFFS.len() {
                    break;
                }
            }
        }
    }
    Err(last_err)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Android permits filenames ending in `.` (e.g. a trailing-dot extension
/// left by some camera apps); NTFS strips the trailing dot on creation, so
/// a pull onto Windows can silently land at a different path than the one
/// reported in the summary.
#[cfg(target_os = "windows")]
fn warn_on_windows_dot_suffix(local_path: &str) {
    if local_path.ends_with('.') {
        warn!(path = local_path, "filename ends in '.'; NTFS will strip the trailing dot on creation");
    }
}

#[cfg(not(target_os = "windows"))]
fn warn_on_windows_dot_suffix(_local_path: &str) {}

#[cfg(unix)]
fn is_link_fallback_errno(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    const EXDEV: i32 = 18;
    const ENOSYS: i32 = 38;
    const EPERM: i32 = 1;
    const EACCES: i32 = 13;
    match e.raw_os_error() {
        Some(EXDEV) | Some(ENOSYS) | Some(EPERM) | Some(EACCES) => true,
        _ => matches!(e.kind(), ErrorKind::Unsupported | ErrorKind::PermissionDenied),
    }
}

#[cfg(not(unix))]
fn is_link_fallback_errno(_e: &std::io::Error) -> bool {
    true
}

fn set_mtime(path: &Path, mtime: i64) -> std::io::Result<()> {
    let file = File::options().write(true).open(path)?;
    let mtime = mtime.max(0) as u64;
    file.set_modified(UNIX_EPOCH + Duration::from_secs(mtime))
}
