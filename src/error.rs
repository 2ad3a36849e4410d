//! Typed error kinds for the pull engine (spec §7).

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Sub-kind of a per-file [`EngineError::Action`] failure.
#[derive(Debug, Error)]
pub enum ActionErrorKind {
    #[error("pull failed: {0}")]
    PullFailed(String),
    #[error("hard link failed: {0}")]
    LinkFailed(String),
    #[error("copy failed: {0}")]
    CopyFailed(String),
    #[error("delete failed: {0}")]
    DeleteFailed(String),
    #[error("set mtime failed: {0}")]
    MtimeFailed(String),
}

/// Top-level error kinds, one variant per kind named in spec §7.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad arguments, unreadable exclude file. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// adb binary missing, device not authorized, dropped connection. Fatal.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote scanner could not parse a `find` record. Fatal.
    #[error("failed to parse remote listing at line {line:?}: {reason}")]
    ScannerParse { line: String, reason: String },

    /// The device's `find` lacks the flags the fast path needs, and the
    /// stat-based fallback also failed to produce usable output. Fatal.
    #[error("device find is unsupported: {0}")]
    ScannerUnsupported(String),

    /// A single action failed after exhausting retries. Recovered locally;
    /// appended to the run's failure list, run continues.
    #[error("action failed for {path}: {kind}")]
    Action { path: PathBuf, kind: ActionErrorKind },

    /// Target unwritable, out of space. Fatal only for out-of-space; other
    /// filesystem errors are surfaced the same way but the orchestrator
    /// treats any FilesystemError reaching it as fatal per §7.
    #[error("filesystem error: {0}")]
    Filesystem(#[source] io::Error),

    /// The orchestrator was asked to stop; propagates after in-flight
    /// cleanup finishes.
    #[error("cancelled")]
    Cancelled,
}

impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        EngineError::Filesystem(e)
    }
}
