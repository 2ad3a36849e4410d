//! The data model shared by both scanners and the reconciler (spec §3).

use std::collections::HashMap;
use typed_path::Utf8UnixPathBuf as UnixPathBuf;

/// The kind of a directory entry, as reported by either scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    File,
    Dir,
    Symlink,
    Other,
}

/// One entry in an [`Inventory`]. `path` is POSIX-style, relative to the
/// scan root, and never leads with `/` or contains `.`/`..` segments.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: UnixPathBuf,
    pub kind: Kind,
    pub size: u64,
    pub mtime: i64,
}

impl FileRecord {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, Kind::Dir)
    }
}

/// A mapping from relative path to [`FileRecord`]. Insertion order is not
/// meaningful; keys are unique relative paths.
pub type Inventory = HashMap<UnixPathBuf, FileRecord>;

/// Mtime comparison tolerance. exFAT/FAT filesystems round to 2-second
/// buckets (spec §4.5, §9); everything else gets the tighter 1-second
/// tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtimeTolerance {
    OneSecond,
    TwoSeconds,
}

impl MtimeTolerance {
    pub fn seconds(self) -> i64 {
        match self {
            MtimeTolerance::OneSecond => 1,
            MtimeTolerance::TwoSeconds => 2,
        }
    }
}

/// Whether two records are "the same file" for reconciliation purposes:
/// same size, and mtimes within `tol`.
pub fn records_match(a: &FileRecord, b: &FileRecord, tol: MtimeTolerance) -> bool {
    a.size == b.size && (a.mtime - b.mtime).abs() <= tol.seconds()
}
