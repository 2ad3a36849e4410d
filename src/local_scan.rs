//! Local scanner (C3): walks a local subtree into an [`Inventory`] (spec
//! §4.3). Generalizes the teacher's `LocalFS::list_dir`
//! (`j-hc-adb-sink/src/fs.rs`), which reads one directory at a time, into a
//! full recursive walk that also applies the exclude matcher so directory
//! matches short-circuit descent (spec §4.4).

use crate::exclude::ExcludeSet;
use crate::record::{FileRecord, Inventory, Kind};
use std::fs;
use std::path::Path;
use tracing::warn;
use typed_path::Utf8UnixPathBuf as UnixPathBuf;

#[cfg(unix)]
fn mtime_secs(md: &fs::Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    md.mtime()
}

#[cfg(windows)]
fn mtime_secs(md: &fs::Metadata) -> i64 {
    md.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Walks `root` depth-first, recording size and mtime for every entry.
/// Symlinks are not followed; they are recorded with [`Kind::Symlink`] so
/// the reconciler never treats them as an equivalent regular file.
/// Per-entry read errors are logged and skipped rather than aborting the
/// walk (spec §4.3).
pub fn scan(root: &Path, excludes: &ExcludeSet) -> Inventory {
    let mut inventory = Inventory::new();
    walk(root, root, excludes, &mut inventory);
    inventory
}

fn walk(root: &Path, dir: &Path, excludes: &ExcludeSet, out: &mut Inventory) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "could not read local directory");
            return;
        }
    };
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "could not read directory entry");
                continue;
            }
        };
        let path = entry.path();
        let rel = match relative_unix_path(root, &path) {
            Some(p) => p,
            None => continue,
        };
        let md = match entry.metadata() {
            Ok(md) => md,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not stat local entry");
                continue;
            }
        };

        let kind = if md.is_symlink() {
            Kind::Symlink
        } else if md.is_dir() {
            Kind::Dir
        } else if md.is_file() {
            Kind::File
        } else {
            Kind::Other
        };
        let is_dir = matches!(kind, Kind::Dir);
        if excludes.matches(&rel, is_dir) {
            continue;
        }

        let size = if matches!(kind, Kind::File) { md.len() } else { 0 };
        let mtime = mtime_secs(&md);
        out.insert(
            rel.clone(),
            FileRecord {
                path: rel,
                kind,
                size,
                mtime,
            },
        );

        if is_dir {
            walk(root, &path, excludes, out);
        }
    }
}

fn relative_unix_path(root: &Path, path: &Path) -> Option<UnixPathBuf> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            std::path::Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(UnixPathBuf::from(parts.join("/")))
}
