//! Reconciler (C5): diffs remote vs. local (and an optional reference
//! snapshot) into an ordered [`Action`] plan (spec §4.5).

use crate::record::{records_match, Inventory, Kind, MtimeTolerance};
use std::path::PathBuf;
use tracing::warn;
use typed_path::Utf8UnixPathBuf as UnixPathBuf;

/// A single step of the plan the executor (C6) carries out.
#[derive(Debug, Clone)]
pub enum Action {
    CreateDir(UnixPathBuf),
    PullFile {
        remote_path: UnixPathBuf,
        local_path: UnixPathBuf,
        expected_size: u64,
        expected_mtime: i64,
    },
    LinkOrCopy {
        source_path: UnixPathBuf,
        local_path: UnixPathBuf,
        expected_size: u64,
        expected_mtime: i64,
    },
    Delete(UnixPathBuf),
    SetMtime(UnixPathBuf, i64),
}

impl Action {
    /// The relative path this action targets, used to group actions by
    /// directory depth (spec §4.6 ordering rules).
    pub fn target_path(&self) -> &UnixPathBuf {
        match self {
            Action::CreateDir(p) => p,
            Action::PullFile { local_path, .. } => local_path,
            Action::LinkOrCopy { local_path, .. } => local_path,
            Action::Delete(p) => p,
            Action::SetMtime(p, _) => p,
        }
    }

    pub fn depth(&self) -> usize {
        self.target_path().as_str().split('/').count()
    }
}

/// Builds the plan for a pull. `reference` is consulted for hard-link
/// reuse when given; `delete_extraneous` emits [`Action::Delete`] for
/// stale local entries not present remotely (and not themselves excluded).
pub fn plan(
    remote: &Inventory,
    local: &Inventory,
    reference: Option<&Inventory>,
    tolerance: MtimeTolerance,
    delete_extraneous: bool,
) -> Vec<Action> {
    let mut actions = Vec::new();
    let mut remote_paths: Vec<&UnixPathBuf> = remote.keys().collect();
    remote_paths.sort();

    for path in remote_paths {
        let r = &remote[path];
        match r.kind {
            Kind::Dir => {
                if !local.contains_key(path) {
                    actions.push(Action::CreateDir(path.clone()));
                }
            }
            Kind::File => {
                let identical = local
                    .get(path)
                    .map(|l| matches!(l.kind, Kind::File) && records_match(l, r, tolerance))
                    .unwrap_or(false);
                if identical {
                    continue;
                }
                if let Some(reference) = reference {
                    if let Some(ref_rec) = reference.get(path) {
                        if matches!(ref_rec.kind, Kind::File) && records_match(ref_rec, r, tolerance) {
                            actions.push(Action::LinkOrCopy {
                                source_path: path.clone(),
                                local_path: path.clone(),
                                expected_size: r.size,
                                expected_mtime: r.mtime,
                            });
                            continue;
                        }
                    }
                }
                actions.push(Action::PullFile {
                    remote_path: path.clone(),
                    local_path: path.clone(),
                    expected_size: r.size,
                    expected_mtime: r.mtime,
                });
            }
            Kind::Symlink | Kind::Other => {
                warn!(path = %path.as_str(), "remote entry is a symlink or special file; not pulled");
            }
        }
    }

    if delete_extraneous {
        let mut stale: Vec<&UnixPathBuf> = local
            .keys()
            .filter(|p| !remote.contains_key(*p))
            .collect();
        // Deepest first so directories are empty before their removal.
        stale.sort_by_key(|p| std::cmp::Reverse(p.as_str().matches('/').count()));
        for path in stale {
            actions.push(Action::Delete(path.clone()));
        }
    }

    actions
}

/// Joins a relative POSIX path onto a native local root, producing the
/// destination path the executor will touch.
pub fn local_dest(local_root: &std::path::Path, rel: &UnixPathBuf) -> PathBuf {
    let mut out = local_root.to_path_buf();
    for part in rel.as_str().split('/') {
        out.push(part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FileRecord;

    fn rec(kind: Kind, size: u64, mtime: i64) -> FileRecord {
        FileRecord {
            path: UnixPathBuf::from("unused"),
            kind,
            size,
            mtime,
        }
    }

    fn inv(entries: &[(&str, FileRecord)]) -> Inventory {
        entries
            .iter()
            .map(|(p, r)| {
                let mut r = r.clone();
                r.path = UnixPathBuf::from(*p);
                (UnixPathBuf::from(*p), r)
            })
            .collect()
    }

    #[test]
    fn unchanged_file_emits_nothing() {
        let remote = inv(&[("x.jpg", rec(Kind::File, 1000, 1700000000))]);
        let local = inv(&[("x.jpg", rec(Kind::File, 1000, 1700000000))]);
        let actions = plan(&remote, &local, None, MtimeTolerance::OneSecond, true);
        assert!(actions.is_empty());
    }

    #[test]
    fn changed_size_emits_pull() {
        let remote = inv(&[
            ("x.jpg", rec(Kind::File, 1000, 1700000000)),
            ("y.jpg", rec(Kind::File, 2500, 1700000500)),
        ]);
        let local = inv(&[
            ("x.jpg", rec(Kind::File, 1000, 1700000000)),
            ("y.jpg", rec(Kind::File, 2000, 1700000100)),
        ]);
        let actions = plan(&remote, &local, None, MtimeTolerance::OneSecond, true);
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], Action::PullFile { local_path, .. } if local_path.as_str() == "y.jpg"));
    }

    #[test]
    fn reference_match_emits_link_or_copy() {
        let remote = inv(&[("photo.jpg", rec(Kind::File, 5_000_000, 1700000000))]);
        let local = Inventory::new();
        let reference = inv(&[("photo.jpg", rec(Kind::File, 5_000_000, 1700000000))]);
        let actions = plan(
            &remote,
            &local,
            Some(&reference),
            MtimeTolerance::OneSecond,
            false,
        );
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], Action::LinkOrCopy { .. }));
    }

    #[test]
    fn extraneous_local_deleted_only_when_requested() {
        let remote = Inventory::new();
        let local = inv(&[("old.txt", rec(Kind::File, 1, 1))]);

        let with_delete = plan(&remote, &local, None, MtimeTolerance::OneSecond, true);
        assert_eq!(with_delete.len(), 1);
        assert!(matches!(&with_delete[0], Action::Delete(p) if p.as_str() == "old.txt"));

        let without_delete = plan(&remote, &local, None, MtimeTolerance::OneSecond, false);
        assert!(without_delete.is_empty());
    }

    #[test]
    fn missing_remote_dir_creates_it() {
        let remote = inv(&[("a", rec(Kind::Dir, 0, 0))]);
        let local = Inventory::new();
        let actions = plan(&remote, &local, None, MtimeTolerance::OneSecond, true);
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], Action::CreateDir(p) if p.as_str() == "a"));
    }

    #[test]
    fn symlink_emits_nothing() {
        let remote = inv(&[("link", rec(Kind::Symlink, 0, 0))]);
        let local = Inventory::new();
        let actions = plan(&remote, &local, None, MtimeTolerance::OneSecond, true);
        assert!(actions.is_empty());
    }

    #[test]
    fn mtime_within_tolerance_is_unchanged() {
        let remote = inv(&[("x.jpg", rec(Kind::File, 1000, 1700000002))]);
        let local = inv(&[("x.jpg", rec(Kind::File, 1000, 1700000000))]);
        let actions = plan(&remote, &local, None, MtimeTolerance::TwoSeconds, true);
        assert!(actions.is_empty());
    }
}
