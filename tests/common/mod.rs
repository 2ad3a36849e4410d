//! A fake adb device for driving the orchestrator end-to-end without a
//! real phone attached, following the `FakeDevice` pattern `adevice`
//! tests use (`msft-mirror-aosp-platform.tools.asuite/adevice/tests/common`).

use abackup::adb::{AdbFacade, AdbFault, Output};
use std::collections::HashMap;
use std::sync::Mutex;

pub struct FakeEntry {
    pub path: &'static str,
    pub kind: char,
    pub size: u64,
    pub mtime: i64,
    pub content: &'static [u8],
}

pub fn file(path: &'static str, size: u64, mtime: i64, content: &'static [u8]) -> FakeEntry {
    FakeEntry { path, kind: 'f', size, mtime, content }
}

pub fn dir(path: &'static str) -> FakeEntry {
    FakeEntry { path, kind: 'd', size: 0, mtime: 0, content: b"" }
}

/// An in-memory adb device: `entries` is what `find -printf` would report,
/// `pull` serves file content straight out of the matching entry.
pub struct FakeAdb {
    entries: Vec<FakeEntry>,
    pull_failures_remaining: Mutex<HashMap<String, u32>>,
    simulate_missing_printf: bool,
}

impl FakeAdb {
    pub fn new(entries: Vec<FakeEntry>) -> Self {
        Self {
            entries,
            pull_failures_remaining: Mutex::new(HashMap::new()),
            simulate_missing_printf: false,
        }
    }

    /// Makes the next `n` `pull` attempts for `remote_path` fail with a
    /// retryable transport error before succeeding.
    pub fn fail_pulls(self, remote_path: &str, n: u32) -> Self {
        self.pull_failures_remaining
            .lock()
            .unwrap()
            .insert(remote_path.to_string(), n);
        self
    }

    /// Makes `find -printf` fail the way a device whose `find` lacks that
    /// flag would, so the remote scanner's stat-based fallback is exercised.
    pub fn without_printf_support(mut self) -> Self {
        self.simulate_missing_printf = true;
        self
    }
}

impl AdbFacade for FakeAdb {
    fn run(&self, _serial: &str, argv: &[&str]) -> Result<Output, AdbFault> {
        if argv.first() == Some(&"pull") {
            let remote = argv[2];
            let staging = argv[3];
            let mut fails = self.pull_failures_remaining.lock().unwrap();
            if let Some(remaining) = fails.get_mut(remote) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(AdbFault::Retryable("simulated transient failure".to_string()));
                }
            }
            drop(fails);
            let entry = self
                .entries
                .iter()
                .find(|e| e.path == remote)
                .ok_or_else(|| AdbFault::Permanent(format!("{remote}: no such file")))?;
            std::fs::write(staging, entry.content)
                .map_err(|e| AdbFault::Retryable(e.to_string()))?;
        }
        Ok(Output { status_ok: true, stdout: Vec::new(), stderr: Vec::new() })
    }

    fn run_shell_streaming(
        &self,
        _serial: &str,
        argv: &[&str],
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), AdbFault> {
        let cmd = argv.first().copied().unwrap_or("");
        if cmd.starts_with("find") && cmd.contains("-printf") {
            if self.simulate_missing_printf {
                return Err(AdbFault::Permanent(
                    "find: -printf: unrecognized option".to_string(),
                ));
            }
            for e in &self.entries {
                on_line(&format!("{}\t{}\t{}\t{}", e.kind, e.size, e.mtime, e.path));
            }
        } else if cmd.starts_with("find") {
            for e in &self.entries {
                on_line(e.path);
            }
        } else if cmd.starts_with("stat") {
            let entry = self
                .entries
                .iter()
                .find(|e| cmd.contains(&format!("'{}'", e.path)));
            if let Some(e) = entry {
                let ftype = match e.kind {
                    'd' => "directory",
                    'l' => "symbolic link",
                    _ => "regular file",
                };
                on_line(&format!("{ftype}\t{}\t{}", e.size, e.mtime));
            }
        }
        Ok(())
    }

    fn devices(&self) -> Result<Vec<String>, AdbFault> {
        Ok(vec!["FAKESERIAL".to_string()])
    }

    fn start_server(&self) -> Result<(), AdbFault> {
        Ok(())
    }
}
