//! Adb façade (C1): runs adb subcommands against a selected device serial.
//!
//! Generalizes the teacher's `AdbCmd`/`AdbShell` (`j-hc-adb-sink/src/adb.rs`)
//! from a single implicit device to an explicit `-s <serial>` on every
//! invocation, and classifies failures into the fatal/retryable split §4.1
//! requires instead of a single `AdbErr` bucket.

use crate::error::EngineError;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// A transport-level adb failure, before it's wrapped into an [`EngineError`].
#[derive(Debug)]
pub enum AdbFault {
    /// Non-zero exit, empty stdout: treat as a transient transport hiccup,
    /// worth retrying (spec §4.1).
    Retryable(String),
    /// Non-zero exit with parseable stderr: a permanent fault (e.g. "no
    /// such file or directory").
    Permanent(String),
}

impl From<AdbFault> for EngineError {
    fn from(f: AdbFault) -> Self {
        match f {
            AdbFault::Retryable(msg) | AdbFault::Permanent(msg) => EngineError::Transport(msg),
        }
    }
}

/// Wraps single-quote quoting for remote path fragments embedded in a
/// `shell` command line: `'` becomes `'\''`. Spec §4.1: callers never
/// construct raw command lines containing untrusted path fragments
/// without going through this.
pub fn shell_quote(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 2);
    out.push('\'');
    for ch in path.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

/// The operations the rest of the engine needs from an adb binary.
/// Extracted so the reconciler/executor tests can drive a fake instead of
/// shelling out to a real device, the way the teacher's own code is
/// small enough not to need this but this engine's retry/executor tests
/// are not.
pub trait AdbFacade: Sync {
    fn run(&self, serial: &str, argv: &[&str]) -> Result<Output, AdbFault>;
    fn run_shell_streaming(
        &self,
        serial: &str,
        argv: &[&str],
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), AdbFault>;
    fn devices(&self) -> Result<Vec<String>, AdbFault>;
    fn start_server(&self) -> Result<(), AdbFault>;
}

/// The adb façade. One instance per run; callers pass the device serial
/// explicitly to every call rather than relying on a single connected
/// device (as the teacher's single-device `AdbCmd` does).
pub struct Adb {
    pub pull_timeout: Duration,
    pub shell_timeout: Duration,
}

impl Default for Adb {
    fn default() -> Self {
        Self {
            pull_timeout: Duration::from_secs(5 * 60),
            shell_timeout: Duration::from_secs(2 * 60),
        }
    }
}

/// The outcome of a completed adb invocation.
pub struct Output {
    pub status_ok: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Watches a spawned child and kills it if it is still running once
/// `timeout` elapses, so a hung adb process (an unauthorized or sleeping
/// device is the common cause) cannot block a run forever (spec §5).
/// Polls rather than blocking on `wait()` itself so the caller's own
/// `wait()`/pipe-reading proceeds normally when the child finishes first;
/// `done` lets the caller stop the watchdog promptly once it has reaped
/// the child, instead of leaving it sleeping out the rest of the timeout.
fn spawn_watchdog(
    child: Arc<Mutex<Child>>,
    timeout: Duration,
    done: Arc<AtomicBool>,
) -> std::thread::JoinHandle<bool> {
    std::thread::spawn(move || {
        let deadline = Instant::now() + timeout;
        loop {
            if done.load(Ordering::Relaxed) {
                return false;
            }
            if Instant::now() >= deadline {
                let mut guard = child.lock().expect("child mutex not poisoned");
                if matches!(guard.try_wait(), Ok(None)) {
                    let _ = guard.kill();
                }
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    })
}

impl Adb {
    fn base_command(serial: &str) -> Command {
        let mut cmd = Command::new("adb");
        cmd.arg("-s").arg(serial);
        cmd
    }

    /// Runs `adb -s <serial> <argv...>` to completion, capturing stdout and
    /// stderr, killing the child and surfacing [`AdbFault::Retryable`] if it
    /// does not finish within `self.pull_timeout` (spec §5). Non-zero exit
    /// with empty stdout also surfaces as [`AdbFault::Retryable`]; non-zero
    /// exit with stderr content surfaces as [`AdbFault::Permanent`].
    pub fn run<I, S>(&self, serial: &str, argv: I) -> Result<Output, AdbFault>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Self::base_command(serial);
        cmd.args(argv).stdout(Stdio::piped()).stderr(Stdio::piped());
        debug!(?cmd, timeout = ?self.pull_timeout, "adb invocation");
        let mut child = cmd.spawn().map_err(|e| AdbFault::Retryable(e.to_string()))?;
        let mut stdout_pipe = child.stdout.take().expect("stdout piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr piped");
        let stdout_thread = std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout_pipe.read_to_end(&mut buf);
            buf
        });
        let stderr_thread = std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf);
            buf
        });

        let child = Arc::new(Mutex::new(child));
        let done = Arc::new(AtomicBool::new(false));
        let watchdog = spawn_watchdog(Arc::clone(&child), self.pull_timeout, Arc::clone(&done));

        let status = child
            .lock()
            .expect("child mutex not poisoned")
            .wait()
            .map_err(|e| AdbFault::Retryable(e.to_string()))?;
        done.store(true, Ordering::Relaxed);
        let timed_out = watchdog.join().unwrap_or(false);

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();

        if timed_out {
            return Err(AdbFault::Retryable(format!(
                "adb invocation did not finish within {:?}",
                self.pull_timeout
            )));
        }
        if status.success() {
            return Ok(Output {
                status_ok: true,
                stdout,
                stderr,
            });
        }
        if stderr.is_empty() {
            Err(AdbFault::Retryable(format!(
                "adb exited with {:?} and no stderr",
                status.code()
            )))
        } else {
            Err(AdbFault::Permanent(String::from_utf8_lossy(&stderr).into_owned()))
        }
    }

    /// Runs `adb -s <serial> shell <argv...>`, streaming stdout line-by-line
    /// to `on_line` rather than buffering the whole reply. Used by the
    /// remote scanner (C2) to keep memory bounded for large trees (spec
    /// §4.2 rationale). Grounded in the teacher's `tee::CommandExt`
    /// stream-copy pattern (`j-hc-adb-sink/src/tee.rs`), adapted to parse
    /// lines instead of duplicating them to stdout. Killed and surfaced as
    /// [`AdbFault::Retryable`] if it does not finish within
    /// `self.shell_timeout` (spec §5).
    pub fn run_shell_streaming<I, S>(
        &self,
        serial: &str,
        argv: I,
        mut on_line: impl FnMut(&str),
    ) -> Result<(), AdbFault>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Self::base_command(serial);
        cmd.arg("shell")
            .args(argv)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!(?cmd, timeout = ?self.shell_timeout, "adb shell invocation (streaming)");
        let mut child = cmd.spawn().map_err(|e| AdbFault::Retryable(e.to_string()))?;
        let stdout = child.stdout.take().expect("stdout piped");
        let reader = BufReader::new(stdout);

        let child = Arc::new(Mutex::new(child));
        let done = Arc::new(AtomicBool::new(false));
        let watchdog = spawn_watchdog(Arc::clone(&child), self.shell_timeout, Arc::clone(&done));

        for line in reader.lines() {
            let line = line.map_err(|e| AdbFault::Retryable(e.to_string()))?;
            on_line(&line);
        }
        let status = child
            .lock()
            .expect("child mutex not poisoned")
            .wait()
            .map_err(|e| AdbFault::Retryable(e.to_string()))?;
        done.store(true, Ordering::Relaxed);
        let timed_out = watchdog.join().unwrap_or(false);

        if timed_out {
            return Err(AdbFault::Retryable(format!(
                "adb shell invocation did not finish within {:?}",
                self.shell_timeout
            )));
        }
        if status.success() {
            Ok(())
        } else {
            let mut stderr = String::new();
            if let Ok(mut guard) = child.lock() {
                if let Some(mut se) = guard.stderr.take() {
                    let _ = se.read_to_string(&mut stderr);
                }
            }
            if stderr.is_empty() {
                Err(AdbFault::Retryable(format!(
                    "adb shell exited with {:?}",
                    status.code()
                )))
            } else {
                Err(AdbFault::Permanent(stderr))
            }
        }
    }

    /// `adb devices`, used once at startup to guide device selection when
    /// no serial was given explicitly (the "supplemented" device-guidance
    /// behavior; see SPEC_FULL.md).
    pub fn devices(&self) -> Result<Vec<String>, AdbFault> {
        let mut cmd = Command::new("adb");
        cmd.arg("devices")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let op = cmd
            .output()
            .map_err(|e| AdbFault::Retryable(e.to_string()))?;
        let stdout = String::from_utf8_lossy(&op.stdout);
        Ok(stdout
            .lines()
            .filter(|l| l.contains('\t') && l.contains("device"))
            .filter_map(|l| l.split('\t').next().map(str::to_owned))
            .collect())
    }

    /// `adb start-server`, tolerating "daemon not running" chatter on
    /// stdout the way the teacher's `main::run` does.
    pub fn start_server(&self) -> Result<(), AdbFault> {
        let mut cmd = Command::new("adb");
        cmd.arg("start-server")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let op = cmd
            .output()
            .map_err(|e| AdbFault::Retryable(e.to_string()))?;
        if op.status.success() {
            Ok(())
        } else {
            Err(AdbFault::Permanent(
                String::from_utf8_lossy(&op.stderr).into_owned(),
            ))
        }
    }
}

impl AdbFacade for Adb {
    fn run(&self, serial: &str, argv: &[&str]) -> Result<Output, AdbFault> {
        Adb::run(self, serial, argv)
    }

    fn run_shell_streaming(
        &self,
        serial: &str,
        argv: &[&str],
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), AdbFault> {
        Adb::run_shell_streaming(self, serial, argv, on_line)
    }

    fn devices(&self) -> Result<Vec<String>, AdbFault> {
        Adb::devices(self)
    }

    fn start_server(&self) -> Result<(), AdbFault> {
        Adb::start_server(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_wraps_plain_path() {
        assert_eq!(shell_quote("/sdcard/DCIM"), "'/sdcard/DCIM'");
    }

    #[test]
    fn shell_quote_escapes_embedded_quote() {
        assert_eq!(shell_quote("/sdcard/o'brien"), "'/sdcard/o'\\''brien'");
    }

    #[test]
    fn watchdog_kills_child_that_outlives_the_deadline() {
        let child = Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("sleep is available in the test environment");
        let child = Arc::new(Mutex::new(child));
        let done = Arc::new(AtomicBool::new(false));
        let timed_out = spawn_watchdog(Arc::clone(&child), Duration::from_millis(100), done)
            .join()
            .unwrap();
        assert!(timed_out);
        let status = child.lock().unwrap().wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn watchdog_leaves_a_child_that_exits_before_the_deadline_alone() {
        let child = Command::new("sleep")
            .arg("0")
            .spawn()
            .expect("sleep is available in the test environment");
        let child = Arc::new(Mutex::new(child));
        let done = Arc::new(AtomicBool::new(false));
        // Give the child time to exit on its own before the watchdog's
        // deadline, mirroring the caller setting `done` once it reaps it.
        std::thread::sleep(Duration::from_millis(50));
        done.store(true, Ordering::Relaxed);
        let timed_out = spawn_watchdog(Arc::clone(&child), Duration::from_secs(5), done)
            .join()
            .unwrap();
        assert!(!timed_out);
    }
}
