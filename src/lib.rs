//! Incremental, snapshot-capable adb pull engine.
//!
//! The core is the `pull()` orchestrator in [`orchestrator`]: given a
//! remote directory on an Android device and a local target directory,
//! it produces a local tree mirroring the remote one, transferring only
//! what changed and reusing unchanged files from a prior snapshot via
//! hard links where the host filesystem supports it. Device discovery,
//! snapshot rotation, and configuration loading are external collaborators
//! and are not implemented here; see the `args` module for the direct CLI
//! entry point a single device/run uses instead.

pub mod adb;
pub mod args;
pub mod error;
pub mod exclude;
pub mod executor;
pub mod hardlink;
pub mod local_scan;
pub mod orchestrator;
pub mod reconcile;
pub mod record;
pub mod remote_scan;
