//! CLI adapter (C9): parses arguments and constructs [`PullOptions`]
//! (spec §6). Structured the way the teacher's own `args.rs` lays out its
//! `clap` derive types, generalized from a push/pull subcommand pair to
//! the single `pull()` entry point this core exposes.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    help_template = "{author-with-newline}{about-section}Version: {version}\n{usage-heading} \
    {usage}\n{all-args} {tab}"
)]
#[command(arg_required_else_help(true))]
#[clap(version, about = "Incremental adb pull backup engine")]
pub struct Cli {
    /// Remote directory on the device to pull from.
    pub remote_root: String,

    /// Local directory to pull into.
    pub local_root: PathBuf,

    /// Device serial to target; resolved from `adb devices` if omitted
    /// and exactly one device is connected.
    #[arg(long)]
    pub device: Option<String>,

    /// Read exclude patterns from this file (gitignore-style, one per line).
    #[arg(long, value_name = "PATH")]
    pub exclude_from: Option<PathBuf>,

    /// Exclude a gitignore-style pattern; repeatable.
    #[arg(long = "exclude", value_name = "PATTERN")]
    pub excludes: Vec<String>,

    /// A previous snapshot directory to hard-link unchanged files from.
    #[arg(long, value_name = "PATH")]
    pub reference: Option<PathBuf>,

    /// Delete local files absent from the remote tree (default in
    /// single-version mode, i.e. when `--reference` is not given).
    #[arg(long, conflicts_with = "no_delete")]
    pub delete: bool,

    /// Never delete local files absent from the remote tree.
    #[arg(long)]
    pub no_delete: bool,

    /// Plan the run and print what would happen, without touching the
    /// filesystem or the device.
    #[arg(long)]
    pub dry_run: bool,

    /// Number of actions to execute concurrently.
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Emit debug-level logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Process exit codes (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    Config = 1,
    Transport = 2,
    ActionFailures = 3,
    Cancelled = 130,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}
