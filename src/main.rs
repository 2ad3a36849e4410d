use abackup::args::{Cli, ExitCode as EngineExitCode};
use abackup::error::EngineError;
use abackup::exclude::ExcludeSet;
use abackup::orchestrator::{self, PullOptions, TRANSPORT_GUIDANCE};
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

fn install_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .without_time()
        .init();
}

/// Spec §5: "the orchestrator accepts a cancellation signal". Ctrl-C sets
/// the shared flag the orchestrator and executor poll between actions.
fn install_cancel_handler(cancel: Arc<AtomicBool>) {
    let _ = ctrlc::set_handler(move || {
        cancel.store(true, Ordering::Relaxed);
    });
}

fn run() -> Result<ExitCode, EngineError> {
    let args = Cli::parse();
    install_logging(args.verbose);

    let excludes = ExcludeSet::from_file_and_patterns(args.exclude_from.as_deref(), &args.excludes)
        .map_err(|e| EngineError::Config(e.to_string()))?;

    let serial = match orchestrator::resolve_device_serial(args.device) {
        Ok(serial) => serial,
        Err(EngineError::Transport(msg)) => {
            error!("{msg}");
            return Ok(EngineExitCode::Transport.into());
        }
        Err(e) => return Err(e),
    };
    info!(device = %serial, "resolved target device");

    let delete_extraneous = if args.delete {
        true
    } else if args.no_delete {
        false
    } else {
        args.reference.is_none()
    };

    let mut options = PullOptions::new(
        serial,
        args.remote_root,
        args.local_root,
        args.reference,
        excludes,
    );
    options.delete_extraneous = delete_extraneous;
    options.concurrency = args.concurrency.max(1);
    options.dry_run = args.dry_run;

    let cancel = Arc::new(AtomicBool::new(false));
    install_cancel_handler(cancel.clone());

    match orchestrator::pull(&options, &cancel) {
        Ok(summary) => {
            info!(
                pulled = summary.files_pulled,
                linked = summary.files_linked,
                copied = summary.files_copied,
                deleted = summary.files_deleted,
                bytes = summary.bytes_transferred,
                "pull finished"
            );
            if summary.failures.is_empty() {
                Ok(EngineExitCode::Success.into())
            } else {
                for (path, err) in &summary.failures {
                    warn!(path = %path.display(), error = %err, "action failed after retries");
                }
                Ok(EngineExitCode::ActionFailures.into())
            }
        }
        Err(EngineError::Cancelled) => Ok(EngineExitCode::Cancelled.into()),
        Err(EngineError::Transport(msg)) => {
            error!("{msg}. {TRANSPORT_GUIDANCE}");
            Ok(EngineExitCode::Transport.into())
        }
        Err(EngineError::Config(msg)) => {
            error!("{msg}");
            Ok(EngineExitCode::Config.into())
        }
        Err(e) => Err(e),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR: {e}");
            EngineExitCode::Config.into()
        }
    }
}
