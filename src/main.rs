use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use tokio::runtime::Builder;
use tokio::sync::watch;

mod engine;
mod env;
mod manifest;
mod networking;
mod storage;
#[cfg(test)]
mod test_support;
mod util;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

use crate::engine::{
    PatchEngine, PatcherConfig, SessionHandle, SessionOutcome, SessionProgress, SessionState,
};
use crate::manifest::DEFAULT_BOOTSTRAP_URL;
use crate::networking::NetworkClient;
use crate::util::{RateMeter, format_speed, progress_percent};

#[derive(Parser, Debug)]
#[command(
    name = "Awakening Patcher",
    author,
    version,
    about = "Reconciles a game installation against the published file manifest"
)]
struct Cli {
    /// URL of the remote `{ required: [...] }` manifest.
    #[arg(long)]
    manifest_url: String,

    /// Installation directory to patch (defaults to the patcher's data dir).
    #[arg(long)]
    dest: Option<PathBuf>,

    /// Existing installation to copy files from (defaults to the destination).
    #[arg(long)]
    source: Option<PathBuf>,

    /// Checksum every file, not just the restricted file types.
    #[arg(long)]
    full_scan: bool,

    /// Number of files transferred concurrently.
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Replace the built-in baseline file list with this JSON document.
    #[arg(long)]
    baseline: Option<PathBuf>,

    /// Base URL for the first-install configuration files.
    #[arg(long, default_value = DEFAULT_BOOTSTRAP_URL)]
    bootstrap_url: String,

    /// Obsolete file to delete from the destination before patching (repeatable).
    #[arg(long = "remove", value_name = "NAME")]
    remove: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let runtime = match Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to create Tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));
    // Blocking jobs notice cancellation between buffers; do not wait on a stuck one.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    match result {
        Ok(outcome) => ExitCode::from(report(&outcome)),
        Err(err) => {
            error!("patch failed: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<SessionOutcome, String> {
    let mut config = PatcherConfig::new(cli.manifest_url);
    if let Some(path) = &cli.baseline {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("unable to read baseline {}: {e}", path.display()))?;
        config.baseline = manifest::parse_document(&text)?;
    }
    config.bootstrap_url = cli.bootstrap_url;
    config.pool_size = cli.workers.max(1);
    config.obsolete_files = cli.remove;

    let dest = cli.dest.unwrap_or_else(env::default_install_dir);
    let source = cli.source.unwrap_or_else(|| dest.clone());

    let engine = PatchEngine::new(config, NetworkClient::new());
    let handle = engine.install(&source, &dest, cli.full_scan).await?;

    let display = tokio::spawn(show_progress(handle.subscribe()));
    let outcome = wait_or_interrupt(handle).await;
    if let Err(err) = display.await {
        warn!("progress display stopped: {err}");
    }
    outcome
}

async fn wait_or_interrupt(mut handle: SessionHandle) -> Result<SessionOutcome, String> {
    tokio::select! {
        outcome = handle.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received; cancelling");
            handle.cancel();
            handle.wait().await
        }
    }
}

/// Render progress until the session drops its progress channel.
async fn show_progress(mut progress: watch::Receiver<SessionProgress>) {
    let total = progress.borrow().total_bytes;
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template("{bar:40.cyan/blue} {bytes}/{total_bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    let mut meter = RateMeter::new(Instant::now());
    while progress.changed().await.is_ok() {
        let current = *progress.borrow_and_update();
        let rate = meter.update(current.completed_bytes, Instant::now());
        bar.set_position(current.completed_bytes);
        bar.set_message(format!(
            "{:.0}% ({})",
            progress_percent(current.completed_bytes, current.total_bytes).trunc(),
            format_speed(rate)
        ));
    }
    bar.finish_and_clear();
}

/// Log the outcome and pick the process exit status.
fn report(outcome: &SessionOutcome) -> u8 {
    match outcome.state {
        SessionState::Completed
            if outcome.units_failed == 0 && outcome.completed_bytes == outcome.total_bytes =>
        {
            info!(
                "patch complete: {} files, {} bytes",
                outcome.units_completed, outcome.total_bytes
            );
            0
        }
        SessionState::Completed => {
            warn!(
                "patch finished with errors: {} file(s) failed, {} of {} bytes accounted; run again to retry",
                outcome.units_failed, outcome.completed_bytes, outcome.total_bytes
            );
            1
        }
        SessionState::Cancelled => {
            warn!(
                "patch cancelled: {} files done, {} never started",
                outcome.units_completed, outcome.units_unassigned
            );
            130
        }
        SessionState::Idle | SessionState::Running => 1,
    }
}
