//! Second Stage - applies a downloaded update
//!
//! Waits for the application to exit, copies the staged files over the
//! installed build, runs migrations and starts the application again.

mod prompt;
mod shutdown;

use anyhow::{Context, Result};
use clap::Parser;
use shutdown::ShutdownCoordinator;
use std::path::PathBuf;
use tokio::sync::mpsc;
use update_engine::handoff::{Handoff, MoveEvent, SecondStageConfig};
use update_engine::{utils, UpdateError};

const LOG_FILE: &str = "SecondStage.log";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the second-stage configuration file
    #[arg(short, long, value_name = "FILE", default_value = "SecondStageConfig.toml")]
    config: PathBuf,

    /// Log level (overrides config)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Do not start the application after the update
    #[arg(long)]
    no_relaunch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = SecondStageConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init_with_file(log_level, &config.build_path.join(LOG_FILE))?;

    tracing::info!(
        "Starting second-stage v{} for {}",
        env!("CARGO_PKG_VERSION"),
        config.build_path.display()
    );

    let handoff = Handoff::new(config);

    let coordinator = ShutdownCoordinator::new(handoff.cancel_token());
    let signal_task = tokio::spawn(async move { coordinator.wait_for_signal().await });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (decision_tx, decision_rx) = mpsc::channel(1);

    let operator_task = tokio::spawn(async move {
        let mut lines = prompt::spawn_stdin_reader();
        while let Some(event) = event_rx.recv().await {
            if let MoveEvent::Paused { path, error } = event {
                println!("Unable to replace {}: {}", path.display(), error);
                println!("Close any program that may be using the file.");
                let decision = prompt::ask(&mut lines).await;
                if decision_tx.send(decision).await.is_err() {
                    break;
                }
            }
        }
    });

    let result = handoff.run(event_tx, decision_rx).await;

    signal_task.abort();
    operator_task.abort();

    match result {
        Ok(report) => {
            tracing::info!(
                "Update applied: {} files moved, {} migrations run (previous version {})",
                report.files_moved,
                report.migrations_run,
                report.previous_version
            );
            if !args.no_relaunch {
                handoff.relaunch()?;
            }
            Ok(())
        }
        Err(UpdateError::Cancelled) => {
            tracing::warn!("Update aborted; the installation may be incomplete");
            anyhow::bail!("update aborted")
        }
        Err(e) => Err(e).context("Failed to apply update"),
    }
}
