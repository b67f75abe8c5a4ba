pub mod agenda;
pub mod calendar;
pub mod clock;
pub mod commands;
pub mod db;
pub mod errors;
pub mod models;
pub mod notifier;
pub mod planner;
pub mod reminders;
pub mod store;
pub mod sweeper;
pub mod timefmt;

use crate::commands::EventEnvelope;
use crate::planner::PlannerCore;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

pub const DATA_DIR_ENV: &str = "PLANNER_DATA_DIR";
const DEFAULT_DATA_DIR: &str = "planner-data";

pub fn data_dir_from_env() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Runs the planner daemon: commands arrive as JSON lines on stdin, responses
/// and planner events leave as JSON lines on stdout.
pub async fn run() -> anyhow::Result<()> {
    let data_dir = data_dir_from_env();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    init_tracing(&data_dir).map_err(anyhow::Error::msg)?;

    let planner = PlannerCore::new(data_dir).context("failed to open planner")?;
    tracing::info!(data_dir = %planner.data_dir().display(), "planner started");

    if let Err(error) = planner.rearm_reminders() {
        tracing::warn!(error = %error, "startup reminder re-arm failed");
    }
    let sweeper = planner.start_sweeper().context("failed to start expiry sweeper")?;

    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_lines(out_rx));
    let forwarder = tokio::spawn(forward_events(planner.subscribe(), out_tx.clone()));

    let outcome = tokio::select! {
        result = read_commands(planner.clone(), out_tx) => result,
        signal = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
            signal.context("failed to listen for ctrl-c")
        }
    };

    sweeper.abort();
    forwarder.abort();
    planner.shutdown();
    let _ = writer.await;
    tracing::info!("planner stopped");
    outcome
}

async fn read_commands(planner: Arc<PlannerCore>, out: mpsc::UnboundedSender<String>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = commands::dispatch_line(&planner, line);
        let encoded = serde_json::to_string(&response).context("failed to encode response")?;
        if out.send(encoded).is_err() {
            break;
        }
    }
    tracing::info!("stdin closed");
    Ok(())
}

async fn forward_events(mut events: broadcast::Receiver<models::PlannerEvent>, out: mpsc::UnboundedSender<String>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&EventEnvelope { event: &event }) {
                Ok(encoded) => {
                    if out.send(encoded).is_err() {
                        break;
                    }
                }
                Err(error) => tracing::warn!(error = %error, "failed to encode planner event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn write_lines(mut lines: mpsc::UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.recv().await {
        let written = async {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await
        }
        .await;
        if let Err(error) = written {
            tracing::warn!(error = %error, "failed to write to stdout");
            break;
        }
    }
}

fn init_tracing(data_dir: &Path) -> Result<(), String> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "planner.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
