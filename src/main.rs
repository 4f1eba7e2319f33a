use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;

mod admin;
mod app;
mod auth;
mod config;
mod error;
mod files;
mod groups;
mod projects;
mod queue;
mod state;
mod storage;
mod templates;
mod users;
mod validate;

use crate::state::AppState;

/// Multi-tenant static site backend.
#[derive(Debug, Parser)]
#[command(name = "tessellate", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API (the default)
    Serve,
    /// Consume template jobs without serving HTTP
    Worker,
    /// Upload a local directory into a bucket
    UploadDir {
        /// Target bucket, created beforehand
        bucket: String,
        /// Directory whose files become the bucket's objects
        dir: PathBuf,
    },
}

/// Logs go to stdout, or to a daily file under `LOG_DIR` when set.
fn init_tracing() -> WorkerGuard {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "tessellate=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    let (writer, guard) = match std::env::var("LOG_DIR").ok().filter(|d| !d.is_empty()) {
        Some(dir) => {
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "tessellate.log"))
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(writer)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .init();
    }
    guard
}

async fn shutdown_signal(tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
    tracing::info!("shutting down");
    let _ = tx.send(true);
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    if let Err(e) = sqlx::migrate!("./migrations").run(&state.db).await {
        tracing::warn!(error = %e, "migrations failed; continuing");
    }

    let (tx, rx) = watch::channel(false);
    let worker = if state.config.queue.worker_enabled {
        Some(tokio::spawn(queue::worker::run_worker(state.clone(), rx.clone())))
    } else {
        None
    };

    let mut http_rx = rx;
    let addr = app::listen_addr()?;
    let app = app::build_app(state);
    let server = app::serve(app, addr, async move {
        let _ = http_rx.changed().await;
    });

    tokio::spawn(shutdown_signal(tx));
    server.await?;
    if let Some(worker) = worker {
        worker.await.context("worker task panicked")?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _guard = init_tracing();
    let cli = Cli::parse();

    let state = AppState::init().await?;
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(state).await?,
        Commands::Worker => {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(shutdown_signal(tx));
            queue::worker::run_worker(state, rx).await;
        }
        Commands::UploadDir { bucket, dir } => {
            let keys = storage::upload_local_dir(state.storage.as_ref(), &bucket, &dir).await?;
            tracing::info!(bucket = %bucket, count = keys.len(), "directory uploaded");
            for key in keys {
                println!("{key}");
            }
        }
    }
    Ok(())
}
