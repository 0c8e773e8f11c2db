//! CLI entry point for the ingestor.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod app;
mod cli;

use app::config::load_default_file_config;
use app::context::{AppContext, Settings, resolve_default_log_level};
use cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();
    let file_config = load_default_file_config()?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config verbosity > info
    let default_level = resolve_default_log_level(&cli, file_config.as_ref());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?cli, loaded_config = file_config.is_some(), "CLI arguments parsed");
    info!("Ingestor starting");

    let settings = Settings::resolve(&cli, file_config.as_ref());
    let ctx = AppContext::build(&settings).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current request");
            on_signal.cancel();
        }
    });

    let exit = app::commands::dispatch(ctx, cli.command, cli.quiet, &cancel).await?;
    Ok(exit.into())
}
