use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sbs_surveillance::{archive, bus::Bus, config, ingest, tracker};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sbs-surveillance", about = "ADS-B/Mode-S SBS surveillance pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dial configured SOURCES, frame CRLF-delimited SBS records, and publish them to sbs.raw.
    Ingest,
    /// Subscribe to sbs.raw and append every record to a rotating, gzip-compressed daily archive.
    Archive,
    /// Subscribe to sbs.raw, maintain current-state and flight-session maps, and write them through.
    Track,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let result = match cli.command {
        Command::Ingest => run_ingest(cancel).await,
        Command::Archive => run_archive(cancel).await,
        Command::Track => run_track(cancel).await,
    };

    if let Err(e) = &result {
        error!("fatal error: {:#}", e);
    }
    result
}

async fn run_ingest(cancel: CancellationToken) -> Result<()> {
    let config = config::IngestConfig::from_env().context("loading ingestor configuration")?;
    let bus = Bus::connect(&config.nats_url).await?;
    info!(sources = ?config.sources, "ingestor starting");
    ingest::run(config, bus, cancel).await
}

async fn run_archive(cancel: CancellationToken) -> Result<()> {
    let config = config::ArchiveConfig::from_env().context("loading archiver configuration")?;
    info!(output_dir = %config.output_dir, "archiver starting");
    archive::run(config, cancel).await
}

async fn run_track(cancel: CancellationToken) -> Result<()> {
    let config = config::TrackConfig::from_env().context("loading tracker configuration")?;
    info!("tracker starting");
    tracker::run(config, cancel).await
}

/// Cancel on Ctrl-C or SIGTERM so each subcommand can run its shutdown
/// sequence in the order spec §5 describes.
fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!("failed to install SIGTERM handler: {}", e);
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("shutdown signal received");
        cancel.cancel();
    });
}
