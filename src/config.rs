//! Environment-derived configuration (spec §6). Each option has an
//! enumerated default; `SOURCES` is required only by the ingestor and
//! `DB_CONN_STR` only by the archiver's optional bootstrap-free path and
//! the tracker.

use anyhow::{Context, Result};

const DEFAULT_NATS_URL: &str = "nats://nats:4222";
const DEFAULT_OUTPUT_DIR: &str = "./logs";
const DEFAULT_REDIS_ADDR: &str = "redis://127.0.0.1:6379";

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{} must be set", key))
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub sources: Vec<String>,
    pub nats_url: String,
}

impl IngestConfig {
    pub fn from_env() -> Result<Self> {
        let sources = env_required("SOURCES")?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        if sources.is_empty() {
            anyhow::bail!("SOURCES must contain at least one host:port");
        }
        Ok(Self {
            sources,
            nats_url: env_or("NATS_URL", DEFAULT_NATS_URL),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub nats_url: String,
    pub output_dir: String,
}

impl ArchiveConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            nats_url: env_or("NATS_URL", DEFAULT_NATS_URL),
            output_dir: env_or("OUTPUT_DIR", DEFAULT_OUTPUT_DIR),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TrackConfig {
    pub nats_url: String,
    pub db_conn_str: String,
    pub redis_addr: String,
}

impl TrackConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            nats_url: env_or("NATS_URL", DEFAULT_NATS_URL),
            db_conn_str: env_required("DB_CONN_STR")?,
            redis_addr: env_or("REDIS_ADDR", DEFAULT_REDIS_ADDR),
        })
    }
}
