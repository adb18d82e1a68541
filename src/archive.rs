//! Rotating archival writer: appends raw SBS text to a per-UTC-day log
//! file and gzip-compresses the prior day's file at rotation. See spec
//! §4.2, §5, §6.

use crate::bus::Bus;
use crate::config::ArchiveConfig;
use anyhow::{Context, Result};
use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct ArchiverState {
    output_dir: PathBuf,
    current_date: String,
    file: Option<BufWriter<File>>,
}

/// Owns the single open append-only file and the `current_date` marker
/// (spec §4.2). Writes and rotation share one mutex so file-position
/// integrity is guaranteed and rotation is atomic with respect to writers.
#[derive(Clone)]
pub struct Archiver {
    state: Arc<Mutex<ArchiverState>>,
}

impl Archiver {
    pub async fn new(output_dir: String, cancel: CancellationToken) -> Result<Self> {
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("creating output dir {}", output_dir))?;
        let state = Arc::new(Mutex::new(ArchiverState {
            output_dir: PathBuf::from(output_dir),
            current_date: String::new(),
            file: None,
        }));
        spawn_rotation_timer(state.clone(), cancel);
        Ok(Self { state })
    }

    /// Append one raw record, rotating first if its receipt UTC date
    /// differs from the currently open file's date (spec §4.2).
    pub async fn archive(&self, raw: &str, receipt_date: &str) -> Result<()> {
        let mut guard = self.state.lock().await;
        if guard.current_date != receipt_date {
            rotate_locked(&mut guard, receipt_date)?;
        }
        write_record(&mut guard, raw)?;
        Ok(())
    }

    /// Flush and close the current file on shutdown (spec §5). Rotation
    /// (and therefore compression) is not forced here — the next process
    /// start will find the file still open for the same date, or a new
    /// day will trigger rotation on the first subsequent message.
    pub async fn close(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        if let Some(file) = guard.file.as_mut() {
            if let Err(e) = file.flush() {
                warn!("failed to flush archive file on shutdown: {}", e);
            }
        }
        Ok(())
    }
}

fn rotate_locked(state: &mut ArchiverState, today: &str) -> Result<()> {
    if let Some(mut file) = state.file.take() {
        if let Err(e) = file.flush() {
            warn!("failed to flush archive file before rotation: {}", e);
        }
    }

    if !state.current_date.is_empty() {
        let prev_path = state
            .output_dir
            .join(format!("sbs_{}.log", state.current_date));
        if prev_path.exists() {
            if let Err(e) = compress_and_remove(&prev_path) {
                warn!(path = ?prev_path, error = %e, "compression failed, leaving original file intact");
            }
        }
    }

    let path = state.output_dir.join(format!("sbs_{}.log", today));
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o600);
    let file = options
        .open(&path)
        .with_context(|| format!("opening {:?}", path))?;
    state.file = Some(BufWriter::new(file));
    state.current_date = today.to_string();
    info!(path = ?path, "archive file opened");
    Ok(())
}

fn write_record(state: &mut ArchiverState, raw: &str) -> Result<()> {
    let file = state
        .file
        .as_mut()
        .expect("file must be open once current_date is set");
    file.write_all(raw.as_bytes())?;
    if !raw.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(())
}

fn gz_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".gz");
    PathBuf::from(name)
}

/// Compress `path` to `path.gz` with gzip default compression, then delete
/// the uncompressed file. Spec §4.2 step 2.
fn compress_and_remove(path: &Path) -> Result<()> {
    let gz_path = gz_path_for(path);
    let input = File::open(path).with_context(|| format!("opening {:?} for compression", path))?;
    let output = File::create(&gz_path).with_context(|| format!("creating {:?}", gz_path))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    std::io::copy(&mut std::io::BufReader::new(input), &mut encoder)
        .context("copying into gzip encoder")?;
    encoder.finish().context("finishing gzip stream")?;
    std::fs::remove_file(path).with_context(|| format!("removing {:?}", path))?;
    Ok(())
}

/// Background task: waits for either cancellation or the next UTC
/// midnight; on the tick, rotates and recomputes the next midnight. A
/// rotation already performed by the per-write check for the same date is
/// a no-op here (spec §4.2 "Scheduling model").
fn spawn_rotation_timer(state: Arc<Mutex<ArchiverState>>, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next_midnight = match (now.date_naive() + chrono::Duration::days(1)).and_hms_opt(0, 0, 0) {
                Some(naive) => naive.and_utc(),
                None => break,
            };
            let wait = (next_midnight - now).to_std().unwrap_or(Duration::from_secs(1));

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("rotation timer shutting down");
                    return;
                }
                _ = tokio::time::sleep(wait) => {
                    let today = Utc::now().format("%Y-%m-%d").to_string();
                    let mut guard = state.lock().await;
                    if guard.current_date != today {
                        if let Err(e) = rotate_locked(&mut guard, &today) {
                            error!("scheduled midnight rotation failed: {}", e);
                        }
                    }
                }
            }
        }
    });
}

/// Run the archiver subcommand: subscribe to `sbs.raw` and append every
/// delivered record (spec §4.2, §5).
pub async fn run(config: ArchiveConfig, cancel: CancellationToken) -> Result<()> {
    let bus = Bus::connect(&config.nats_url).await?;
    let archiver = Archiver::new(config.output_dir, cancel.clone()).await?;
    let mut subscription = bus.subscribe("archiver").await?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = subscription.next() => {
                let Some(delivery) = next else { break };
                match delivery {
                    Ok(delivery) => {
                        let receipt_date = delivery.message.timestamp.format("%Y-%m-%d").to_string();
                        if let Err(e) = archiver.archive(&delivery.message.raw, &receipt_date).await {
                            error!("archive write failed, continuing: {}", e);
                        }
                        delivery.ack().await;
                    }
                    Err(e) => warn!("failed to decode delivered message: {}", e),
                }
            }
        }
    }

    archiver.close().await?;
    bus.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn archive_writes_newline_terminated_record() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let archiver = Archiver::new(dir.path().to_string_lossy().to_string(), cancel.clone())
            .await
            .unwrap();

        archiver.archive("MSG,1,1,1,ABC,hello", "2025-01-15").await.unwrap();
        cancel.cancel();

        let content = std::fs::read_to_string(dir.path().join("sbs_2025-01-15.log")).unwrap();
        assert_eq!(content, "MSG,1,1,1,ABC,hello\n");
    }

    #[tokio::test]
    async fn rotation_compresses_prior_day_and_opens_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let archiver = Archiver::new(dir.path().to_string_lossy().to_string(), cancel.clone())
            .await
            .unwrap();

        archiver.archive("hello", "2025-01-15").await.unwrap();
        archiver.archive("world", "2025-01-16").await.unwrap();
        cancel.cancel();

        assert!(!dir.path().join("sbs_2025-01-15.log").exists());
        let gz_path = dir.path().join("sbs_2025-01-15.log.gz");
        assert!(gz_path.exists());

        let gz_bytes = std::fs::read(&gz_path).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(&gz_bytes[..]);
        let mut decompressed = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut decompressed).unwrap();
        assert_eq!(decompressed, "hello\n");

        let new_content = std::fs::read_to_string(dir.path().join("sbs_2025-01-16.log")).unwrap();
        assert_eq!(new_content, "world\n");
    }

    #[tokio::test]
    async fn rotate_twice_same_day_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let archiver = Archiver::new(dir.path().to_string_lossy().to_string(), cancel.clone())
            .await
            .unwrap();

        archiver.archive("a", "2025-01-15").await.unwrap();
        archiver.archive("b", "2025-01-15").await.unwrap();
        cancel.cancel();

        let content = std::fs::read_to_string(dir.path().join("sbs_2025-01-15.log")).unwrap();
        assert_eq!(content, "a\nb\n");
        assert!(!dir.path().join("sbs_2025-01-15.log.gz").exists());
    }
}
