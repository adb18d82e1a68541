//! Ingestion connector: one supervised TCP reader per configured source,
//! framing CRLF-delimited records and publishing them to the bus with
//! receipt metadata. See spec §4.1, §5.

use crate::bus::Bus;
use crate::config::IngestConfig;
use crate::model::SbsMessage;
use chrono::Utc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const IDLE_READ_DEADLINE: Duration = Duration::from_secs(30);
const READ_BUF_SIZE: usize = 8192;

/// Splits a byte stream on CRLF, retaining the trailing partial segment
/// across calls so a terminator split across two reads still yields one
/// record (spec §8 "Buffer boundary"). A bare `\n` is never a separator.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buf: Vec<u8>,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly read bytes; returns complete records, trimmed of
    /// surrounding ASCII whitespace, with empty results discarded.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        let mut records = Vec::new();
        loop {
            let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") else {
                break;
            };
            let record_bytes: Vec<u8> = self.buf.drain(..pos + 2).collect();
            let record = String::from_utf8_lossy(&record_bytes[..record_bytes.len() - 2]);
            let trimmed = record.trim();
            if !trimmed.is_empty() {
                records.push(trimmed.to_string());
            }
        }
        records
    }
}

/// Run the ingestion connector: one independent task per configured
/// source, scheduled in parallel, returning once all tasks observe
/// cancellation.
pub async fn run(config: IngestConfig, bus: Bus, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut handles = Vec::new();
    for source in config.sources {
        let bus = bus.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            run_source(source, bus, cancel).await;
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Per-source state machine: DISCONNECTED -> dial -> CONNECTED -> read loop
/// -> DISCONNECTED, with an unbounded 5s backoff between attempts. Dial
/// failures and any read error (including an expired idle deadline) return
/// to DISCONNECTED identically (spec §4.1).
async fn run_source(source: String, bus: Bus, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            info!(source = %source, "ingestor shutting down");
            return;
        }

        info!(source = %source, "dialing");
        let stream = tokio::select! {
            _ = cancel.cancelled() => return,
            result = TcpStream::connect(&source) => result,
        };

        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(source = %source, error = %e, "dial failed, retrying in 5s");
                sleep_or_cancel(RECONNECT_BACKOFF, &cancel).await;
                continue;
            }
        };

        info!(source = %source, "connected");
        if let Err(e) = read_loop(&source, stream, &bus, &cancel).await {
            warn!(source = %source, error = %e, "connection reset, retrying in 5s");
            sleep_or_cancel(RECONNECT_BACKOFF, &cancel).await;
        }
    }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

/// Read from `stream` until cancellation, an idle-deadline expiry, or any
/// other I/O error, publishing each complete CRLF-framed record to the bus.
async fn read_loop(
    source: &str,
    mut stream: TcpStream,
    bus: &Bus,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut splitter = FrameSplitter::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let read_result = tokio::select! {
            _ = cancel.cancelled() => {
                info!(source = %source, "cancellation observed, closing connection");
                return Ok(());
            }
            result = tokio::time::timeout(IDLE_READ_DEADLINE, stream.read(&mut buf)) => result,
        };

        let n = match read_result {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => anyhow::bail!("read error: {}", e),
            Err(_) => anyhow::bail!("idle read deadline ({}s) expired", IDLE_READ_DEADLINE.as_secs()),
        };

        if n == 0 {
            anyhow::bail!("connection closed by peer (EOF)");
        }

        for record in splitter.feed(&buf[..n]) {
            let message = SbsMessage {
                raw: record,
                timestamp: Utc::now(),
                source: source.to_string(),
            };
            if let Err(e) = bus.publish(&message).await {
                error!(source = %source, error = %e, "publish failed, dropping record");
            } else {
                debug!(source = %source, "published record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_split_across_reads_yields_one_record() {
        let mut splitter = FrameSplitter::new();
        let first = splitter.feed(b"MSG,3,0,0,0,ABC123,0,,,,,\r\nMSG,3,0");
        assert_eq!(first, vec!["MSG,3,0,0,0,ABC123,0,,,,,".to_string()]);

        let second = splitter.feed(b",0,0,DEF456,0,,,,,\r\n");
        assert_eq!(second, vec!["MSG,3,0,0,0,DEF456,0,,,,,".to_string()]);
    }

    #[test]
    fn bare_lf_is_not_a_separator() {
        let mut splitter = FrameSplitter::new();
        let records = splitter.feed(b"one\ntwo\r\n");
        assert_eq!(records, vec!["one\ntwo".to_string()]);
    }

    #[test]
    fn empty_records_are_discarded() {
        let mut splitter = FrameSplitter::new();
        let records = splitter.feed(b"\r\n  \r\nfoo\r\n");
        assert_eq!(records, vec!["foo".to_string()]);
    }

    #[test]
    fn records_are_trimmed_of_surrounding_whitespace() {
        let mut splitter = FrameSplitter::new();
        let records = splitter.feed(b"  foo  \r\n");
        assert_eq!(records, vec!["foo".to_string()]);
    }
}
