//! Message bus client: JSON-encoded publish/subscribe against a single NATS
//! JetStream stream, `SBS_RAW`, backed by the subject `sbs.raw`. See spec
//! §6. The bus is a collaborator — this module specifies the stream
//! bootstrap and the wire codec, not a bus implementation.

use crate::model::SbsMessage;
use anyhow::{Context, Result};
use async_nats::jetstream::{
    self,
    consumer::{AckPolicy, pull::Config as PullConfig},
};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

pub const SUBJECT: &str = "sbs.raw";
pub const STREAM_NAME: &str = "SBS_RAW";
const RETENTION_SECONDS: u64 = 24 * 3600;

/// A delivered message paired with the handle needed to acknowledge or
/// request redelivery of it.
pub struct Delivery {
    pub message: SbsMessage,
    raw: jetstream::Message,
}

impl Delivery {
    /// Acknowledge successful processing — the bus will not redeliver.
    pub async fn ack(&self) {
        if let Err(e) = self.raw.ack().await {
            warn!("failed to ack message: {}", e);
        }
    }

    /// Request redelivery (spec §7: cold-store write failure in the
    /// tracker propagates and the message is considered unprocessed).
    pub async fn nak(&self) {
        if let Err(e) = self
            .raw
            .ack_with(jetstream::AckKind::Nak(None))
            .await
        {
            warn!("failed to nak message: {}", e);
        }
    }
}

/// A subscription handle yielding deserialized [`SbsMessage`]s alongside
/// their ack handle.
pub struct Subscription {
    inner: jetstream::consumer::pull::Stream,
}

impl Subscription {
    /// Pull the next delivery off the subscription. A payload that fails
    /// to decode as JSON is acknowledged immediately (it can never
    /// succeed on redelivery) and `Err` is returned so the caller can log
    /// it; callers should continue pulling after logging.
    pub async fn next(&mut self) -> Option<Result<Delivery>> {
        let next = self.inner.next().await?;
        let raw = match next {
            Ok(msg) => msg,
            Err(e) => return Some(Err(anyhow::anyhow!("jetstream delivery error: {}", e))),
        };
        match serde_json::from_slice::<SbsMessage>(&raw.payload) {
            Ok(message) => Some(Ok(Delivery { message, raw })),
            Err(e) => {
                if let Err(ack_err) = raw.ack().await {
                    warn!("failed to ack undecodable message: {}", ack_err);
                }
                Some(Err(anyhow::anyhow!("decoding SBSMessage JSON payload: {}", e)))
            }
        }
    }
}

/// Bus client bound to the `sbs.raw` subject / `SBS_RAW` stream.
#[derive(Clone)]
pub struct Bus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl Bus {
    /// Connect to NATS and idempotently create the `SBS_RAW` stream. An
    /// "already exists" error on stream creation is ignored (spec §6).
    pub async fn connect(nats_url: &str) -> Result<Self> {
        info!("connecting to NATS at {}", nats_url);
        let client = async_nats::connect(nats_url)
            .await
            .with_context(|| format!("connecting to NATS at {}", nats_url))?;
        let jetstream = jetstream::new(client.clone());

        match jetstream
            .create_stream(jetstream::stream::Config {
                name: STREAM_NAME.to_string(),
                subjects: vec![SUBJECT.to_string()],
                max_age: std::time::Duration::from_secs(RETENTION_SECONDS),
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
        {
            Ok(_) => debug!("stream {} ready", STREAM_NAME),
            Err(e) if e.to_string().to_lowercase().contains("already exists") => {
                debug!("stream {} already exists, continuing", STREAM_NAME);
            }
            Err(e) => return Err(anyhow::anyhow!("creating stream {}: {}", STREAM_NAME, e)),
        }

        Ok(Self { client, jetstream })
    }

    /// Publish a message to `sbs.raw`. A publish failure is the caller's
    /// responsibility to handle per spec §7 (log and drop in the
    /// ingestor).
    pub async fn publish(&self, message: &SbsMessage) -> Result<()> {
        let payload = serde_json::to_vec(message).context("encoding SBSMessage JSON payload")?;
        self.client
            .publish(SUBJECT, payload.into())
            .await
            .context("publishing to sbs.raw")?;
        Ok(())
    }

    /// Subscribe with a durable pull consumer so redelivery can be relied
    /// on for at-least-once semantics (spec §1: "durable pub/sub ... with
    /// at-least-once delivery").
    pub async fn subscribe(&self, durable_name: &str) -> Result<Subscription> {
        let stream = self
            .jetstream
            .get_stream(STREAM_NAME)
            .await
            .context("looking up SBS_RAW stream")?;

        let config = PullConfig {
            durable_name: Some(durable_name.to_string()),
            ack_policy: AckPolicy::Explicit,
            ..Default::default()
        };

        let consumer = match stream.get_consumer::<PullConfig>(durable_name).await {
            Ok(consumer) => consumer,
            Err(_) => stream
                .create_consumer(config)
                .await
                .context("creating pull consumer")?,
        };

        let messages = consumer
            .messages()
            .await
            .context("opening pull consumer message stream")?;
        Ok(Subscription { inner: messages })
    }

    /// Close the bus connection (first in the shutdown order of spec §5).
    pub async fn close(self) -> Result<()> {
        self.client.flush().await.context("flushing NATS client")?;
        Ok(())
    }
}
