use anyhow::{Context, Result};
use async_nats::jetstream;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

/// Publish boundary over JetStream, mockable for producer tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JetStreamPublisher: Send + Sync {
    /// Publish a payload and wait for the stream acknowledgment.
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()>;
}

pub struct NatsJetStreamPublisher {
    jetstream: jetstream::Context,
}

impl NatsJetStreamPublisher {
    pub fn new(jetstream: jetstream::Context) -> Self {
        Self { jetstream }
    }
}

#[async_trait]
impl JetStreamPublisher for NatsJetStreamPublisher {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        debug!(subject = %subject, size_bytes = payload.len(), "Publishing message");

        let ack = self
            .jetstream
            .publish(subject, payload)
            .await
            .context("Failed to publish message to JetStream")?;

        ack.await
            .context("Failed to receive JetStream acknowledgment")?;

        Ok(())
    }
}
