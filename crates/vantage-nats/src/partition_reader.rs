use anyhow::Context;
use async_nats::jetstream::{self, consumer};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use vantage_engine::{EngineError, EngineResult, PartitionReceiver, StreamMessage};

/// Ordered consumer bound to one partition subject, valid as long as
/// fetches stay contiguous.
struct CachedConsumer {
    consumer: consumer::PullConsumer,
    next_offset: u64,
}

/// Reads partition-scoped slices of the telemetry stream.
///
/// Offsets are JetStream stream sequence numbers, so resuming from a
/// durable checkpoint is a consumer positioned at `start_sequence`.
/// Delivery runs unacknowledged; the durable cursor lives in the
/// checkpoint store, not in consumer ack state. One ephemeral consumer
/// is cached per partition and recreated whenever the caller's cursor
/// diverges from the consumer's position.
pub struct JetStreamPartitionReader {
    jetstream: jetstream::Context,
    stream_name: String,
    slots: DashMap<u32, Arc<Mutex<Option<CachedConsumer>>>>,
}

impl JetStreamPartitionReader {
    pub fn new(jetstream: jetstream::Context, stream_name: String) -> Self {
        Self {
            jetstream,
            stream_name,
            slots: DashMap::new(),
        }
    }

    /// Subject carrying one partition of the telemetry stream.
    pub fn partition_subject(stream_name: &str, partition: u32) -> String {
        format!("{stream_name}.p{partition}")
    }

    async fn create_consumer(
        &self,
        partition: u32,
        from_offset: u64,
    ) -> EngineResult<consumer::PullConsumer> {
        debug!(
            partition,
            from_offset, "Creating partition consumer"
        );

        let stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .context("Failed to look up telemetry stream")?;

        let consumer = stream
            .create_consumer(consumer::pull::Config {
                filter_subject: Self::partition_subject(&self.stream_name, partition),
                deliver_policy: consumer::DeliverPolicy::ByStartSequence {
                    start_sequence: from_offset,
                },
                ack_policy: consumer::AckPolicy::None,
                ..Default::default()
            })
            .await
            .context("Failed to create partition consumer")?;

        Ok(consumer)
    }
}

#[async_trait]
impl PartitionReceiver for JetStreamPartitionReader {
    async fn fetch(
        &self,
        partition: u32,
        from_offset: u64,
        max_messages: usize,
        max_wait: Duration,
    ) -> EngineResult<Vec<StreamMessage>> {
        let slot = self
            .slots
            .entry(partition)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        let mut guard = slot.lock().await;

        let cached = match guard.as_mut() {
            Some(cached) if cached.next_offset == from_offset => cached,
            _ => {
                let consumer = self.create_consumer(partition, from_offset).await?;
                guard.insert(CachedConsumer {
                    consumer,
                    next_offset: from_offset,
                })
            }
        };

        let mut messages = cached
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(max_wait)
            .messages()
            .await
            .context("Failed to fetch partition batch")?;

        let mut batch = Vec::new();
        while let Some(result) = messages.next().await {
            match result {
                Ok(msg) => {
                    let info = msg
                        .info()
                        .map_err(|e| EngineError::Transport(anyhow::anyhow!("{e}")))?;
                    batch.push(StreamMessage {
                        offset: info.stream_sequence,
                        payload: msg.payload.clone(),
                    });
                }
                Err(e) => {
                    warn!(partition, error = %e, "Error receiving message from batch");
                }
            }
        }

        if let Some(last) = batch.last() {
            cached.next_offset = last.offset + 1;
        }

        Ok(batch)
    }
}
