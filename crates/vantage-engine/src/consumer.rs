use crate::checkpoint::{CheckpointStore, PartitionCheckpointer};
use crate::error::EngineResult;
use crate::lease::PartitionLease;
use crate::stream::{PartitionReceiver, StreamMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vantage_domain::{codec, DeviceRegistry};

/// Why a partition consumer is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    GracefulShutdown,
    LeaseLost,
}

#[derive(Debug, Clone)]
pub struct PartitionConsumerConfig {
    pub consumer_group: String,
    pub batch_size: usize,
    pub receive_timeout: Duration,
}

/// Owns one stream partition for the duration of a lease: pulls ordered
/// batches, dispatches each event to the key-state router, and advances
/// the checkpoint once per batch.
///
/// Per-event failures (bad payload, routing error) are logged and
/// skipped; they never abort the batch. Batch-level failures are logged
/// and retried on the next poll. The only fatal path is losing the
/// lease, which is the coordinator's problem.
pub struct PartitionConsumer {
    partition: u32,
    config: PartitionConsumerConfig,
    receiver: Arc<dyn PartitionReceiver>,
    registry: Arc<DeviceRegistry>,
    checkpointer: PartitionCheckpointer,
    opened: AtomicBool,
}

impl PartitionConsumer {
    pub fn new(
        partition: u32,
        config: PartitionConsumerConfig,
        receiver: Arc<dyn PartitionReceiver>,
        registry: Arc<DeviceRegistry>,
        checkpoint_store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            partition,
            config,
            receiver,
            registry,
            checkpointer: PartitionCheckpointer::new(partition, checkpoint_store),
            opened: AtomicBool::new(false),
        }
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Bind the consumer to a granted lease. Idempotent: repeated opens
    /// for the same partition allocate nothing new.
    pub fn open(&self, lease: &PartitionLease) {
        if self.opened.swap(true, Ordering::SeqCst) {
            debug!(
                partition = self.partition,
                lease_id = %lease.lease_id,
                "Consumer already open, ignoring repeated open"
            );
            return;
        }
        info!(
            partition = self.partition,
            consumer_group = %self.config.consumer_group,
            lease_id = %lease.lease_id,
            "Lease acquired, partition consumer open"
        );
    }

    /// Sequential batch loop for this partition. The next batch is not
    /// fetched until the current one has been dispatched and
    /// checkpointed; cancellation is observed at batch boundaries only.
    pub async fn run(&self, ctx: CancellationToken) -> EngineResult<()> {
        let mut cursor = self.checkpointer.restore().await?;
        info!(
            partition = self.partition,
            cursor, "Starting partition batch loop"
        );

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!(partition = self.partition, "Partition batch loop stopping");
                    break;
                }
                fetched = self.receiver.fetch(
                    self.partition,
                    cursor + 1,
                    self.config.batch_size,
                    self.config.receive_timeout,
                ) => {
                    match fetched {
                        Ok(batch) if batch.is_empty() => continue,
                        Ok(batch) => {
                            if let Err(e) = self.process_batch(&batch).await {
                                // Never fatal: the coordinator handles
                                // reassignment, redelivery handles the rest.
                                error!(
                                    partition = self.partition,
                                    error = %e,
                                    "Error processing batch"
                                );
                                tokio::time::sleep(Duration::from_secs(1)).await;
                            }
                            cursor = self.checkpointer.cursor();
                        }
                        Err(e) => {
                            error!(
                                partition = self.partition,
                                error = %e,
                                "Error fetching batch"
                            );
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Dispatch one ordered batch, then issue a single checkpoint
    /// advance covering the whole batch.
    pub async fn process_batch(&self, batch: &[StreamMessage]) -> EngineResult<()> {
        let mut high_offset = None;

        for message in batch {
            let event = match codec::decode_telemetry(&message.payload) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        partition = self.partition,
                        offset = message.offset,
                        error = %e,
                        "Skipping undecodable event"
                    );
                    high_offset = Some(message.offset);
                    continue;
                }
            };

            if let Err(e) = self.registry.route(event).await {
                warn!(
                    partition = self.partition,
                    offset = message.offset,
                    error = %e,
                    "Failed to route event"
                );
            }
            high_offset = Some(message.offset);
        }

        if let Some(offset) = high_offset {
            self.checkpointer.commit(offset).await?;
        }
        Ok(())
    }

    /// Release the partition. On graceful shutdown, progress that never
    /// made it to the store is flushed first; on lease loss, no
    /// checkpoint is attempted since ownership may already be contested.
    pub async fn close(&self, reason: CloseReason) {
        match reason {
            CloseReason::GracefulShutdown => {
                if let Err(e) = self.checkpointer.flush_pending().await {
                    warn!(
                        partition = self.partition,
                        error = %e,
                        "Failed to checkpoint on graceful shutdown"
                    );
                }
                info!(partition = self.partition, "Partition consumer closed");
            }
            CloseReason::LeaseLost => {
                info!(
                    partition = self.partition,
                    consumer_group = %self.config.consumer_group,
                    "Lease lost, partition consumer closed without checkpoint"
                );
            }
        }
        self.opened.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{InMemoryCheckpointStore, MockCheckpointStore};
    use crate::error::EngineError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use vantage_domain::{
        AlertEvent, AlertSink, DeviceRegistryConfig, DomainResult, TelemetryEvent,
    };

    #[derive(Default)]
    struct RecordingSink {
        alerts: Mutex<Vec<AlertEvent>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn publish(&self, alert: &AlertEvent) -> DomainResult<()> {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    fn encoded_event(name: &str, value: f64) -> Bytes {
        let event = TelemetryEvent {
            device_id: vantage_domain::device::device_id_from_key(name),
            name: name.to_string(),
            value,
            status: "Ok".to_string(),
            timestamp: chrono::Utc::now(),
        };
        codec::encode_telemetry(&event).unwrap()
    }

    fn lease(partition: u32) -> PartitionLease {
        PartitionLease {
            partition,
            lease_id: "node-a-p0-1".to_string(),
            owner: "node-a".to_string(),
            expires_at: chrono::Utc::now() + Duration::from_secs(30),
        }
    }

    fn consumer_with(
        registry: Arc<DeviceRegistry>,
        checkpoint_store: Arc<dyn CheckpointStore>,
    ) -> PartitionConsumer {
        PartitionConsumer::new(
            0,
            PartitionConsumerConfig {
                consumer_group: "vantage".to_string(),
                batch_size: 100,
                receive_timeout: Duration::from_millis(10),
            },
            Arc::new(crate::stream::InMemoryPartitionStream::new()),
            registry,
            checkpoint_store,
        )
    }

    fn registry(sink: Arc<RecordingSink>) -> Arc<DeviceRegistry> {
        Arc::new(DeviceRegistry::new(DeviceRegistryConfig::default(), sink))
    }

    fn message(offset: u64, payload: Bytes) -> StreamMessage {
        StreamMessage { offset, payload }
    }

    #[tokio::test]
    async fn test_batch_is_dispatched_then_checkpointed_once() {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(InMemoryCheckpointStore::new());
        let consumer = consumer_with(registry(sink.clone()), store.clone());
        consumer.checkpointer.restore().await.unwrap();

        let batch = vec![
            message(1, encoded_event("device001", 45.0)),
            message(2, encoded_event("device001", 55.0)),
            message(3, encoded_event("device002", 20.0)),
        ];

        consumer.process_batch(&batch).await.unwrap();

        assert_eq!(store.offset(0), Some(3));
        let alerts = sink.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].value, 55.0);
        assert_eq!(alerts[1].value, 20.0);
    }

    #[tokio::test]
    async fn test_undecodable_event_is_skipped_not_fatal() {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(InMemoryCheckpointStore::new());
        let consumer = consumer_with(registry(sink.clone()), store.clone());
        consumer.checkpointer.restore().await.unwrap();

        let batch = vec![
            message(1, Bytes::from_static(b"garbage")),
            message(2, encoded_event("device001", 55.0)),
        ];

        consumer.process_batch(&batch).await.unwrap();

        // The batch still checkpoints past the bad event.
        assert_eq!(store.offset(0), Some(2));
        assert_eq!(sink.alerts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_does_not_checkpoint() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let consumer = consumer_with(registry(Arc::new(RecordingSink::default())), store.clone());
        consumer.checkpointer.restore().await.unwrap();

        consumer.process_batch(&[]).await.unwrap();

        assert_eq!(store.offset(0), None);
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let consumer = consumer_with(
            registry(Arc::new(RecordingSink::default())),
            Arc::new(InMemoryCheckpointStore::new()),
        );

        consumer.open(&lease(0));
        consumer.open(&lease(0));

        assert!(consumer.opened.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_graceful_close_flushes_pending_checkpoint() {
        let mut store = MockCheckpointStore::new();
        store.expect_load().returning(|_| Ok(None));
        // First save fails, leaving the offset pending; the close retries.
        store
            .expect_save()
            .times(1)
            .returning(|_, _| Err(EngineError::CheckpointStore(anyhow::anyhow!("unavailable"))));
        store
            .expect_save()
            .withf(|partition, offset| *partition == 0 && *offset == 1)
            .times(1)
            .returning(|_, _| Ok(()));

        let consumer = consumer_with(registry(Arc::new(RecordingSink::default())), Arc::new(store));
        consumer.checkpointer.restore().await.unwrap();
        consumer
            .process_batch(&[message(1, encoded_event("device001", 45.0))])
            .await
            .unwrap();

        consumer.close(CloseReason::GracefulShutdown).await;
    }

    #[tokio::test]
    async fn test_lease_lost_close_never_checkpoints() {
        let mut store = MockCheckpointStore::new();
        store.expect_load().returning(|_| Ok(None));
        store
            .expect_save()
            .times(1)
            .returning(|_, _| Err(EngineError::CheckpointStore(anyhow::anyhow!("unavailable"))));

        let consumer = consumer_with(registry(Arc::new(RecordingSink::default())), Arc::new(store));
        consumer.checkpointer.restore().await.unwrap();
        consumer
            .process_batch(&[message(1, encoded_event("device001", 45.0))])
            .await
            .unwrap();

        // No second save expectation: a lease-lost close must not touch the store.
        consumer.close(CloseReason::LeaseLost).await;
    }

    #[tokio::test]
    async fn test_run_consumes_stream_until_cancelled() {
        let sink = Arc::new(RecordingSink::default());
        let stream = Arc::new(crate::stream::InMemoryPartitionStream::new());
        let store = Arc::new(InMemoryCheckpointStore::new());
        for value in [45.0, 55.0, 46.0] {
            stream.push(0, encoded_event("device001", value));
        }

        let consumer = Arc::new(PartitionConsumer::new(
            0,
            PartitionConsumerConfig {
                consumer_group: "vantage".to_string(),
                batch_size: 2,
                receive_timeout: Duration::from_millis(5),
            },
            stream.clone(),
            registry(sink.clone()),
            store.clone(),
        ));

        let ctx = CancellationToken::new();
        let task = tokio::spawn({
            let consumer = consumer.clone();
            let ctx = ctx.clone();
            async move { consumer.run(ctx).await }
        });

        // Wait for the whole stream to be consumed, then stop the loop.
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.offset(0) != Some(3) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stream was not fully consumed");

        ctx.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(sink.alerts.lock().unwrap().len(), 1);
    }
}
