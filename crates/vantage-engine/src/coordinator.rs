use crate::checkpoint::CheckpointStore;
use crate::consumer::{CloseReason, PartitionConsumer, PartitionConsumerConfig};
use crate::lease::{LeaseStore, PartitionLease};
use crate::stream::PartitionReceiver;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vantage_domain::DeviceRegistry;

/// Lifecycle of one partition as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Unowned,
    Acquiring,
    Owned,
    Renewing,
    Lost,
}

#[derive(Debug, Clone)]
pub struct LeaseCoordinatorConfig {
    /// Identity of this process instance in the lease store.
    pub owner_id: String,
    pub consumer_group: String,
    pub partition_count: u32,
    pub acquire_interval: Duration,
    pub renew_interval: Duration,
    pub lease_duration: Duration,
    pub batch_size: usize,
    pub receive_timeout: Duration,
}

/// Arbitrates which partitions this process instance consumes.
///
/// One control loop per partition: poll the lease store until a lease is
/// granted, run a consumer for as long as renewal keeps succeeding, and
/// hand the partition back on renewal failure or shutdown. Losing a
/// lease is an expected operational condition, not an alarm; the
/// partition simply returns to the acquisition poll, possibly for a
/// different process instance to win.
pub struct LeaseCoordinator {
    config: LeaseCoordinatorConfig,
    lease_store: Arc<dyn LeaseStore>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    receiver: Arc<dyn PartitionReceiver>,
    registry: Arc<DeviceRegistry>,
}

impl LeaseCoordinator {
    pub fn new(
        config: LeaseCoordinatorConfig,
        lease_store: Arc<dyn LeaseStore>,
        checkpoint_store: Arc<dyn CheckpointStore>,
        receiver: Arc<dyn PartitionReceiver>,
        registry: Arc<DeviceRegistry>,
    ) -> Self {
        Self {
            config,
            lease_store,
            checkpoint_store,
            receiver,
            registry,
        }
    }

    /// Run control loops for every partition until cancelled.
    pub async fn run(self: Arc<Self>, ctx: CancellationToken) -> anyhow::Result<()> {
        info!(
            owner_id = %self.config.owner_id,
            partition_count = self.config.partition_count,
            "Starting lease coordinator"
        );

        let mut tasks = JoinSet::new();
        for partition in 0..self.config.partition_count {
            let coordinator = self.clone();
            let ctx = ctx.clone();
            tasks.spawn(async move { coordinator.manage_partition(partition, ctx).await });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Partition control loop panicked");
            }
        }

        info!("Lease coordinator stopped");
        Ok(())
    }

    async fn manage_partition(&self, partition: u32, ctx: CancellationToken) {
        // First acquisition attempt happens immediately; the interval
        // only paces retries and re-contention after losing ownership.
        loop {
            if let Some(lease) = self.try_acquire(partition).await {
                // Owned: run the consumer until renewal fails or we shut down.
                self.own_partition(partition, lease, &ctx).await;
            }

            if ctx.is_cancelled() {
                return;
            }

            debug!(
                partition,
                state = ?LeaseState::Unowned,
                "Waiting for acquisition poll"
            );
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = tokio::time::sleep(self.config.acquire_interval) => {}
            }
        }
    }

    async fn try_acquire(&self, partition: u32) -> Option<PartitionLease> {
        debug!(partition, state = ?LeaseState::Acquiring, "Attempting lease acquisition");
        match self
            .lease_store
            .acquire(partition, &self.config.owner_id, self.config.lease_duration)
            .await
        {
            Ok(Some(lease)) => {
                info!(
                    partition,
                    lease_id = %lease.lease_id,
                    state = ?LeaseState::Owned,
                    "Lease acquired"
                );
                Some(lease)
            }
            Ok(None) => {
                debug!(partition, "Partition owned elsewhere");
                None
            }
            Err(e) => {
                // Transient store trouble: the poll loop is the retry.
                warn!(partition, error = %e, "Lease acquisition failed");
                None
            }
        }
    }

    /// Drive one ownership span: open the consumer, keep renewing, and
    /// close with the right reason when ownership ends.
    async fn own_partition(
        &self,
        partition: u32,
        mut lease: PartitionLease,
        ctx: &CancellationToken,
    ) {
        let consumer = Arc::new(PartitionConsumer::new(
            partition,
            PartitionConsumerConfig {
                consumer_group: self.config.consumer_group.clone(),
                batch_size: self.config.batch_size,
                receive_timeout: self.config.receive_timeout,
            },
            self.receiver.clone(),
            self.registry.clone(),
            self.checkpoint_store.clone(),
        ));
        consumer.open(&lease);

        let run_ctx = CancellationToken::new();
        let run_task = tokio::spawn({
            let consumer = consumer.clone();
            let run_ctx = run_ctx.clone();
            async move { consumer.run(run_ctx).await }
        });

        let close_reason = loop {
            tokio::select! {
                _ = ctx.cancelled() => break CloseReason::GracefulShutdown,
                _ = tokio::time::sleep(self.config.renew_interval) => {}
            }

            debug!(partition, state = ?LeaseState::Renewing, "Renewing lease");
            if lease.is_expired() {
                warn!(
                    partition,
                    lease_id = %lease.lease_id,
                    state = ?LeaseState::Lost,
                    "Lease expired before renewal"
                );
                break CloseReason::LeaseLost;
            }
            match self
                .lease_store
                .renew(&lease, self.config.lease_duration)
                .await
            {
                Ok(Some(renewed)) => {
                    debug!(partition, state = ?LeaseState::Owned, "Lease renewed");
                    lease = renewed;
                }
                Ok(None) => {
                    info!(
                        partition,
                        lease_id = %lease.lease_id,
                        state = ?LeaseState::Lost,
                        "Lease no longer held"
                    );
                    break CloseReason::LeaseLost;
                }
                Err(e) => {
                    warn!(
                        partition,
                        error = %e,
                        state = ?LeaseState::Lost,
                        "Lease renewal failed"
                    );
                    break CloseReason::LeaseLost;
                }
            }
        };

        // Stop the batch loop at its next boundary before closing.
        run_ctx.cancel();
        match run_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(partition, error = %e, "Partition batch loop failed"),
            Err(e) => error!(partition, error = %e, "Partition batch loop panicked"),
        }

        consumer.close(close_reason).await;

        if close_reason == CloseReason::GracefulShutdown {
            if let Err(e) = self.lease_store.release(&lease).await {
                warn!(partition, error = %e, "Failed to release lease on shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::lease::InMemoryLeaseStore;
    use crate::stream::InMemoryPartitionStream;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use vantage_domain::{
        codec, AlertEvent, AlertSink, DeviceRegistryConfig, DomainResult, TelemetryEvent,
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

    struct Harness {
        coordinator: Arc<LeaseCoordinator>,
        lease_store: Arc<InMemoryLeaseStore>,
        checkpoint_store: Arc<InMemoryCheckpointStore>,
        stream: Arc<InMemoryPartitionStream>,
        sink: Arc<RecordingSink>,
    }

    fn harness(partition_count: u32) -> Harness {
        let lease_store = Arc::new(InMemoryLeaseStore::new());
        let checkpoint_store = Arc::new(InMemoryCheckpointStore::new());
        let stream = Arc::new(InMemoryPartitionStream::new());
        let sink = Arc::new(RecordingSink::default());
        let registry = Arc::new(DeviceRegistry::new(
            DeviceRegistryConfig::default(),
            sink.clone(),
        ));

        let coordinator = Arc::new(LeaseCoordinator::new(
            LeaseCoordinatorConfig {
                owner_id: "node-a".to_string(),
                consumer_group: "vantage".to_string(),
                partition_count,
                acquire_interval: Duration::from_secs(10),
                renew_interval: Duration::from_secs(10),
                lease_duration: Duration::from_secs(30),
                batch_size: 100,
                receive_timeout: Duration::from_secs(1),
            },
            lease_store.clone(),
            checkpoint_store.clone(),
            stream.clone(),
            registry,
        ));

        Harness {
            coordinator,
            lease_store,
            checkpoint_store,
            stream,
            sink,
        }
    }

    fn push_event(stream: &InMemoryPartitionStream, partition: u32, name: &str, value: f64) {
        let event = TelemetryEvent {
            device_id: vantage_domain::device::device_id_from_key(name),
            name: name.to_string(),
            value,
            status: "Ok".to_string(),
            timestamp: chrono::Utc::now(),
        };
        stream.push(partition, codec::encode_telemetry(&event).unwrap());
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(600), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("condition never became true");
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquires_and_consumes_all_partitions() {
        let h = harness(2);
        push_event(&h.stream, 0, "device001", 55.0);
        push_event(&h.stream, 1, "device002", 45.0);

        let ctx = CancellationToken::new();
        let task = tokio::spawn(h.coordinator.clone().run(ctx.clone()));

        wait_for(|| {
            h.checkpoint_store.offset(0) == Some(1) && h.checkpoint_store.offset(1) == Some(1)
        })
        .await;

        assert_eq!(h.lease_store.owner_of(0), Some("node-a".to_string()));
        assert_eq!(h.lease_store.owner_of(1), Some("node-a".to_string()));
        assert_eq!(h.sink.alerts.lock().unwrap().len(), 1);

        ctx.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_acquisition_does_not_wait_for_the_poll_interval() {
        let h = harness(1);
        let started = tokio::time::Instant::now();

        let ctx = CancellationToken::new();
        let task = tokio::spawn(h.coordinator.clone().run(ctx.clone()));

        wait_for(|| h.lease_store.owner_of(0).is_some()).await;

        // Well under the 10s acquire interval: the lease was taken on
        // startup, not after the first poll tick.
        assert!(started.elapsed() < Duration::from_secs(10));

        ctx.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_shutdown_releases_leases() {
        let h = harness(1);

        let ctx = CancellationToken::new();
        let task = tokio::spawn(h.coordinator.clone().run(ctx.clone()));

        wait_for(|| h.lease_store.owner_of(0).is_some()).await;

        ctx.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(h.lease_store.owner_of(0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_lease_returns_partition_and_reacquires() {
        let h = harness(1);
        push_event(&h.stream, 0, "device001", 45.0);

        let ctx = CancellationToken::new();
        let task = tokio::spawn(h.coordinator.clone().run(ctx.clone()));

        wait_for(|| h.checkpoint_store.offset(0) == Some(1)).await;

        // Another instance steals the partition: the next renewal fails.
        h.lease_store.evict(0);
        wait_for(|| h.lease_store.owner_of(0).is_none()).await;

        // The control loop returns to acquisition and wins again, and the
        // consumer resumes from the durable checkpoint.
        push_event(&h.stream, 0, "device001", 60.0);
        wait_for(|| h.checkpoint_store.offset(0) == Some(2)).await;
        assert_eq!(h.lease_store.owner_of(0), Some("node-a".to_string()));
        assert_eq!(h.sink.alerts.lock().unwrap().len(), 1);

        ctx.cancel();
        task.await.unwrap().unwrap();
    }
}
