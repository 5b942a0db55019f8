use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vantage_domain::{
    codec, AlertEvent, AlertSink, DeviceRegistry, DeviceRegistryConfig, DomainResult,
    TelemetryEvent,
};
use vantage_engine::{
    InMemoryCheckpointStore, InMemoryLeaseStore, InMemoryPartitionStream, LeaseCoordinator,
    LeaseCoordinatorConfig,
};

#[derive(Default)]
struct RecordingSink {
    alerts: Mutex<Vec<AlertEvent>>,
}

impl RecordingSink {
    fn alerts(&self) -> Vec<AlertEvent> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AlertSink for RecordingSink {
    async fn publish(&self, alert: &AlertEvent) -> DomainResult<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

struct Pipeline {
    coordinator: Arc<LeaseCoordinator>,
    lease_store: Arc<InMemoryLeaseStore>,
    checkpoint_store: Arc<InMemoryCheckpointStore>,
    stream: Arc<InMemoryPartitionStream>,
    sink: Arc<RecordingSink>,
    registry: Arc<DeviceRegistry>,
}

fn pipeline(partition_count: u32) -> Pipeline {
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
        registry.clone(),
    ));

    Pipeline {
        coordinator,
        lease_store,
        checkpoint_store,
        stream,
        sink,
        registry,
    }
}

fn push_reading(stream: &InMemoryPartitionStream, partition: u32, name: &str, value: f64) -> u64 {
    let event = TelemetryEvent {
        device_id: vantage_domain::device::device_id_from_key(name),
        name: name.to_string(),
        value,
        status: "Ok".to_string(),
        timestamp: chrono::Utc::now(),
    };
    stream.push(partition, codec::encode_telemetry(&event).unwrap())
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
async fn test_end_to_end_alerting_across_partitions() {
    let p = pipeline(2);

    // device001 lands on partition 0, device002 on partition 1. Default
    // thresholds are [30, 50]; only out-of-range values alert.
    push_reading(&p.stream, 0, "device001", 45.0);
    push_reading(&p.stream, 0, "device001", 55.0);
    push_reading(&p.stream, 1, "device002", 20.0);
    push_reading(&p.stream, 1, "device002", 40.0);

    let ctx = CancellationToken::new();
    let task = tokio::spawn(p.coordinator.clone().run(ctx.clone()));

    wait_for(|| {
        p.checkpoint_store.offset(0) == Some(2) && p.checkpoint_store.offset(1) == Some(2)
    })
    .await;

    let alerts = p.sink.alerts();
    assert_eq!(alerts.len(), 2);
    assert!(alerts.iter().any(|a| a.name == "device001" && a.value == 55.0));
    assert!(alerts.iter().any(|a| a.name == "device002" && a.value == 20.0));

    // The router synthesized metadata on first touch.
    let metadata = p.registry.get_metadata("device001").await.unwrap();
    assert_eq!(metadata.min_threshold, 30);
    assert_eq!(metadata.max_threshold, 50);

    ctx.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_threshold_update_changes_alerting_for_later_events() {
    let p = pipeline(1);
    push_reading(&p.stream, 0, "device001", 45.0);

    let ctx = CancellationToken::new();
    let task = tokio::spawn(p.coordinator.clone().run(ctx.clone()));

    wait_for(|| p.checkpoint_store.offset(0) == Some(1)).await;
    assert!(p.sink.alerts().is_empty());

    // Narrow the band so 45 is now out of range.
    let mut metadata = p.registry.get_metadata("device001").await.unwrap();
    metadata.min_threshold = 0;
    metadata.max_threshold = 10;
    p.registry
        .set_metadata("device001", metadata)
        .await
        .unwrap();

    push_reading(&p.stream, 0, "device001", 45.0);
    wait_for(|| p.checkpoint_store.offset(0) == Some(2)).await;

    let alerts = p.sink.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].min_threshold, 0);
    assert_eq!(alerts[0].max_threshold, 10);

    ctx.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_graceful_shutdown_flushes_checkpoint_and_releases_lease() {
    let p = pipeline(1);
    push_reading(&p.stream, 0, "device001", 45.0);

    let ctx = CancellationToken::new();
    let task = tokio::spawn(p.coordinator.clone().run(ctx.clone()));

    wait_for(|| p.checkpoint_store.offset(0) == Some(1)).await;

    ctx.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(p.checkpoint_store.offset(0), Some(1));
    assert_eq!(p.lease_store.owner_of(0), None);
}

#[tokio::test(start_paused = true)]
async fn test_lease_loss_hands_partition_back_and_resumes_from_checkpoint() {
    let p = pipeline(1);
    push_reading(&p.stream, 0, "device001", 55.0);

    let ctx = CancellationToken::new();
    let task = tokio::spawn(p.coordinator.clone().run(ctx.clone()));

    wait_for(|| p.checkpoint_store.offset(0) == Some(1)).await;
    assert_eq!(p.sink.alerts().len(), 1);

    // Simulate another instance taking the partition.
    p.lease_store.evict(0);
    wait_for(|| p.lease_store.owner_of(0).is_none()).await;

    // After reacquisition, consumption resumes past the durable
    // checkpoint: the already-processed event is not redelivered.
    push_reading(&p.stream, 0, "device001", 60.0);
    wait_for(|| p.checkpoint_store.offset(0) == Some(2)).await;

    assert_eq!(p.lease_store.owner_of(0), Some("node-a".to_string()));
    assert_eq!(p.sink.alerts().len(), 2);

    ctx.cancel();
    task.await.unwrap().unwrap();
}
