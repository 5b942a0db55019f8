mod config;
mod telemetry;

use config::ServiceConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use vantage_domain::{DeviceRegistry, DeviceRegistryConfig, InMemoryDeviceStateStore};
use vantage_engine::{LeaseCoordinator, LeaseCoordinatorConfig};
use vantage_nats::{
    run_demo_producer, DemoProducerConfig, JetStreamPartitionReader, JetStreamPublisher,
    KvCheckpointStore, KvLeaseStore, NatsAlertSink, NatsClient, NatsJetStreamPublisher,
};
use vantage_runner::Runner;

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = telemetry::init_telemetry(&config.log_level) {
        eprintln!("Failed to initialize telemetry: {}", e);
        std::process::exit(1);
    }

    info!(
        owner_id = %config.owner_id,
        partition_count = config.partition_count,
        "Starting vantage-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let (coordinator, publisher, nats_client) = match initialize_pipeline(&config).await {
        Ok(deps) => deps,
        Err(e) => {
            error!("Failed to initialize pipeline: {}", e);
            std::process::exit(1);
        }
    };

    let mut runner = Runner::new();

    runner = runner.with_named_process("lease_coordinator", {
        let coordinator = coordinator.clone();
        move |ctx| async move { coordinator.run(ctx).await }
    });

    if config.demo_producer_enabled {
        let demo_config = DemoProducerConfig {
            interval: Duration::from_secs(config.demo_interval_secs),
            device_count: config.demo_device_count,
            stream_name: config.telemetry_stream.clone(),
            partition_count: config.partition_count,
        };
        runner = runner.with_named_process("demo_producer", move |ctx| async move {
            run_demo_producer(ctx, demo_config, publisher).await
        });
    }

    runner = runner
        .with_closer(move || async move {
            nats_client.close().await?;
            info!("Cleanup complete");
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10));

    runner.run().await;
}

async fn initialize_pipeline(
    config: &ServiceConfig,
) -> anyhow::Result<(Arc<LeaseCoordinator>, Arc<dyn JetStreamPublisher>, NatsClient)> {
    info!("Initializing NATS...");
    let nats_client = NatsClient::connect(
        &config.nats_url,
        Duration::from_secs(config.startup_timeout_secs),
    )
    .await?;

    nats_client
        .ensure_stream(&config.telemetry_stream, "Inbound telemetry readings")
        .await?;
    nats_client
        .ensure_stream(&config.alerts_stream, "Outbound threshold alerts")
        .await?;
    let lease_store = KvLeaseStore::new(nats_client.ensure_kv_bucket(&config.lease_bucket).await?);
    let checkpoint_store =
        KvCheckpointStore::new(nats_client.ensure_kv_bucket(&config.checkpoint_bucket).await?);

    let publisher: Arc<dyn JetStreamPublisher> =
        Arc::new(NatsJetStreamPublisher::new(nats_client.jetstream().clone()));
    let alert_sink = Arc::new(NatsAlertSink::new(
        publisher.clone(),
        config.alerts_stream.clone(),
    ));

    let registry = Arc::new(
        DeviceRegistry::new(
            DeviceRegistryConfig {
                queue_length: config.queue_length,
                default_min_threshold: config.default_min_threshold,
                default_max_threshold: config.default_max_threshold,
            },
            alert_sink,
        )
        .with_state_store(Arc::new(InMemoryDeviceStateStore::new())),
    );

    let reader = Arc::new(JetStreamPartitionReader::new(
        nats_client.jetstream().clone(),
        config.telemetry_stream.clone(),
    ));

    let coordinator = Arc::new(LeaseCoordinator::new(
        LeaseCoordinatorConfig {
            owner_id: config.owner_id.clone(),
            consumer_group: config.consumer_group.clone(),
            partition_count: config.partition_count,
            acquire_interval: Duration::from_secs(config.lease_acquire_interval_secs),
            renew_interval: Duration::from_secs(config.lease_renew_interval_secs),
            lease_duration: Duration::from_secs(config.lease_duration_secs),
            batch_size: config.batch_size,
            receive_timeout: Duration::from_secs(config.receive_timeout_secs),
        },
        Arc::new(lease_store),
        Arc::new(checkpoint_store),
        reader,
        registry,
    ));

    Ok((coordinator, publisher, nats_client))
}
