use crate::partition_reader::JetStreamPartitionReader;
use crate::traits::JetStreamPublisher;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use vantage_domain::{codec, TelemetryEvent};

/// Configuration for the demo telemetry producer
pub struct DemoProducerConfig {
    /// Interval between publishing rounds
    pub interval: Duration,
    /// Number of simulated devices
    pub device_count: u32,
    /// Stream the readings are published to
    pub stream_name: String,
    /// Number of stream partitions to spread devices over
    pub partition_count: u32,
}

impl Default for DemoProducerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            device_count: 8,
            stream_name: "telemetry".to_string(),
            partition_count: 4,
        }
    }
}

/// Run a demo producer that publishes simulated telemetry readings.
///
/// Each round emits one reading per device. Values sweep through a
/// range that regularly crosses the default thresholds, so an alerting
/// pipeline fed by this producer has something to do. Runs until the
/// cancellation token fires.
pub async fn run_demo_producer(
    ctx: CancellationToken,
    config: DemoProducerConfig,
    publisher: Arc<dyn JetStreamPublisher>,
) -> Result<()> {
    info!(
        device_count = config.device_count,
        partition_count = config.partition_count,
        "Demo telemetry producer started"
    );

    let mut counter: u64 = 0;
    loop {
        tokio::select! {
            _ = ctx.cancelled() => {
                info!("Received shutdown signal, stopping demo producer");
                break;
            }
            _ = tokio::time::sleep(config.interval) => {
                for device in 1..=config.device_count {
                    let event = sample_reading(device, counter);
                    counter += 1;

                    let partition = event.device_id as u32 % config.partition_count;
                    let subject =
                        JetStreamPartitionReader::partition_subject(&config.stream_name, partition);
                    let payload = codec::encode_telemetry(&event)?;

                    match publisher.publish(subject, payload).await {
                        Ok(()) => {
                            debug!(
                                device = %event.name,
                                value = event.value,
                                partition,
                                "Published demo reading"
                            );
                        }
                        Err(e) => {
                            error!(
                                device = %event.name,
                                error = %e,
                                "Failed to publish demo reading"
                            );
                        }
                    }
                }
            }
        }
    }

    info!("Demo telemetry producer stopped gracefully");
    Ok(())
}

/// A reading whose value walks through [25, 60), crossing both default
/// threshold bounds.
fn sample_reading(device: u32, counter: u64) -> TelemetryEvent {
    let name = format!("device{device:03}");
    TelemetryEvent {
        device_id: device as i64,
        name,
        value: 25.0 + ((counter * 7) % 35) as f64,
        status: "Ok".to_string(),
        timestamp: chrono::Utc::now(),
    }
}
