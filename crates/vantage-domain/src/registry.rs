use crate::device::DeviceMetadata;
use crate::error::{DomainError, DomainResult};
use crate::event::{AlertEvent, TelemetryEvent};
use crate::sink::AlertSink;
use crate::state_machine::DeviceStateMachine;
use crate::state_store::DeviceStateStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone)]
pub struct DeviceRegistryConfig {
    /// History ring capacity per device.
    pub queue_length: usize,
    pub default_min_threshold: i64,
    pub default_max_threshold: i64,
}

impl Default for DeviceRegistryConfig {
    fn default() -> Self {
        Self {
            queue_length: 100,
            default_min_threshold: crate::device::DEFAULT_MIN_THRESHOLD,
            default_max_threshold: crate::device::DEFAULT_MAX_THRESHOLD,
        }
    }
}

/// Routes every event to the single state machine owning its device key,
/// creating machines lazily on first reference.
///
/// Serialization per key comes from each machine's interior lock;
/// events for different keys proceed fully in parallel. Emitted alerts
/// are forwarded to the sink after the per-key lock is released, and a
/// publish failure never fails the route (at-least-once redelivery will
/// re-surface the event).
pub struct DeviceRegistry {
    config: DeviceRegistryConfig,
    machines: DashMap<String, Arc<DeviceStateMachine>>,
    // Per-key write gate: holds the last durably saved state version.
    save_gates: DashMap<String, Arc<Mutex<u64>>>,
    alert_sink: Arc<dyn AlertSink>,
    state_store: Option<Arc<dyn DeviceStateStore>>,
}

impl DeviceRegistry {
    pub fn new(config: DeviceRegistryConfig, alert_sink: Arc<dyn AlertSink>) -> Self {
        Self {
            config,
            machines: DashMap::new(),
            save_gates: DashMap::new(),
            alert_sink,
            state_store: None,
        }
    }

    /// Attach a persistence capability: machines load their snapshot on
    /// creation and save after every mutation.
    pub fn with_state_store(mut self, state_store: Arc<dyn DeviceStateStore>) -> Self {
        self.state_store = Some(state_store);
        self
    }

    /// Deliver one event to its owning state machine and forward any
    /// emitted alert to the sink.
    pub async fn route(&self, event: TelemetryEvent) -> DomainResult<Option<AlertEvent>> {
        let machine = self.machine_for(event.device_key()).await?;

        trace!(
            device_key = %machine.device_key(),
            value = event.value,
            "Routing telemetry event"
        );

        let alert = machine.ingest(event);

        self.save_snapshot(&machine).await;

        if let Some(alert) = &alert {
            match self.alert_sink.publish(alert).await {
                Ok(()) => {
                    debug!(
                        device_key = %machine.device_key(),
                        value = alert.value,
                        "Published alert"
                    );
                }
                Err(e) => {
                    // Fire-and-forget: the batch that produced the alert
                    // must not block on the outbound channel.
                    warn!(
                        device_key = %machine.device_key(),
                        error = %e,
                        "Dropped alert after publish failure"
                    );
                }
            }
        }

        Ok(alert)
    }

    /// Current metadata for a device, synthesizing defaults when the
    /// device has never been configured. Pure read.
    pub async fn get_metadata(&self, device_key: &str) -> DomainResult<DeviceMetadata> {
        let machine = self.machine_for(device_key).await?;
        Ok(machine.metadata())
    }

    /// Replace a device's metadata wholesale (last-writer-wins).
    pub async fn set_metadata(
        &self,
        device_key: &str,
        metadata: DeviceMetadata,
    ) -> DomainResult<()> {
        let machine = self.machine_for(device_key).await?;
        machine.set_metadata(metadata);
        self.save_snapshot(&machine).await;
        Ok(())
    }

    pub fn device_count(&self) -> usize {
        self.machines.len()
    }

    async fn machine_for(&self, device_key: &str) -> DomainResult<Arc<DeviceStateMachine>> {
        if device_key.is_empty() {
            return Err(DomainError::InvalidDeviceKey(device_key.to_string()));
        }

        if let Some(machine) = self.machines.get(device_key) {
            return Ok(machine.clone());
        }

        // Load outside the map lock; the entry API below arbitrates the
        // creation race, so a redundant load is harmless.
        let snapshot = match &self.state_store {
            Some(store) => store.load(device_key).await?,
            None => None,
        };

        let machine = Arc::new(DeviceStateMachine::new(
            device_key,
            self.config.queue_length,
            self.config.default_min_threshold,
            self.config.default_max_threshold,
        ));
        if let Some(snapshot) = snapshot {
            machine.restore(snapshot);
        }

        let machine = self
            .machines
            .entry(device_key.to_string())
            .or_insert(machine)
            .clone();

        debug!(device_key = %device_key, "Device state machine ready");
        Ok(machine)
    }

    /// Persist the machine's current state.
    ///
    /// Saves for the same key are serialized through the key's gate and
    /// ordered by state version, so a slow earlier save can never land
    /// after a newer snapshot and roll the stored state back.
    async fn save_snapshot(&self, machine: &DeviceStateMachine) {
        let Some(store) = &self.state_store else {
            return;
        };

        let gate = self
            .save_gates
            .entry(machine.device_key().to_string())
            .or_default()
            .clone();
        let mut last_saved = gate.lock().await;

        let snapshot = machine.snapshot();
        if snapshot.version <= *last_saved {
            // A snapshot at least this fresh is already durable.
            return;
        }

        match store.save(machine.device_key(), &snapshot).await {
            Ok(()) => *last_saved = snapshot.version,
            Err(e) => {
                warn!(
                    device_key = %machine.device_key(),
                    error = %e,
                    "Failed to persist device state snapshot"
                );
            }
        }
    }
}
