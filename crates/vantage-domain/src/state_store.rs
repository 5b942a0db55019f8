use crate::device::DeviceMetadata;
use crate::error::DomainResult;
use crate::event::TelemetryEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Point-in-time copy of one device's running state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStateSnapshot {
    pub metadata: Option<DeviceMetadata>,
    pub history: Vec<TelemetryEvent>,
    /// State version at capture time; newer snapshots supersede older ones.
    #[serde(default)]
    pub version: u64,
}

/// Pluggable persistence for device state across restarts.
///
/// The state machine itself is purely in-memory; durability is a
/// capability injected at the registry seam. Without a store, state is
/// rebuilt from defaults on restart.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceStateStore: Send + Sync {
    async fn load(&self, device_key: &str) -> DomainResult<Option<DeviceStateSnapshot>>;

    async fn save(&self, device_key: &str, snapshot: &DeviceStateSnapshot) -> DomainResult<()>;
}

/// In-memory store. Survives nothing, but gives single-process runs and
/// tests the same code path a durable implementation would take.
#[derive(Default)]
pub struct InMemoryDeviceStateStore {
    snapshots: Mutex<HashMap<String, DeviceStateSnapshot>>,
}

impl InMemoryDeviceStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStateStore for InMemoryDeviceStateStore {
    async fn load(&self, device_key: &str) -> DomainResult<Option<DeviceStateSnapshot>> {
        let snapshots = self
            .snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(snapshots.get(device_key).cloned())
    }

    async fn save(&self, device_key: &str, snapshot: &DeviceStateSnapshot) -> DomainResult<()> {
        let mut snapshots = self
            .snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        snapshots.insert(device_key.to_string(), snapshot.clone());
        Ok(())
    }
}
