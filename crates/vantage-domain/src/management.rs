use crate::device::DeviceMetadata;
use crate::error::DomainResult;
use crate::registry::DeviceRegistry;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Management boundary for device metadata: one-or-many reads and
/// upserts applied through the registry.
///
/// Malformed or empty input is a no-op, not an error; the facade that
/// consumes this service never sees a synchronous failure for bad input.
pub struct DeviceManagementService {
    registry: Arc<DeviceRegistry>,
}

impl DeviceManagementService {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Current metadata for one device, synthesized defaults included.
    pub async fn get_device(&self, device_key: &str) -> DomainResult<Option<DeviceMetadata>> {
        if device_key.is_empty() {
            return Ok(None);
        }
        let metadata = self.registry.get_metadata(device_key).await?;
        debug!(device_key = %device_key, "Read device metadata");
        Ok(Some(metadata))
    }

    pub async fn get_devices(&self, device_keys: &[String]) -> DomainResult<Vec<DeviceMetadata>> {
        let mut devices = Vec::with_capacity(device_keys.len());
        for device_key in device_keys {
            if let Some(metadata) = self.get_device(device_key).await? {
                devices.push(metadata);
            }
        }
        Ok(devices)
    }

    /// Upsert one device's metadata. The device name is the key.
    pub async fn set_device(&self, metadata: DeviceMetadata) -> DomainResult<()> {
        if metadata.name.is_empty() {
            warn!("Ignoring device upsert with empty name");
            return Ok(());
        }
        let device_key = metadata.name.clone();
        self.registry.set_metadata(&device_key, metadata).await?;
        info!(device_key = %device_key, "Upserted device metadata");
        Ok(())
    }

    pub async fn set_devices(&self, devices: Vec<DeviceMetadata>) -> DomainResult<()> {
        for metadata in devices {
            self.set_device(metadata).await?;
        }
        Ok(())
    }
}
