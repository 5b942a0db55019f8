use crate::device::DeviceMetadata;
use serde::{Deserialize, Serialize};

/// One incoming telemetry reading for a device. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    #[serde(rename = "deviceId")]
    pub device_id: i64,
    pub name: String,
    pub value: f64,
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl TelemetryEvent {
    /// The routing key used to select the owning device state machine.
    pub fn device_key(&self) -> &str {
        &self.name
    }
}

/// Emitted when a reading falls outside the device's threshold bounds.
/// Carries the full metadata snapshot plus the triggering reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    #[serde(rename = "deviceId")]
    pub device_id: i64,
    pub name: String,
    #[serde(rename = "minThreshold")]
    pub min_threshold: i64,
    #[serde(rename = "maxThreshold")]
    pub max_threshold: i64,
    pub model: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub manufacturer: String,
    pub city: String,
    pub country: String,
    pub value: f64,
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl AlertEvent {
    pub fn from_reading(metadata: &DeviceMetadata, event: &TelemetryEvent) -> Self {
        Self {
            device_id: metadata.device_id,
            name: metadata.name.clone(),
            min_threshold: metadata.min_threshold,
            max_threshold: metadata.max_threshold,
            model: metadata.model.clone(),
            device_type: metadata.device_type.clone(),
            manufacturer: metadata.manufacturer.clone(),
            city: metadata.city.clone(),
            country: metadata.country.clone(),
            value: event.value,
            status: event.status.clone(),
            timestamp: event.timestamp,
        }
    }

    /// Routing key for downstream fan-out, ordered per device.
    pub fn partition_key(&self) -> &str {
        &self.name
    }
}
