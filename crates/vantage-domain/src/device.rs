use serde::{Deserialize, Serialize};

/// Default minimum alert threshold for devices without explicit metadata.
pub const DEFAULT_MIN_THRESHOLD: i64 = 30;

/// Default maximum alert threshold for devices without explicit metadata.
pub const DEFAULT_MAX_THRESHOLD: i64 = 50;

const UNKNOWN: &str = "Unknown";

/// Identity and configuration for one device.
///
/// Created with defaults on the first event for an unknown device, or
/// replaced wholesale by an explicit upsert from the management boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetadata {
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
}

impl DeviceMetadata {
    /// Synthesize default metadata for a device that has never been
    /// configured. The numeric suffix of the key becomes the device id,
    /// e.g. "device001" -> 1; a key without a numeric suffix gets id 0.
    pub fn synthesized(device_key: &str, min_threshold: i64, max_threshold: i64) -> Self {
        Self {
            device_id: device_id_from_key(device_key),
            name: device_key.to_string(),
            min_threshold,
            max_threshold,
            model: UNKNOWN.to_string(),
            device_type: UNKNOWN.to_string(),
            manufacturer: UNKNOWN.to_string(),
            city: UNKNOWN.to_string(),
            country: UNKNOWN.to_string(),
        }
    }
}

/// Parse the numeric suffix of a device key.
pub fn device_id_from_key(device_key: &str) -> i64 {
    let suffix_start = device_key
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    device_key[suffix_start..].parse().unwrap_or(0)
}
