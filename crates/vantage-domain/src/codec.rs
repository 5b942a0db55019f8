use crate::error::DomainResult;
use crate::event::{AlertEvent, TelemetryEvent};
use bytes::Bytes;

/// JSON wire codec for telemetry and alert events. Field names follow the
/// camelCase format the upstream emitters produce.

pub fn decode_telemetry(payload: &[u8]) -> DomainResult<TelemetryEvent> {
    Ok(serde_json::from_slice(payload)?)
}

pub fn encode_telemetry(event: &TelemetryEvent) -> DomainResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(event)?))
}

pub fn decode_alert(payload: &[u8]) -> DomainResult<AlertEvent> {
    Ok(serde_json::from_slice(payload)?)
}

pub fn encode_alert(alert: &AlertEvent) -> DomainResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(alert)?))
}
