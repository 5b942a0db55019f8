use crate::traits::JetStreamPublisher;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use vantage_domain::{codec, AlertEvent, AlertSink, DomainError, DomainResult};

/// Publishes threshold alerts to the outbound alert stream, one subject
/// per device so downstream consumers see per-device ordering.
pub struct NatsAlertSink {
    publisher: Arc<dyn JetStreamPublisher>,
    base_subject: String,
}

impl NatsAlertSink {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>, base_subject: String) -> Self {
        info!(
            "Created NatsAlertSink with base subject: {}",
            base_subject
        );
        Self {
            publisher,
            base_subject,
        }
    }
}

#[async_trait]
impl AlertSink for NatsAlertSink {
    async fn publish(&self, alert: &AlertEvent) -> DomainResult<()> {
        let payload = codec::encode_alert(alert)?;
        let subject = format!("{}.{}", self.base_subject, alert.partition_key());

        debug!(
            subject = %subject,
            device_key = %alert.partition_key(),
            value = alert.value,
            "Publishing alert"
        );

        self.publisher
            .publish(subject, payload)
            .await
            .map_err(DomainError::AlertPublishError)?;

        Ok(())
    }
}
