use crate::error::DomainResult;
use crate::event::AlertEvent;
use async_trait::async_trait;

/// Outbound channel for emitted alert events.
/// Infrastructure layer (e.g., vantage-nats) implements this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Publish one alert event, keyed by device name for downstream ordering.
    async fn publish(&self, alert: &AlertEvent) -> DomainResult<()>;
}
