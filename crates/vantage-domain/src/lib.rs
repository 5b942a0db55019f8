pub mod codec;
pub mod device;
pub mod error;
pub mod event;
pub mod history;
pub mod management;
pub mod registry;
pub mod sink;
pub mod state_machine;
pub mod state_store;

pub use codec::{decode_alert, decode_telemetry, encode_alert, encode_telemetry};
pub use device::{DeviceMetadata, DEFAULT_MAX_THRESHOLD, DEFAULT_MIN_THRESHOLD};
pub use error::{DomainError, DomainResult};
pub use event::{AlertEvent, TelemetryEvent};
pub use history::HistoryRing;
pub use management::DeviceManagementService;
pub use registry::{DeviceRegistry, DeviceRegistryConfig};
pub use sink::AlertSink;
pub use state_machine::DeviceStateMachine;
pub use state_store::{DeviceStateSnapshot, DeviceStateStore, InMemoryDeviceStateStore};
