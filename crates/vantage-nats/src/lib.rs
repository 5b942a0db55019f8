mod alert_producer;
mod client;
mod demo_producer;
mod kv_checkpoint_store;
mod kv_lease_store;
mod partition_reader;
mod traits;

pub use alert_producer::NatsAlertSink;
pub use client::NatsClient;
pub use demo_producer::{run_demo_producer, DemoProducerConfig};
pub use kv_checkpoint_store::KvCheckpointStore;
pub use kv_lease_store::KvLeaseStore;
pub use partition_reader::JetStreamPartitionReader;
pub use traits::{JetStreamPublisher, NatsJetStreamPublisher};
