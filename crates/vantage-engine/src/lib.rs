pub mod checkpoint;
pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod lease;
pub mod stream;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore, PartitionCheckpointer};
pub use consumer::{CloseReason, PartitionConsumer, PartitionConsumerConfig};
pub use coordinator::{LeaseCoordinator, LeaseCoordinatorConfig, LeaseState};
pub use error::{EngineError, EngineResult};
pub use lease::{InMemoryLeaseStore, LeaseStore, PartitionLease};
pub use stream::{InMemoryPartitionStream, PartitionReceiver, StreamMessage};
