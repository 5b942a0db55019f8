use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Durable cursor storage, one offset per partition.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, partition: u32) -> EngineResult<Option<u64>>;

    async fn save(&self, partition: u32, offset: u64) -> EngineResult<()>;
}

/// In-memory checkpoint store for tests and single-process runs.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    offsets: Mutex<HashMap<u32, u64>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self, partition: u32) -> Option<u64> {
        let offsets = self
            .offsets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        offsets.get(&partition).copied()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, partition: u32) -> EngineResult<Option<u64>> {
        Ok(self.offset(partition))
    }

    async fn save(&self, partition: u32, offset: u64) -> EngineResult<()> {
        let mut offsets = self
            .offsets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        offsets.insert(partition, offset);
        Ok(())
    }
}

struct CheckpointState {
    /// Last offset known to be durable in the store.
    durable: u64,
    /// Last offset whose batch finished processing. May run ahead of
    /// `durable` when a save failed; flushed on graceful close.
    processed: u64,
}

/// Per-partition checkpoint bookkeeping: enforces monotonic advancement
/// and tracks processed-but-not-durable progress for the graceful
/// shutdown path.
pub struct PartitionCheckpointer {
    partition: u32,
    store: Arc<dyn CheckpointStore>,
    state: Mutex<CheckpointState>,
}

impl PartitionCheckpointer {
    pub fn new(partition: u32, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            partition,
            store,
            state: Mutex::new(CheckpointState {
                durable: 0,
                processed: 0,
            }),
        }
    }

    /// Load the durable cursor. Returns the last processed offset, or 0
    /// when the partition has never been checkpointed.
    pub async fn restore(&self) -> EngineResult<u64> {
        let durable = self.store.load(self.partition).await?.unwrap_or(0);
        let mut state = self.lock_state();
        state.durable = durable;
        state.processed = durable;
        Ok(durable)
    }

    /// Record that every event up to `offset` has been dispatched, then
    /// advance the durable cursor. A store failure is logged and left
    /// pending rather than propagated; redelivery is cheaper than
    /// failing the partition.
    pub async fn commit(&self, offset: u64) -> EngineResult<()> {
        {
            let mut state = self.lock_state();
            if offset < state.processed {
                return Err(EngineError::CheckpointRegression {
                    partition: self.partition,
                    durable: state.processed,
                    attempted: offset,
                });
            }
            state.processed = offset;
        }

        match self.store.save(self.partition, offset).await {
            Ok(()) => {
                let mut state = self.lock_state();
                state.durable = offset;
                debug!(partition = self.partition, offset, "Checkpoint advanced");
                Ok(())
            }
            Err(e) => {
                warn!(
                    partition = self.partition,
                    offset,
                    error = %e,
                    "Checkpoint save failed, progress left pending"
                );
                Ok(())
            }
        }
    }

    /// Make any processed-but-not-durable progress durable. Used on
    /// graceful shutdown before the lease is released.
    pub async fn flush_pending(&self) -> EngineResult<()> {
        let pending = {
            let state = self.lock_state();
            (state.processed > state.durable).then_some(state.processed)
        };

        if let Some(offset) = pending {
            self.store.save(self.partition, offset).await?;
            let mut state = self.lock_state();
            state.durable = offset;
            debug!(
                partition = self.partition,
                offset, "Flushed pending checkpoint"
            );
        }
        Ok(())
    }

    /// Last offset whose batch finished processing in this session.
    pub fn cursor(&self) -> u64 {
        self.lock_state().processed
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CheckpointState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
