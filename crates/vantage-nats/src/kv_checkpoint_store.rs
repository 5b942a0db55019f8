use async_nats::jetstream::kv;
use async_trait::async_trait;
use tracing::debug;
use vantage_engine::{CheckpointStore, EngineError, EngineResult};

fn checkpoint_err<E>(context: &'static str) -> impl FnOnce(E) -> EngineError
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |e| EngineError::CheckpointStore(anyhow::Error::new(e).context(context))
}

/// Durable partition cursors in a NATS KV bucket, one key per
/// partition. Monotonicity is enforced by the checkpointer, so plain
/// puts are enough here.
pub struct KvCheckpointStore {
    store: kv::Store,
}

impl KvCheckpointStore {
    pub fn new(store: kv::Store) -> Self {
        Self { store }
    }

    fn key(partition: u32) -> String {
        format!("partition-{partition}")
    }
}

#[async_trait]
impl CheckpointStore for KvCheckpointStore {
    async fn load(&self, partition: u32) -> EngineResult<Option<u64>> {
        let value = self
            .store
            .get(Self::key(partition))
            .await
            .map_err(checkpoint_err("Failed to read checkpoint"))?;

        match value {
            None => Ok(None),
            Some(bytes) => {
                let text = std::str::from_utf8(&bytes)
                    .map_err(checkpoint_err("Checkpoint value is not UTF-8"))?;
                let offset = text
                    .parse()
                    .map_err(checkpoint_err("Checkpoint value is not an offset"))?;
                Ok(Some(offset))
            }
        }
    }

    async fn save(&self, partition: u32, offset: u64) -> EngineResult<()> {
        self.store
            .put(Self::key(partition), offset.to_string().into())
            .await
            .map_err(checkpoint_err("Failed to write checkpoint"))?;
        debug!(partition, offset, "Checkpoint written");
        Ok(())
    }
}
