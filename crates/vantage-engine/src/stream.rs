use crate::error::EngineResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// One raw entry from a stream partition. Offsets are assigned by the
/// transport, start at 1, and strictly increase within a partition.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub offset: u64,
    pub payload: Bytes,
}

/// Transport boundary for partition-scoped consumption. The core never
/// pulls from a wire protocol directly; it asks the receiver for the
/// next ordered slice of a partition.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PartitionReceiver: Send + Sync {
    /// Fetch up to `max_messages` messages with offset >= `from_offset`,
    /// waiting up to `max_wait` for data to arrive. An empty result means
    /// the partition is currently drained, not an error.
    async fn fetch(
        &self,
        partition: u32,
        from_offset: u64,
        max_messages: usize,
        max_wait: Duration,
    ) -> EngineResult<Vec<StreamMessage>>;
}

/// In-memory partition stream for tests and single-process runs.
#[derive(Default)]
pub struct InMemoryPartitionStream {
    partitions: Mutex<HashMap<u32, Vec<StreamMessage>>>,
}

impl InMemoryPartitionStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload to a partition and return its offset.
    pub fn push(&self, partition: u32, payload: Bytes) -> u64 {
        let mut partitions = self
            .partitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let messages = partitions.entry(partition).or_default();
        let offset = messages.len() as u64 + 1;
        messages.push(StreamMessage { offset, payload });
        offset
    }

    pub fn high_offset(&self, partition: u32) -> u64 {
        let partitions = self
            .partitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        partitions.get(&partition).map_or(0, |m| m.len() as u64)
    }

    fn slice(&self, partition: u32, from_offset: u64, max_messages: usize) -> Vec<StreamMessage> {
        let partitions = self
            .partitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        partitions
            .get(&partition)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m.offset >= from_offset)
                    .take(max_messages)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl PartitionReceiver for InMemoryPartitionStream {
    async fn fetch(
        &self,
        partition: u32,
        from_offset: u64,
        max_messages: usize,
        max_wait: Duration,
    ) -> EngineResult<Vec<StreamMessage>> {
        let messages = self.slice(partition, from_offset, max_messages);
        if !messages.is_empty() {
            return Ok(messages);
        }

        // Emulate the blocking receive of a real transport, then check once
        // more for data that arrived in the meantime.
        tokio::time::sleep(max_wait).await;
        Ok(self.slice(partition, from_offset, max_messages))
    }
}
