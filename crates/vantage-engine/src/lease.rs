use crate::error::EngineResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// A time-bounded ownership grant over one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionLease {
    pub partition: u32,
    pub lease_id: String,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl PartitionLease {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// External durable lease arbitration. The store guarantees at most one
/// unexpired lease per partition; the coordinator only polls it. Do not
/// implement distributed consensus here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Try to acquire a partition for `owner`. Returns `None` when the
    /// partition is currently owned by someone else.
    async fn acquire(
        &self,
        partition: u32,
        owner: &str,
        ttl: Duration,
    ) -> EngineResult<Option<PartitionLease>>;

    /// Extend a held lease. Returns `None` when the lease is no longer
    /// held (expired and taken, or released).
    async fn renew(
        &self,
        lease: &PartitionLease,
        ttl: Duration,
    ) -> EngineResult<Option<PartitionLease>>;

    /// Give up a held lease. Releasing a lease that is no longer held is
    /// not an error.
    async fn release(&self, lease: &PartitionLease) -> EngineResult<()>;
}

/// In-memory lease store for tests and single-process runs. Grants are
/// arbitrated under one lock, which is exactly the consistency a real
/// distributed store provides per key.
#[derive(Default)]
pub struct InMemoryLeaseStore {
    leases: Mutex<HashMap<u32, PartitionLease>>,
    counter: Mutex<u64>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forcibly drop a partition's lease, as if it expired. Test hook
    /// for lease-loss scenarios.
    pub fn evict(&self, partition: u32) {
        let mut leases = self
            .leases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        leases.remove(&partition);
    }

    pub fn owner_of(&self, partition: u32) -> Option<String> {
        let leases = self
            .leases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        leases
            .get(&partition)
            .filter(|lease| !lease.is_expired())
            .map(|lease| lease.owner.clone())
    }

    fn next_lease_id(&self, partition: u32, owner: &str) -> String {
        let mut counter = self
            .counter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *counter += 1;
        format!("{owner}-p{partition}-{counter}")
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn acquire(
        &self,
        partition: u32,
        owner: &str,
        ttl: Duration,
    ) -> EngineResult<Option<PartitionLease>> {
        let lease_id = self.next_lease_id(partition, owner);
        let mut leases = self
            .leases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = leases.get(&partition) {
            if !existing.is_expired() && existing.owner != owner {
                return Ok(None);
            }
        }

        let lease = PartitionLease {
            partition,
            lease_id,
            owner: owner.to_string(),
            expires_at: Utc::now() + ttl,
        };
        leases.insert(partition, lease.clone());
        Ok(Some(lease))
    }

    async fn renew(
        &self,
        lease: &PartitionLease,
        ttl: Duration,
    ) -> EngineResult<Option<PartitionLease>> {
        let mut leases = self
            .leases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match leases.get_mut(&lease.partition) {
            Some(held) if held.lease_id == lease.lease_id => {
                held.expires_at = Utc::now() + ttl;
                Ok(Some(held.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release(&self, lease: &PartitionLease) -> EngineResult<()> {
        let mut leases = self
            .leases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(held) = leases.get(&lease.partition) {
            if held.lease_id == lease.lease_id {
                leases.remove(&lease.partition);
            }
        }
        Ok(())
    }
}
