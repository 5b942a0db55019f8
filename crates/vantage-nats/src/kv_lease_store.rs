use async_nats::jetstream::kv;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use vantage_engine::{EngineError, EngineResult, LeaseStore, PartitionLease};

fn lease_err<E>(context: &'static str) -> impl FnOnce(E) -> EngineError
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |e| EngineError::LeaseStore(anyhow::Error::new(e).context(context))
}

/// Durable lease record stored per partition key. Compare-and-swap on
/// the KV revision is what makes grants exclusive; the record itself is
/// plain data.
#[derive(Debug, Serialize, Deserialize)]
struct LeaseRecord {
    #[serde(rename = "leaseId")]
    lease_id: String,
    owner: String,
    #[serde(rename = "expiresAt")]
    expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    fn grant(owner: &str, ttl: Duration) -> Self {
        Self {
            lease_id: xid::new().to_string(),
            owner: owner.to_string(),
            expires_at: Utc::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    fn into_lease(self, partition: u32) -> PartitionLease {
        PartitionLease {
            partition,
            lease_id: self.lease_id,
            owner: self.owner,
            expires_at: self.expires_at,
        }
    }
}

/// Partition lease arbitration over a NATS KV bucket.
///
/// Every mutation is revision-guarded, so two instances racing for the
/// same partition resolve to exactly one winner; the loser sees a
/// revision mismatch and reports the partition as owned elsewhere.
pub struct KvLeaseStore {
    store: kv::Store,
}

impl KvLeaseStore {
    pub fn new(store: kv::Store) -> Self {
        Self { store }
    }

    fn key(partition: u32) -> String {
        format!("partition-{partition}")
    }
}

#[async_trait]
impl LeaseStore for KvLeaseStore {
    async fn acquire(
        &self,
        partition: u32,
        owner: &str,
        ttl: Duration,
    ) -> EngineResult<Option<PartitionLease>> {
        let key = Self::key(partition);
        let entry = self
            .store
            .entry(&key)
            .await
            .map_err(lease_err("Failed to read lease record"))?;

        match entry {
            None => {
                let record = LeaseRecord::grant(owner, ttl);
                let payload =
                    serde_json::to_vec(&record).map_err(lease_err("Failed to encode lease record"))?;
                match self.store.create(&key, payload.into()).await {
                    Ok(_) => Ok(Some(record.into_lease(partition))),
                    // Lost the creation race.
                    Err(e) => {
                        debug!(partition, error = %e, "Lease create contested");
                        Ok(None)
                    }
                }
            }
            Some(entry) => {
                let current: LeaseRecord = serde_json::from_slice(&entry.value)
                    .map_err(lease_err("Failed to decode lease record"))?;
                if !current.is_expired() && current.owner != owner {
                    return Ok(None);
                }

                let record = LeaseRecord::grant(owner, ttl);
                let payload =
                    serde_json::to_vec(&record).map_err(lease_err("Failed to encode lease record"))?;
                match self
                    .store
                    .update(&key, payload.into(), entry.revision)
                    .await
                {
                    Ok(_) => Ok(Some(record.into_lease(partition))),
                    Err(e) => {
                        debug!(partition, error = %e, "Lease takeover contested");
                        Ok(None)
                    }
                }
            }
        }
    }

    async fn renew(
        &self,
        lease: &PartitionLease,
        ttl: Duration,
    ) -> EngineResult<Option<PartitionLease>> {
        let key = Self::key(lease.partition);
        let entry = self
            .store
            .entry(&key)
            .await
            .map_err(lease_err("Failed to read lease record"))?;

        let Some(entry) = entry else {
            return Ok(None);
        };
        let current: LeaseRecord =
            serde_json::from_slice(&entry.value).map_err(lease_err("Failed to decode lease record"))?;
        if current.lease_id != lease.lease_id {
            return Ok(None);
        }

        let record = LeaseRecord {
            lease_id: current.lease_id,
            owner: current.owner,
            expires_at: Utc::now() + ttl,
        };
        let payload = serde_json::to_vec(&record).map_err(lease_err("Failed to encode lease record"))?;
        match self
            .store
            .update(&key, payload.into(), entry.revision)
            .await
        {
            Ok(_) => Ok(Some(record.into_lease(lease.partition))),
            Err(e) => {
                debug!(partition = lease.partition, error = %e, "Lease renewal contested");
                Ok(None)
            }
        }
    }

    async fn release(&self, lease: &PartitionLease) -> EngineResult<()> {
        let key = Self::key(lease.partition);
        let entry = self
            .store
            .entry(&key)
            .await
            .map_err(lease_err("Failed to read lease record"))?;

        let Some(entry) = entry else {
            return Ok(());
        };
        let current: LeaseRecord =
            serde_json::from_slice(&entry.value).map_err(lease_err("Failed to decode lease record"))?;
        if current.lease_id != lease.lease_id {
            // Someone else already owns the partition.
            return Ok(());
        }

        // Mark the record expired instead of deleting it; the revision
        // guard keeps a stale release from clobbering a new owner.
        let record = LeaseRecord {
            lease_id: current.lease_id,
            owner: current.owner,
            expires_at: Utc::now(),
        };
        let payload = serde_json::to_vec(&record).map_err(lease_err("Failed to encode lease record"))?;
        if let Err(e) = self
            .store
            .update(&key, payload.into(), entry.revision)
            .await
        {
            debug!(partition = lease.partition, error = %e, "Lease release contested");
        }
        Ok(())
    }
}
