use anyhow::Result;
use async_trait::async_trait;
use rocksdb::{DB, IteratorMode, Options};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;
use ws_api_types::{Flight, PolicyStatus};

/// One insured flight. Replaces the old `insuredFlights` + `claimedFlights`
/// pair: claim state lives on the record itself, so the two can no longer
/// drift apart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRecord {
    pub policy_id: Uuid,
    pub flight: Flight,
    /// Decimal native-currency amount as entered, e.g. "0.05".
    pub insurance_amount: String,
    /// Identifier assigned by the contract; absent until the creation event
    /// has been reconciled.
    pub insurance_id: Option<String>,
    pub status: PolicyStatus,
    pub created_at_epoch_ms: u128,
    pub updated_at_epoch_ms: u128,
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Full list, ordered by creation time. Malformed persisted entries are
    /// dropped, never surfaced as errors.
    async fn load(&self) -> Result<Vec<PolicyRecord>>;
    async fn get(&self, policy_id: Uuid) -> Result<Option<PolicyRecord>>;
    async fn append(&self, record: &PolicyRecord) -> Result<()>;
    /// Persist a changed record. Upserts by `policy_id`.
    async fn update(&self, record: &PolicyRecord) -> Result<()>;
    async fn remove(&self, policy_id: Uuid) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryPolicyStore {
    records: RwLock<HashMap<Uuid, PolicyRecord>>,
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn load(&self) -> Result<Vec<PolicyRecord>> {
        let guard = self.records.read().await;
        let mut records: Vec<PolicyRecord> = guard.values().cloned().collect();
        records.sort_by(|a, b| a.created_at_epoch_ms.cmp(&b.created_at_epoch_ms));
        Ok(records)
    }

    async fn get(&self, policy_id: Uuid) -> Result<Option<PolicyRecord>> {
        let guard = self.records.read().await;
        Ok(guard.get(&policy_id).cloned())
    }

    async fn append(&self, record: &PolicyRecord) -> Result<()> {
        let mut guard = self.records.write().await;
        guard.insert(record.policy_id, record.clone());
        Ok(())
    }

    async fn update(&self, record: &PolicyRecord) -> Result<()> {
        let mut guard = self.records.write().await;
        guard.insert(record.policy_id, record.clone());
        Ok(())
    }

    async fn remove(&self, policy_id: Uuid) -> Result<()> {
        let mut guard = self.records.write().await;
        guard.remove(&policy_id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut guard = self.records.write().await;
        guard.clear();
        Ok(())
    }
}

pub struct RocksDbPolicyStore {
    db: Arc<DB>,
}

const POLICY_PREFIX: &str = "policy:";

impl RocksDbPolicyStore {
    pub fn open_default(path: &str) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn key_for_policy(policy_id: Uuid) -> String {
        format!("{POLICY_PREFIX}{policy_id}")
    }

    fn put_record(&self, record: &PolicyRecord) -> Result<()> {
        let key = Self::key_for_policy(record.policy_id);
        let value = serde_json::to_vec(record)?;
        self.db.put(key.as_bytes(), value)?;
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for RocksDbPolicyStore {
    async fn load(&self) -> Result<Vec<PolicyRecord>> {
        let mut records = Vec::new();

        for entry in self.db.iterator(IteratorMode::Start) {
            let (key, value) = entry?;
            if !key.as_ref().starts_with(POLICY_PREFIX.as_bytes()) {
                continue;
            }

            match serde_json::from_slice::<PolicyRecord>(&value) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(
                        key = %String::from_utf8_lossy(&key),
                        "dropping malformed policy record: {err}"
                    );
                }
            }
        }

        records.sort_by(|a, b| a.created_at_epoch_ms.cmp(&b.created_at_epoch_ms));
        Ok(records)
    }

    async fn get(&self, policy_id: Uuid) -> Result<Option<PolicyRecord>> {
        let key = Self::key_for_policy(policy_id);
        let value = self.db.get(key.as_bytes())?;
        match value {
            Some(raw) => match serde_json::from_slice::<PolicyRecord>(&raw) {
                Ok(record) => Ok(Some(record)),
                Err(err) => {
                    warn!(policy_id = %policy_id, "dropping malformed policy record: {err}");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn append(&self, record: &PolicyRecord) -> Result<()> {
        self.put_record(record)
    }

    async fn update(&self, record: &PolicyRecord) -> Result<()> {
        self.put_record(record)
    }

    async fn remove(&self, policy_id: Uuid) -> Result<()> {
        let key = Self::key_for_policy(policy_id);
        self.db.delete(key.as_bytes())?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let keys: Vec<Vec<u8>> = self
            .db
            .iterator(IteratorMode::Start)
            .filter_map(Result::ok)
            .map(|(key, _)| key.to_vec())
            .filter(|key| key.starts_with(POLICY_PREFIX.as_bytes()))
            .collect();

        for key in keys {
            self.db.delete(&key)?;
        }
        Ok(())
    }
}

mod legacy;

pub use legacy::{ImportSummary, import_legacy};
