use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::model::SecretRecord;
use super::{ConsumeOutcome, SecretStore, StoreError};

/// In-process store. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, SecretRecord>>>,
    last_write_wins: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A variant whose `mark_consumed` overwrites unconditionally, like a
    /// remote table that only offers plain updates.
    pub fn last_write_wins() -> Self {
        Self {
            last_write_wins: true,
            ..Self::default()
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn insert(&self, record: SecretRecord) -> Result<SecretRecord, StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.token) {
            return Err(StoreError::DuplicateToken);
        }
        records.insert(record.token.clone(), record.clone());
        debug!(id = %record.id, "stored secret");
        Ok(record)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<SecretRecord>, StoreError> {
        Ok(self.records.read().await.get(token).cloned())
    }

    async fn mark_consumed(
        &self,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, StoreError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(token) else {
            return Ok(ConsumeOutcome::Missing);
        };
        if record.is_destroyed && !self.last_write_wins {
            return Ok(ConsumeOutcome::AlreadyDestroyed);
        }
        record.is_destroyed = true;
        record.accessed_at = Some(at);
        Ok(ConsumeOutcome::Consumed)
    }

    async fn mark_destroyed(&self, token: &str) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(token) {
            Some(record) => {
                record.is_destroyed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<SecretRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.expires_at < now)
            .cloned()
            .collect())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.expires_at >= now);
        let removed = before - records.len();
        if removed > 0 {
            info!(removed, "purged expired secrets");
        }
        Ok(removed)
    }

    fn supports_conditional_update(&self) -> bool {
        !self.last_write_wins
    }
}
