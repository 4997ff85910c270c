use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, info, warn};

use super::model::SecretRecord;
use super::{ConsumeOutcome, SecretStore, StoreError};
use crate::token::token_hint;

/// token → JSON-encoded [`SecretRecord`].
const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

/// Thread-safe handle to the redb store.
///
/// Every mutation runs inside a single redb write transaction, which makes
/// `mark_consumed` a real compare-and-set on `is_destroyed`.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        // Ensure the table exists so read transactions never fail on a fresh file.
        let write_txn = db.begin_write()?;
        write_txn.open_table(SECRETS)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    fn insert_sync(&self, record: &SecretRecord) -> Result<bool> {
        let bytes = encode(record)?;
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(SECRETS)?;
            if table.get(record.token.as_str())?.is_some() {
                false
            } else {
                table.insert(record.token.as_str(), bytes.as_slice())?;
                true
            }
        };
        write_txn.commit()?;
        Ok(inserted)
    }

    fn get_sync(&self, token: &str) -> Result<Option<SecretRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SECRETS)?;
        let raw_bytes: Option<Vec<u8>> = table.get(token)?.map(|guard| guard.value().to_vec());
        Ok(raw_bytes.map(|b| decode(&b)).transpose()?)
    }

    /// Read-modify-write of one record within a single write transaction.
    /// `apply` returns false to leave the record untouched.
    fn update_sync<F>(&self, token: &str, apply: F) -> Result<Option<bool>>
    where
        F: FnOnce(&mut SecretRecord) -> bool,
    {
        let write_txn = self.db.begin_write()?;
        let result = {
            let mut table = write_txn.open_table(SECRETS)?;

            // Clone the bytes so the AccessGuard (which borrows `table`) is
            // dropped before the insert.
            let raw_bytes: Option<Vec<u8>> =
                table.get(token)?.map(|guard| guard.value().to_vec());

            match raw_bytes {
                None => None,
                Some(bytes) => {
                    let mut record = decode(&bytes)?;
                    let changed = apply(&mut record);
                    if changed {
                        let updated = encode(&record)?;
                        table.insert(token, updated.as_slice())?;
                    }
                    Some(changed)
                }
            }
        };
        write_txn.commit()?;
        Ok(result)
    }

    fn expired_sync(&self, now: DateTime<Utc>) -> Result<Vec<SecretRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SECRETS)?;

        let mut expired = Vec::new();
        for item in table.iter()? {
            let (k, v) = item?;
            match decode(v.value()) {
                Ok(record) if record.expires_at < now => expired.push(record),
                Ok(_) => {}
                Err(e) => warn!(
                    token = %token_hint(k.value()),
                    error = %e,
                    "skipping undecodable record"
                ),
            }
        }
        Ok(expired)
    }

    fn purge_sync(&self, now: DateTime<Utc>) -> Result<usize> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SECRETS)?;

            let mut expired_tokens = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                // Undecodable rows are left in place for an operator to inspect.
                match decode(v.value()) {
                    Ok(record) if record.expires_at < now => {
                        expired_tokens.push(k.value().to_owned())
                    }
                    Ok(_) => {}
                    Err(e) => warn!(
                        token = %token_hint(k.value()),
                        error = %e,
                        "purge skipping undecodable record"
                    ),
                }
            }

            let mut removed = 0usize;
            for token in &expired_tokens {
                if table.remove(token.as_str())?.is_some() {
                    removed += 1;
                }
            }
            removed
        };
        write_txn.commit()?;

        if removed > 0 {
            info!(removed, "purged expired secrets");
        }
        Ok(removed)
    }
}

#[async_trait]
impl SecretStore for RedbStore {
    async fn insert(&self, record: SecretRecord) -> Result<SecretRecord, StoreError> {
        if !self.insert_sync(&record).map_err(StoreError::from_anyhow)? {
            return Err(StoreError::DuplicateToken);
        }
        debug!(id = %record.id, "stored secret");
        Ok(record)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<SecretRecord>, StoreError> {
        self.get_sync(token).map_err(StoreError::from_anyhow)
    }

    async fn mark_consumed(
        &self,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, StoreError> {
        let outcome = self.update_sync(token, |record| {
            if record.is_destroyed {
                return false;
            }
            record.is_destroyed = true;
            record.accessed_at = Some(at);
            true
        })
        .map_err(StoreError::from_anyhow)?;
        Ok(match outcome {
            None => ConsumeOutcome::Missing,
            Some(true) => ConsumeOutcome::Consumed,
            Some(false) => ConsumeOutcome::AlreadyDestroyed,
        })
    }

    async fn mark_destroyed(&self, token: &str) -> Result<bool, StoreError> {
        let outcome = self.update_sync(token, |record| {
            if record.is_destroyed {
                return false;
            }
            record.is_destroyed = true;
            true
        })
        .map_err(StoreError::from_anyhow)?;
        Ok(outcome.is_some())
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<SecretRecord>, StoreError> {
        Ok(self.expired_sync(now)?)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self.purge_sync(now)?)
    }

    fn supports_conditional_update(&self) -> bool {
        true
    }
}

fn encode(record: &SecretRecord) -> Result<Vec<u8>> {
    serde_json::to_vec(record).context("encode secret record")
}

fn decode(bytes: &[u8]) -> Result<SecretRecord, StoreError> {
    if bytes.is_empty() {
        return Err(StoreError::Corrupt("empty record".into()));
    }
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
}
