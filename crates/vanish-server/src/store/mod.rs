//! Secret store gateway: the only code that talks to the persistent record store.

pub mod db;
pub mod memory;
pub mod model;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use db::RedbStore;
pub use memory::MemoryStore;
pub use model::SecretRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend already holds a record with this token.
    #[error("token already exists")]
    DuplicateToken,
    /// A stored record could not be decoded. Retrying will not help.
    #[error("corrupt secret record: {0}")]
    Corrupt(String),
    #[error("store backend failure: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// Recover a typed error that travelled through an `anyhow` chain.
    pub(crate) fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<StoreError>() {
            Ok(typed) => typed,
            Err(other) => Self::Backend(other),
        }
    }
}

/// Result of a consuming write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// This call flipped `is_destroyed` and stamped `accessed_at`.
    Consumed,
    /// A conditional write found the record already destroyed.
    AlreadyDestroyed,
    /// No record with this token exists (e.g. purged in the meantime).
    Missing,
}

/// Keyed record store holding [`SecretRecord`]s.
///
/// Callers get no cross-call transactions: every method is one logical
/// round-trip, and a read followed by a write may interleave with other
/// requests.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Persist a new record. Does not check token uniqueness beyond what the
    /// backend itself enforces.
    async fn insert(&self, record: SecretRecord) -> Result<SecretRecord, StoreError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<SecretRecord>, StoreError>;

    /// Set `is_destroyed = true` and `accessed_at = at`.
    ///
    /// Backends with a conditional write only apply the update while
    /// `is_destroyed == false` and report [`ConsumeOutcome::AlreadyDestroyed`]
    /// otherwise. Backends without one apply it last-write-wins and always
    /// report [`ConsumeOutcome::Consumed`]; two racing redeems can then both
    /// see the plaintext, although the record still ends up destroyed.
    async fn mark_consumed(
        &self,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, StoreError>;

    /// Set `is_destroyed = true` without touching `accessed_at`.
    /// Returns whether the record existed.
    async fn mark_destroyed(&self, token: &str) -> Result<bool, StoreError>;

    /// Records with `expires_at < now`.
    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<SecretRecord>, StoreError>;

    /// Physically delete every record with `expires_at < now`.
    /// Returns the number actually removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Whether [`SecretStore::mark_consumed`] is a genuine compare-and-set.
    fn supports_conditional_update(&self) -> bool;
}
