use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored as JSON, keyed by `token`.
/// `encrypted_content` is base64(nonce ‖ ChaCha20Poly1305 ciphertext) over the raw secret.
/// Everything else is plaintext so the reaper can evict without decrypting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretRecord {
    pub id: Uuid,
    pub token: String,
    pub encrypted_content: String,
    /// Argon2id PHC string, present iff the secret is passphrase-protected.
    pub passphrase_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set only by a successful consuming read.
    pub accessed_at: Option<DateTime<Utc>>,
    pub is_destroyed: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl SecretRecord {
    /// True once `now` has reached `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn has_passphrase(&self) -> bool {
        self.passphrase_hash.is_some()
    }
}

#[cfg(test)]
pub(crate) fn sample_record(token: &str, created_at: DateTime<Utc>, ttl_minutes: i64) -> SecretRecord {
    SecretRecord {
        id: Uuid::new_v4(),
        token: token.to_owned(),
        encrypted_content: "AAAA".into(),
        passphrase_hash: None,
        created_at,
        expires_at: created_at + chrono::Duration::minutes(ttl_minutes),
        accessed_at: None,
        is_destroyed: false,
        metadata: BTreeMap::new(),
    }
}
