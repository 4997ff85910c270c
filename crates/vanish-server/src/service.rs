//! Secret lifecycle: create, redeem, verify, delete, purge.
//!
//! Per-record states: ALIVE → CONSUMED (read) | DELETED (explicit delete or
//! lazy reap on an expired read) | PURGED (removed by the reaper). "Expired"
//! is never stored; it is derived from `expires_at` at read time.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::clock::Clock;
use crate::crypto::Cipher;
use crate::error::{GoneReason, SecretError};
use crate::reaper::SweepLock;
use crate::store::{ConsumeOutcome, SecretRecord, SecretStore};
use crate::token::{token_hint, TokenGenerator};

/// Limits applied to incoming secrets.
#[derive(Debug, Clone)]
pub struct SecretPolicy {
    pub min_ttl_minutes: i64,
    pub max_ttl_minutes: i64,
    pub default_ttl_minutes: i64,
    pub max_secret_bytes: usize,
    pub min_passphrase_len: usize,
    /// Base for access URLs, e.g. `https://vanish.example.com`.
    pub public_url: String,
}

impl Default for SecretPolicy {
    fn default() -> Self {
        Self {
            min_ttl_minutes: 5,
            max_ttl_minutes: 10_080,
            default_ttl_minutes: 60,
            max_secret_bytes: 10 * 1024,
            min_passphrase_len: 6,
            public_url: "http://localhost:8080".into(),
        }
    }
}

impl SecretPolicy {
    fn validate(&self, new: &NewSecret) -> Result<i64, SecretError> {
        if new.content.is_empty() {
            return Err(SecretError::Validation("content must not be empty".into()));
        }
        if new.content.len() > self.max_secret_bytes {
            return Err(SecretError::Validation(format!(
                "content exceeds the maximum size of {} bytes",
                self.max_secret_bytes
            )));
        }

        let ttl = new.ttl_minutes.unwrap_or(self.default_ttl_minutes);
        if ttl < self.min_ttl_minutes || ttl > self.max_ttl_minutes {
            return Err(SecretError::Validation(format!(
                "ttl_minutes must be between {} and {}",
                self.min_ttl_minutes, self.max_ttl_minutes
            )));
        }

        if let Some(p) = &new.passphrase {
            if p.chars().count() < self.min_passphrase_len {
                return Err(SecretError::Validation(format!(
                    "passphrase must be at least {} characters",
                    self.min_passphrase_len
                )));
            }
        }
        Ok(ttl)
    }

    pub fn access_url(&self, token: &str) -> String {
        format!("{}/api/secret/{}", self.public_url.trim_end_matches('/'), token)
    }
}

/// Input to [`SecretService::create`].
pub struct NewSecret {
    pub content: Zeroizing<String>,
    /// Falls back to the policy default when absent.
    pub ttl_minutes: Option<i64>,
    pub passphrase: Option<Zeroizing<String>>,
}

#[derive(Debug, Clone)]
pub struct CreatedSecret {
    pub token: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub has_passphrase: bool,
}

pub struct RevealedSecret {
    pub content: Zeroizing<String>,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for RevealedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevealedSecret")
            .field("content", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub valid: bool,
    pub message: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    pub already_destroyed: bool,
    pub message: &'static str,
}

/// Orchestrates the store, cipher and token generator.
#[derive(Clone)]
pub struct SecretService {
    store: Arc<dyn SecretStore>,
    cipher: Cipher,
    tokens: TokenGenerator,
    clock: Arc<dyn Clock>,
    policy: SecretPolicy,
    sweep_lock: SweepLock,
}

impl SecretService {
    pub fn new(
        store: Arc<dyn SecretStore>,
        cipher: Cipher,
        tokens: TokenGenerator,
        clock: Arc<dyn Clock>,
        policy: SecretPolicy,
    ) -> Self {
        Self {
            store,
            cipher,
            tokens,
            clock,
            policy,
            sweep_lock: SweepLock::default(),
        }
    }

    /// Share the reaper's lock so on-demand purges never overlap scheduled ones.
    pub fn with_sweep_lock(mut self, lock: SweepLock) -> Self {
        self.sweep_lock = lock;
        self
    }

    pub fn policy(&self) -> &SecretPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Encrypt and persist a new secret.
    ///
    /// The insert is the only write, so any earlier failure leaves nothing
    /// behind in the store.
    pub async fn create(&self, new: NewSecret) -> Result<CreatedSecret, SecretError> {
        let ttl_minutes = self.policy.validate(&new)?;

        let token = self.tokens.generate_unique(&*self.store).await?;
        let encrypted_content = self.cipher.encrypt(new.content.as_bytes())?;
        let passphrase_hash = match new.passphrase {
            Some(p) => Some(self.hash_passphrase(p).await?),
            None => None,
        };
        let has_passphrase = passphrase_hash.is_some();

        let created_at = self.clock.now();
        let expires_at = Duration::try_minutes(ttl_minutes)
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .ok_or_else(|| SecretError::Validation("ttl_minutes is out of range".into()))?;

        let mut metadata = BTreeMap::new();
        metadata.insert("ttl_minutes".to_owned(), json!(ttl_minutes));
        metadata.insert("has_passphrase".to_owned(), json!(has_passphrase));
        metadata.insert("content_length".to_owned(), json!(new.content.len()));

        let record = SecretRecord {
            id: Uuid::new_v4(),
            token,
            encrypted_content,
            passphrase_hash,
            created_at,
            expires_at,
            accessed_at: None,
            is_destroyed: false,
            metadata,
        };
        let stored = self.store.insert(record).await?;

        info!(
            token = %token_hint(&stored.token),
            ttl_minutes,
            has_passphrase = stored.has_passphrase(),
            %expires_at,
            "secret created"
        );
        Ok(CreatedSecret {
            url: self.policy.access_url(&stored.token),
            has_passphrase: stored.has_passphrase(),
            token: stored.token,
            expires_at,
        })
    }

    /// The single consuming read. On success the record is destroyed.
    ///
    /// Whether two racing redeems can both succeed depends on the store:
    /// with a conditional `mark_consumed` only one of them returns the
    /// plaintext, otherwise both may (see [`SecretStore::mark_consumed`]).
    pub async fn redeem(
        &self,
        token: &str,
        passphrase: Option<&str>,
    ) -> Result<RevealedSecret, SecretError> {
        let hint = token_hint(token);
        let record = self.load(token).await?;
        let now = self.clock.now();

        if record.is_destroyed {
            warn!(token = %hint, "access to destroyed secret");
            return Err(SecretError::Gone(GoneReason::AlreadyDestroyed));
        }
        if record.is_expired(now) {
            warn!(token = %hint, "access to expired secret; destroying");
            self.store.mark_destroyed(token).await?;
            return Err(SecretError::Gone(GoneReason::Expired));
        }

        if let Some(hash) = &record.passphrase_hash {
            let Some(passphrase) = passphrase.filter(|p| !p.is_empty()) else {
                warn!(token = %hint, "passphrase missing");
                return Err(SecretError::AuthRequired);
            };
            if !self.check_passphrase(passphrase, hash).await? {
                warn!(token = %hint, "wrong passphrase");
                return Err(SecretError::AuthFailed);
            }
        }

        let plaintext = self.cipher.decrypt(&record.encrypted_content).map_err(|e| {
            error!(token = %hint, error = %e, "stored secret failed to decrypt");
            SecretError::Internal("stored secret could not be decrypted".into())
        })?;
        let content = String::from_utf8(plaintext.to_vec())
            .map(Zeroizing::new)
            .map_err(|_| {
                error!(token = %hint, "decrypted secret is not valid UTF-8");
                SecretError::Internal("stored secret is corrupt".into())
            })?;

        match self.store.mark_consumed(token, now).await? {
            ConsumeOutcome::Consumed => {
                info!(token = %hint, created_at = %record.created_at, "secret read and destroyed");
                Ok(RevealedSecret {
                    content,
                    created_at: record.created_at,
                })
            }
            ConsumeOutcome::AlreadyDestroyed | ConsumeOutcome::Missing => {
                warn!(token = %hint, "lost consume race");
                Err(SecretError::Gone(GoneReason::AlreadyDestroyed))
            }
        }
    }

    /// Check a passphrase without consuming or otherwise touching the secret.
    pub async fn verify_passphrase(
        &self,
        token: &str,
        passphrase: &str,
    ) -> Result<Verification, SecretError> {
        let record = self.load(token).await?;

        if record.is_destroyed {
            return Ok(Verification {
                valid: false,
                message: "secret was already destroyed",
            });
        }
        if record.is_expired(self.clock.now()) {
            return Ok(Verification {
                valid: false,
                message: "secret has expired",
            });
        }
        let Some(hash) = &record.passphrase_hash else {
            return Ok(Verification {
                valid: true,
                message: "secret is not passphrase-protected",
            });
        };

        if self.check_passphrase(passphrase, hash).await? {
            info!(token = %token_hint(token), "passphrase verified");
            Ok(Verification {
                valid: true,
                message: "passphrase is correct",
            })
        } else {
            warn!(token = %token_hint(token), "passphrase verification failed");
            Ok(Verification {
                valid: false,
                message: "incorrect passphrase",
            })
        }
    }

    /// Destroy a secret without reading it. Idempotent.
    pub async fn delete(&self, token: &str) -> Result<Deletion, SecretError> {
        let record = self.load(token).await?;
        if record.is_destroyed {
            info!(token = %token_hint(token), "delete of already destroyed secret");
            return Ok(Deletion {
                already_destroyed: true,
                message: "secret was already destroyed",
            });
        }
        if !self.store.mark_destroyed(token).await? {
            return Err(SecretError::NotFound);
        }
        info!(token = %token_hint(token), "secret destroyed without being read");
        Ok(Deletion {
            already_destroyed: false,
            message: "secret destroyed without being read",
        })
    }

    /// Run the reaper's sweep now. `None` when a sweep is already running.
    pub async fn purge_expired_now(&self) -> Result<Option<usize>, SecretError> {
        info!("manual purge of expired secrets");
        match self.sweep_lock.sweep(&*self.store, self.clock.now()).await {
            Some(removed) => Ok(Some(removed?)),
            None => {
                warn!("manual purge skipped; a sweep is already running");
                Ok(None)
            }
        }
    }

    /// Argon2 is deliberately slow; keep it off the async workers.
    async fn hash_passphrase(&self, passphrase: Zeroizing<String>) -> Result<String, SecretError> {
        let cipher = self.cipher.clone();
        let hashed = tokio::task::spawn_blocking(move || cipher.hash_passphrase(&passphrase))
            .await
            .map_err(|e| {
                error!(error = %e, "passphrase hashing task failed");
                SecretError::Internal("passphrase hashing failed".into())
            })?;
        Ok(hashed?)
    }

    async fn check_passphrase(&self, passphrase: &str, hash: &str) -> Result<bool, SecretError> {
        let cipher = self.cipher.clone();
        let passphrase = Zeroizing::new(passphrase.to_owned());
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || cipher.verify_passphrase(&passphrase, &hash))
            .await
            .map_err(|e| {
                error!(error = %e, "passphrase verification task failed");
                SecretError::Internal("passphrase verification failed".into())
            })
    }

    async fn load(&self, token: &str) -> Result<SecretRecord, SecretError> {
        match self.store.find_by_token(token).await? {
            Some(record) => Ok(record),
            None => {
                warn!(token = %token_hint(token), "unknown token");
                Err(SecretError::NotFound)
            }
        }
    }
}
