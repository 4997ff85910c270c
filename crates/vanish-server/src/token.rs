use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use tracing::{error, warn};

use crate::error::SecretError;
use crate::store::SecretStore;

/// Random bytes per token; 48 bytes encode to 64 URL-safe characters.
pub const TOKEN_BYTES: usize = 48;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// First characters of a token, safe to put in logs.
pub fn token_hint(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    &token[..end]
}

#[derive(Debug, Clone)]
pub struct TokenGenerator {
    max_attempts: u32,
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl TokenGenerator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Fresh token from the OS CSPRNG.
    pub fn generate(&self) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Generate a token that no stored record uses yet.
    pub async fn generate_unique(&self, store: &dyn SecretStore) -> Result<String, SecretError> {
        self.generate_unique_with(store, || self.generate()).await
    }

    async fn generate_unique_with<F>(
        &self,
        store: &dyn SecretStore,
        mut next: F,
    ) -> Result<String, SecretError>
    where
        F: FnMut() -> String,
    {
        for attempt in 1..=self.max_attempts {
            let token = next();
            if store.find_by_token(&token).await?.is_none() {
                return Ok(token);
            }
            warn!(attempt, "token collision");
        }
        error!(
            attempts = self.max_attempts,
            "token space exhausted; check store health"
        );
        Err(SecretError::TokenExhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{model::sample_record, MemoryStore};
    use chrono::Utc;

    #[test]
    fn tokens_are_url_safe_and_fixed_length() {
        let gen = TokenGenerator::default();
        let token = gen.generate();
        assert_eq!(token.len(), 64);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, gen.generate());
    }

    #[test]
    fn hint_truncates() {
        assert_eq!(token_hint("abcdefghijkl"), "abcdefgh");
        assert_eq!(token_hint("abc"), "abc");
    }

    #[tokio::test]
    async fn unique_token_skips_existing() {
        let store = MemoryStore::new();
        store
            .insert(sample_record("taken", Utc::now(), 5))
            .await
            .unwrap();

        let gen = TokenGenerator::new(3);
        let mut candidates = vec!["free", "taken"];
        let token = gen
            .generate_unique_with(&store, || candidates.pop().unwrap().to_owned())
            .await
            .unwrap();
        assert_eq!(token, "free");
    }

    #[tokio::test]
    async fn exhausts_after_exactly_max_attempts() {
        let store = MemoryStore::new();
        store
            .insert(sample_record("taken", Utc::now(), 5))
            .await
            .unwrap();

        let gen = TokenGenerator::new(5);
        let mut calls = 0u32;
        let err = gen
            .generate_unique_with(&store, || {
                calls += 1;
                "taken".to_owned()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SecretError::TokenExhausted { attempts: 5 }));
        assert_eq!(calls, 5);
    }
}
