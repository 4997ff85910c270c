use std::sync::Arc;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use tracing::warn;
use zeroize::{ZeroizeOnDrop, Zeroizing};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
/// Poly1305 tag appended by the AEAD.
const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
    #[error("malformed ciphertext: {0}")]
    Malformed(&'static str),
    #[error("encryption failed")]
    Encrypt,
    /// Authentication tag mismatch: wrong key or tampered data.
    #[error("decryption failed")]
    Decrypt,
    #[error("passphrase hashing failed: {0}")]
    Hash(String),
}

/// 32-byte ChaCha20Poly1305 key.
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Parse raw key material; anything but exactly 32 bytes is rejected.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CipherError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(key))
    }

    /// Parse a standard-alphabet base64 key.
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| CipherError::InvalidKey(format!("not base64: {e}")))?,
        );
        Self::from_slice(&bytes)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

/// Generate a fresh random key.
pub fn generate_key() -> EncryptionKey {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    EncryptionKey(key)
}

/// Authenticated encryption of payloads plus passphrase hashing.
#[derive(Clone)]
pub struct Cipher {
    key: Arc<EncryptionKey>,
}

impl Cipher {
    pub fn new(key: EncryptionKey) -> Self {
        Self { key: Arc::new(key) }
    }

    fn aead(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.key.as_bytes()))
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    /// Returns base64(nonce ‖ ciphertext ‖ tag).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let ciphertext = self
            .aead()
            .encrypt(&nonce, plaintext)
            .map_err(|_| CipherError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    /// Inverse of [`Cipher::encrypt`]. The returned buffer is wiped on drop.
    pub fn decrypt(&self, encoded: &str) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        let raw = STANDARD
            .decode(encoded)
            .map_err(|_| CipherError::Malformed("not base64"))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Malformed("truncated"));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .aead()
            .decrypt(nonce, ciphertext)
            .map_err(|_| CipherError::Decrypt)?;
        Ok(Zeroizing::new(plaintext))
    }

    /// Salted Argon2id hash in PHC string format.
    pub fn hash_passphrase(&self, passphrase: &str) -> Result<String, CipherError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(passphrase.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| CipherError::Hash(e.to_string()))
    }

    /// Check `passphrase` against a stored PHC hash.
    /// A stored hash that cannot be parsed counts as a failed verification.
    pub fn verify_passphrase(&self, passphrase: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "stored passphrase hash is malformed");
                return false;
            }
        };
        Argon2::default()
            .verify_password(passphrase.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> Cipher {
        Cipher::new(generate_key())
    }

    #[test]
    fn round_trip() {
        let c = cipher();
        for plaintext in ["", "hello, vanish!", "contraseña 秘密 🔐"] {
            let ct = c.encrypt(plaintext.as_bytes()).unwrap();
            let pt = c.decrypt(&ct).unwrap();
            assert_eq!(pt.as_slice(), plaintext.as_bytes());
        }
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let c = cipher();
        assert_ne!(c.encrypt(b"x").unwrap(), c.encrypt(b"x").unwrap());
    }

    #[test]
    fn wrong_key_fails() {
        let ct = cipher().encrypt(b"secret").unwrap();
        assert!(matches!(cipher().decrypt(&ct), Err(CipherError::Decrypt)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let c = cipher();
        let ct = c.encrypt(b"secret").unwrap();
        let mut raw = STANDARD.decode(&ct).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(matches!(
            c.decrypt(&STANDARD.encode(raw)),
            Err(CipherError::Decrypt)
        ));
    }

    #[test]
    fn malformed_input_is_rejected() {
        let c = cipher();
        assert!(matches!(c.decrypt("@@@"), Err(CipherError::Malformed(_))));
        assert!(matches!(c.decrypt("AAAA"), Err(CipherError::Malformed(_))));
    }

    #[test]
    fn key_parsing() {
        let key = generate_key();
        let encoded = key.to_base64();
        assert_eq!(
            EncryptionKey::from_base64(&encoded).unwrap().as_bytes(),
            key.as_bytes()
        );
        assert!(matches!(
            EncryptionKey::from_base64("c2hvcnQ="),
            Err(CipherError::InvalidKey(_))
        ));
        assert!(matches!(
            EncryptionKey::from_base64("not base64!"),
            Err(CipherError::InvalidKey(_))
        ));
    }

    #[test]
    fn passphrase_hash_is_salted_and_verifies() {
        let c = cipher();
        let h1 = c.hash_passphrase("secret1").unwrap();
        let h2 = c.hash_passphrase("secret1").unwrap();
        assert_ne!(h1, h2);
        assert!(c.verify_passphrase("secret1", &h1));
        assert!(c.verify_passphrase("secret1", &h2));
        assert!(!c.verify_passphrase("wrong", &h1));
    }

    #[test]
    fn malformed_hash_fails_verification() {
        assert!(!cipher().verify_passphrase("secret1", "not-a-phc-string"));
    }
}
