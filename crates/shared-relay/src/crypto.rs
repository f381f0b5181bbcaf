//! # Message Crypto Port
//!
//! Payload encryption, event signing and key derivation are supplied by an
//! external library. This module defines the port and a deterministic
//! implementation for tests.

use crate::event::{RelayEvent, UnsignedEvent};
use crate::keys::{KeyError, PublicKey, SecretKey};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Errors from crypto operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Crypto collaborator consumed by the client and server.
#[async_trait]
pub trait MessageCrypto: Send + Sync {
    /// Encrypt `plaintext` from the owner of `secret` to `counterpart`.
    async fn encrypt(
        &self,
        secret: &SecretKey,
        counterpart: &PublicKey,
        plaintext: &str,
    ) -> Result<String, CryptoError>;

    /// Decrypt `ciphertext` sent between the owner of `secret` and `counterpart`.
    async fn decrypt(
        &self,
        secret: &SecretKey,
        counterpart: &PublicKey,
        ciphertext: &str,
    ) -> Result<String, CryptoError>;

    /// Compute the id and signature of an event.
    fn sign(&self, unsigned: UnsignedEvent, secret: &SecretKey) -> Result<RelayEvent, CryptoError>;

    /// Derive the public identity of a secret key.
    fn public_key(&self, secret: &SecretKey) -> Result<PublicKey, CryptoError>;
}

/// Deterministic crypto for tests and same-process loopback.
///
/// - public key = SHA-256(secret)
/// - ciphertext = `<conversation tag>:<hex plaintext>`; the tag binds the
///   ciphertext to the unordered pair of participants, so decrypting with
///   the wrong pair fails
/// - signature = HMAC-SHA256(secret, event id)
///
/// Provides integrity against misaddressing only, never confidentiality.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestCrypto;

impl DigestCrypto {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn conversation_tag(a: &PublicKey, b: &PublicKey) -> String {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let mut hasher = Sha256::new();
        hasher.update(low.as_str().as_bytes());
        hasher.update(high.as_str().as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }

    /// Check an event's id and signature against its author's secret.
    pub fn verify(&self, event: &RelayEvent, secret: &SecretKey) -> bool {
        let unsigned = UnsignedEvent {
            pubkey: event.pubkey.clone(),
            created_at: event.created_at,
            kind: event.kind,
            tags: event.tags.clone(),
            content: event.content.clone(),
        };
        if unsigned.compute_id() != event.id {
            return false;
        }
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(event.id.as_bytes());
        hex::decode(&event.sig)
            .map(|sig| mac.verify_slice(&sig).is_ok())
            .unwrap_or(false)
    }
}

#[async_trait]
impl MessageCrypto for DigestCrypto {
    async fn encrypt(
        &self,
        secret: &SecretKey,
        counterpart: &PublicKey,
        plaintext: &str,
    ) -> Result<String, CryptoError> {
        let own = self.public_key(secret)?;
        let tag = Self::conversation_tag(&own, counterpart);
        Ok(format!("{tag}:{}", hex::encode(plaintext.as_bytes())))
    }

    async fn decrypt(
        &self,
        secret: &SecretKey,
        counterpart: &PublicKey,
        ciphertext: &str,
    ) -> Result<String, CryptoError> {
        let own = self.public_key(secret)?;
        let (tag, body) = ciphertext
            .split_once(':')
            .ok_or_else(|| CryptoError::DecryptionFailed("malformed ciphertext".into()))?;
        if tag != Self::conversation_tag(&own, counterpart) {
            return Err(CryptoError::DecryptionFailed(
                "ciphertext not addressed to this conversation".into(),
            ));
        }
        let bytes =
            hex::decode(body).map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }

    fn sign(&self, unsigned: UnsignedEvent, secret: &SecretKey) -> Result<RelayEvent, CryptoError> {
        let own = self.public_key(secret)?;
        if own != unsigned.pubkey {
            return Err(CryptoError::SigningFailed(
                "event pubkey does not match secret key".into(),
            ));
        }
        let id = unsigned.compute_id();
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
        mac.update(id.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        Ok(unsigned.into_signed(id, sig))
    }

    fn public_key(&self, secret: &SecretKey) -> Result<PublicKey, CryptoError> {
        let digest = Sha256::digest(secret.as_bytes());
        Ok(PublicKey::from_bytes(&digest)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keys;

    fn keys() -> Keys {
        Keys::generate(&DigestCrypto).unwrap()
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_between_peers() {
        let crypto = DigestCrypto::new();
        let alice = keys();
        let bob = keys();

        let ciphertext = crypto
            .encrypt(alice.secret_key(), bob.public_key(), "hello bob")
            .await
            .unwrap();
        let plaintext = crypto
            .decrypt(bob.secret_key(), alice.public_key(), &ciphertext)
            .await
            .unwrap();

        assert_eq!(plaintext, "hello bob");
    }

    #[tokio::test]
    async fn test_decrypt_with_wrong_pair_fails() {
        let crypto = DigestCrypto::new();
        let alice = keys();
        let bob = keys();
        let mallory = keys();

        let ciphertext = crypto
            .encrypt(alice.secret_key(), bob.public_key(), "secret")
            .await
            .unwrap();
        let result = crypto
            .decrypt(mallory.secret_key(), alice.public_key(), &ciphertext)
            .await;

        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[tokio::test]
    async fn test_decrypt_malformed_ciphertext_fails() {
        let crypto = DigestCrypto::new();
        let alice = keys();
        let result = crypto
            .decrypt(alice.secret_key(), alice.public_key(), "no-separator")
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let crypto = DigestCrypto::new();
        let alice = keys();
        let bob = keys();

        let unsigned = UnsignedEvent::direct_message(
            alice.public_key().clone(),
            bob.public_key(),
            "payload".into(),
            1_700_000_000,
        );
        let event = crypto.sign(unsigned, alice.secret_key()).unwrap();

        assert_eq!(event.id.len(), 64);
        assert!(crypto.verify(&event, alice.secret_key()));
        assert!(!crypto.verify(&event, bob.secret_key()));
    }

    #[test]
    fn test_sign_rejects_foreign_pubkey() {
        let crypto = DigestCrypto::new();
        let alice = keys();
        let bob = keys();

        let unsigned = UnsignedEvent::direct_message(
            bob.public_key().clone(),
            alice.public_key(),
            "spoof".into(),
            1_700_000_000,
        );
        assert!(matches!(
            crypto.sign(unsigned, alice.secret_key()),
            Err(CryptoError::SigningFailed(_))
        ));
    }
}
