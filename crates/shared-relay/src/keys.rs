//! # Identity Keys
//!
//! Normalizes public and secret keys from raw bytes, hex strings or the
//! bech32 `npub` / `nsec` encodings into one canonical form.
//!
//! A [`PublicKey`] is always 64 lowercase hex characters, so two keys that
//! compare equal denote the same identity no matter how they were supplied.

use crate::crypto::{CryptoError, MessageCrypto};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use zeroize::Zeroize;

/// Human-readable prefix of bech32 public keys.
pub const NPUB_PREFIX: &str = "npub";

/// Human-readable prefix of bech32 secret keys.
pub const NSEC_PREFIX: &str = "nsec";

/// Which kind of key failed to normalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Public,
    Secret,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Public => write!(f, "public"),
            KeyKind::Secret => write!(f, "secret"),
        }
    }
}

/// Errors from key normalization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Input is neither 32 raw bytes, 64 hex chars, nor a valid bech32 key.
    #[error("Unsupported {0} key format")]
    InvalidKeyFormat(KeyKind),

    /// Bech32 string is malformed or carries the wrong prefix.
    #[error("Invalid bech32 key: {0}")]
    Bech32(&'static str),
}

/// Returns true for a string of exactly 64 hex characters.
#[must_use]
pub fn is_hex64(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Returns true if the value looks like a bech32 secret key.
#[must_use]
pub fn is_nsec(value: &str) -> bool {
    value.starts_with("nsec1")
}

/// Returns true if the value looks like a bech32 public key.
#[must_use]
pub fn is_npub(value: &str) -> bool {
    value.starts_with("npub1")
}

// =============================================================================
// PUBLIC KEY
// =============================================================================

/// Canonical public identity: 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(String);

impl PublicKey {
    /// Normalize a 64-char hex string.
    pub fn from_hex(value: &str) -> Result<Self, KeyError> {
        if !is_hex64(value) {
            return Err(KeyError::InvalidKeyFormat(KeyKind::Public));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Normalize 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != 32 {
            return Err(KeyError::InvalidKeyFormat(KeyKind::Public));
        }
        Ok(Self(hex::encode(bytes)))
    }

    /// Decode a bech32 `npub1...` string.
    pub fn from_npub(value: &str) -> Result<Self, KeyError> {
        if !is_npub(value) {
            return Err(KeyError::Bech32("expected npub prefix"));
        }
        let bytes = bech32::decode(NPUB_PREFIX, value)?;
        Self::from_bytes(&bytes)
    }

    /// Accepts `npub1...` or 64 hex characters.
    pub fn parse(value: &str) -> Result<Self, KeyError> {
        if is_npub(value) {
            return Self::from_npub(value);
        }
        Self::from_hex(value)
    }

    /// Encode as bech32 `npub1...`.
    #[must_use]
    pub fn to_npub(&self) -> String {
        bech32::encode(NPUB_PREFIX, &self.to_bytes())
    }

    /// Raw 32-byte form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        // The inner string is validated hex of the right length.
        if let Ok(bytes) = hex::decode(&self.0) {
            out.copy_from_slice(&bytes);
        }
        out
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex chars, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PublicKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(value)
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.0
    }
}

impl AsRef<str> for PublicKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// SECRET KEY
// =============================================================================

/// Secret key (256-bit). Wiped on drop, never printed.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Generate a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    /// Normalize 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidKeyFormat(KeyKind::Secret))?;
        Ok(Self(array))
    }

    /// Normalize a 64-char hex string.
    pub fn from_hex(value: &str) -> Result<Self, KeyError> {
        if !is_hex64(value) {
            return Err(KeyError::InvalidKeyFormat(KeyKind::Secret));
        }
        let bytes = hex::decode(value).map_err(|_| KeyError::InvalidKeyFormat(KeyKind::Secret))?;
        Self::from_bytes(&bytes)
    }

    /// Decode a bech32 `nsec1...` string.
    pub fn from_nsec(value: &str) -> Result<Self, KeyError> {
        if !is_nsec(value) {
            return Err(KeyError::Bech32("expected nsec prefix"));
        }
        let bytes = bech32::decode(NSEC_PREFIX, value)?;
        Self::from_bytes(&bytes)
    }

    /// Accepts `nsec1...` or 64 hex characters.
    pub fn parse(value: &str) -> Result<Self, KeyError> {
        if is_nsec(value) {
            return Self::from_nsec(value);
        }
        Self::from_hex(value)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Encode as bech32 `nsec1...`.
    #[must_use]
    pub fn to_nsec(&self) -> String {
        bech32::encode(NSEC_PREFIX, &self.0)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

impl FromStr for SecretKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// KEY PAIR
// =============================================================================

/// A secret key together with the public identity it signs as.
#[derive(Debug, Clone)]
pub struct Keys {
    secret: SecretKey,
    public: PublicKey,
}

impl Keys {
    /// Pair an explicitly supplied secret and public key.
    #[must_use]
    pub fn new(secret: SecretKey, public: PublicKey) -> Self {
        Self { secret, public }
    }

    /// Derive the public key through the crypto collaborator.
    pub fn from_secret(secret: SecretKey, crypto: &dyn MessageCrypto) -> Result<Self, CryptoError> {
        let public = crypto.public_key(&secret)?;
        Ok(Self { secret, public })
    }

    /// Fresh random identity.
    pub fn generate(crypto: &dyn MessageCrypto) -> Result<Self, CryptoError> {
        Self::from_secret(SecretKey::generate(), crypto)
    }

    #[must_use]
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

// =============================================================================
// BECH32 (BIP-173)
// =============================================================================

mod bech32 {
    use super::KeyError;

    const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
    const GENERATOR: [u32; 5] = [0x3b6a_57b2, 0x2650_8e6d, 0x1ea1_19fa, 0x3d42_33dd, 0x2a14_62b3];
    const CHECKSUM_LEN: usize = 6;

    fn polymod(values: &[u8]) -> u32 {
        let mut chk: u32 = 1;
        for value in values {
            let top = chk >> 25;
            chk = ((chk & 0x01ff_ffff) << 5) ^ u32::from(*value);
            for (i, generator) in GENERATOR.iter().enumerate() {
                if (top >> i) & 1 == 1 {
                    chk ^= generator;
                }
            }
        }
        chk
    }

    fn hrp_expand(hrp: &str) -> Vec<u8> {
        let bytes = hrp.as_bytes();
        let mut out = Vec::with_capacity(bytes.len() * 2 + 1);
        out.extend(bytes.iter().map(|b| b >> 5));
        out.push(0);
        out.extend(bytes.iter().map(|b| b & 0x1f));
        out
    }

    fn checksum(hrp: &str, data: &[u8]) -> [u8; CHECKSUM_LEN] {
        let mut values = hrp_expand(hrp);
        values.extend_from_slice(data);
        values.extend_from_slice(&[0; CHECKSUM_LEN]);
        let pm = polymod(&values) ^ 1;
        let mut out = [0u8; CHECKSUM_LEN];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = ((pm >> (5 * (5 - i))) & 0x1f) as u8;
        }
        out
    }

    fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Result<Vec<u8>, KeyError> {
        let mut acc: u32 = 0;
        let mut bits: u32 = 0;
        let max_value = (1u32 << to) - 1;
        let mut out = Vec::with_capacity(data.len() * from as usize / to as usize + 1);
        for value in data {
            let value = u32::from(*value);
            if value >> from != 0 {
                return Err(KeyError::Bech32("value out of range"));
            }
            acc = (acc << from) | value;
            bits += from;
            while bits >= to {
                bits -= to;
                out.push(((acc >> bits) & max_value) as u8);
            }
        }
        if pad {
            if bits > 0 {
                out.push(((acc << (to - bits)) & max_value) as u8);
            }
        } else if bits >= from || ((acc << (to - bits)) & max_value) != 0 {
            return Err(KeyError::Bech32("invalid padding"));
        }
        Ok(out)
    }

    pub(super) fn encode(hrp: &str, bytes: &[u8]) -> String {
        // 8-to-5 conversion with padding cannot fail.
        let data = convert_bits(bytes, 8, 5, true).unwrap_or_default();
        let check = checksum(hrp, &data);
        let mut out = String::with_capacity(hrp.len() + 1 + data.len() + CHECKSUM_LEN);
        out.push_str(hrp);
        out.push('1');
        for value in data.iter().chain(check.iter()) {
            out.push(char::from(CHARSET[usize::from(*value)]));
        }
        out
    }

    pub(super) fn decode(expected_hrp: &str, value: &str) -> Result<Vec<u8>, KeyError> {
        let has_lower = value.bytes().any(|b| b.is_ascii_lowercase());
        let has_upper = value.bytes().any(|b| b.is_ascii_uppercase());
        if has_lower && has_upper {
            return Err(KeyError::Bech32("mixed case"));
        }
        let value = value.to_ascii_lowercase();
        let separator = value.rfind('1').ok_or(KeyError::Bech32("missing separator"))?;
        let (hrp, rest) = value.split_at(separator);
        if hrp != expected_hrp {
            return Err(KeyError::Bech32("unexpected prefix"));
        }
        let data_part = &rest[1..];
        if data_part.len() < CHECKSUM_LEN {
            return Err(KeyError::Bech32("too short"));
        }
        let mut data = Vec::with_capacity(data_part.len());
        for c in data_part.bytes() {
            let index = CHARSET
                .iter()
                .position(|x| *x == c)
                .ok_or(KeyError::Bech32("invalid character"))?;
            data.push(index as u8);
        }
        let mut values = hrp_expand(hrp);
        values.extend_from_slice(&data);
        if polymod(&values) != 1 {
            return Err(KeyError::Bech32("invalid checksum"));
        }
        data.truncate(data.len() - CHECKSUM_LEN);
        convert_bits(&data, 5, 8, false)
    }
}
