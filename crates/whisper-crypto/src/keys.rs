//! X25519 key types and their canonical string form
//!
//! Both key kinds encode as base64url without padding over the 32 raw bytes.
//! Parsing is lenient the way shared keys tend to arrive in practice: outer
//! whitespace is trimmed, trailing `=` padding is ignored, and the standard
//! alphabet (`+`, `/`) is accepted alongside the URL-safe one.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{SharedSecret, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, Result};
use crate::KEY_SIZE;

/// An X25519 public key. Identifies a recipient.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey {
    bytes: [u8; KEY_SIZE],
}

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.bytes
    }

    fn to_dalek(self) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(self.bytes)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.bytes))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = decode_key_string(s)?;
        Ok(Self::from_bytes(*bytes))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An X25519 private key. Zeroized on drop, redacted in `Debug`.
#[derive(Clone)]
pub struct PrivateKey {
    secret: StaticSecret,
}

impl PrivateKey {
    /// Generate a new identity from the OS CSPRNG.
    pub fn generate() -> Result<Self> {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng
            .try_fill_bytes(&mut bytes[..])
            .map_err(Error::Random)?;
        Ok(Self::from_bytes(*bytes))
    }

    pub fn from_bytes(mut bytes: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(bytes);
        bytes.zeroize();
        Self { secret }
    }

    pub fn to_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(x25519_dalek::PublicKey::from(&self.secret).to_bytes())
    }

    /// The canonical string form. Treat the result as secret.
    pub fn encode(&self) -> Zeroizing<String> {
        Zeroizing::new(URL_SAFE_NO_PAD.encode(self.secret.as_bytes()))
    }

    pub(crate) fn diffie_hellman(&self, their_public: &PublicKey) -> SharedSecret {
        self.secret.diffie_hellman(&their_public.to_dalek())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public", &self.public_key())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl FromStr for PrivateKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = decode_key_string(s)?;
        Ok(Self::from_bytes(*bytes))
    }
}

fn decode_key_string(s: &str) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    let normalized: Zeroizing<String> = Zeroizing::new(
        s.trim()
            .trim_end_matches('=')
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                c => c,
            })
            .collect(),
    );

    let decoded = Zeroizing::new(
        URL_SAFE_NO_PAD
            .decode(normalized.as_bytes())
            .map_err(|e| Error::InvalidKeyEncoding(e.to_string()))?,
    );

    if decoded.len() != KEY_SIZE {
        return Err(Error::InvalidKeyEncoding(format!(
            "decoded key is {} bytes (expected {KEY_SIZE})",
            decoded.len()
        )));
    }

    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    bytes.copy_from_slice(&decoded);
    Ok(bytes)
}
