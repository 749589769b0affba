use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SegcryptError;

/// AEAD algorithm used to seal a segment.
///
/// The wire names (`"AES-256-GCM"`, `"ChaCha20-Poly1305"`) are what end up in
/// descriptors and registry rows; nothing else is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "AES-256-GCM")]
    Aes256Gcm,
    #[serde(rename = "ChaCha20-Poly1305")]
    ChaCha20Poly1305,
}

impl Algorithm {
    pub const ALL: [Algorithm; 2] = [Algorithm::Aes256Gcm, Algorithm::ChaCha20Poly1305];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "AES-256-GCM",
            Algorithm::ChaCha20Poly1305 => "ChaCha20-Poly1305",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = SegcryptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| SegcryptError::UnsupportedAlgorithm(s.to_string()))
    }
}

/// Password KDF family recorded per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfKind {
    /// Memory-hard Argon2id
    Argon2id,
    /// PBKDF2-HMAC-SHA256
    Pbkdf2,
}

impl KdfKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KdfKind::Argon2id => "argon2id",
            KdfKind::Pbkdf2 => "pbkdf2",
        }
    }
}

impl fmt::Display for KdfKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KdfKind {
    type Err = SegcryptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "argon2id" => Ok(KdfKind::Argon2id),
            "pbkdf2" => Ok(KdfKind::Pbkdf2),
            other => Err(SegcryptError::Config(format!(
                "unknown kdf: {other} (expected argon2id or pbkdf2)"
            ))),
        }
    }
}
