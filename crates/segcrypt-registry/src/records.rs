use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use segcrypt_core::{Algorithm, KdfKind};
use segcrypt_crypto::{KdfParams, MinimalSegmentDescriptor, NONCE_SIZE, TAG_SIZE, TOKEN_SIZE};

/// Derivation parameters for one file's master key (`master_keys` row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileKeyRecord {
    pub file_id: String,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    pub kdf: KdfParams,
    /// SHA-256(master_key || "verification")
    #[serde(with = "b64")]
    pub verification_hash: [u8; TOKEN_SIZE],
    pub creation_date: DateTime<Utc>,
}

impl FileKeyRecord {
    pub fn kdf_kind(&self) -> KdfKind {
        self.kdf.kind()
    }
}

/// Encryption parameters for one segment (`segment_keys_info` row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentKeyRecord {
    pub segment_id: String,
    pub file_id: String,
    pub segment_index: u64,
    pub encryption_algorithm: Algorithm,
    #[serde(with = "b64")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(with = "b64")]
    pub tag: [u8; TAG_SIZE],
}

impl SegmentKeyRecord {
    /// Decryption context rebuilt from the stored row.
    pub fn to_minimal(&self) -> MinimalSegmentDescriptor {
        MinimalSegmentDescriptor {
            segment_id: self.segment_id.clone(),
            file_id: self.file_id.clone(),
            algorithm: self.encryption_algorithm,
            nonce: self.nonce,
            tag: self.tag,
        }
    }
}

/// Base64 text for byte fields, fixed-size or not.
mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&STANDARD.encode(value.as_ref()))
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<Vec<u8>>,
    {
        let text = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(text.as_bytes()).map_err(de::Error::custom)?;
        let len = bytes.len();
        T::try_from(bytes).map_err(|_| de::Error::custom(format!("unexpected byte length {len}")))
    }
}
