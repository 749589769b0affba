//! Segment descriptors: the self-describing envelope stored next to a ciphertext
//!
//! Wire format is a JSON object:
//! ```text
//! {segment_id, file_id, segment_index, algorithm,
//!  nonce (base64), tag (base64), ciphertext_size, encryption_time (RFC 3339)}
//! ```
//!
//! Two views exist. [`SegmentDescriptor`] is the full record produced at
//! encryption time; every field is required when parsing it back.
//! [`MinimalSegmentDescriptor`] carries only what decryption needs and is
//! what gets rebuilt from a registry row or parsed from a partial blob.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use segcrypt_core::{Algorithm, SegcryptError, SegcryptResult};

use crate::{NONCE_SIZE, TAG_SIZE};

/// Full descriptor written alongside a ciphertext.
///
/// Parsing is strict. [`SegmentDescriptor::deserialize`] requires all eight
/// wire fields, including `ciphertext_size` and `encryption_time` which
/// decryption never reads; a blob carrying only the five decryption fields
/// must go through [`MinimalSegmentDescriptor::deserialize`]. A well-formed
/// blob naming an unknown algorithm fails with
/// [`SegcryptError::UnsupportedAlgorithm`], not [`SegcryptError::Parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub segment_id: String,
    pub file_id: String,
    /// Zero-based position of the segment within its file
    pub segment_index: u64,
    pub algorithm: Algorithm,
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub ciphertext_size: u64,
    /// Informational only
    pub encryption_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct DescriptorWire {
    segment_id: String,
    file_id: String,
    segment_index: u64,
    algorithm: String,
    nonce: String,
    tag: String,
    ciphertext_size: u64,
    encryption_time: DateTime<Utc>,
}

impl SegmentDescriptor {
    /// Build a descriptor, stamping the current time.
    pub fn generate(
        segment_id: String,
        file_id: String,
        segment_index: u64,
        algorithm: Algorithm,
        nonce: [u8; NONCE_SIZE],
        tag: [u8; TAG_SIZE],
        ciphertext_size: u64,
    ) -> Self {
        Self {
            segment_id,
            file_id,
            segment_index,
            algorithm,
            nonce,
            tag,
            ciphertext_size,
            encryption_time: Utc::now(),
        }
    }

    /// Serialize to the JSON wire format
    pub fn serialize(&self) -> SegcryptResult<String> {
        let wire = DescriptorWire {
            segment_id: self.segment_id.clone(),
            file_id: self.file_id.clone(),
            segment_index: self.segment_index,
            algorithm: self.algorithm.as_str().to_string(),
            nonce: base64_encode(&self.nonce),
            tag: base64_encode(&self.tag),
            ciphertext_size: self.ciphertext_size,
            encryption_time: self.encryption_time,
        };
        serde_json::to_string(&wire)
            .map_err(|e| SegcryptError::Parse(format!("descriptor serialization: {e}")))
    }

    /// Parse the JSON wire format. All eight fields must be present.
    ///
    /// Missing fields, bad base64 and wrong nonce or tag lengths give
    /// `Parse`; an algorithm name outside the supported set gives
    /// `UnsupportedAlgorithm`.
    pub fn deserialize(text: &str) -> SegcryptResult<Self> {
        let wire: DescriptorWire = serde_json::from_str(text)
            .map_err(|e| SegcryptError::Parse(format!("descriptor deserialization: {e}")))?;

        Ok(Self {
            algorithm: wire.algorithm.parse()?,
            nonce: decode_fixed("nonce", &wire.nonce)?,
            tag: decode_fixed("tag", &wire.tag)?,
            segment_id: wire.segment_id,
            file_id: wire.file_id,
            segment_index: wire.segment_index,
            ciphertext_size: wire.ciphertext_size,
            encryption_time: wire.encryption_time,
        })
    }

    pub fn minimal(&self) -> MinimalSegmentDescriptor {
        MinimalSegmentDescriptor::from(self)
    }
}

/// The five fields decryption depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinimalSegmentDescriptor {
    pub segment_id: String,
    pub file_id: String,
    pub algorithm: Algorithm,
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
}

#[derive(Deserialize)]
struct MinimalWire {
    segment_id: String,
    file_id: String,
    algorithm: String,
    nonce: String,
    tag: String,
}

impl MinimalSegmentDescriptor {
    /// Parse any descriptor JSON that carries at least the five decryption
    /// fields; other fields are ignored.
    pub fn deserialize(text: &str) -> SegcryptResult<Self> {
        let wire: MinimalWire = serde_json::from_str(text)
            .map_err(|e| SegcryptError::Parse(format!("descriptor deserialization: {e}")))?;

        Ok(Self {
            algorithm: wire.algorithm.parse()?,
            nonce: decode_fixed("nonce", &wire.nonce)?,
            tag: decode_fixed("tag", &wire.tag)?,
            segment_id: wire.segment_id,
            file_id: wire.file_id,
        })
    }
}

impl From<&SegmentDescriptor> for MinimalSegmentDescriptor {
    fn from(d: &SegmentDescriptor) -> Self {
        Self {
            segment_id: d.segment_id.clone(),
            file_id: d.file_id.clone(),
            algorithm: d.algorithm,
            nonce: d.nonce,
            tag: d.tag,
        }
    }
}

fn decode_fixed<const N: usize>(field: &str, s: &str) -> SegcryptResult<[u8; N]> {
    let bytes = base64_decode(s).map_err(|e| SegcryptError::Parse(format!("{field}: {e}")))?;
    bytes.as_slice().try_into().map_err(|_| {
        SegcryptError::Parse(format!(
            "{field}: expected {N} bytes, got {}",
            bytes.len()
        ))
    })
}

pub(crate) fn base64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}

pub(crate) fn base64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.decode(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SegmentDescriptor {
        SegmentDescriptor::generate(
            "file-1_2".into(),
            "file-1".into(),
            2,
            Algorithm::ChaCha20Poly1305,
            [0xA5; NONCE_SIZE],
            [0x5A; TAG_SIZE],
            540,
        )
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let d = sample();
        let text = d.serialize().unwrap();
        let restored = SegmentDescriptor::deserialize(&text).unwrap();

        assert_eq!(restored, d);
        assert_eq!(restored.nonce, [0xA5; NONCE_SIZE]);
        assert_eq!(restored.encryption_time, d.encryption_time);
    }

    #[test]
    fn test_wire_fields_are_text() {
        let d = sample();
        let json: serde_json::Value = serde_json::from_str(&d.serialize().unwrap()).unwrap();

        assert_eq!(json["algorithm"], "ChaCha20-Poly1305");
        assert_eq!(json["segment_index"], 2);
        assert_eq!(json["ciphertext_size"], 540);
        assert_eq!(json["nonce"], base64_encode(&[0xA5; NONCE_SIZE]));
        assert_eq!(json["tag"], base64_encode(&[0x5A; TAG_SIZE]));
        assert!(json["encryption_time"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_field_order_irrelevant() {
        let d = sample();
        let text = format!(
            r#"{{"tag":"{}","encryption_time":"{}","nonce":"{}","ciphertext_size":540,
                "algorithm":"ChaCha20-Poly1305","segment_index":2,"file_id":"file-1",
                "segment_id":"file-1_2"}}"#,
            base64_encode(&d.tag),
            d.encryption_time.to_rfc3339(),
            base64_encode(&d.nonce),
        );
        let parsed = SegmentDescriptor::deserialize(&text).unwrap();
        assert_eq!(parsed.segment_id, d.segment_id);
        assert_eq!(parsed.tag, d.tag);
    }

    #[test]
    fn test_missing_required_field() {
        let d = sample();
        let mut json: serde_json::Value = serde_json::from_str(&d.serialize().unwrap()).unwrap();
        json.as_object_mut().unwrap().remove("nonce");

        let result = SegmentDescriptor::deserialize(&json.to_string());
        assert!(matches!(result, Err(SegcryptError::Parse(msg)) if msg.contains("nonce")));
    }

    #[test]
    fn test_malformed_input() {
        for bad in ["", "not json", "[]", "{\"segment_id\": 5}"] {
            assert!(
                matches!(SegmentDescriptor::deserialize(bad), Err(SegcryptError::Parse(_))),
                "{bad:?} must be a parse error"
            );
        }
    }

    #[test]
    fn test_bad_base64_and_lengths() {
        let d = sample();
        let mut json: serde_json::Value = serde_json::from_str(&d.serialize().unwrap()).unwrap();

        json["nonce"] = "!!!not base64!!!".into();
        assert!(matches!(
            SegmentDescriptor::deserialize(&json.to_string()),
            Err(SegcryptError::Parse(_))
        ));

        json["nonce"] = base64_encode(&[1u8; 8]).into();
        assert!(matches!(
            SegmentDescriptor::deserialize(&json.to_string()),
            Err(SegcryptError::Parse(msg)) if msg.contains("expected 12 bytes")
        ));
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let d = sample();
        let mut json: serde_json::Value = serde_json::from_str(&d.serialize().unwrap()).unwrap();
        json["algorithm"] = "RC4".into();

        assert!(matches!(
            SegmentDescriptor::deserialize(&json.to_string()),
            Err(SegcryptError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_minimal_parses_partial_blob() {
        let text = format!(
            r#"{{"segment_id":"f_0","file_id":"f","algorithm":"AES-256-GCM","nonce":"{}","tag":"{}"}}"#,
            base64_encode(&[1u8; NONCE_SIZE]),
            base64_encode(&[2u8; TAG_SIZE]),
        );

        // the strict parser wants ciphertext_size and encryption_time too
        assert!(matches!(
            SegmentDescriptor::deserialize(&text),
            Err(SegcryptError::Parse(_))
        ));
        let minimal = MinimalSegmentDescriptor::deserialize(&text).unwrap();
        assert_eq!(minimal.segment_id, "f_0");
        assert_eq!(minimal.algorithm, Algorithm::Aes256Gcm);
        assert_eq!(minimal.tag, [2u8; TAG_SIZE]);
    }

    #[test]
    fn test_minimal_from_full() {
        let d = sample();
        let from_text = MinimalSegmentDescriptor::deserialize(&d.serialize().unwrap()).unwrap();
        assert_eq!(from_text, d.minimal());
    }
}
