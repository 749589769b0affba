//! Key hierarchy: master key → per-segment key via HKDF-SHA256

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use segcrypt_core::{SegcryptError, SegcryptResult};

use crate::kdf::MasterKey;
use crate::KEY_SIZE;

/// A per-segment 256-bit encryption key. Zeroized on drop.
#[derive(Clone)]
pub struct SegmentKey {
    bytes: [u8; KEY_SIZE],
}

impl SegmentKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SegmentKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SegmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Registry key for a segment: `"{file_id}_{segment_index}"`.
pub fn segment_id(file_id: &str, segment_index: u64) -> String {
    format!("{file_id}_{segment_index}")
}

/// Derive the key for one segment of one file.
///
/// HKDF-SHA256 with no salt, IKM = master key, info = `"{file_id}:{segment_id}"`.
pub fn derive_segment_key(
    master: &MasterKey,
    segment_id: &str,
    file_id: &str,
) -> SegcryptResult<SegmentKey> {
    let info = format!("{file_id}:{segment_id}");
    let okm = hkdf_derive(master.as_bytes(), info.as_bytes())?;
    Ok(SegmentKey::from_bytes(okm))
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
fn hkdf_derive(ikm: &[u8; KEY_SIZE], info: &[u8]) -> SegcryptResult<[u8; KEY_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(info, &mut okm)
        .map_err(|e| SegcryptError::Config(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}
