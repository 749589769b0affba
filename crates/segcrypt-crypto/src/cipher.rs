//! Per-segment AEAD: AES-256-GCM or ChaCha20-Poly1305
//!
//! Sealed segment layout (fields kept separate, never concatenated on the wire):
//! ```text
//! nonce:      12 bytes, fresh from the OS RNG on every call
//! ciphertext: same length as the plaintext
//! tag:        16 bytes
//! ```
//!
//! Callers never supply an encryption nonce, so a nonce cannot be replayed
//! under the same segment key through this API.

use aes_gcm::Aes256Gcm;
use chacha20poly1305::aead::consts::{U12, U16};
use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::{AeadCore, AeadInPlace, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;
use zeroize::Zeroize;

use segcrypt_core::{Algorithm, SegcryptError, SegcryptResult};

use crate::keys::SegmentKey;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Output of [`encrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSegment {
    pub algorithm: Algorithm,
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub ciphertext: Vec<u8>,
}

/// Accept only the two supported wire names.
pub fn validate(algorithm: &str) -> SegcryptResult<Algorithm> {
    algorithm.parse()
}

/// Encrypt a segment under a fresh random nonce.
pub fn encrypt(
    plaintext: &[u8],
    key: &SegmentKey,
    algorithm: Algorithm,
) -> SegcryptResult<SealedSegment> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut buffer = plaintext.to_vec();
    let tag = match algorithm {
        Algorithm::Aes256Gcm => seal::<Aes256Gcm>(key, &nonce, &mut buffer),
        Algorithm::ChaCha20Poly1305 => seal::<ChaCha20Poly1305>(key, &nonce, &mut buffer),
    }
    .map_err(|e| {
        buffer.zeroize();
        e
    })?;

    tracing::trace!(%algorithm, len = buffer.len(), "sealed segment");

    Ok(SealedSegment {
        algorithm,
        nonce,
        tag,
        ciphertext: buffer,
    })
}

/// Verify and decrypt a segment.
///
/// Any mismatch in key, algorithm, nonce, tag or ciphertext yields
/// [`SegcryptError::AuthenticationFailure`] and no plaintext bytes.
pub fn decrypt(
    ciphertext: &[u8],
    nonce: &[u8; NONCE_SIZE],
    tag: &[u8; TAG_SIZE],
    algorithm: Algorithm,
    key: &SegmentKey,
) -> SegcryptResult<Vec<u8>> {
    let mut buffer = ciphertext.to_vec();
    let result = match algorithm {
        Algorithm::Aes256Gcm => open::<Aes256Gcm>(key, nonce, tag, &mut buffer),
        Algorithm::ChaCha20Poly1305 => open::<ChaCha20Poly1305>(key, nonce, tag, &mut buffer),
    };

    match result {
        Ok(()) => Ok(buffer),
        Err(e) => {
            // in-place AES-GCM may have already applied the keystream
            buffer.zeroize();
            Err(e)
        }
    }
}

fn seal<C>(
    key: &SegmentKey,
    nonce: &[u8; NONCE_SIZE],
    buffer: &mut Vec<u8>,
) -> SegcryptResult<[u8; TAG_SIZE]>
where
    C: KeyInit + AeadInPlace + AeadCore<NonceSize = U12, TagSize = U16>,
{
    let cipher = C::new_from_slice(key.as_bytes())
        .map_err(|e| SegcryptError::Config(format!("AEAD key setup failed: {e}")))?;

    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), b"", buffer)
        .map_err(|e| SegcryptError::Config(format!("segment encryption failed: {e}")))?;

    let mut out = [0u8; TAG_SIZE];
    out.copy_from_slice(&tag);
    Ok(out)
}

fn open<C>(
    key: &SegmentKey,
    nonce: &[u8; NONCE_SIZE],
    tag: &[u8; TAG_SIZE],
    buffer: &mut Vec<u8>,
) -> SegcryptResult<()>
where
    C: KeyInit + AeadInPlace + AeadCore<NonceSize = U12, TagSize = U16>,
{
    let cipher = C::new_from_slice(key.as_bytes())
        .map_err(|e| SegcryptError::Config(format!("AEAD key setup failed: {e}")))?;

    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            b"",
            buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| SegcryptError::AuthenticationFailure)
}
