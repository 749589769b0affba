//! SegmentCodec: per-file setup and per-segment encrypt/decrypt
//!
//! Every call is independent. The only shared state is the registry, whose
//! insert-if-absent semantics make concurrent encryption of distinct segments
//! safe and reject a second write for the same segment id.

use std::borrow::Cow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use secrecy::SecretString;

use segcrypt_core::config::{CryptoConfig, SegcryptConfig};
use segcrypt_core::{Algorithm, SegcryptError, SegcryptResult};
use segcrypt_crypto::{
    derive_key, derive_master_key, derive_segment_key, segment_id, verify_master_key, KdfPolicy,
    MasterKey, MinimalSegmentDescriptor, SegmentDescriptor,
};
use segcrypt_registry::{FileKeyRecord, KeyRegistry, RegistryBackend, SegmentKeyRecord};

use crate::credential::Credential;

/// Result of encrypting one segment.
#[derive(Debug, Clone)]
pub struct EncryptedSegment {
    pub ciphertext: Vec<u8>,
    pub descriptor: SegmentDescriptor,
    /// `descriptor` in its JSON wire form, ready to store next to the ciphertext
    pub serialized: String,
}

/// Any of the forms a caller may hold a descriptor in.
#[derive(Debug, Clone, Copy)]
pub enum DescriptorInput<'a> {
    Full(&'a SegmentDescriptor),
    Minimal(&'a MinimalSegmentDescriptor),
    /// JSON text; parsed leniently, only the decryption fields are required
    Serialized(&'a str),
}

impl<'a> DescriptorInput<'a> {
    fn resolve(self) -> SegcryptResult<Cow<'a, MinimalSegmentDescriptor>> {
        match self {
            DescriptorInput::Full(d) => Ok(Cow::Owned(d.minimal())),
            DescriptorInput::Minimal(d) => Ok(Cow::Borrowed(d)),
            DescriptorInput::Serialized(text) => {
                Ok(Cow::Owned(MinimalSegmentDescriptor::deserialize(text)?))
            }
        }
    }
}

impl<'a> From<&'a SegmentDescriptor> for DescriptorInput<'a> {
    fn from(d: &'a SegmentDescriptor) -> Self {
        DescriptorInput::Full(d)
    }
}

impl<'a> From<&'a MinimalSegmentDescriptor> for DescriptorInput<'a> {
    fn from(d: &'a MinimalSegmentDescriptor) -> Self {
        DescriptorInput::Minimal(d)
    }
}

impl<'a> From<&'a str> for DescriptorInput<'a> {
    fn from(text: &'a str) -> Self {
        DescriptorInput::Serialized(text)
    }
}

impl<'a> From<&'a String> for DescriptorInput<'a> {
    fn from(text: &'a String) -> Self {
        DescriptorInput::Serialized(text.as_str())
    }
}

/// Orchestrates key derivation, segment AEAD, and the key registry.
pub struct SegmentCodec<R: KeyRegistry> {
    registry: R,
    default_algorithm: Algorithm,
    kdf_policy: KdfPolicy,
    // set by any registry write; drop only flushes when this is set
    dirty: AtomicBool,
    closed: bool,
}

impl<R: KeyRegistry> SegmentCodec<R> {
    pub fn new(registry: R, default_algorithm: Algorithm, kdf_policy: KdfPolicy) -> Self {
        Self {
            registry,
            default_algorithm,
            kdf_policy,
            dirty: AtomicBool::new(false),
            closed: false,
        }
    }

    /// Build from the `[crypto]` config section. An unknown
    /// `default_algorithm` or `kdf` is rejected here, not on first use.
    pub fn from_config(registry: R, config: &CryptoConfig) -> SegcryptResult<Self> {
        let default_algorithm = config.algorithm()?;
        let kdf_policy = KdfPolicy::from_config(config)?;
        Ok(Self::new(registry, default_algorithm, kdf_policy))
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn default_algorithm(&self) -> Algorithm {
        self.default_algorithm
    }

    /// Register a new file: fresh id, fresh salt, master key derived from
    /// `password`. Only the salt, KDF parameters and verification hash are
    /// stored; the returned master key is the caller's to keep or drop.
    pub fn setup(&self, password: &SecretString) -> SegcryptResult<(String, MasterKey)> {
        let file_id = uuid::Uuid::new_v4().to_string();
        let derived = derive_master_key(password, None, &self.kdf_policy)?;

        self.registry.insert_file(FileKeyRecord {
            file_id: file_id.clone(),
            salt: derived.salt,
            kdf: derived.kdf,
            verification_hash: derived.verification_token,
            creation_date: chrono::Utc::now(),
        })?;
        self.mark_dirty();

        tracing::info!(file_id = %file_id, "registered new file");
        Ok((file_id, derived.master_key))
    }

    /// Re-derive a file's master key from its password.
    ///
    /// Uses the salt and KDF parameters stored at setup, so later changes to
    /// the KDF configuration never lock out existing files.
    pub fn unlock(&self, file_id: &str, password: &SecretString) -> SegcryptResult<MasterKey> {
        let record = self
            .registry
            .get_file(file_id)?
            .ok_or_else(|| SegcryptError::UnknownFile(file_id.to_string()))?;

        let candidate = derive_key(password, &record.salt, &record.kdf)?;
        if !verify_master_key(&candidate, &record.verification_hash) {
            tracing::debug!(file_id, "password verification failed");
            return Err(SegcryptError::InvalidPassword);
        }
        Ok(candidate)
    }

    /// Encrypt one segment with the default algorithm.
    pub fn encrypt_segment(
        &self,
        file_id: &str,
        master_key: &MasterKey,
        data: &[u8],
        segment_index: u64,
    ) -> SegcryptResult<EncryptedSegment> {
        self.seal_segment(file_id, master_key, data, segment_index, self.default_algorithm)
    }

    /// Encrypt one segment with a caller-named algorithm.
    ///
    /// The name is validated before any key is derived or row written.
    pub fn encrypt_segment_as(
        &self,
        file_id: &str,
        master_key: &MasterKey,
        data: &[u8],
        segment_index: u64,
        algorithm: &str,
    ) -> SegcryptResult<EncryptedSegment> {
        let algorithm = segcrypt_crypto::validate(algorithm)?;
        self.seal_segment(file_id, master_key, data, segment_index, algorithm)
    }

    /// Encrypt consecutive segments in parallel.
    ///
    /// `segments[i]` gets index `first_index + i`. Results come back in input
    /// order; the first failure is returned, but segments that already
    /// succeeded stay registered. A range that would run past `u64::MAX` is
    /// rejected with `Config` before anything is encrypted.
    pub fn encrypt_segments<B>(
        &self,
        file_id: &str,
        master_key: &MasterKey,
        segments: &[B],
        first_index: u64,
    ) -> SegcryptResult<Vec<EncryptedSegment>>
    where
        B: AsRef<[u8]> + Sync,
    {
        if let Some(last_offset) = segments.len().checked_sub(1) {
            let fits = u64::try_from(last_offset)
                .ok()
                .and_then(|offset| first_index.checked_add(offset))
                .is_some();
            if !fits {
                return Err(SegcryptError::Config(format!(
                    "segment indices starting at {first_index} overflow for {} segments",
                    segments.len()
                )));
            }
        }

        segments
            .par_iter()
            .enumerate()
            .map(|(offset, data)| {
                self.encrypt_segment(file_id, master_key, data.as_ref(), first_index + offset as u64)
            })
            .collect()
    }

    fn seal_segment(
        &self,
        file_id: &str,
        master_key: &MasterKey,
        data: &[u8],
        segment_index: u64,
        algorithm: Algorithm,
    ) -> SegcryptResult<EncryptedSegment> {
        let segment_id = segment_id(file_id, segment_index);
        let key = derive_segment_key(master_key, &segment_id, file_id)?;
        let sealed = segcrypt_crypto::encrypt(data, &key, algorithm)?;

        self.registry.insert_segment(SegmentKeyRecord {
            segment_id: segment_id.clone(),
            file_id: file_id.to_string(),
            segment_index,
            encryption_algorithm: algorithm,
            nonce: sealed.nonce,
            tag: sealed.tag,
        })?;
        self.mark_dirty();

        let descriptor = SegmentDescriptor::generate(
            segment_id,
            file_id.to_string(),
            segment_index,
            algorithm,
            sealed.nonce,
            sealed.tag,
            sealed.ciphertext.len() as u64,
        );
        let serialized = descriptor.serialize()?;

        tracing::debug!(
            segment_id = %descriptor.segment_id,
            %algorithm,
            bytes = data.len(),
            "encrypted segment"
        );

        Ok(EncryptedSegment {
            ciphertext: sealed.ciphertext,
            descriptor,
            serialized,
        })
    }

    /// Decrypt a segment given its descriptor (in any form) and a credential.
    ///
    /// With a master key the registry is not consulted. With a password the
    /// file's record is looked up and the password verified first.
    pub fn decrypt_segment<'d>(
        &self,
        ciphertext: &[u8],
        descriptor: impl Into<DescriptorInput<'d>>,
        credential: &Credential,
    ) -> SegcryptResult<Vec<u8>> {
        let descriptor = descriptor.into().resolve()?;
        let master_key = self.resolve_master_key(&descriptor.file_id, credential)?;

        let key = derive_segment_key(&master_key, &descriptor.segment_id, &descriptor.file_id)?;
        let plaintext = segcrypt_crypto::decrypt(
            ciphertext,
            &descriptor.nonce,
            &descriptor.tag,
            descriptor.algorithm,
            &key,
        )?;

        tracing::debug!(
            segment_id = %descriptor.segment_id,
            algorithm = %descriptor.algorithm,
            bytes = plaintext.len(),
            "decrypted segment"
        );
        Ok(plaintext)
    }

    /// Decrypt a segment using the parameters stored in the registry.
    pub fn decrypt_by_segment_id(
        &self,
        ciphertext: &[u8],
        segment_id: &str,
        credential: &Credential,
    ) -> SegcryptResult<Vec<u8>> {
        let record = self
            .registry
            .get_segment(segment_id)?
            .ok_or_else(|| SegcryptError::UnknownSegment(segment_id.to_string()))?;
        let descriptor = record.to_minimal();
        self.decrypt_segment(ciphertext, &descriptor, credential)
    }

    fn resolve_master_key<'c>(
        &self,
        file_id: &str,
        credential: &'c Credential,
    ) -> SegcryptResult<Cow<'c, MasterKey>> {
        match credential {
            Credential::MasterKey(key) => Ok(Cow::Borrowed(key)),
            Credential::Password(password) => Ok(Cow::Owned(self.unlock(file_id, password)?)),
        }
    }

    /// The file's stored derivation record, if registered.
    pub fn file_record(&self, file_id: &str) -> SegcryptResult<Option<FileKeyRecord>> {
        self.registry.get_file(file_id)
    }

    /// All registered segments of a file, ordered by index.
    pub fn segments(&self, file_id: &str) -> SegcryptResult<Vec<SegmentKeyRecord>> {
        self.registry.segments_for_file(file_id)
    }

    /// Drop a file's records. Its ciphertexts become undecryptable by
    /// password. Returns the number of segment records removed.
    pub fn forget_file(&self, file_id: &str) -> SegcryptResult<usize> {
        let removed = self.registry.remove_file(file_id)?;
        self.mark_dirty();
        tracing::info!(file_id, segments = removed, "forgot file");
        Ok(removed)
    }

    /// Flush the registry and release it.
    pub fn close(mut self) -> SegcryptResult<()> {
        self.closed = true;
        self.registry.flush()
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

impl SegmentCodec<RegistryBackend> {
    /// Open the configured registry and build a codec over it.
    pub fn open(config: &SegcryptConfig) -> SegcryptResult<Self> {
        Self::open_at(&config.registry.path, &config.crypto)
    }

    /// Like [`SegmentCodec::open`] with an explicit registry path.
    pub fn open_at(path: &Path, crypto: &CryptoConfig) -> SegcryptResult<Self> {
        // validate config before touching disk
        let default_algorithm = crypto.algorithm()?;
        let kdf_policy = KdfPolicy::from_config(crypto)?;
        let registry = RegistryBackend::open(path)?;
        Ok(Self::new(registry, default_algorithm, kdf_policy))
    }
}

impl<R: KeyRegistry> Drop for SegmentCodec<R> {
    fn drop(&mut self) {
        if self.closed || !self.dirty.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.registry.flush() {
            tracing::warn!("key registry flush on drop failed: {e}");
        }
    }
}
