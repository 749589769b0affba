//! segcrypt-crypto: segment-level encryption for split files
//!
//! Key hierarchy:
//! ```text
//! Password
//!   └── Master Key (256-bit, Argon2id or PBKDF2-HMAC-SHA256, per-file random salt)
//!         │  stored: salt, KDF params, SHA-256(master_key || "verification")
//!         └── Segment Key (HKDF-SHA256, info = "{file_id}:{segment_id}")
//!               └── Segment AEAD: AES-256-GCM | ChaCha20-Poly1305 (random 96-bit nonce)
//! ```
//!
//! Each sealed segment is described by a [`SegmentDescriptor`] that is enough,
//! together with the master key or the password, to decrypt it on its own.

pub mod cipher;
pub mod kdf;
pub mod keys;
pub mod metadata;

pub use cipher::{decrypt, encrypt, validate, SealedSegment};
pub use kdf::{
    derive_key, derive_master_key, verification_token, verify_master_key, DerivedMasterKey,
    KdfParams, KdfPolicy, MasterKey,
};
pub use keys::{derive_segment_key, segment_id, SegmentKey};
pub use metadata::{MinimalSegmentDescriptor, SegmentDescriptor};

/// Size of master and segment keys in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a per-file KDF salt (128-bit)
pub const SALT_SIZE: usize = 16;

/// Size of an AES-GCM / ChaCha20-Poly1305 nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM / Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a password verification token (SHA-256 output)
pub const TOKEN_SIZE: usize = 32;
