//! segcrypt-engine: the segment codec
//!
//! [`SegmentCodec`] ties the key hierarchy, the AEAD engine and the key
//! registry together:
//!
//! ```text
//! setup(password)          → file_id, master key   (one master_keys row)
//! encrypt_segment(...)     → ciphertext, descriptor (one segment_keys_info row)
//! decrypt_segment(...)     → plaintext              (read-only)
//! ```
//!
//! The codec owns its registry handle for its whole lifetime and holds no
//! other mutable state, so one instance can be shared across threads.

pub mod codec;
pub mod credential;

pub use codec::{DescriptorInput, EncryptedSegment, SegmentCodec};
pub use credential::Credential;
