//! Key registry: durable storage for everything needed to re-derive and
//! decrypt, but never a key itself.
//!
//! Two logical tables:
//!   - `master_keys`: file_id → salt, KDF params, verification hash, creation date
//!   - `segment_keys_info`: segment_id → file_id, index, algorithm, nonce, tag
//!
//! Backends:
//!   - **Memory**: process-local, for tests and throwaway sessions.
//!   - **JSON** (default on disk): whole registry in one file. Every write
//!     re-reads it under an exclusive file lock and replaces it atomically,
//!     so handles in separate processes can share a path.
//!   - **RocksDB** (behind the `rocksdb` feature): one key per row.
//!
//! All implement [`KeyRegistry`]. Inserts are insert-if-absent: a second
//! write for the same primary key is rejected, never merged.

pub mod records;
pub mod store;

pub use records::{FileKeyRecord, SegmentKeyRecord};
#[cfg(feature = "rocksdb")]
pub use store::RocksDbRegistry;
pub use store::{JsonRegistry, MemoryRegistry, RegistryBackend};

use segcrypt_core::SegcryptResult;

/// Storage interface consumed by the segment codec.
///
/// Implementations must be safe to share across threads and must make each
/// insert atomic: a concurrent reader sees either no row or the whole row.
pub trait KeyRegistry: Send + Sync {
    /// Insert a file record. Fails with `DuplicateFile` if the id exists.
    fn insert_file(&self, record: FileKeyRecord) -> SegcryptResult<()>;
    fn get_file(&self, file_id: &str) -> SegcryptResult<Option<FileKeyRecord>>;
    /// Insert a segment record. Fails with `UnknownFile` when the parent file
    /// is missing and `DuplicateSegment` when the segment id exists.
    fn insert_segment(&self, record: SegmentKeyRecord) -> SegcryptResult<()>;
    fn get_segment(&self, segment_id: &str) -> SegcryptResult<Option<SegmentKeyRecord>>;
    /// All segments of a file, ordered by `segment_index`.
    fn segments_for_file(&self, file_id: &str) -> SegcryptResult<Vec<SegmentKeyRecord>>;
    /// Delete a file and its segments. Returns the number of segments removed.
    fn remove_file(&self, file_id: &str) -> SegcryptResult<usize>;
    /// Number of registered files.
    fn file_count(&self) -> SegcryptResult<usize>;
    /// Push pending changes to durable storage.
    fn flush(&self) -> SegcryptResult<()> {
        Ok(())
    }
}
