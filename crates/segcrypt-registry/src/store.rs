//! Registry backends: in-memory, JSON file, and (optionally) RocksDB.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use segcrypt_core::{SegcryptError, SegcryptResult};

use crate::records::{FileKeyRecord, SegmentKeyRecord};
use crate::KeyRegistry;

/// Both logical tables, keyed by primary key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    master_keys: BTreeMap<String, FileKeyRecord>,
    #[serde(default)]
    segment_keys_info: BTreeMap<String, SegmentKeyRecord>,
}

impl Tables {
    fn insert_file(&mut self, record: FileKeyRecord) -> SegcryptResult<()> {
        if self.master_keys.contains_key(&record.file_id) {
            return Err(SegcryptError::DuplicateFile(record.file_id));
        }
        self.master_keys.insert(record.file_id.clone(), record);
        Ok(())
    }

    fn insert_segment(&mut self, record: SegmentKeyRecord) -> SegcryptResult<()> {
        if !self.master_keys.contains_key(&record.file_id) {
            return Err(SegcryptError::UnknownFile(record.file_id));
        }
        if self.segment_keys_info.contains_key(&record.segment_id) {
            return Err(SegcryptError::DuplicateSegment(record.segment_id));
        }
        self.segment_keys_info
            .insert(record.segment_id.clone(), record);
        Ok(())
    }

    fn segments_for_file(&self, file_id: &str) -> Vec<SegmentKeyRecord> {
        let mut segments: Vec<SegmentKeyRecord> = self
            .segment_keys_info
            .values()
            .filter(|s| s.file_id == file_id)
            .cloned()
            .collect();
        segments.sort_by_key(|s| s.segment_index);
        segments
    }

    /// Remove a file and its segments, returning what was removed.
    fn remove_file(
        &mut self,
        file_id: &str,
    ) -> SegcryptResult<(FileKeyRecord, Vec<SegmentKeyRecord>)> {
        let file = self
            .master_keys
            .remove(file_id)
            .ok_or_else(|| SegcryptError::UnknownFile(file_id.to_string()))?;
        let segment_ids: Vec<String> = self
            .segment_keys_info
            .values()
            .filter(|s| s.file_id == file_id)
            .map(|s| s.segment_id.clone())
            .collect();
        let segments = segment_ids
            .iter()
            .filter_map(|id| self.segment_keys_info.remove(id))
            .collect();
        Ok((file, segments))
    }
}

fn read_lock(lock: &RwLock<Tables>) -> SegcryptResult<RwLockReadGuard<'_, Tables>> {
    lock.read()
        .map_err(|_| SegcryptError::Registry("registry lock poisoned".into()))
}

fn write_lock(lock: &RwLock<Tables>) -> SegcryptResult<RwLockWriteGuard<'_, Tables>> {
    lock.write()
        .map_err(|_| SegcryptError::Registry("registry lock poisoned".into()))
}

// ── Memory backend ───────────────────────────────────────────────────────────

/// Process-local registry. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    tables: RwLock<Tables>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyRegistry for MemoryRegistry {
    fn insert_file(&self, record: FileKeyRecord) -> SegcryptResult<()> {
        write_lock(&self.tables)?.insert_file(record)
    }

    fn get_file(&self, file_id: &str) -> SegcryptResult<Option<FileKeyRecord>> {
        Ok(read_lock(&self.tables)?.master_keys.get(file_id).cloned())
    }

    fn insert_segment(&self, record: SegmentKeyRecord) -> SegcryptResult<()> {
        write_lock(&self.tables)?.insert_segment(record)
    }

    fn get_segment(&self, segment_id: &str) -> SegcryptResult<Option<SegmentKeyRecord>> {
        Ok(read_lock(&self.tables)?
            .segment_keys_info
            .get(segment_id)
            .cloned())
    }

    fn segments_for_file(&self, file_id: &str) -> SegcryptResult<Vec<SegmentKeyRecord>> {
        Ok(read_lock(&self.tables)?.segments_for_file(file_id))
    }

    fn remove_file(&self, file_id: &str) -> SegcryptResult<usize> {
        let (_, segments) = write_lock(&self.tables)?.remove_file(file_id)?;
        Ok(segments.len())
    }

    fn file_count(&self) -> SegcryptResult<usize> {
        Ok(read_lock(&self.tables)?.master_keys.len())
    }
}

// ── JSON backend ─────────────────────────────────────────────────────────────

/// Registry persisted to a single JSON document shared by every handle and
/// process that opens the same path.
///
/// Nothing is cached between calls. Reads parse the document as it is on
/// disk. Each mutation takes an exclusive advisory lock on `<path>.lock`,
/// re-reads the document, applies its uniqueness checks against that fresh
/// copy, writes a uniquely named temp file in the same directory and renames
/// it over the document. Readers never take the lock: the rename is atomic,
/// so they see either the previous document or the next one.
#[derive(Debug)]
pub struct JsonRegistry {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonRegistry {
    /// Open a registry at the given path.
    /// If the file doesn't exist, starts empty; the file is created on first insert.
    pub fn open(path: &Path) -> SegcryptResult<Self> {
        let registry = Self {
            path: path.to_path_buf(),
            lock_path: lock_path_for(path),
        };
        let tables = registry.load()?;

        tracing::info!(
            path = %path.display(),
            files = tables.master_keys.len(),
            segments = tables.segment_keys_info.len(),
            "opened json key registry"
        );
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current on-disk contents; empty if the file does not exist yet.
    fn load(&self) -> SegcryptResult<Tables> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Tables::default()),
            Err(e) => {
                return Err(SegcryptError::Registry(format!(
                    "reading registry {}: {e}",
                    self.path.display()
                )))
            }
        };
        serde_json::from_str(&content).map_err(|e| {
            SegcryptError::Registry(format!("parsing registry {}: {e}", self.path.display()))
        })
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Run `change` against a fresh copy of the document while holding the
    /// exclusive lock, and persist the result if `change` succeeds.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Tables) -> SegcryptResult<T>,
    ) -> SegcryptResult<T> {
        let dir = self.parent_dir();
        std::fs::create_dir_all(dir).map_err(|e| {
            SegcryptError::Registry(format!("creating registry dir {}: {e}", dir.display()))
        })?;

        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| {
                SegcryptError::Registry(format!(
                    "opening registry lock {}: {e}",
                    self.lock_path.display()
                ))
            })?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write().map_err(|e| {
            SegcryptError::Registry(format!(
                "locking registry {}: {e}",
                self.lock_path.display()
            ))
        })?;

        let mut tables = self.load()?;
        let out = change(&mut tables)?;
        self.persist(&tables)?;
        Ok(out)
    }

    /// Atomic write: unique temp file in the target directory, then rename.
    fn persist(&self, tables: &Tables) -> SegcryptResult<()> {
        let json = serde_json::to_vec_pretty(tables)
            .map_err(|e| SegcryptError::Registry(format!("serializing registry: {e}")))?;

        let mut tmp = tempfile::NamedTempFile::new_in(self.parent_dir()).map_err(|e| {
            SegcryptError::Registry(format!("creating registry temp file: {e}"))
        })?;
        tmp.write_all(&json)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| SegcryptError::Registry(format!("writing registry temp file: {e}")))?;
        tmp.persist(&self.path).map_err(|e| {
            SegcryptError::Registry(format!(
                "renaming registry {}: {}",
                self.path.display(),
                e.error
            ))
        })?;
        Ok(())
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

impl KeyRegistry for JsonRegistry {
    fn insert_file(&self, record: FileKeyRecord) -> SegcryptResult<()> {
        self.mutate(|tables| tables.insert_file(record))
    }

    fn get_file(&self, file_id: &str) -> SegcryptResult<Option<FileKeyRecord>> {
        Ok(self.load()?.master_keys.remove(file_id))
    }

    fn insert_segment(&self, record: SegmentKeyRecord) -> SegcryptResult<()> {
        self.mutate(|tables| tables.insert_segment(record))
    }

    fn get_segment(&self, segment_id: &str) -> SegcryptResult<Option<SegmentKeyRecord>> {
        Ok(self.load()?.segment_keys_info.remove(segment_id))
    }

    fn segments_for_file(&self, file_id: &str) -> SegcryptResult<Vec<SegmentKeyRecord>> {
        Ok(self.load()?.segments_for_file(file_id))
    }

    fn remove_file(&self, file_id: &str) -> SegcryptResult<usize> {
        self.mutate(|tables| Ok(tables.remove_file(file_id)?.1.len()))
    }

    fn file_count(&self) -> SegcryptResult<usize> {
        Ok(self.load()?.master_keys.len())
    }
}

// ── RocksDB backend ──────────────────────────────────────────────────────────

#[cfg(feature = "rocksdb")]
mod rocksdb_backend {
    use super::*;
    use std::sync::Mutex;

    const FILE_PREFIX: &str = "mk/";
    const SEGMENT_PREFIX: &str = "sk/";

    /// RocksDB-backed registry. One key per row: `mk/{file_id}`, `sk/{segment_id}`.
    ///
    /// RocksDB has no insert-if-absent primitive, so the check-then-put for
    /// inserts and deletes is serialised through `write_guard`. Reads do not
    /// take the guard; each row is a single `put`, so they never see half a row.
    pub struct RocksDbRegistry {
        db: rocksdb::DB,
        write_guard: Mutex<()>,
    }

    impl RocksDbRegistry {
        /// Open or create a RocksDB registry at the given path.
        pub fn open(path: &Path) -> SegcryptResult<Self> {
            let mut opts = rocksdb::Options::default();
            opts.create_if_missing(true);

            let db = rocksdb::DB::open(&opts, path).map_err(|e| {
                SegcryptError::Registry(format!("opening RocksDB {}: {e}", path.display()))
            })?;

            tracing::info!(path = %path.display(), "opened rocksdb key registry");

            Ok(Self {
                db,
                write_guard: Mutex::new(()),
            })
        }

        fn lock(&self) -> SegcryptResult<std::sync::MutexGuard<'_, ()>> {
            self.write_guard
                .lock()
                .map_err(|_| SegcryptError::Registry("registry lock poisoned".into()))
        }

        fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> SegcryptResult<Option<T>> {
            match self.db.get(key.as_bytes()).map_err(rocks_err)? {
                Some(bytes) => serde_json::from_slice(&bytes)
                    .map(Some)
                    .map_err(|e| SegcryptError::Registry(format!("decoding {key}: {e}"))),
                None => Ok(None),
            }
        }

        fn put_json<T: Serialize>(&self, key: &str, value: &T) -> SegcryptResult<()> {
            let bytes = serde_json::to_vec(value)
                .map_err(|e| SegcryptError::Registry(format!("encoding {key}: {e}")))?;
            self.db.put(key.as_bytes(), bytes).map_err(rocks_err)
        }

        fn exists(&self, key: &str) -> SegcryptResult<bool> {
            Ok(self.db.get(key.as_bytes()).map_err(rocks_err)?.is_some())
        }

        /// Every row under a key prefix, decoded.
        fn scan<T: serde::de::DeserializeOwned>(&self, prefix: &str) -> SegcryptResult<Vec<T>> {
            let mode = rocksdb::IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward);
            let mut rows = Vec::new();
            for item in self.db.iterator(mode) {
                let (key, value) = item.map_err(rocks_err)?;
                if !key.starts_with(prefix.as_bytes()) {
                    break;
                }
                let row = serde_json::from_slice(&value).map_err(|e| {
                    SegcryptError::Registry(format!(
                        "decoding {}: {e}",
                        String::from_utf8_lossy(&key)
                    ))
                })?;
                rows.push(row);
            }
            Ok(rows)
        }
    }

    fn rocks_err(e: rocksdb::Error) -> SegcryptError {
        SegcryptError::Registry(format!("RocksDB: {e}"))
    }

    fn file_key(file_id: &str) -> String {
        format!("{FILE_PREFIX}{file_id}")
    }

    fn segment_key(segment_id: &str) -> String {
        format!("{SEGMENT_PREFIX}{segment_id}")
    }

    impl KeyRegistry for RocksDbRegistry {
        fn insert_file(&self, record: FileKeyRecord) -> SegcryptResult<()> {
            let _guard = self.lock()?;
            let key = file_key(&record.file_id);
            if self.exists(&key)? {
                return Err(SegcryptError::DuplicateFile(record.file_id));
            }
            self.put_json(&key, &record)
        }

        fn get_file(&self, file_id: &str) -> SegcryptResult<Option<FileKeyRecord>> {
            self.get_json(&file_key(file_id))
        }

        fn insert_segment(&self, record: SegmentKeyRecord) -> SegcryptResult<()> {
            let _guard = self.lock()?;
            if !self.exists(&file_key(&record.file_id))? {
                return Err(SegcryptError::UnknownFile(record.file_id));
            }
            let key = segment_key(&record.segment_id);
            if self.exists(&key)? {
                return Err(SegcryptError::DuplicateSegment(record.segment_id));
            }
            self.put_json(&key, &record)
        }

        fn get_segment(&self, segment_id: &str) -> SegcryptResult<Option<SegmentKeyRecord>> {
            self.get_json(&segment_key(segment_id))
        }

        fn segments_for_file(&self, file_id: &str) -> SegcryptResult<Vec<SegmentKeyRecord>> {
            let mut segments: Vec<SegmentKeyRecord> = self
                .scan::<SegmentKeyRecord>(SEGMENT_PREFIX)?
                .into_iter()
                .filter(|s| s.file_id == file_id)
                .collect();
            segments.sort_by_key(|s| s.segment_index);
            Ok(segments)
        }

        fn remove_file(&self, file_id: &str) -> SegcryptResult<usize> {
            let _guard = self.lock()?;
            if !self.exists(&file_key(file_id))? {
                return Err(SegcryptError::UnknownFile(file_id.to_string()));
            }
            let segments = self.segments_for_file(file_id)?;

            let mut batch = rocksdb::WriteBatch::default();
            batch.delete(file_key(file_id).as_bytes());
            for s in &segments {
                batch.delete(segment_key(&s.segment_id).as_bytes());
            }
            self.db.write(batch).map_err(rocks_err)?;
            Ok(segments.len())
        }

        fn file_count(&self) -> SegcryptResult<usize> {
            Ok(self.scan::<FileKeyRecord>(FILE_PREFIX)?.len())
        }

        fn flush(&self) -> SegcryptResult<()> {
            self.db.flush().map_err(rocks_err)
        }
    }
}

#[cfg(feature = "rocksdb")]
pub use rocksdb_backend::RocksDbRegistry;

// ── Backend dispatch ─────────────────────────────────────────────────────────

/// Dispatch enum over the on-disk backends.
///
/// Used by the CLI to select a backend at runtime from the configured path.
pub enum RegistryBackend {
    Json(JsonRegistry),
    #[cfg(feature = "rocksdb")]
    Rocks(RocksDbRegistry),
}

impl RegistryBackend {
    /// Open the appropriate backend based on path extension.
    ///
    /// Paths ending in `.json` use the JSON backend; otherwise RocksDB (if
    /// compiled with `rocksdb`).
    pub fn open(path: &Path) -> SegcryptResult<Self> {
        let is_json = path
            .extension()
            .map(|ext| ext == "json")
            .unwrap_or(false);

        #[cfg(feature = "rocksdb")]
        if !is_json {
            return Ok(RegistryBackend::Rocks(RocksDbRegistry::open(path)?));
        }

        #[cfg(not(feature = "rocksdb"))]
        if !is_json {
            tracing::warn!(
                path = %path.display(),
                "RocksDB not compiled in (missing 'rocksdb' feature), using JSON backend"
            );
        }

        Ok(RegistryBackend::Json(JsonRegistry::open(path)?))
    }

    fn inner(&self) -> &dyn KeyRegistry {
        match self {
            RegistryBackend::Json(r) => r,
            #[cfg(feature = "rocksdb")]
            RegistryBackend::Rocks(r) => r,
        }
    }
}

impl KeyRegistry for RegistryBackend {
    fn insert_file(&self, record: FileKeyRecord) -> SegcryptResult<()> {
        self.inner().insert_file(record)
    }
    fn get_file(&self, file_id: &str) -> SegcryptResult<Option<FileKeyRecord>> {
        self.inner().get_file(file_id)
    }
    fn insert_segment(&self, record: SegmentKeyRecord) -> SegcryptResult<()> {
        self.inner().insert_segment(record)
    }
    fn get_segment(&self, segment_id: &str) -> SegcryptResult<Option<SegmentKeyRecord>> {
        self.inner().get_segment(segment_id)
    }
    fn segments_for_file(&self, file_id: &str) -> SegcryptResult<Vec<SegmentKeyRecord>> {
        self.inner().segments_for_file(file_id)
    }
    fn remove_file(&self, file_id: &str) -> SegcryptResult<usize> {
        self.inner().remove_file(file_id)
    }
    fn file_count(&self) -> SegcryptResult<usize> {
        self.inner().file_count()
    }
    fn flush(&self) -> SegcryptResult<()> {
        self.inner().flush()
    }
}
