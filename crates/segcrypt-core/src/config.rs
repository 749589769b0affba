use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SegcryptError, SegcryptResult};
use crate::types::{Algorithm, KdfKind};

/// Top-level configuration (loaded from segcrypt.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SegcryptConfig {
    pub registry: RegistryConfig,
    pub crypto: CryptoConfig,
    pub log: LogConfig,
}

impl SegcryptConfig {
    /// Load from a TOML file, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> SegcryptResult<Self> {
        if !path.exists() {
            tracing::debug!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SegcryptError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Key registry location. `.json` selects the JSON backend; any other
    /// path is opened as RocksDB when built with the `rocksdb` feature.
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/segcrypt/keys.json"),
        }
    }
}

/// Segment encryption and password KDF settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// AEAD used when the caller does not name one (default: AES-256-GCM)
    pub default_algorithm: String,
    /// KDF for new files: "argon2id" or "pbkdf2"
    pub kdf: String,
    /// Allow Argon2id requests to fall back to PBKDF2 when Argon2id is not
    /// compiled in. Off by default; the fallback is always logged.
    pub allow_kdf_fallback: bool,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
    /// PBKDF2-HMAC-SHA256 iteration count (default: 600000)
    pub pbkdf2_iterations: u32,
}

impl CryptoConfig {
    pub fn algorithm(&self) -> SegcryptResult<Algorithm> {
        self.default_algorithm.parse()
    }

    pub fn kdf_kind(&self) -> SegcryptResult<KdfKind> {
        self.kdf.parse()
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            default_algorithm: Algorithm::Aes256Gcm.as_str().into(),
            kdf: KdfKind::Argon2id.as_str().into(),
            allow_kdf_fallback: false,
            argon2_time_cost: 3,
            argon2_mem_cost_kib: 65536,
            argon2_parallelism: 4,
            pbkdf2_iterations: 600_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
