//! Key derivation: password → master key (Argon2id or PBKDF2-HMAC-SHA256)
//!
//! The master key is never persisted. What gets stored is the salt, the KDF
//! parameters, and a verification token `SHA-256(master_key || "verification")`
//! that lets a later password attempt be checked without keeping the key.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use segcrypt_core::config::CryptoConfig;
use segcrypt_core::{KdfKind, SegcryptError, SegcryptResult};

use crate::{KEY_SIZE, SALT_SIZE, TOKEN_SIZE};

const VERIFICATION_LABEL: &[u8] = b"verification";

/// A 256-bit master key derived from a password.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// KDF parameters as stored in the key registry.
///
/// Serialized as `{"type": "argon2id", "params": {...}}` so a record read
/// back later carries everything needed to re-derive the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "lowercase")]
pub enum KdfParams {
    Argon2id {
        /// Iterations (default: 3)
        time_cost: u32,
        /// Memory cost in KiB (default: 65536 = 64 MiB)
        memory_cost_kib: u32,
        /// Lanes (default: 4)
        parallelism: u32,
        hash_len: usize,
    },
    Pbkdf2 {
        /// PRF hash; only "sha256" is produced or accepted
        algorithm: String,
        iterations: u32,
        length: usize,
    },
}

impl KdfParams {
    pub fn kind(&self) -> KdfKind {
        match self {
            KdfParams::Argon2id { .. } => KdfKind::Argon2id,
            KdfParams::Pbkdf2 { .. } => KdfKind::Pbkdf2,
        }
    }

    pub fn argon2id(time_cost: u32, memory_cost_kib: u32, parallelism: u32) -> Self {
        KdfParams::Argon2id {
            time_cost,
            memory_cost_kib,
            parallelism,
            hash_len: KEY_SIZE,
        }
    }

    pub fn pbkdf2(iterations: u32) -> Self {
        KdfParams::Pbkdf2 {
            algorithm: "sha256".into(),
            iterations,
            length: KEY_SIZE,
        }
    }
}

/// Which KDF new files get, and with what cost.
#[derive(Debug, Clone)]
pub struct KdfPolicy {
    /// Use Argon2id when true, PBKDF2 otherwise
    pub memory_hard: bool,
    /// Permit Argon2id → PBKDF2 substitution when Argon2id is not compiled in
    pub allow_fallback: bool,
    pub argon2_time_cost: u32,
    pub argon2_mem_cost_kib: u32,
    pub argon2_parallelism: u32,
    pub pbkdf2_iterations: u32,
}

impl Default for KdfPolicy {
    fn default() -> Self {
        Self {
            memory_hard: true,
            allow_fallback: false,
            argon2_time_cost: 3,
            argon2_mem_cost_kib: 65536,
            argon2_parallelism: 4,
            pbkdf2_iterations: 600_000,
        }
    }
}

impl KdfPolicy {
    pub fn from_config(config: &CryptoConfig) -> SegcryptResult<Self> {
        Ok(Self {
            memory_hard: config.kdf_kind()? == KdfKind::Argon2id,
            allow_fallback: config.allow_kdf_fallback,
            argon2_time_cost: config.argon2_time_cost,
            argon2_mem_cost_kib: config.argon2_mem_cost_kib,
            argon2_parallelism: config.argon2_parallelism,
            pbkdf2_iterations: config.pbkdf2_iterations,
        })
    }

    /// Resolve the policy into concrete parameters for a new file.
    pub fn select(&self) -> SegcryptResult<KdfParams> {
        if !self.memory_hard {
            return Ok(KdfParams::pbkdf2(self.pbkdf2_iterations));
        }
        if argon2_available() {
            return Ok(KdfParams::argon2id(
                self.argon2_time_cost,
                self.argon2_mem_cost_kib,
                self.argon2_parallelism,
            ));
        }
        if self.allow_fallback {
            tracing::warn!(
                iterations = self.pbkdf2_iterations,
                "argon2id not compiled in; falling back to pbkdf2-hmac-sha256"
            );
            return Ok(KdfParams::pbkdf2(self.pbkdf2_iterations));
        }
        Err(SegcryptError::Config(
            "argon2id requested but not compiled in (enable the `argon2` feature \
             or set crypto.allow_kdf_fallback)"
                .into(),
        ))
    }
}

/// Whether the memory-hard KDF is part of this build.
pub fn argon2_available() -> bool {
    cfg!(feature = "argon2")
}

/// Output of [`derive_master_key`]: the key plus everything the registry keeps.
#[derive(Debug)]
pub struct DerivedMasterKey {
    pub master_key: MasterKey,
    pub salt: Vec<u8>,
    pub kdf: KdfParams,
    pub verification_token: [u8; TOKEN_SIZE],
}

/// Derive a master key for a password, generating a 16-byte salt if none is given.
pub fn derive_master_key(
    password: &SecretString,
    salt: Option<&[u8]>,
    policy: &KdfPolicy,
) -> SegcryptResult<DerivedMasterKey> {
    let salt = match salt {
        Some(s) => s.to_vec(),
        None => generate_salt().to_vec(),
    };
    let kdf = policy.select()?;
    let master_key = derive_key(password, &salt, &kdf)?;
    let verification_token = verification_token(&master_key);

    tracing::debug!(kdf = %kdf.kind(), salt_len = salt.len(), "derived master key");

    Ok(DerivedMasterKey {
        master_key,
        salt,
        kdf,
        verification_token,
    })
}

/// Run the KDF described by `params`. Deterministic in (password, salt, params).
pub fn derive_key(
    password: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> SegcryptResult<MasterKey> {
    if salt.is_empty() {
        return Err(SegcryptError::Config("KDF salt must not be empty".into()));
    }

    match params {
        KdfParams::Argon2id {
            time_cost,
            memory_cost_kib,
            parallelism,
            hash_len,
        } => {
            check_output_len(*hash_len)?;
            argon2id(password, salt, *time_cost, *memory_cost_kib, *parallelism)
        }
        KdfParams::Pbkdf2 {
            algorithm,
            iterations,
            length,
        } => {
            check_output_len(*length)?;
            if algorithm != "sha256" {
                return Err(SegcryptError::Config(format!(
                    "unsupported pbkdf2 hash: {algorithm}"
                )));
            }
            if *iterations == 0 {
                return Err(SegcryptError::Config(
                    "pbkdf2 iteration count must be positive".into(),
                ));
            }
            let mut key = [0u8; KEY_SIZE];
            pbkdf2::pbkdf2_hmac::<Sha256>(
                password.expose_secret().as_bytes(),
                salt,
                *iterations,
                &mut key,
            );
            Ok(MasterKey::from_bytes(key))
        }
    }
}

fn check_output_len(len: usize) -> SegcryptResult<()> {
    if len != KEY_SIZE {
        return Err(SegcryptError::Config(format!(
            "KDF output length must be {KEY_SIZE} bytes, got {len}"
        )));
    }
    Ok(())
}

#[cfg(feature = "argon2")]
fn argon2id(
    password: &SecretString,
    salt: &[u8],
    time_cost: u32,
    memory_cost_kib: u32,
    parallelism: u32,
) -> SegcryptResult<MasterKey> {
    use argon2::{Algorithm, Argon2, Params, Version};

    let params = Params::new(memory_cost_kib, time_cost, parallelism, Some(KEY_SIZE))
        .map_err(|e| SegcryptError::Config(format!("invalid Argon2id params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| SegcryptError::Config(format!("Argon2id KDF failed: {e}")))?;

    Ok(MasterKey::from_bytes(key))
}

#[cfg(not(feature = "argon2"))]
fn argon2id(
    _password: &SecretString,
    _salt: &[u8],
    _time_cost: u32,
    _memory_cost_kib: u32,
    _parallelism: u32,
) -> SegcryptResult<MasterKey> {
    Err(SegcryptError::Config(
        "record requires argon2id but this build has no argon2 support".into(),
    ))
}

/// Random 128-bit salt, fresh per file.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    use rand::RngCore;
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// `SHA-256(master_key || "verification")`
pub fn verification_token(master_key: &MasterKey) -> [u8; TOKEN_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(master_key.as_bytes());
    hasher.update(VERIFICATION_LABEL);
    hasher.finalize().into()
}

/// Check a candidate key against a stored verification token.
pub fn verify_master_key(candidate: &MasterKey, token: &[u8]) -> bool {
    constant_time_eq(&verification_token(candidate), token)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
