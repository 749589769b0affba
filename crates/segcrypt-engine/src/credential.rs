use secrecy::SecretString;

use segcrypt_core::{SegcryptError, SegcryptResult};
use segcrypt_crypto::MasterKey;

/// What the caller proves possession of when decrypting.
#[derive(Debug)]
pub enum Credential {
    /// Re-derive the master key from the stored KDF parameters and verify it.
    Password(SecretString),
    /// Use the master key directly; no registry lookup.
    MasterKey(MasterKey),
}

impl Credential {
    pub fn password(password: impl Into<String>) -> Self {
        Credential::Password(SecretString::from(password.into()))
    }

    /// Build a credential from optional parts.
    ///
    /// A master key wins when both are given. Neither is `MissingCredential`.
    pub fn from_parts(
        password: Option<SecretString>,
        master_key: Option<MasterKey>,
    ) -> SegcryptResult<Self> {
        match (master_key, password) {
            (Some(key), _) => Ok(Credential::MasterKey(key)),
            (None, Some(password)) => Ok(Credential::Password(password)),
            (None, None) => Err(SegcryptError::MissingCredential),
        }
    }
}

impl From<MasterKey> for Credential {
    fn from(key: MasterKey) -> Self {
        Credential::MasterKey(key)
    }
}

impl From<SecretString> for Credential {
    fn from(password: SecretString) -> Self {
        Credential::Password(password)
    }
}
