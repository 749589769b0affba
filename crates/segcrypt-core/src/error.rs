use thiserror::Error;

pub type SegcryptResult<T> = Result<T, SegcryptError>;

#[derive(Debug, Error)]
pub enum SegcryptError {
    #[error("unsupported algorithm: {0} (expected AES-256-GCM or ChaCha20-Poly1305)")]
    UnsupportedAlgorithm(String),

    #[error("invalid password")]
    InvalidPassword,

    #[error("authentication failed: wrong key or tampered segment")]
    AuthenticationFailure,

    #[error("no key record for file: {0}")]
    UnknownFile(String),

    #[error("no key record for segment: {0}")]
    UnknownSegment(String),

    #[error("segment already registered: {0}")]
    DuplicateSegment(String),

    #[error("file already registered: {0}")]
    DuplicateFile(String),

    #[error("either a password or a master key must be supplied")]
    MissingCredential,

    #[error("malformed segment descriptor: {0}")]
    Parse(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
