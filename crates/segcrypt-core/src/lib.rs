pub mod config;
pub mod error;
pub mod types;

pub use error::{SegcryptError, SegcryptResult};
pub use types::{Algorithm, KdfKind};
