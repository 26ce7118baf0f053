//! dbwarden cipher toolkit
//!
//! Offline verification of the password hashes database servers store for
//! their accounts. Nothing here talks to a server: a candidate password is
//! hashed the way the backend would and compared with the stored value.
//!
//! # Modules
//! - `hashes` - MD5, SHA-1, SHA-256 helpers
//! - `scram` - SCRAM-SHA-1 / SCRAM-SHA-256 stored secrets
//! - `sha2crypt` - SHA-256 crypt as used by MySQL `caching_sha2_password`
//! - `credential` - Hash format detection and verification dispatch
//! - `wordlist` - Built-in default password corpus

pub mod credential;
pub mod hashes;
pub mod scram;
pub mod sha2crypt;
pub mod wordlist;

pub use credential::{Credential, CredentialFormat};
pub use hashes::Hashes;
pub use scram::{ScramMechanism, ScramSecret};
pub use sha2crypt::{sha256_crypt, MysqlSha2Hash};
pub use wordlist::Wordlist;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CipherError {
    #[error("Malformed {scheme} hash: {reason}")]
    Malformed { scheme: &'static str, reason: String },

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl CipherError {
    pub(crate) fn malformed(scheme: &'static str, reason: impl Into<String>) -> Self {
        CipherError::Malformed {
            scheme,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CipherError>;
