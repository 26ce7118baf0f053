//! dbwarden core
//!
//! Models, error taxonomy and storage contracts shared by every tier of the
//! scan engine.
//!
//! # Modules
//! - `models` - Scans, results, credentials, CVEs
//! - `store` - Narrow persistence contracts consumed by the saver
//! - `cancel` - Cooperative cancellation signal

pub mod cancel;
pub mod models;
pub mod store;

pub use cancel::CancelToken;
pub use models::{
    Backend, BruteforceResult, BruteforceUserStatus, CrackedHash, Cve, Finding, Product, Scan,
    ScanGroup, ScanResult, ScanStatus, Severity,
};
pub use store::{PasswordStore, ScanStore, VersionSink};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    /// The backend has no such capability. Callers skip the step.
    #[error("{0} is not supported by this backend")]
    NotSupported(&'static str),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("insufficient permissions: {0}")]
    Permission(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("password provider failed: {0}")]
    Provider(String),

    #[error("storage failed: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("scan cancelled")]
    Cancelled,

    /// The scan failed and recording the failure failed too.
    #[error("{scan} (persisting the failure also failed: {persist})")]
    Persist {
        scan: Box<ScanError>,
        persist: Box<ScanError>,
    },
}

impl ScanError {
    pub fn is_not_supported(&self) -> bool {
        matches!(self, ScanError::NotSupported(_))
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
