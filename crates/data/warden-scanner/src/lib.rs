//! dbwarden scanners
//!
//! One adapter per database backend behind the [`Scanner`] trait. Adapters
//! own a live connection and expose a fixed capability set. A backend that
//! lacks a capability answers [`ScanError::NotSupported`] and callers skip
//! that step.

pub mod adapters;
pub mod rules;

pub use adapters::{MongoScanner, MySqlScanner, PostgresScanner, RedisScanner};
pub use rules::{evaluate_rules, ConfigRule, RuleTable};
pub use warden_cipher::Credential;

use async_trait::async_trait;
use std::time::Duration;
use warden_core::{Backend, Finding, Product, Result, ScanError};

/// Capabilities every backend adapter exposes
#[async_trait]
pub trait Scanner: Send + Sync {
    fn backend(&self) -> Backend;

    /// Source id stored on every result this scanner produces
    fn scanner_id(&self) -> &'static str {
        self.backend().name()
    }

    async fn ping(&self) -> Result<()> {
        Err(ScanError::NotSupported("ping"))
    }

    /// Probe access to the privileged catalogs the other steps read
    async fn check_permissions(&self) -> Result<()> {
        Err(ScanError::NotSupported("check_permissions"))
    }

    async fn scan_config(&self) -> Result<Vec<Finding>> {
        Err(ScanError::NotSupported("scan_config"))
    }

    async fn get_users(&self) -> Result<Vec<Credential>> {
        Err(ScanError::NotSupported("get_users"))
    }

    async fn get_version(&self) -> Result<String> {
        Err(ScanError::NotSupported("get_version"))
    }

    fn should_not_be_public(&self) -> bool {
        true
    }

    fn nvd_product(&self) -> Product {
        Product::from_backend(self.backend())
    }

    /// Release the live connection. Later calls are no-ops.
    async fn close(&mut self) -> Result<()>;
}

/// Open a scanner for `backend` from a connection URL
pub async fn connect(backend: Backend, url: &str, timeout: Duration) -> Result<Box<dyn Scanner>> {
    tracing::debug!(%backend, "connecting scanner");
    let scanner: Box<dyn Scanner> = match backend {
        Backend::Postgres => Box::new(PostgresScanner::connect(url, timeout).await?),
        Backend::MySql => Box::new(MySqlScanner::connect(url, timeout).await?),
        Backend::Redis => Box::new(RedisScanner::connect(url, timeout).await?),
        Backend::MongoDb => Box::new(MongoScanner::connect(url, timeout).await?),
    };
    Ok(scanner)
}

/// Bound a driver future by the connection timeout
pub(crate) async fn with_timeout<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ScanError::Connection(format!("{} timed out after {:?}", what, timeout)))?
}
