//! Persistence contracts.
//!
//! The engine never talks to a database of its own. Everything it records goes
//! through these traits, so an in-process store and a remote one are
//! interchangeable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Backend, CrackedHash, Cve, Product, Scan, ScanGroup, ScanStatus, Severity};
use crate::Result;

/// Scan bookkeeping used by the saver
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn get_scan_group(&self, id: i64) -> Result<ScanGroup>;

    async fn get_scan(&self, id: i64) -> Result<Scan>;

    /// Move a scan to `status`. Regressions and writes to a finished scan fail.
    async fn update_scan_status(
        &self,
        id: i64,
        status: ScanStatus,
        error: Option<String>,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Append one finding. Insertion order is display order.
    async fn create_scan_result(
        &self,
        scan_id: i64,
        severity: Severity,
        message: &str,
        scanner_id: &str,
    ) -> Result<()>;

    async fn create_or_update_bruteforce_result(
        &self,
        scan_id: i64,
        username: &str,
        password: Option<&str>,
        tried: u64,
        total: u64,
    ) -> Result<()>;

    async fn cves_by_product_and_version(&self, product: Product, version: &str)
        -> Result<Vec<Cve>>;
}

/// Password corpus and crack cache, scoped by project.
///
/// Every corpus entry gets a stable id when it is inserted, from one counter
/// shared by project secrets and the global wordlist. Ids never change and
/// are never reused. The corpus order is the project's secrets followed by
/// the global wordlist, each ascending by id.
#[async_trait]
pub trait PasswordStore: Send + Sync {
    /// Number of corpus entries with id strictly greater than `after`
    async fn password_count(&self, project_id: i64, after: u64) -> Result<u64>;

    /// Up to `limit` project secrets with id strictly greater than `after`, ascending
    async fn secret_page(&self, project_id: i64, after: u64, limit: usize)
        -> Result<Vec<(u64, String)>>;

    /// Up to `limit` global wordlist entries with id strictly greater than `after`, ascending
    async fn wordlist_page(&self, after: u64, limit: usize) -> Result<Vec<(u64, String)>>;

    async fn find_password(&self, project_id: i64, password: &str) -> Result<Option<u64>>;

    async fn cracked_hash(
        &self,
        project_id: i64,
        username: &str,
        hash: &str,
    ) -> Result<Option<CrackedHash>>;

    async fn save_cracked_hash(&self, cracked: CrackedHash) -> Result<()>;
}

/// Receives the version a finished scan discovered
#[async_trait]
pub trait VersionSink: Send + Sync {
    async fn record_version(&self, scan_id: i64, backend: Backend, version: &str) -> Result<()>;
}
