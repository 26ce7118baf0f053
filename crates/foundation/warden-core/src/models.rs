//! Scan engine data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ScanError;

/// Database backends the engine can audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Postgres,
    MySql,
    Redis,
    MongoDb,
}

impl Backend {
    pub fn all() -> [Backend; 4] {
        [Backend::Postgres, Backend::MySql, Backend::Redis, Backend::MongoDb]
    }

    /// Stable lowercase name, also used as the NVD lookup key
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Postgres => "postgres",
            Backend::MySql => "mysql",
            Backend::Redis => "redis",
            Backend::MongoDb => "mongodb",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Backend::Postgres => "PostgreSQL",
            Backend::MySql => "MySQL",
            Backend::Redis => "Redis",
            Backend::MongoDb => "MongoDB",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            "mysql" => Ok(Backend::MySql),
            "redis" => Ok(Backend::Redis),
            "mongo" | "mongodb" => Ok(Backend::MongoDb),
            other => Err(ScanError::NotFound(format!("backend {}", other))),
        }
    }
}

/// Scan lifecycle.
///
/// Variants are declared in transition order so `Ord` doubles as the
/// monotonicity check: a status may only move to an equal or greater one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    NotStarted,
    CheckingPublicAccess,
    Running,
    Finished,
}

impl ScanStatus {
    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        *self != ScanStatus::Finished && next >= *self
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanStatus::NotStarted => "not started",
            ScanStatus::CheckingPublicAccess => "checking public access",
            ScanStatus::Running => "running",
            ScanStatus::Finished => "finished",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informational,
    Warning,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Informational => "INFO",
            Severity::Warning => "WARNING",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        };
        f.pad(s)
    }
}

/// One audit run against one database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub id: i64,
    pub backend: Backend,
    pub status: ScanStatus,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub scan_group_id: i64,
}

impl Scan {
    pub fn new(id: i64, backend: Backend, scan_group_id: i64) -> Self {
        Self {
            id,
            backend,
            status: ScanStatus::NotStarted,
            error: None,
            started_at: None,
            ended_at: None,
            scan_group_id,
        }
    }
}

/// Groups scans under a project. The project scopes harvested secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanGroup {
    pub id: i64,
    pub project_id: i64,
}

/// A finding produced by a scanner before it is attached to a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// Persisted, append-only finding row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub id: i64,
    pub scan_id: i64,
    pub severity: Severity,
    pub message: String,
    pub scanner_id: String,
    pub created_at: DateTime<Utc>,
}

/// Per-user bruteforce progress row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BruteforceResult {
    pub scan_id: i64,
    pub username: String,
    pub password: Option<String>,
    pub tried: u64,
    pub total: u64,
}

/// Live progress of one user during a bruteforce run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BruteforceUserStatus {
    pub total: u64,
    pub tried: u64,
    pub password: Option<String>,
}

impl BruteforceUserStatus {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            tried: 0,
            password: None,
        }
    }

    pub fn found(&mut self, password: impl Into<String>) {
        self.tried = self.total;
        self.password = Some(password.into());
    }
}

/// CVE-tracked products
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Product {
    Unknown,
    PostgreSql,
    MySql,
    Redis,
    MongoDb,
}

impl Product {
    /// CPE 2.3 prefix used by the NVD feed
    pub fn cpe(&self) -> Option<&'static str> {
        match self {
            Product::Unknown => None,
            Product::PostgreSql => Some("cpe:2.3:a:postgresql:postgresql"),
            Product::MySql => Some("cpe:2.3:a:oracle:mysql"),
            Product::Redis => Some("cpe:2.3:a:redis:redis"),
            Product::MongoDb => Some("cpe:2.3:a:mongodb:mongodb"),
        }
    }

    pub fn from_backend(backend: Backend) -> Self {
        match backend {
            Backend::Postgres => Product::PostgreSql,
            Backend::MySql => Product::MySql,
            Backend::Redis => Product::Redis,
            Backend::MongoDb => Product::MongoDb,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cve {
    pub cve_id: String,
    pub description: String,
    pub product: Product,
    pub version: String,
}

/// Memoized outcome of cracking one (username, hash) pair.
///
/// `password == None` means every corpus entry with id up to `last_cursor`
/// was tried without a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrackedHash {
    pub project_id: i64,
    pub username: String,
    pub hash: String,
    pub password: Option<String>,
    pub last_cursor: u64,
}
