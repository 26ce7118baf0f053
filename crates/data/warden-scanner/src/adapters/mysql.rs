//! MySQL scanner
//!
//! The `mysql` driver is synchronous, so every call runs on the blocking pool
//! against a single shared connection.

use ::mysql::prelude::Queryable;
use ::mysql::{Conn, Opts, OptsBuilder};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::rules::{evaluate_rules, MYSQL_RULES};
use crate::{with_timeout, Credential, Scanner};
use warden_core::{Backend, Finding, Result, ScanError};

const PERMISSION_PROBES: &[&str] = &[
    "SELECT 1 FROM mysql.user LIMIT 1",
    "SHOW VARIABLES LIKE 'version'",
    "SELECT VERSION()",
];

const USERS_QUERY: &str = "SELECT user, Super_priv, plugin, authentication_string FROM mysql.user \
     WHERE plugin IN ('caching_sha2_password', 'mysql_native_password') \
     AND authentication_string NOT LIKE '%INVALIDSALTANDPASSWORD%'";

/// Server error codes that mean "not allowed" rather than "broken"
const ACCESS_DENIED_CODES: &[u16] = &[1044, 1045, 1142, 1143, 1227];

const SHA2_SALT_LEN: usize = 20;

pub struct MySqlScanner {
    conn: Arc<Mutex<Option<Conn>>>,
}

type UserRow = (String, String, String, Vec<u8>);

impl MySqlScanner {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let opts = Opts::from_url(url).map_err(|e| ScanError::Connection(e.to_string()))?;
        let opts = OptsBuilder::from_opts(opts)
            .tcp_connect_timeout(Some(timeout))
            .read_timeout(Some(timeout * 6));

        let conn = with_timeout(timeout, "mysql connect", async move {
            tokio::task::spawn_blocking(move || Conn::new(opts))
                .await
                .map_err(|e| ScanError::Connection(e.to_string()))?
                .map_err(|e| map_error("connect", e))
        })
        .await?;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    async fn blocking<T, F>(&self, what: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Conn) -> std::result::Result<T, ::mysql::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| ScanError::Connection("mysql connection lock poisoned".into()))?;
            let conn = guard
                .as_mut()
                .ok_or_else(|| ScanError::Connection("connection already closed".into()))?;
            f(conn).map_err(|e| map_error(what, e))
        })
        .await
        .map_err(|e| ScanError::Query(format!("{} task failed: {}", what, e)))?
    }
}

fn map_error(context: &str, e: ::mysql::Error) -> ScanError {
    match &e {
        ::mysql::Error::MySqlError(inner) if ACCESS_DENIED_CODES.contains(&inner.code) => {
            ScanError::Permission(format!("{}: {}", context, e))
        }
        ::mysql::Error::IoError(_) | ::mysql::Error::UrlError(_) => {
            ScanError::Connection(format!("{}: {}", context, e))
        }
        _ => ScanError::Query(format!("{}: {}", context, e)),
    }
}

/// Render a raw `caching_sha2_password` authentication string
/// (`$A$005$` + 20 salt bytes + 43 digest chars) in the hex-safe
/// `$mysql$A$005$<hex salt>$<hex digest>` form.
pub(crate) fn export_sha2_hash(auth: &[u8]) -> Option<String> {
    let header = auth.get(..7)?;
    if !header.starts_with(b"$A$") || header[6] != b'$' {
        return None;
    }
    let rounds = std::str::from_utf8(&header[3..6]).ok()?;
    let salt = auth.get(7..7 + SHA2_SALT_LEN)?;
    let digest = auth.get(7 + SHA2_SALT_LEN..)?;
    if digest.is_empty() {
        return None;
    }
    Some(format!(
        "$mysql$A${}${}${}",
        rounds,
        hex_upper(salt),
        hex_upper(digest)
    ))
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

pub(crate) fn credential_from_row(row: UserRow) -> Option<Credential> {
    let (user, super_priv, plugin, auth) = row;
    let privileged = super_priv.eq_ignore_ascii_case("Y");
    let hash = match plugin.as_str() {
        "caching_sha2_password" => export_sha2_hash(&auth),
        "mysql_native_password" => String::from_utf8(auth).ok().filter(|h| h.starts_with('*')),
        _ => None,
    };
    match hash {
        Some(hash) => Some(Credential::new(user, privileged, hash)),
        None => {
            tracing::debug!(username = %user, %plugin, "skipping account without usable password hash");
            None
        }
    }
}

/// `8.0.35-0ubuntu0.22.04.1` -> `8.0.35`
pub(crate) fn normalize_version(raw: &str) -> String {
    raw.trim().split('-').next().unwrap_or_default().to_string()
}

#[async_trait]
impl Scanner for MySqlScanner {
    fn backend(&self) -> Backend {
        Backend::MySql
    }

    async fn ping(&self) -> Result<()> {
        self.blocking("ping", |conn| conn.query_drop("SELECT 1")).await
    }

    async fn check_permissions(&self) -> Result<()> {
        self.blocking("check permissions", |conn| {
            for probe in PERMISSION_PROBES {
                conn.query_drop(*probe)?;
            }
            Ok(())
        })
        .await
    }

    async fn scan_config(&self) -> Result<Vec<Finding>> {
        let rows: Vec<(String, Option<String>)> = self
            .blocking("show variables", |conn| conn.query("SHOW VARIABLES"))
            .await?;
        let settings: HashMap<String, String> = rows
            .into_iter()
            .map(|(name, value)| (name, value.unwrap_or_default()))
            .collect();
        Ok(evaluate_rules(&MYSQL_RULES, &settings))
    }

    async fn get_users(&self) -> Result<Vec<Credential>> {
        let rows: Vec<UserRow> = self
            .blocking("read mysql.user", |conn| conn.query(USERS_QUERY))
            .await?;
        Ok(rows.into_iter().filter_map(credential_from_row).collect())
    }

    async fn get_version(&self) -> Result<String> {
        let version: Option<String> = self
            .blocking("version", |conn| conn.query_first("SELECT VERSION()"))
            .await?;
        version
            .map(|v| normalize_version(&v))
            .ok_or_else(|| ScanError::Query("SELECT VERSION() returned no rows".into()))
    }

    async fn close(&mut self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            if let Ok(mut guard) = conn.lock() {
                guard.take();
            }
        })
        .await
        .map_err(|e| ScanError::Connection(format!("close task failed: {}", e)))
    }
}
