//! PostgreSQL scanner

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls};

use crate::rules::{evaluate_rules, POSTGRES_RULES};
use crate::{with_timeout, Credential, Scanner};
use warden_core::{Backend, Finding, Result, ScanError};

/// Catalogs the rest of the scan reads
const PERMISSION_PROBES: &[&str] = &[
    "information_schema.role_table_grants",
    "pg_catalog.pg_roles",
    "pg_catalog.pg_user",
    "pg_settings",
    "pg_file_settings",
];

const USERS_QUERY: &str =
    "SELECT rolsuper, rolname, rolpassword FROM pg_catalog.pg_authid WHERE rolcanlogin = true";

lazy_static! {
    static ref VERSION_RE: Regex = Regex::new(r"PostgreSQL ([0-9]+\.[0-9]+)").expect("valid regex");
}

pub struct PostgresScanner {
    client: Option<Client>,
    connection: Option<JoinHandle<()>>,
}

impl PostgresScanner {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let (client, connection) = with_timeout(timeout, "postgres connect", async {
            tokio_postgres::connect(url, NoTls)
                .await
                .map_err(|e| ScanError::Connection(e.to_string()))
        })
        .await?;

        let handle = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "postgres connection ended");
            }
        });

        Ok(Self {
            client: Some(client),
            connection: Some(handle),
        })
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| ScanError::Connection("connection already closed".into()))
    }
}

fn map_error(context: &str, e: tokio_postgres::Error) -> ScanError {
    if e.code() == Some(&SqlState::INSUFFICIENT_PRIVILEGE) {
        ScanError::Permission(format!("{}: {}", context, e))
    } else if e.is_closed() {
        ScanError::Connection(format!("{}: {}", context, e))
    } else {
        ScanError::Query(format!("{}: {}", context, e))
    }
}

/// Extract `major.minor` from `SELECT version()`
pub(crate) fn parse_version(banner: &str) -> Result<String> {
    VERSION_RE
        .captures(banner)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ScanError::Query(format!("unrecognised version banner {:?}", banner)))
}

#[async_trait]
impl Scanner for PostgresScanner {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn ping(&self) -> Result<()> {
        self.client()?
            .simple_query("SELECT 1")
            .await
            .map_err(|e| map_error("ping", e))?;
        Ok(())
    }

    async fn check_permissions(&self) -> Result<()> {
        let client = self.client()?;
        for table in PERMISSION_PROBES {
            let sql = format!("SELECT 1 FROM {} LIMIT 1", table);
            client
                .simple_query(&sql)
                .await
                .map_err(|e| map_error(&format!("could not read {}", table), e))?;
        }
        Ok(())
    }

    async fn scan_config(&self) -> Result<Vec<Finding>> {
        let rows = self
            .client()?
            .query("SELECT name, setting FROM pg_settings", &[])
            .await
            .map_err(|e| map_error("could not read pg_settings", e))?;

        let mut settings = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get(0).map_err(|e| map_error("pg_settings.name", e))?;
            let setting: Option<String> =
                row.try_get(1).map_err(|e| map_error("pg_settings.setting", e))?;
            settings.insert(name, setting.unwrap_or_default());
        }

        Ok(evaluate_rules(&POSTGRES_RULES, &settings))
    }

    async fn get_users(&self) -> Result<Vec<Credential>> {
        let rows = self
            .client()?
            .query(USERS_QUERY, &[])
            .await
            .map_err(|e| map_error("could not read pg_authid", e))?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            let superuser: bool = row.try_get(0).map_err(|e| map_error("rolsuper", e))?;
            let name: String = row.try_get(1).map_err(|e| map_error("rolname", e))?;
            let password: Option<String> = row.try_get(2).map_err(|e| map_error("rolpassword", e))?;

            // Roles without a password cannot log in with one
            match password {
                Some(hash) if !hash.is_empty() => users.push(Credential::new(name, superuser, hash)),
                _ => tracing::debug!(username = %name, "role has no password"),
            }
        }
        Ok(users)
    }

    async fn get_version(&self) -> Result<String> {
        let row = self
            .client()?
            .query_one("SELECT version()", &[])
            .await
            .map_err(|e| map_error("version", e))?;
        let banner: String = row.try_get(0).map_err(|e| map_error("version", e))?;
        parse_version(&banner)
    }

    async fn close(&mut self) -> Result<()> {
        self.client.take();
        if let Some(handle) = self.connection.take() {
            handle.abort();
        }
        Ok(())
    }
}
