//! Redis scanner

use ::redis::aio::MultiplexedConnection;
use ::redis::{Client, RedisError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::rules::{evaluate_rules, REDIS_RULES};
use crate::{with_timeout, Credential, Scanner};
use warden_core::{Backend, Finding, Result, ScanError};

pub struct RedisScanner {
    conn: Option<MultiplexedConnection>,
}

impl RedisScanner {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::open(url).map_err(|e| ScanError::Connection(e.to_string()))?;
        let conn = with_timeout(timeout, "redis connect", async {
            client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| map_error("connect", "connect", e))
        })
        .await?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&self) -> Result<MultiplexedConnection> {
        self.conn
            .clone()
            .ok_or_else(|| ScanError::Connection("connection already closed".into()))
    }
}

/// Redis reports missing commands (pre-6 ACL, renamed CONFIG) as plain errors
fn is_unknown_command(e: &RedisError) -> bool {
    e.to_string().to_ascii_lowercase().contains("unknown command")
}

fn map_error(capability: &'static str, context: &str, e: RedisError) -> ScanError {
    if is_unknown_command(&e) {
        ScanError::NotSupported(capability)
    } else if e.code() == Some("NOPERM") || e.to_string().contains("NOPERM") {
        ScanError::Permission(format!("{}: {}", context, e))
    } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        ScanError::Connection(format!("{}: {}", context, e))
    } else {
        ScanError::Query(format!("{}: {}", context, e))
    }
}

/// Credentials from one `ACL LIST` line,
/// e.g. `user alice on #<sha256> ~* &* +@all`
pub(crate) fn parse_acl_line(line: &str) -> Vec<Credential> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("user") {
        return Vec::new();
    }
    let Some(username) = tokens.next() else {
        return Vec::new();
    };
    let rules: Vec<&str> = tokens.collect();

    if !rules.contains(&"on") {
        return Vec::new();
    }
    let privileged = rules.iter().any(|r| *r == "+@all" || *r == "allcommands");

    rules
        .iter()
        .filter(|r| r.starts_with('#'))
        .map(|hash| Credential::new(username, privileged, *hash))
        .collect()
}

/// `redis_version` from `INFO server`
pub(crate) fn parse_info_version(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.trim().strip_prefix("redis_version:"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl Scanner for RedisScanner {
    fn backend(&self) -> Backend {
        Backend::Redis
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_error("ping", "ping", e))?;
        Ok(())
    }

    async fn check_permissions(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let _: Vec<String> = ::redis::cmd("ACL")
            .arg("LIST")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_error("check_permissions", "ACL LIST", e))?;
        let _: HashMap<String, String> = ::redis::cmd("CONFIG")
            .arg("GET")
            .arg("requirepass")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_error("check_permissions", "CONFIG GET", e))?;
        Ok(())
    }

    async fn scan_config(&self) -> Result<Vec<Finding>> {
        let mut conn = self.conn()?;
        let settings: HashMap<String, String> = ::redis::cmd("CONFIG")
            .arg("GET")
            .arg("*")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_error("scan_config", "CONFIG GET *", e))?;
        Ok(evaluate_rules(&REDIS_RULES, &settings))
    }

    async fn get_users(&self) -> Result<Vec<Credential>> {
        let mut conn = self.conn()?;
        let lines: Vec<String> = ::redis::cmd("ACL")
            .arg("LIST")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_error("get_users", "ACL LIST", e))?;
        Ok(lines.iter().flat_map(|line| parse_acl_line(line)).collect())
    }

    async fn get_version(&self) -> Result<String> {
        let mut conn = self.conn()?;
        let info: String = ::redis::cmd("INFO")
            .arg("server")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_error("get_version", "INFO server", e))?;
        parse_info_version(&info)
            .ok_or_else(|| ScanError::Query("INFO server has no redis_version".into()))
    }

    async fn close(&mut self) -> Result<()> {
        self.conn.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_acl_line() {
        let creds = parse_acl_line(
            "user default on #f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7 ~* &* +@all",
        );
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].username, "default");
        assert!(creds[0].privileged);
        assert!(creds[0].verify("hunter2"));
    }

    #[test]
    fn test_parse_acl_line_skips_disabled_and_nopass() {
        assert!(parse_acl_line("user old off #f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7 ~*").is_empty());
        assert!(parse_acl_line("user default on nopass ~* &* +@all").is_empty());
        assert!(parse_acl_line("garbage").is_empty());
    }

    #[test]
    fn test_parse_acl_line_multiple_passwords() {
        let line = format!(
            "user reader on #{} #{} ~cache:* +get",
            "a".repeat(64),
            "b".repeat(64)
        );
        let creds = parse_acl_line(&line);
        assert_eq!(creds.len(), 2);
        assert!(creds.iter().all(|c| !c.privileged && c.username == "reader"));
    }

    #[test]
    fn test_parse_info_version() {
        let info = "# Server\r\nredis_version:7.2.4\r\nredis_git_sha1:00000000\r\n";
        assert_eq!(parse_info_version(info).as_deref(), Some("7.2.4"));
        assert_eq!(parse_info_version("# Server\r\n"), None);
    }
}
