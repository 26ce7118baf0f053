//! Static configuration rule tables
//!
//! Each backend maps a setting name to a predicate over the setting's
//! current value. Tables are ordered maps, so findings come out sorted by
//! setting name no matter how the server returned them.

use std::collections::{BTreeMap, HashMap};

use lazy_static::lazy_static;
use warden_core::{Finding, Severity};

#[derive(Clone, Copy)]
pub struct ConfigRule {
    /// True when the value is a problem
    pub check: fn(&str) -> bool,
    pub severity: Severity,
    pub message: &'static str,
}

impl ConfigRule {
    fn new(check: fn(&str) -> bool, severity: Severity, message: &'static str) -> Self {
        Self {
            check,
            severity,
            message,
        }
    }
}

pub type RuleTable = BTreeMap<&'static str, ConfigRule>;

/// One finding per rule whose setting is present and fails its check
pub fn evaluate_rules(rules: &RuleTable, settings: &HashMap<String, String>) -> Vec<Finding> {
    rules
        .iter()
        .filter_map(|(name, rule)| {
            let value = settings.get(*name)?;
            (rule.check)(value).then(|| Finding::new(rule.severity, rule.message))
        })
        .collect()
}

fn parse_int_above(value: &str, limit: i64) -> bool {
    value.trim().parse::<i64>().map(|v| v > limit).unwrap_or(false)
}

fn parse_int_below(value: &str, limit: i64) -> bool {
    value.trim().parse::<i64>().map(|v| v < limit).unwrap_or(false)
}

lazy_static! {
    pub static ref POSTGRES_RULES: RuleTable = {
        use Severity::*;
        let mut m = RuleTable::new();
        m.insert("fsync", ConfigRule::new(|v| v == "off", Warning,
            "fsync is off. Loss of data in case of crash."));
        m.insert("data_directory_mode", ConfigRule::new(|v| v != "0700", High,
            "data_directory_mode is not 0700."));
        m.insert("listen_addresses", ConfigRule::new(|v| v != "localhost", Medium,
            "listen_addresses is not localhost."));
        m.insert("full_page_writes", ConfigRule::new(|v| v == "off", Warning,
            "full_page_writes is off. Loss of data in case of crash."));
        m.insert("ssl", ConfigRule::new(|v| v == "off", High,
            "ssl is off. Passwords are sent in clear text."));
        m.insert("idle_in_transaction_session_timeout", ConfigRule::new(|v| v != "0", Warning,
            "idle_in_transaction_session_timeout is not 0."));
        m.insert("ignore_invalid_pages", ConfigRule::new(|v| v == "off", Warning,
            "ignore_invalid_pages is off."));
        m.insert("local_preload_libraries", ConfigRule::new(|v| !v.is_empty(), High,
            "local_preload_libraries is not empty."));
        m.insert("log_connections", ConfigRule::new(|v| v == "off", Warning,
            "log_connections is off."));
        m.insert("log_disconnections", ConfigRule::new(|v| v == "off", Warning,
            "log_disconnections is off."));
        m.insert("log_file_mode", ConfigRule::new(|v| v != "0600", High,
            "log_file_mode is not 0600."));
        m.insert("max_connections", ConfigRule::new(|v| parse_int_above(v, 1500), High,
            "max_connections is >1500."));
        m.insert("password_encryption", ConfigRule::new(|v| v == "off" || v == "md5", High,
            "password_encryption is off or set to md5"));
        m.insert("synchronous_commit", ConfigRule::new(|v| v == "off", Warning,
            "synchronous_commit is off."));
        m.insert("TimeZone", ConfigRule::new(|v| v != "Etc/UTC", Warning,
            "TimeZone is not UTC."));
        m
    };

    pub static ref MYSQL_RULES: RuleTable = {
        use Severity::*;
        let mut m = RuleTable::new();
        m.insert("ssl_key", ConfigRule::new(|v| v.is_empty(), High,
            "ssl_key is empty. SSL is not configured."));
        m.insert("caching_sha2_password_digest_rounds", ConfigRule::new(|v| parse_int_below(v, 5000), Medium,
            "caching_sha2_password_digest_rounds is lower than 5000."));
        m.insert("debug", ConfigRule::new(|v| v != "d:t:O,/tmp/mysql.trace", Warning,
            "debug is enabled."));
        m.insert("flush", ConfigRule::new(|v| v != "OFF", Medium,
            "flush is not OFF."));
        m
    };

    pub static ref REDIS_RULES: RuleTable = {
        use Severity::*;
        let mut m = RuleTable::new();
        m.insert("timeout", ConfigRule::new(|v| v == "0", Warning,
            "timeout is set to 0."));
        m.insert("tls-cert-file", ConfigRule::new(|v| v.is_empty(), High,
            "tls-cert-file is empty. TLS is not configured."));
        m.insert("ignore-warnings", ConfigRule::new(|v| !v.is_empty(), Warning,
            "ignore-warnings is not empty. This can hide important warnings."));
        m.insert("enable-debug-command", ConfigRule::new(|v| v != "no", High,
            "enable-debug-command is not set to no."));
        m.insert("requirepass", ConfigRule::new(|v| !v.is_empty(), Medium,
            "requirepass is set. Please consider using ACLs instead."));
        m.insert("aclfile", ConfigRule::new(|v| v.is_empty(), High,
            "aclfile is not set. Please consider using ACLs."));
        m
    };
}
