//! Stored credential formats
//!
//! The format is chosen from the shape of the stored hash, never from the
//! backend that returned it. PostgreSQL alone can hand back SCRAM, md5 or
//! plaintext passwords depending on `password_encryption` history.

use serde::{Deserialize, Serialize};

use crate::hashes::Hashes;
use crate::scram::ScramSecret;
use crate::sha2crypt::MysqlSha2Hash;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialFormat {
    ScramSha256,
    ScramSha1,
    PostgresMd5,
    MysqlCachingSha2,
    MysqlNative,
    RedisSha256,
    Plaintext,
}

impl CredentialFormat {
    pub fn detect(hash: &str) -> Self {
        let is_hex = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit());

        if hash.starts_with("SCRAM-SHA-256$") {
            return CredentialFormat::ScramSha256;
        }
        if hash.starts_with("SCRAM-SHA-1$") {
            return CredentialFormat::ScramSha1;
        }
        if hash.starts_with(MysqlSha2Hash::PREFIX) {
            return CredentialFormat::MysqlCachingSha2;
        }

        match (hash.len(), hash.get(..1), hash.get(1..)) {
            (35, _, _) if hash.starts_with("md5") && is_hex(&hash[3..]) => {
                CredentialFormat::PostgresMd5
            }
            (41, Some("*"), Some(rest)) if is_hex(rest) => CredentialFormat::MysqlNative,
            (65, Some("#"), Some(rest)) if is_hex(rest) => CredentialFormat::RedisSha256,
            _ => CredentialFormat::Plaintext,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CredentialFormat::ScramSha256 => "SCRAM-SHA-256",
            CredentialFormat::ScramSha1 => "SCRAM-SHA-1",
            CredentialFormat::PostgresMd5 => "md5",
            CredentialFormat::MysqlCachingSha2 => "caching_sha2_password",
            CredentialFormat::MysqlNative => "mysql_native_password",
            CredentialFormat::RedisSha256 => "redis-sha256",
            CredentialFormat::Plaintext => "plaintext",
        }
    }
}

/// A login-capable account as reported by a database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    /// Superuser or equivalent
    pub privileged: bool,
    pub hash: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, privileged: bool, hash: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            privileged,
            hash: hash.into(),
        }
    }

    pub fn format(&self) -> CredentialFormat {
        CredentialFormat::detect(&self.hash)
    }

    /// The stored value is the password itself
    pub fn raw_password(&self) -> Option<&str> {
        match self.format() {
            CredentialFormat::Plaintext => Some(&self.hash),
            _ => None,
        }
    }

    pub fn try_verify(&self, candidate: &str) -> Result<bool> {
        let matched = match self.format() {
            CredentialFormat::ScramSha256 | CredentialFormat::ScramSha1 => {
                ScramSecret::parse(&self.hash)?.verify(&self.username, candidate)?
            }
            CredentialFormat::MysqlCachingSha2 => MysqlSha2Hash::parse(&self.hash)?.verify(candidate),
            CredentialFormat::PostgresMd5 => {
                Hashes::postgres_md5(&self.username, candidate) == self.hash
            }
            CredentialFormat::MysqlNative => {
                Hashes::mysql_native(candidate).eq_ignore_ascii_case(&self.hash)
            }
            CredentialFormat::RedisSha256 => {
                Hashes::redis_acl(candidate).eq_ignore_ascii_case(&self.hash)
            }
            CredentialFormat::Plaintext => candidate == self.hash,
        };
        Ok(matched)
    }

    /// Malformed hashes never match
    pub fn verify(&self, candidate: &str) -> bool {
        match self.try_verify(candidate) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!(username = %self.username, error = %e, "cannot verify credential");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detect() {
        assert_eq!(
            CredentialFormat::detect("md5b4fe08fbb9d193ffd48c3a10cbf2a04c"),
            CredentialFormat::PostgresMd5
        );
        assert_eq!(
            CredentialFormat::detect("*2470C0C06DEE42FD1618BB99005ADCA2EC9D1E19"),
            CredentialFormat::MysqlNative
        );
        assert_eq!(
            CredentialFormat::detect(
                "#f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7"
            ),
            CredentialFormat::RedisSha256
        );
        assert_eq!(CredentialFormat::detect("SCRAM-SHA-1$1:AA$AA:AA"), CredentialFormat::ScramSha1);
        assert_eq!(CredentialFormat::detect("$mysql$A$005$00$00"), CredentialFormat::MysqlCachingSha2);
        assert_eq!(CredentialFormat::detect("md5notreallyhex"), CredentialFormat::Plaintext);
        assert_eq!(CredentialFormat::detect("hunter2"), CredentialFormat::Plaintext);
        assert_eq!(CredentialFormat::detect("ünïcødé"), CredentialFormat::Plaintext);
    }

    #[test]
    fn test_postgres_md5() {
        let cred = Credential::new("foo1", false, "md5b4fe08fbb9d193ffd48c3a10cbf2a04c");
        assert!(cred.verify("secret"));
        assert!(!cred.verify("postgres"));

        let renamed = Credential::new("foo2", false, "md5b4fe08fbb9d193ffd48c3a10cbf2a04c");
        assert!(!renamed.verify("secret"));
    }

    #[test]
    fn test_postgres_scram() {
        let cred = Credential::new(
            "postgres",
            true,
            "SCRAM-SHA-256$4096:x1Y7a1TyFE4fFwUOMyvX8Q==$WvMDOS/ZDzXzaHjpPqzkqXrd1ntcDIi7P2jQwYgI0e4=:Wf431GYj+SeayVQ6zOijoV5xQwzZKyGoVU7IAbXTO7U=",
        );
        assert!(cred.verify("postgres"));
        assert!(!cred.verify("postgres123"));
        assert_eq!(cred.raw_password(), None);
    }

    #[test]
    fn test_mysql_and_redis() {
        let sha2 = Credential::new(
            "root",
            true,
            "$mysql$A$005$6439526B2A0477021C6D1C3F5179280507162101$4E573447484C4F5A7571586362626B69784442492F5259324F6473744B317A7847656C2E77664E51434D36",
        );
        assert!(sha2.verify("cosica"));

        let native = Credential::new("app", false, "*2470C0C06DEE42FD1618BB99005ADCA2EC9D1E19");
        assert!(native.verify("password"));
        assert!(!native.verify("Password"));

        let redis = Credential::new(
            "default",
            true,
            "#f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7",
        );
        assert!(redis.verify("hunter2"));
        assert!(!redis.verify("hunter3"));
    }

    #[test]
    fn test_plaintext_and_malformed() {
        let plain = Credential::new("legacy", false, "letmein");
        assert_eq!(plain.raw_password(), Some("letmein"));
        assert!(plain.verify("letmein"));

        let broken = Credential::new("x", false, "SCRAM-SHA-256$notanumber:AA$AA:AA");
        assert!(broken.try_verify("anything").is_err());
        assert!(!broken.verify("anything"));
    }
}
