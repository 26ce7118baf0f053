//! Hash helpers
//!
//! Hex-encoding wrappers around the digest crates.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

pub struct Hashes;

impl Hashes {
    /// MD5 hash
    pub fn md5(input: &[u8]) -> String {
        hex::encode(Md5::digest(input))
    }

    /// SHA-1 hash
    pub fn sha1(input: &[u8]) -> String {
        hex::encode(Sha1::digest(input))
    }

    /// SHA-256 hash
    pub fn sha256(input: &[u8]) -> String {
        hex::encode(Sha256::digest(input))
    }

    /// PostgreSQL legacy `md5` role password
    pub fn postgres_md5(username: &str, password: &str) -> String {
        let mut hasher = Md5::new();
        hasher.update(password.as_bytes());
        hasher.update(username.as_bytes());
        format!("md5{}", hex::encode(hasher.finalize()))
    }

    /// MySQL 4.1+ `mysql_native_password`: SHA1(SHA1(password))
    pub fn mysql_native(password: &str) -> String {
        let first = Sha1::digest(password.as_bytes());
        format!("*{}", hex::encode_upper(Sha1::digest(first)))
    }

    /// Redis ACL `#<sha256>` password entry
    pub fn redis_acl(password: &str) -> String {
        format!("#{}", Self::sha256(password.as_bytes()))
    }

    /// MongoDB SCRAM-SHA-1 password digest: hex MD5 of `user:mongo:password`
    pub fn mongo_digest(username: &str, password: &str) -> String {
        Self::md5(format!("{}:mongo:{}", username, password).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digests() {
        assert_eq!(Hashes::md5(b"hello"), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(
            Hashes::sha1(b"hello"),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
        assert_eq!(
            Hashes::sha256(b"hunter2"),
            "f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7"
        );
    }

    #[test]
    fn test_backend_formats() {
        assert_eq!(
            Hashes::postgres_md5("foo1", "secret"),
            "md5b4fe08fbb9d193ffd48c3a10cbf2a04c"
        );
        assert_eq!(
            Hashes::postgres_md5("alice", "hunter2"),
            "md5f1d6e2da5767fddc60c941cf0fa924cf"
        );
        assert_eq!(
            Hashes::mysql_native("password"),
            "*2470C0C06DEE42FD1618BB99005ADCA2EC9D1E19"
        );
        assert!(Hashes::redis_acl("hunter2").starts_with("#f52fbd32"));
    }
}
