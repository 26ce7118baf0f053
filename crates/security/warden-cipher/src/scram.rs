//! SCRAM stored secrets
//!
//! Both PostgreSQL (`rolpassword`) and MongoDB (`usersInfo` credentials) keep
//! `StoredKey` and `ServerKey` instead of the password. They are encoded here
//! as `SCRAM-SHA-<n>$<iterations>:<b64 salt>$<b64 StoredKey>:<b64 ServerKey>`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::hashes::Hashes;
use crate::{CipherError, Result};

/// Largest iteration count accepted. Server defaults are 4096 to 15000.
pub const MAX_ITERATIONS: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScramMechanism {
    Sha1,
    Sha256,
}

impl ScramMechanism {
    pub fn name(&self) -> &'static str {
        match self {
            ScramMechanism::Sha1 => "SCRAM-SHA-1",
            ScramMechanism::Sha256 => "SCRAM-SHA-256",
        }
    }

    fn hmac(&self, key: &[u8], data: &[&[u8]]) -> Result<Vec<u8>> {
        match self {
            ScramMechanism::Sha1 => {
                let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key)
                    .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
                for chunk in data {
                    mac.update(chunk);
                }
                Ok(mac.finalize().into_bytes().to_vec())
            }
            ScramMechanism::Sha256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
                    .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
                for chunk in data {
                    mac.update(chunk);
                }
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }

    fn hash(&self, data: &[u8]) -> Vec<u8> {
        match self {
            ScramMechanism::Sha1 => Sha1::digest(data).to_vec(),
            ScramMechanism::Sha256 => Sha256::digest(data).to_vec(),
        }
    }

    /// `Hi(password, salt, i)` from RFC 5802
    pub fn salted_password(&self, password: &[u8], salt: &[u8], iterations: u32) -> Result<Vec<u8>> {
        check_iterations(self.name(), iterations)?;

        let mut block = self.hmac(password, &[salt, &1u32.to_be_bytes()])?;
        let mut result = block.clone();
        for _ in 1..iterations {
            block = self.hmac(password, &[&block])?;
            result.iter_mut().zip(&block).for_each(|(r, b)| *r ^= b);
        }
        Ok(result)
    }

    /// `(StoredKey, ServerKey)` for a password
    pub fn derive_keys(&self, password: &[u8], salt: &[u8], iterations: u32) -> Result<(Vec<u8>, Vec<u8>)> {
        let salted = self.salted_password(password, salt, iterations)?;
        let client_key = self.hmac(&salted, &[b"Client Key"])?;
        let server_key = self.hmac(&salted, &[b"Server Key"])?;
        Ok((self.hash(&client_key), server_key))
    }
}

fn check_iterations(scheme: &'static str, iterations: u32) -> Result<()> {
    if iterations == 0 {
        return Err(CipherError::malformed(scheme, "zero iterations"));
    }
    if iterations > MAX_ITERATIONS {
        return Err(CipherError::malformed(
            scheme,
            format!("{} iterations exceeds the limit of {}", iterations, MAX_ITERATIONS),
        ));
    }
    Ok(())
}

/// A parsed SCRAM verifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScramSecret {
    pub mechanism: ScramMechanism,
    pub iterations: u32,
    pub salt: Vec<u8>,
    pub stored_key: Vec<u8>,
    pub server_key: Vec<u8>,
}

impl ScramSecret {
    pub fn parse(encoded: &str) -> Result<Self> {
        let (mechanism, rest) = if let Some(rest) = encoded.strip_prefix("SCRAM-SHA-256$") {
            (ScramMechanism::Sha256, rest)
        } else if let Some(rest) = encoded.strip_prefix("SCRAM-SHA-1$") {
            (ScramMechanism::Sha1, rest)
        } else {
            return Err(CipherError::malformed("SCRAM", "unknown mechanism prefix"));
        };
        let scheme = mechanism.name();

        let (params, keys) = rest
            .split_once('$')
            .ok_or_else(|| CipherError::malformed(scheme, "missing key section"))?;
        let (iterations, salt) = params
            .split_once(':')
            .ok_or_else(|| CipherError::malformed(scheme, "missing salt"))?;
        let (stored_key, server_key) = keys
            .split_once(':')
            .ok_or_else(|| CipherError::malformed(scheme, "missing server key"))?;

        let iterations: u32 = iterations
            .parse()
            .map_err(|_| CipherError::malformed(scheme, format!("bad iteration count {:?}", iterations)))?;
        check_iterations(scheme, iterations)?;

        let decode = |field: &str| {
            BASE64
                .decode(field)
                .map_err(|e| CipherError::DecodingFailed(format!("{}: {}", scheme, e)))
        };

        Ok(Self {
            mechanism,
            iterations,
            salt: decode(salt)?,
            stored_key: decode(stored_key)?,
            server_key: decode(server_key)?,
        })
    }

    /// Build a verifier from a password, as the server would on `CREATE USER`
    pub fn generate(
        mechanism: ScramMechanism,
        username: &str,
        password: &str,
        salt: &[u8],
        iterations: u32,
    ) -> Result<Self> {
        let input = Self::password_input(mechanism, username, password);
        let (stored_key, server_key) = mechanism.derive_keys(input.as_bytes(), salt, iterations)?;
        Ok(Self {
            mechanism,
            iterations,
            salt: salt.to_vec(),
            stored_key,
            server_key,
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "{}${}:{}${}:{}",
            self.mechanism.name(),
            self.iterations,
            BASE64.encode(&self.salt),
            BASE64.encode(&self.stored_key),
            BASE64.encode(&self.server_key)
        )
    }

    /// Check a candidate. Only SCRAM-SHA-1 mixes the username in.
    pub fn verify(&self, username: &str, password: &str) -> Result<bool> {
        let input = Self::password_input(self.mechanism, username, password);
        let (stored_key, server_key) =
            self.mechanism
                .derive_keys(input.as_bytes(), &self.salt, self.iterations)?;
        Ok(stored_key == self.stored_key && server_key == self.server_key)
    }

    fn password_input(mechanism: ScramMechanism, username: &str, password: &str) -> String {
        match mechanism {
            ScramMechanism::Sha1 => Hashes::mongo_digest(username, password),
            ScramMechanism::Sha256 => password.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PG_SCRAM: &str = "SCRAM-SHA-256$4096:x1Y7a1TyFE4fFwUOMyvX8Q==$WvMDOS/ZDzXzaHjpPqzkqXrd1ntcDIi7P2jQwYgI0e4=:Wf431GYj+SeayVQ6zOijoV5xQwzZKyGoVU7IAbXTO7U=";

    #[test]
    fn test_postgres_vector() {
        let secret = ScramSecret::parse(PG_SCRAM).unwrap();
        assert_eq!(secret.iterations, 4096);
        assert!(secret.verify("postgres", "postgres").unwrap());
        assert!(!secret.verify("postgres", "postgres123").unwrap());
        // Username is not part of SCRAM-SHA-256
        assert!(secret.verify("someone_else", "postgres").unwrap());
    }

    #[test]
    fn test_mongo_sha1_vector() {
        let encoded = "SCRAM-SHA-1$10000:bW9uZ29zYWx0dmFsdWUxMg==$REkFIRL38Df06b59LxclJ0ilEtw=:6DE7BM/XYxGM5yWhZrv2RdzZU90=";
        let secret = ScramSecret::parse(encoded).unwrap();
        assert_eq!(secret.mechanism, ScramMechanism::Sha1);
        assert!(secret.verify("admin", "hunter2").unwrap());
        assert!(!secret.verify("admin", "hunter3").unwrap());
        assert!(!secret.verify("root", "hunter2").unwrap());
    }

    #[test]
    fn test_mongo_sha256_vector() {
        let encoded = "SCRAM-SHA-256$15000:bW9uZ29zaGEyNTZzYWx0IXNhbHQxMjM0$olxv3w5U72BFz9L/wPBe763Uj5BORPX1OOkh48P+Mt8=:gW3I3qByBSxoRGsWFAx7ko1LYCkOZQ9/2Rof7ZOaZLs=";
        let secret = ScramSecret::parse(encoded).unwrap();
        assert!(secret.verify("admin", "hunter2").unwrap());
        assert_eq!(secret.encode(), encoded);
    }

    #[test]
    fn test_generate_matches_vector() {
        let secret = ScramSecret::generate(
            ScramMechanism::Sha1,
            "admin",
            "hunter2",
            b"mongosaltvalue12",
            10000,
        )
        .unwrap();
        assert_eq!(
            secret.encode(),
            "SCRAM-SHA-1$10000:bW9uZ29zYWx0dmFsdWUxMg==$REkFIRL38Df06b59LxclJ0ilEtw=:6DE7BM/XYxGM5yWhZrv2RdzZU90="
        );
    }

    #[test]
    fn test_malformed() {
        assert!(ScramSecret::parse("SCRAM-SHA-256$abc:x1Y7$a:b").is_err());
        assert!(ScramSecret::parse("SCRAM-SHA-256$4096:x1Y7a1TyFE4fFwUOMyvX8Q==").is_err());
        assert!(ScramSecret::parse("SCRAM-SHA-256$0:AAAA$AAAA:AAAA").is_err());
        assert!(ScramSecret::parse("SCRAM-SHA-256$4096:***$AAAA:AAAA").is_err());
    }

    #[test]
    fn test_iteration_cap() {
        let at_cap = format!("SCRAM-SHA-256${}:AAAA$AAAA:AAAA", MAX_ITERATIONS);
        assert_eq!(ScramSecret::parse(&at_cap).unwrap().iterations, MAX_ITERATIONS);

        let over = format!("SCRAM-SHA-1${}:AAAA$AAAA:AAAA", MAX_ITERATIONS + 1);
        assert!(matches!(
            ScramSecret::parse(&over),
            Err(CipherError::Malformed { scheme: "SCRAM-SHA-1", .. })
        ));
        assert!(matches!(
            ScramSecret::parse("SCRAM-SHA-256$4294967295:AAAA$AAAA:AAAA"),
            Err(CipherError::Malformed { .. })
        ));
        assert!(ScramMechanism::Sha256
            .salted_password(b"pw", b"salt", MAX_ITERATIONS + 1)
            .is_err());
    }
}
