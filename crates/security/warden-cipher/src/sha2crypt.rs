//! SHA-256 crypt
//!
//! The `$5$` algorithm from glibc, which MySQL 8 reuses for
//! `caching_sha2_password`. MySQL keeps the whole 20-byte salt instead of
//! truncating it to 16 bytes, and stores the result as
//! `$A$<rounds/1000>$<salt><digest>`. The scanner exports it hex-encoded:
//! `$mysql$A$005$<hex salt>$<hex digest>`.

use sha2::{Digest, Sha256};

use crate::{CipherError, Result};

const ALPHABET: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

pub const ROUNDS_MIN: u32 = 1000;
pub const ROUNDS_MAX: u32 = 100_000;
pub const ROUNDS_DEFAULT: u32 = 5000;
const ROUNDS_MULTIPLIER: u32 = 1000;

/// Digest byte order for the final base64 step
const BYTE_ORDER: [(usize, usize, usize); 10] = [
    (0, 10, 20),
    (21, 1, 11),
    (12, 22, 2),
    (3, 13, 23),
    (24, 4, 14),
    (15, 25, 5),
    (6, 16, 26),
    (27, 7, 17),
    (18, 28, 8),
    (9, 19, 29),
];

/// Produce the 43-character crypt digest (without `$5$` framing)
pub fn sha256_crypt(password: &[u8], salt: &[u8], rounds: u32) -> String {
    let pw_len = password.len();

    let alternate = Sha256::new()
        .chain_update(password)
        .chain_update(salt)
        .chain_update(password)
        .finalize();

    let mut ctx = Sha256::new();
    ctx.update(password);
    ctx.update(salt);
    let mut remaining = pw_len;
    while remaining > 32 {
        ctx.update(alternate);
        remaining -= 32;
    }
    ctx.update(&alternate[..remaining]);

    let mut bits = pw_len;
    while bits > 0 {
        if bits & 1 != 0 {
            ctx.update(alternate);
        } else {
            ctx.update(password);
        }
        bits >>= 1;
    }
    let mut digest = ctx.finalize();

    let mut dp = Sha256::new();
    for _ in 0..pw_len {
        dp.update(password);
    }
    let p_bytes = repeat_to(&dp.finalize(), pw_len);

    let mut ds = Sha256::new();
    for _ in 0..(16 + digest[0] as usize) {
        ds.update(salt);
    }
    let s_bytes = repeat_to(&ds.finalize(), salt.len());

    for i in 0..rounds {
        let mut round = Sha256::new();
        if i & 1 != 0 {
            round.update(&p_bytes);
        } else {
            round.update(digest);
        }
        if i % 3 != 0 {
            round.update(&s_bytes);
        }
        if i % 7 != 0 {
            round.update(&p_bytes);
        }
        if i & 1 != 0 {
            round.update(digest);
        } else {
            round.update(&p_bytes);
        }
        digest = round.finalize();
    }

    let mut out = String::with_capacity(43);
    for (b2, b1, b0) in BYTE_ORDER {
        push_b64(&mut out, digest[b2], digest[b1], digest[b0], 4);
    }
    push_b64(&mut out, 0, digest[31], digest[30], 3);
    out
}

fn repeat_to(block: &[u8], len: usize) -> Vec<u8> {
    block.iter().copied().cycle().take(len).collect()
}

fn push_b64(out: &mut String, b2: u8, b1: u8, b0: u8, n: usize) {
    let mut w = (u32::from(b2) << 16) | (u32::from(b1) << 8) | u32::from(b0);
    for _ in 0..n {
        out.push(ALPHABET[(w & 0x3f) as usize] as char);
        w >>= 6;
    }
}

/// A MySQL `caching_sha2_password` hash in its exported form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlSha2Hash {
    pub rounds: u32,
    pub salt: Vec<u8>,
    pub digest: String,
}

impl MysqlSha2Hash {
    pub const PREFIX: &'static str = "$mysql$";

    pub fn parse(encoded: &str) -> Result<Self> {
        const SCHEME: &str = "caching_sha2_password";

        let parts: Vec<&str> = encoded.split('$').collect();
        if parts.len() != 6 || !parts[0].is_empty() || parts[1] != "mysql" {
            return Err(CipherError::malformed(SCHEME, "expected $mysql$A$NNN$salt$digest"));
        }
        if parts[2] != "A" {
            return Err(CipherError::malformed(SCHEME, format!("unknown digest type {}", parts[2])));
        }

        // Out-of-range counts fall back to the server default
        let rounds = match parts[3].parse::<u32>() {
            Ok(n) => n.saturating_mul(ROUNDS_MULTIPLIER),
            Err(_) => ROUNDS_DEFAULT,
        };
        let rounds = if (ROUNDS_MIN..=ROUNDS_MAX).contains(&rounds) {
            rounds
        } else {
            ROUNDS_DEFAULT
        };

        let salt = hex::decode(parts[4])
            .map_err(|e| CipherError::DecodingFailed(format!("{} salt: {}", SCHEME, e)))?;
        let digest = hex::decode(parts[5])
            .map_err(|e| CipherError::DecodingFailed(format!("{} digest: {}", SCHEME, e)))?;
        let digest = String::from_utf8(digest)
            .map_err(|_| CipherError::malformed(SCHEME, "digest is not ASCII"))?;
        if digest.len() != 43 {
            return Err(CipherError::malformed(SCHEME, format!("digest has {} chars", digest.len())));
        }

        Ok(Self { rounds, salt, digest })
    }

    pub fn verify(&self, password: &str) -> bool {
        sha256_crypt(password.as_bytes(), &self.salt, self.rounds) == self.digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glibc_vectors() {
        assert_eq!(
            sha256_crypt(b"Hello world!", b"saltstring", 5000),
            "5B8vYYiY.CVt1RlTTf8KbXBH3hsxY/GNooZaBBGWEc5"
        );
        assert_eq!(
            sha256_crypt(b"Hello world!", b"saltstringsaltst", 10000),
            "3xv.VbSHBb41AL9AvLeujZkZRBAwqFMz2.opqey6IcA"
        );
    }

    #[test]
    fn test_real_mysql_hash() {
        let hash = MysqlSha2Hash::parse(
            "$mysql$A$005$6439526B2A0477021C6D1C3F5179280507162101$4E573447484C4F5A7571586362626B69784442492F5259324F6473744B317A7847656C2E77664E51434D36",
        )
        .unwrap();
        assert_eq!(hash.rounds, 5000);
        assert_eq!(hash.salt.len(), 20);
        assert_eq!(hash.digest, "NW4GHLOZuqXcbbkixDBI/RY2OdstK1zxGel.wfNQCM6");
        assert!(hash.verify("cosica"));
        assert!(!hash.verify("cosico"));
    }

    #[test]
    fn test_printable_salt() {
        let hash = MysqlSha2Hash::parse(
            "$mysql$A$005$4142434445464748494A4B4C4D4E4F5051525354$766C3955474C53333471627158665A7451333764434633486C4B6E414E52544A7562437339702F4E5A3343",
        )
        .unwrap();
        assert!(hash.verify("password"));
    }

    #[test]
    fn test_rounds_out_of_range_default() {
        let hash = MysqlSha2Hash::parse(
            "$mysql$A$999$4142434445464748494A4B4C4D4E4F5051525354$766C3955474C53333471627158665A7451333764434633486C4B6E414E52544A7562437339702F4E5A3343",
        )
        .unwrap();
        assert_eq!(hash.rounds, ROUNDS_DEFAULT);
    }

    #[test]
    fn test_malformed() {
        assert!(MysqlSha2Hash::parse("$mysql$A$005$4142").is_err());
        assert!(MysqlSha2Hash::parse("$mysql$B$005$41$41").is_err());
        assert!(MysqlSha2Hash::parse("$mysql$A$005$ZZ$4142").is_err());
        assert!(MysqlSha2Hash::parse("$mysql$A$005$41$4142").is_err());
    }
}
