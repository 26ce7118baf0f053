//! Built-in password corpus
//!
//! Tried after a project's harvested secrets.

pub struct Wordlist;

impl Wordlist {
    /// Generate common passwords
    pub fn common_passwords() -> Vec<&'static str> {
        vec![
            "password", "123456", "123456789", "12345678", "12345",
            "qwerty", "abc123", "password1", "password123", "1234567",
            "123123", "admin", "letmein", "welcome", "monkey",
            "dragon", "master", "login", "princess", "solo",
            "passw0rd", "starwars", "hello", "charlie", "donald",
            "root", "toor", "test", "guest", "administrator",
            "P@ssw0rd", "P@ssword1", "Password1", "Password123",
            "qwerty123", "iloveyou", "sunshine", "trustno1",
        ]
    }

    /// Defaults shipped by database images and tutorials
    pub fn database_defaults() -> Vec<&'static str> {
        vec![
            "postgres", "postgres123", "mysql", "redis", "mongo",
            "mongodb", "changeme", "secret", "example", "pass",
            "dbpassword", "db_password", "rootpassword", "my-secret-pw",
        ]
    }

    /// The default corpus, deduplicated, in try order
    pub fn default_corpus() -> Vec<&'static str> {
        let mut seen = std::collections::HashSet::new();
        Self::database_defaults()
            .into_iter()
            .chain(Self::common_passwords())
            .filter(|w| seen.insert(*w))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_corpus_unique() {
        let corpus = Wordlist::default_corpus();
        let unique: std::collections::HashSet<_> = corpus.iter().collect();
        assert_eq!(unique.len(), corpus.len());
        assert_eq!(corpus[0], "postgres");
        assert!(corpus.contains(&"letmein"));
    }
}
