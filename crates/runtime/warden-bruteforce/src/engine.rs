//! Bruteforce loop
//!
//! For every credential a scanner reports, try the corpus until a candidate
//! verifies or the corpus runs out. Progress goes to a [`StatusSink`] keyed
//! by username, at most once per throttle interval while enumerating and
//! always on state changes.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use warden_cipher::Credential;
use warden_core::{BruteforceUserStatus, CancelToken, Finding, Result, ScanError, Severity};
use warden_scanner::Scanner;

use crate::provider::{CursorGuard, PasswordProvider};
use crate::throttle::ProgressThrottle;

pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Receives the full status map on every report
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn on_status(&self, statuses: &BTreeMap<String, BruteforceUserStatus>) -> Result<()>;
}

pub fn found_message(username: &str, password: &str) -> String {
    format!(
        "Found password for user {} using bruteforce. Discovered password: {}",
        username, password
    )
}

/// Bruteforce every credential `scanner` returns. Yields one High finding
/// per cracked credential.
pub async fn bruteforce_all_users(
    scanner: &dyn Scanner,
    provider: &mut dyn PasswordProvider,
    sink: &dyn StatusSink,
    cancel: &CancelToken,
    interval: Duration,
) -> Result<Vec<Finding>> {
    cancel.check()?;
    let credentials = scanner.get_users().await?;
    let total = provider.count().await?;

    let mut statuses: BTreeMap<String, BruteforceUserStatus> = BTreeMap::new();
    for credential in &credentials {
        statuses
            .entry(credential.username.clone())
            .or_insert_with(|| BruteforceUserStatus::new(total));
    }
    let mut run = Run {
        provider,
        sink,
        cancel,
        throttle: ProgressThrottle::new(interval),
        statuses,
        total,
    };
    run.report().await?;

    let mut findings = Vec::new();
    for credential in credentials {
        cancel.check()?;

        let already_found = run
            .statuses
            .get(&credential.username)
            .map_or(false, |s| s.password.is_some());
        if already_found {
            continue;
        }

        let username = credential.username.clone();
        let cracked = run.crack(Arc::new(credential)).await?;
        if let Some(password) = cracked {
            tracing::info!(%username, "credential cracked");
            findings.push(Finding::new(Severity::High, found_message(&username, &password)));
            if let Some(status) = run.statuses.get_mut(&username) {
                status.found(password);
            }
        }
        run.report().await?;
    }

    Ok(findings)
}

struct Run<'a> {
    provider: &'a mut dyn PasswordProvider,
    sink: &'a dyn StatusSink,
    cancel: &'a CancelToken,
    throttle: ProgressThrottle,
    statuses: BTreeMap<String, BruteforceUserStatus>,
    total: u64,
}

impl Run<'_> {
    async fn report(&mut self) -> Result<()> {
        self.throttle.mark();
        self.sink.on_status(&self.statuses).await
    }

    fn set_tried(&mut self, username: &str, tried: u64) {
        if let Some(status) = self.statuses.get_mut(username) {
            status.tried = tried.min(self.total);
        }
    }

    async fn crack(&mut self, credential: Arc<Credential>) -> Result<Option<String>> {
        let username = credential.username.as_str();

        if let Some(raw) = credential.raw_password() {
            let known = self.provider.lookup_specific(raw).await?;
            self.set_tried(username, self.total);
            return Ok(known.map(|_| raw.to_string()));
        }

        let from = match self.provider.get_cracked_hash(username, &credential.hash).await? {
            Some((Some(password), _)) => {
                tracing::debug!(%username, "crack cache hit");
                return Ok(Some(password));
            }
            Some((None, cursor)) => {
                tracing::debug!(%username, cursor, "resuming from crack cache");
                cursor
            }
            None => 0,
        };
        let done = if from == 0 {
            0
        } else {
            self.total
                .saturating_sub(self.provider.count_after(from).await?)
        };
        self.set_tried(username, done);

        let (found, high) = self.enumerate(&credential, from, done).await?;
        self.provider
            .save_cracked_hash(username, &credential.hash, found.as_deref(), high)
            .await?;
        Ok(found)
    }

    /// Walk the corpus after `from`. Returns the match and the highest id
    /// covered. Only a completed walk is memoized, so that id is a safe
    /// resume point.
    async fn enumerate(
        &mut self,
        credential: &Arc<Credential>,
        from: u64,
        mut tried: u64,
    ) -> Result<(Option<String>, u64)> {
        let username = credential.username.clone();
        let mut cursor = CursorGuard::start(&mut *self.provider, from).await?;
        let mut high = from;

        while cursor.next().await {
            self.cancel.check()?;
            let Some((id, candidate)) = cursor.current() else {
                break;
            };
            let candidate = candidate.to_string();
            high = high.max(id);

            let matched = {
                let credential = Arc::clone(credential);
                let candidate = candidate.clone();
                tokio::task::spawn_blocking(move || credential.verify(&candidate))
                    .await
                    .map_err(|e| ScanError::Provider(format!("verifier task failed: {}", e)))?
            };
            if matched {
                return Ok((Some(candidate), high));
            }

            tried += 1;
            if let Some(status) = self.statuses.get_mut(&username) {
                status.tried = tried.min(self.total);
            }
            if self.throttle.ready() {
                self.sink.on_status(&self.statuses).await?;
            }
        }

        if let Some(e) = cursor.error() {
            return Err(ScanError::Provider(e.to_string()));
        }
        Ok((None, high))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ListPasswordProvider, StoragePasswordProvider, DEFAULT_PAGE_SIZE};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use warden_cipher::Hashes;
    use warden_core::{Backend, PasswordStore, ScanError};
    use warden_store::MemoryStore;

    struct FakeScanner {
        users: Vec<Credential>,
    }

    #[async_trait]
    impl Scanner for FakeScanner {
        fn backend(&self) -> Backend {
            Backend::Postgres
        }

        async fn get_users(&self) -> Result<Vec<Credential>> {
            Ok(self.users.clone())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<BTreeMap<String, BruteforceUserStatus>>>,
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        async fn on_status(&self, statuses: &BTreeMap<String, BruteforceUserStatus>) -> Result<()> {
            self.reports.lock().unwrap().push(statuses.clone());
            Ok(())
        }
    }

    /// Counts cursor traffic on top of a list provider
    struct Counting {
        inner: ListPasswordProvider,
        nexts: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        fail_after: Option<usize>,
        error: Option<ScanError>,
    }

    impl Counting {
        fn new(words: &[&str]) -> Self {
            Self {
                inner: ListPasswordProvider::new(words.iter().copied()),
                nexts: Arc::new(AtomicUsize::new(0)),
                closes: Arc::new(AtomicUsize::new(0)),
                fail_after: None,
                error: None,
            }
        }
    }

    #[async_trait]
    impl PasswordProvider for Counting {
        async fn count_after(&mut self, from: u64) -> Result<u64> {
            self.inner.count_after(from).await
        }
        async fn lookup_specific(&mut self, password: &str) -> Result<Option<u64>> {
            self.inner.lookup_specific(password).await
        }
        async fn start(&mut self, from: u64) -> Result<()> {
            self.inner.start(from).await
        }
        async fn next(&mut self) -> bool {
            let n = self.nexts.fetch_add(1, Ordering::SeqCst);
            if self.fail_after == Some(n) {
                self.error = Some(ScanError::Storage("page fetch failed".into()));
                return false;
            }
            self.inner.next().await
        }
        fn current(&self) -> Option<(u64, &str)> {
            self.inner.current()
        }
        fn error(&self) -> Option<&ScanError> {
            self.error.as_ref()
        }
        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close()
        }
        async fn save_cracked_hash(&mut self, u: &str, h: &str, p: Option<&str>, c: u64) -> Result<()> {
            self.inner.save_cracked_hash(u, h, p, c).await
        }
        async fn get_cracked_hash(&mut self, u: &str, h: &str) -> Result<Option<(Option<String>, u64)>> {
            self.inner.get_cracked_hash(u, h).await
        }
    }

    const WORDS: &[&str] = &["123456", "admin", "hunter2", "letmein", "postgres"];

    fn md5_user(username: &str, password: &str) -> Credential {
        Credential::new(username, false, Hashes::postgres_md5(username, password))
    }

    #[tokio::test]
    async fn test_finds_password_and_marks_tried_total() {
        let scanner = FakeScanner {
            users: vec![md5_user("alice", "hunter2"), md5_user("bob", "not-in-corpus")],
        };
        let mut provider = Counting::new(WORDS);
        let sink = RecordingSink::default();

        let findings = bruteforce_all_users(&scanner, &mut provider, &sink, &CancelToken::new(), PROGRESS_INTERVAL)
            .await
            .unwrap();

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
        assert!(findings[0].message.contains("alice"));
        assert!(findings[0].message.contains("hunter2"));

        let reports = sink.reports.lock().unwrap();
        let first = &reports[0];
        assert_eq!(first["alice"], BruteforceUserStatus::new(5));
        assert_eq!(first["bob"], BruteforceUserStatus::new(5));

        let last = reports.last().unwrap();
        assert_eq!(last["alice"].tried, 5);
        assert_eq!(last["alice"].password.as_deref(), Some("hunter2"));
        assert_eq!(last["bob"].tried, 5);
        assert_eq!(last["bob"].password, None);

        // alice stops at 3 candidates, bob drains 5 plus the terminating call
        assert!(provider.nexts.load(Ordering::SeqCst) <= 3 + 6);
        assert_eq!(provider.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_memo_skips_enumeration() {
        let scanner = FakeScanner {
            users: vec![md5_user("alice", "hunter2")],
        };
        let mut provider = Counting::new(WORDS);
        let sink = RecordingSink::default();
        let cancel = CancelToken::new();

        bruteforce_all_users(&scanner, &mut provider, &sink, &cancel, PROGRESS_INTERVAL)
            .await
            .unwrap();
        let nexts = provider.nexts.load(Ordering::SeqCst);

        let findings = bruteforce_all_users(&scanner, &mut provider, &sink, &cancel, PROGRESS_INTERVAL)
            .await
            .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(provider.nexts.load(Ordering::SeqCst), nexts);
        assert_eq!(provider.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_memo_resumes_after_cursor() {
        let alice = md5_user("alice", "postgres");
        let mut provider = Counting::new(WORDS);
        provider
            .save_cracked_hash("alice", &alice.hash, None, 3)
            .await
            .unwrap();

        let scanner = FakeScanner { users: vec![alice] };
        let findings = bruteforce_all_users(
            &scanner,
            &mut provider,
            &RecordingSink::default(),
            &CancelToken::new(),
            PROGRESS_INTERVAL,
        )
        .await
        .unwrap();

        assert_eq!(findings.len(), 1);
        // ids 4 and 5 only
        assert_eq!(provider.nexts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_plaintext_uses_specific_lookup() {
        let scanner = FakeScanner {
            users: vec![
                Credential::new("legacy", false, "letmein"),
                Credential::new("strong", false, "correct horse battery staple"),
            ],
        };
        let mut provider = Counting::new(WORDS);
        let sink = RecordingSink::default();

        let findings = bruteforce_all_users(&scanner, &mut provider, &sink, &CancelToken::new(), PROGRESS_INTERVAL)
            .await
            .unwrap();

        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("letmein"));
        assert_eq!(provider.nexts.load(Ordering::SeqCst), 0);
        assert_eq!(provider.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_username_skipped_after_match() {
        let scanner = FakeScanner {
            users: vec![
                md5_user("alice", "admin"),
                Credential::new("alice", false, Hashes::redis_acl("admin")),
            ],
        };
        let mut provider = Counting::new(WORDS);
        let findings = bruteforce_all_users(
            &scanner,
            &mut provider,
            &RecordingSink::default(),
            &CancelToken::new(),
            PROGRESS_INTERVAL,
        )
        .await
        .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(provider.nexts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_provider_error_fails_and_closes() {
        let scanner = FakeScanner {
            users: vec![md5_user("alice", "postgres")],
        };
        let mut provider = Counting::new(WORDS);
        provider.fail_after = Some(1);

        let err = bruteforce_all_users(
            &scanner,
            &mut provider,
            &RecordingSink::default(),
            &CancelToken::new(),
            PROGRESS_INTERVAL,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ScanError::Provider(_)));
        assert_eq!(provider.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let scanner = FakeScanner {
            users: vec![md5_user("alice", "hunter2")],
        };
        let mut provider = Counting::new(WORDS);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = bruteforce_all_users(&scanner, &mut provider, &RecordingSink::default(), &cancel, PROGRESS_INTERVAL)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));
        assert_eq!(provider.nexts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_interval_reports_every_candidate() {
        let scanner = FakeScanner {
            users: vec![md5_user("alice", "hunter2")],
        };
        let mut provider = Counting::new(WORDS);
        let sink = RecordingSink::default();

        bruteforce_all_users(&scanner, &mut provider, &sink, &CancelToken::new(), Duration::ZERO)
            .await
            .unwrap();

        let tried: Vec<u64> = sink
            .reports
            .lock()
            .unwrap()
            .iter()
            .map(|r| r["alice"].tried)
            .collect();
        // seed, two misses, then the match
        assert_eq!(tried, vec![0, 1, 2, 5]);
    }

    #[tokio::test]
    async fn test_long_interval_reports_only_state_changes() {
        let scanner = FakeScanner {
            users: vec![md5_user("bob", "not-in-corpus")],
        };
        let mut provider = Counting::new(WORDS);
        let sink = RecordingSink::default();

        bruteforce_all_users(&scanner, &mut provider, &sink, &CancelToken::new(), Duration::from_secs(60))
            .await
            .unwrap();

        let reports = sink.reports.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0]["bob"].tried, 0);
        assert_eq!(reports[1]["bob"].tried, 5);
    }

    /// Cancels the token once it has seen `after` reports
    struct CancellingSink {
        cancel: CancelToken,
        after: usize,
        seen: AtomicUsize,
    }

    #[async_trait]
    impl StatusSink for CancellingSink {
        async fn on_status(&self, _statuses: &BTreeMap<String, BruteforceUserStatus>) -> Result<()> {
            if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
                self.cancel.cancel();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancelled_between_candidates() {
        let bob = md5_user("bob", "not-in-corpus");
        let scanner = FakeScanner {
            users: vec![bob.clone()],
        };
        let mut provider = Counting::new(WORDS);
        let cancel = CancelToken::new();
        let sink = CancellingSink {
            cancel: cancel.clone(),
            after: 2,
            seen: AtomicUsize::new(0),
        };

        let err = bruteforce_all_users(&scanner, &mut provider, &sink, &cancel, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));
        // the first candidate was tried, the second was fetched and dropped
        assert_eq!(provider.nexts.load(Ordering::SeqCst), 2);
        assert_eq!(provider.closes.load(Ordering::SeqCst), 1);
        assert_eq!(provider.get_cracked_hash("bob", &bob.hash).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_secret_added_after_exhaustion_is_tried() {
        let store = Arc::new(MemoryStore::new());
        let alice = md5_user("alice", "zz-harvested");
        let scanner = FakeScanner {
            users: vec![alice.clone()],
        };
        let cancel = CancelToken::new();

        let mut provider = StoragePasswordProvider::new(store.clone(), 1, DEFAULT_PAGE_SIZE);
        let findings = bruteforce_all_users(&scanner, &mut provider, &RecordingSink::default(), &cancel, PROGRESS_INTERVAL)
            .await
            .unwrap();
        assert!(findings.is_empty());
        let exhausted = store.cracked_hash(1, "alice", &alice.hash).await.unwrap().unwrap();
        assert_eq!(exhausted.password, None);

        assert!(store.add_project_secret(1, "zz-harvested").await);

        let sink = RecordingSink::default();
        let mut provider = StoragePasswordProvider::new(store.clone(), 1, DEFAULT_PAGE_SIZE);
        let findings = bruteforce_all_users(&scanner, &mut provider, &sink, &cancel, PROGRESS_INTERVAL)
            .await
            .unwrap();
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("zz-harvested"));

        let memo = store.cracked_hash(1, "alice", &alice.hash).await.unwrap().unwrap();
        assert_eq!(memo.password.as_deref(), Some("zz-harvested"));
        assert!(memo.last_cursor > exhausted.last_cursor);
    }

    #[tokio::test]
    async fn test_no_users_reports_empty_map() {
        let scanner = FakeScanner { users: Vec::new() };
        let mut provider = Counting::new(WORDS);
        let sink = RecordingSink::default();
        let findings = bruteforce_all_users(&scanner, &mut provider, &sink, &CancelToken::new(), PROGRESS_INTERVAL)
            .await
            .unwrap();
        assert!(findings.is_empty());
        let reports = sink.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_empty());
    }
}
