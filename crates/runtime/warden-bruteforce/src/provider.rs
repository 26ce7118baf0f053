//! Password providers
//!
//! A provider is a password corpus whose entries carry stable ids, a cursor
//! that can resume after any id, and a memo of earlier crack attempts.
//! `start(k)` followed by draining `next()` yields exactly the entries with
//! id greater than `k`, in corpus order. Ids grow with insertion, so `k` is a
//! high-water mark: entries added after a run finished are always past it.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use warden_core::{CrackedHash, PasswordStore, Result, ScanError};

/// Rows fetched per storage round trip
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

#[async_trait]
pub trait PasswordProvider: Send {
    async fn count(&mut self) -> Result<u64> {
        self.count_after(0).await
    }

    /// Number of entries a cursor started at `from` would yield
    async fn count_after(&mut self, from: u64) -> Result<u64>;

    /// Id of `password` if the corpus contains it
    async fn lookup_specific(&mut self, password: &str) -> Result<Option<u64>>;

    /// Position the cursor after id `from`
    async fn start(&mut self, from: u64) -> Result<()>;

    /// Advance. False at the end of the corpus or on error, see `error`.
    async fn next(&mut self) -> bool;

    fn current(&self) -> Option<(u64, &str)>;

    fn error(&self) -> Option<&ScanError>;

    /// Release the cursor
    fn close(&mut self);

    async fn save_cracked_hash(
        &mut self,
        username: &str,
        hash: &str,
        password: Option<&str>,
        cursor: u64,
    ) -> Result<()>;

    /// `(password, last cursor id)` from an earlier attempt
    async fn get_cracked_hash(&mut self, username: &str, hash: &str) -> Result<Option<(Option<String>, u64)>>;
}

/// Builds providers scoped to a project
pub trait BruteforceProvider: Send + Sync {
    fn provider(&self, project_id: i64) -> Box<dyn PasswordProvider>;
}

/// Closes the provider's cursor when dropped, whatever path the caller takes
pub struct CursorGuard<'a> {
    provider: &'a mut dyn PasswordProvider,
}

impl<'a> CursorGuard<'a> {
    pub async fn start(provider: &'a mut dyn PasswordProvider, from: u64) -> Result<CursorGuard<'a>> {
        provider.start(from).await?;
        Ok(Self { provider })
    }
}

impl<'a> Deref for CursorGuard<'a> {
    type Target = dyn PasswordProvider + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.provider
    }
}

impl<'a> DerefMut for CursorGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.provider
    }
}

impl Drop for CursorGuard<'_> {
    fn drop(&mut self) {
        self.provider.close();
    }
}

type Memo = HashMap<(String, String), (Option<String>, u64)>;

/// In-memory corpus
pub struct ListPasswordProvider {
    words: Arc<Vec<String>>,
    next_index: usize,
    current: Option<usize>,
    memo: Arc<Mutex<Memo>>,
}

impl ListPasswordProvider {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::shared(
            Arc::new(words.into_iter().map(Into::into).collect()),
            Arc::new(Mutex::new(Memo::new())),
        )
    }

    fn shared(words: Arc<Vec<String>>, memo: Arc<Mutex<Memo>>) -> Self {
        Self {
            words,
            next_index: 0,
            current: None,
            memo,
        }
    }

    fn memo(&self) -> Result<std::sync::MutexGuard<'_, Memo>> {
        self.memo
            .lock()
            .map_err(|_| ScanError::Provider("crack cache lock poisoned".into()))
    }
}

#[async_trait]
impl PasswordProvider for ListPasswordProvider {
    async fn count_after(&mut self, from: u64) -> Result<u64> {
        let len = self.words.len() as u64;
        Ok(len - from.min(len))
    }

    async fn lookup_specific(&mut self, password: &str) -> Result<Option<u64>> {
        Ok(self
            .words
            .iter()
            .position(|w| w == password)
            .map(|i| i as u64 + 1))
    }

    async fn start(&mut self, from: u64) -> Result<()> {
        self.next_index = usize::try_from(from).unwrap_or(usize::MAX).min(self.words.len());
        self.current = None;
        Ok(())
    }

    async fn next(&mut self) -> bool {
        if self.next_index < self.words.len() {
            self.current = Some(self.next_index);
            self.next_index += 1;
            true
        } else {
            self.current = None;
            false
        }
    }

    fn current(&self) -> Option<(u64, &str)> {
        self.current
            .map(|i| (i as u64 + 1, self.words[i].as_str()))
    }

    fn error(&self) -> Option<&ScanError> {
        None
    }

    fn close(&mut self) {
        self.current = None;
        self.next_index = self.words.len();
    }

    async fn save_cracked_hash(
        &mut self,
        username: &str,
        hash: &str,
        password: Option<&str>,
        cursor: u64,
    ) -> Result<()> {
        self.memo()?.insert(
            (username.to_string(), hash.to_string()),
            (password.map(String::from), cursor),
        );
        Ok(())
    }

    async fn get_cracked_hash(&mut self, username: &str, hash: &str) -> Result<Option<(Option<String>, u64)>> {
        Ok(self
            .memo()?
            .get(&(username.to_string(), hash.to_string()))
            .cloned())
    }
}

/// Hands out list providers that share one corpus and one crack cache
pub struct ListProviderFactory {
    words: Arc<Vec<String>>,
    memo: Arc<Mutex<Memo>>,
}

impl ListProviderFactory {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            words: Arc::new(words.into_iter().map(Into::into).collect()),
            memo: Arc::new(Mutex::new(Memo::new())),
        }
    }
}

impl BruteforceProvider for ListProviderFactory {
    fn provider(&self, _project_id: i64) -> Box<dyn PasswordProvider> {
        Box::new(ListPasswordProvider::shared(
            Arc::clone(&self.words),
            Arc::clone(&self.memo),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Secrets,
    Wordlist,
    Done,
}

/// Corpus paged out of a [`PasswordStore`]: project secrets, then the
/// global wordlist
pub struct StoragePasswordProvider {
    store: Arc<dyn PasswordStore>,
    project_id: i64,
    page_size: usize,
    buffer: VecDeque<(u64, String)>,
    from: u64,
    /// Last id fetched within the current phase
    after: u64,
    phase: Phase,
    current: Option<(u64, String)>,
    error: Option<ScanError>,
}

impl StoragePasswordProvider {
    pub fn new(store: Arc<dyn PasswordStore>, project_id: i64, page_size: usize) -> Self {
        Self {
            store,
            project_id,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            from: 0,
            after: 0,
            phase: Phase::Done,
            current: None,
            error: None,
        }
    }

    async fn fill(&mut self) -> Result<()> {
        while self.buffer.is_empty() {
            let page = match self.phase {
                Phase::Secrets => {
                    self.store
                        .secret_page(self.project_id, self.after, self.page_size)
                        .await?
                }
                Phase::Wordlist => self.store.wordlist_page(self.after, self.page_size).await?,
                Phase::Done => return Ok(()),
            };
            tracing::trace!(project_id = self.project_id, phase = ?self.phase, after = self.after, rows = page.len(), "fetched password page");

            if let Some((id, _)) = page.last() {
                self.after = *id;
            }
            if page.len() < self.page_size {
                self.phase = match self.phase {
                    Phase::Secrets => {
                        self.after = self.from;
                        Phase::Wordlist
                    }
                    _ => Phase::Done,
                };
            }
            self.buffer.extend(page);
        }
        Ok(())
    }
}

#[async_trait]
impl PasswordProvider for StoragePasswordProvider {
    async fn count_after(&mut self, from: u64) -> Result<u64> {
        self.store.password_count(self.project_id, from).await
    }

    async fn lookup_specific(&mut self, password: &str) -> Result<Option<u64>> {
        self.store.find_password(self.project_id, password).await
    }

    async fn start(&mut self, from: u64) -> Result<()> {
        self.buffer.clear();
        self.from = from;
        self.after = from;
        self.phase = Phase::Secrets;
        self.current = None;
        self.error = None;
        Ok(())
    }

    async fn next(&mut self) -> bool {
        if self.buffer.is_empty() {
            if let Err(e) = self.fill().await {
                self.error = Some(e);
                self.phase = Phase::Done;
            }
        }
        match self.buffer.pop_front() {
            Some((id, password)) => {
                self.current = Some((id, password));
                true
            }
            None => {
                self.current = None;
                false
            }
        }
    }

    fn current(&self) -> Option<(u64, &str)> {
        self.current.as_ref().map(|(id, p)| (*id, p.as_str()))
    }

    fn error(&self) -> Option<&ScanError> {
        self.error.as_ref()
    }

    fn close(&mut self) {
        self.buffer.clear();
        self.current = None;
        self.phase = Phase::Done;
    }

    async fn save_cracked_hash(
        &mut self,
        username: &str,
        hash: &str,
        password: Option<&str>,
        cursor: u64,
    ) -> Result<()> {
        self.store
            .save_cracked_hash(CrackedHash {
                project_id: self.project_id,
                username: username.to_string(),
                hash: hash.to_string(),
                password: password.map(String::from),
                last_cursor: cursor,
            })
            .await
    }

    async fn get_cracked_hash(&mut self, username: &str, hash: &str) -> Result<Option<(Option<String>, u64)>> {
        Ok(self
            .store
            .cracked_hash(self.project_id, username, hash)
            .await?
            .map(|c| (c.password, c.last_cursor)))
    }
}

pub struct StorageProviderFactory {
    store: Arc<dyn PasswordStore>,
    page_size: usize,
}

impl StorageProviderFactory {
    pub fn new(store: Arc<dyn PasswordStore>, page_size: usize) -> Self {
        Self { store, page_size }
    }
}

impl BruteforceProvider for StorageProviderFactory {
    fn provider(&self, project_id: i64) -> Box<dyn PasswordProvider> {
        Box::new(StoragePasswordProvider::new(
            Arc::clone(&self.store),
            project_id,
            self.page_size,
        ))
    }
}
