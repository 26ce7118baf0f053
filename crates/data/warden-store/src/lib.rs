//! In-process storage
//!
//! [`MemoryStore`] implements every persistence contract the engine needs and
//! can snapshot itself to a JSON file, which is what the CLI uses between
//! runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use warden_cipher::Wordlist;
use warden_core::{
    Backend, BruteforceResult, CrackedHash, Cve, PasswordStore, Product, Result, Scan, ScanError,
    ScanGroup, ScanResult, ScanStatus, ScanStore, Severity, VersionSink,
};

/// Rows inserted per batch during wordlist import
pub const IMPORT_BATCH_SIZE: usize = 100_000;

/// One password with its stable corpus id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub id: u64,
    pub password: String,
}

/// Serializable store state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreState {
    /// Version for migration support
    pub version: u32,
    pub scan_groups: BTreeMap<i64, ScanGroup>,
    pub scans: BTreeMap<i64, Scan>,
    pub results: Vec<ScanResult>,
    pub bruteforce: Vec<BruteforceResult>,
    pub cves: Vec<Cve>,
    /// Global wordlist, tried after project secrets
    pub passwords: Vec<CorpusEntry>,
    pub project_secrets: BTreeMap<i64, Vec<CorpusEntry>>,
    pub cracked: Vec<CrackedHash>,
    pub versions: BTreeMap<i64, String>,
    next_id: i64,
    next_word_id: u64,
}

impl Default for StoreState {
    fn default() -> Self {
        let mut state = Self {
            version: 2,
            scan_groups: BTreeMap::new(),
            scans: BTreeMap::new(),
            results: Vec::new(),
            bruteforce: Vec::new(),
            cves: Vec::new(),
            passwords: Vec::new(),
            project_secrets: BTreeMap::new(),
            cracked: Vec::new(),
            versions: BTreeMap::new(),
            next_id: 1,
            next_word_id: 1,
        };
        for word in Wordlist::default_corpus() {
            let entry = state.new_entry(word);
            state.passwords.push(entry);
        }
        state
    }
}

impl StoreState {
    fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn new_entry(&mut self, password: &str) -> CorpusEntry {
        let id = self.next_word_id;
        self.next_word_id += 1;
        CorpusEntry {
            id,
            password: password.to_string(),
        }
    }

    fn secrets(&self, project_id: i64) -> &[CorpusEntry] {
        self.project_secrets
            .get(&project_id)
            .map_or(&[][..], Vec::as_slice)
    }
}

/// Entries with id greater than `after`. `entries` is ascending by id.
fn page(entries: &[CorpusEntry], after: u64, limit: usize) -> Vec<(u64, String)> {
    let start = entries.partition_point(|e| e.id <= after);
    entries[start..]
        .iter()
        .take(limit)
        .map(|e| (e.id, e.password.clone()))
        .collect()
}

fn count_after(entries: &[CorpusEntry], after: u64) -> u64 {
    (entries.len() - entries.partition_point(|e| e.id <= after)) as u64
}

pub struct MemoryStore {
    state: RwLock<StoreState>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            path: None,
        }
    }

    /// Load from `path` if it exists. `save` writes back to the same file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(storage_err)?;
            serde_json::from_str(&content).map_err(storage_err)?
        } else {
            StoreState::default()
        };
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the snapshot. A store without a path has nothing to do.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = {
            let state = self.state.read().await;
            serde_json::to_string_pretty(&*state).map_err(storage_err)?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(storage_err)?;
        }
        // Write to temp file first, then rename (atomic)
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).map_err(storage_err)?;
        std::fs::rename(&temp_path, path).map_err(storage_err)?;
        tracing::debug!(path = %path.display(), "store saved");
        Ok(())
    }

    pub async fn create_scan_group(&self, project_id: i64) -> ScanGroup {
        let mut state = self.state.write().await;
        let group = ScanGroup {
            id: state.next_id(),
            project_id,
        };
        state.scan_groups.insert(group.id, group);
        group
    }

    pub async fn create_scan(&self, backend: Backend, scan_group_id: i64) -> Result<Scan> {
        let mut state = self.state.write().await;
        if !state.scan_groups.contains_key(&scan_group_id) {
            return Err(ScanError::NotFound(format!("scan group {}", scan_group_id)));
        }
        let scan = Scan::new(state.next_id(), backend, scan_group_id);
        state.scans.insert(scan.id, scan.clone());
        Ok(scan)
    }

    pub async fn results_for(&self, scan_id: i64) -> Vec<ScanResult> {
        let state = self.state.read().await;
        state
            .results
            .iter()
            .filter(|r| r.scan_id == scan_id)
            .cloned()
            .collect()
    }

    pub async fn bruteforce_results_for(&self, scan_id: i64) -> Vec<BruteforceResult> {
        let state = self.state.read().await;
        state
            .bruteforce
            .iter()
            .filter(|r| r.scan_id == scan_id)
            .cloned()
            .collect()
    }

    pub async fn version_for(&self, scan_id: i64) -> Option<String> {
        self.state.read().await.versions.get(&scan_id).cloned()
    }

    pub async fn add_cve(&self, cve: Cve) {
        self.state.write().await.cves.push(cve);
    }

    /// Register a harvested secret for a project. Returns false if known.
    pub async fn add_project_secret(&self, project_id: i64, secret: &str) -> bool {
        let mut state = self.state.write().await;
        if state.secrets(project_id).iter().any(|e| e.password == secret) {
            return false;
        }
        let entry = state.new_entry(secret);
        tracing::debug!(project_id, id = entry.id, "added project secret");
        state.project_secrets.entry(project_id).or_default().push(entry);
        true
    }

    pub async fn list_passwords(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .passwords
            .iter()
            .map(|e| e.password.clone())
            .collect()
    }

    /// Append new words from a newline-separated list, in batches. Returns
    /// the number of words added.
    pub async fn import_passwords<R: BufRead>(&self, reader: R) -> Result<usize> {
        let mut known: HashSet<String> = self
            .state
            .read()
            .await
            .passwords
            .iter()
            .map(|e| e.password.clone())
            .collect();
        let mut batch = Vec::with_capacity(IMPORT_BATCH_SIZE);
        let mut added = 0;

        for line in reader.lines() {
            let line = line.map_err(storage_err)?;
            let word = line.trim_end_matches('\r');
            if word.is_empty() || !known.insert(word.to_string()) {
                continue;
            }
            batch.push(word.to_string());
            if batch.len() == IMPORT_BATCH_SIZE {
                added += self.flush_batch(&mut batch).await;
            }
        }
        added += self.flush_batch(&mut batch).await;

        tracing::info!(added, "imported passwords");
        Ok(added)
    }

    async fn flush_batch(&self, batch: &mut Vec<String>) -> usize {
        let count = batch.len();
        if count > 0 {
            let mut state = self.state.write().await;
            for word in batch.drain(..) {
                let entry = state.new_entry(&word);
                state.passwords.push(entry);
            }
            tracing::debug!(count, "inserted password batch");
        }
        count
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn storage_err(e: impl std::fmt::Display) -> ScanError {
    ScanError::Storage(e.to_string())
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn get_scan_group(&self, id: i64) -> Result<ScanGroup> {
        self.state
            .read()
            .await
            .scan_groups
            .get(&id)
            .copied()
            .ok_or_else(|| ScanError::NotFound(format!("scan group {}", id)))
    }

    async fn get_scan(&self, id: i64) -> Result<Scan> {
        self.state
            .read()
            .await
            .scans
            .get(&id)
            .cloned()
            .ok_or_else(|| ScanError::NotFound(format!("scan {}", id)))
    }

    async fn update_scan_status(
        &self,
        id: i64,
        status: ScanStatus,
        error: Option<String>,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let scan = state
            .scans
            .get_mut(&id)
            .ok_or_else(|| ScanError::NotFound(format!("scan {}", id)))?;

        if !scan.status.can_transition_to(status) {
            return Err(ScanError::Storage(format!(
                "scan {} cannot move from {} to {}",
                id, scan.status, status
            )));
        }

        if status == ScanStatus::Running && scan.started_at.is_none() {
            scan.started_at = Some(Utc::now());
        }
        scan.status = status;
        if error.is_some() {
            scan.error = error;
        }
        if ended_at.is_some() {
            scan.ended_at = ended_at;
        }
        Ok(())
    }

    async fn create_scan_result(
        &self,
        scan_id: i64,
        severity: Severity,
        message: &str,
        scanner_id: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.scans.contains_key(&scan_id) {
            return Err(ScanError::NotFound(format!("scan {}", scan_id)));
        }
        let id = state.next_id();
        state.results.push(ScanResult {
            id,
            scan_id,
            severity,
            message: message.to_string(),
            scanner_id: scanner_id.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn create_or_update_bruteforce_result(
        &self,
        scan_id: i64,
        username: &str,
        password: Option<&str>,
        tried: u64,
        total: u64,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        match state
            .bruteforce
            .iter_mut()
            .find(|r| r.scan_id == scan_id && r.username == username)
        {
            Some(row) => {
                row.tried = tried;
                row.total = total;
                if let Some(password) = password {
                    row.password = Some(password.to_string());
                }
            }
            None => state.bruteforce.push(BruteforceResult {
                scan_id,
                username: username.to_string(),
                password: password.map(String::from),
                tried,
                total,
            }),
        }
        Ok(())
    }

    async fn cves_by_product_and_version(&self, product: Product, version: &str) -> Result<Vec<Cve>> {
        let state = self.state.read().await;
        Ok(state
            .cves
            .iter()
            .filter(|c| c.product == product && c.version == version)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PasswordStore for MemoryStore {
    async fn password_count(&self, project_id: i64, after: u64) -> Result<u64> {
        let state = self.state.read().await;
        let count = count_after(state.secrets(project_id), after) + count_after(&state.passwords, after);
        Ok(count)
    }

    async fn secret_page(&self, project_id: i64, after: u64, limit: usize) -> Result<Vec<(u64, String)>> {
        let state = self.state.read().await;
        let rows = page(state.secrets(project_id), after, limit);
        Ok(rows)
    }

    async fn wordlist_page(&self, after: u64, limit: usize) -> Result<Vec<(u64, String)>> {
        let state = self.state.read().await;
        let rows = page(&state.passwords, after, limit);
        Ok(rows)
    }

    async fn find_password(&self, project_id: i64, password: &str) -> Result<Option<u64>> {
        let state = self.state.read().await;
        let found = state
            .secrets(project_id)
            .iter()
            .chain(state.passwords.iter())
            .find(|e| e.password == password)
            .map(|e| e.id);
        Ok(found)
    }

    async fn cracked_hash(&self, project_id: i64, username: &str, hash: &str) -> Result<Option<CrackedHash>> {
        let state = self.state.read().await;
        Ok(state
            .cracked
            .iter()
            .find(|c| c.project_id == project_id && c.username == username && c.hash == hash)
            .cloned())
    }

    async fn save_cracked_hash(&self, cracked: CrackedHash) -> Result<()> {
        let mut state = self.state.write().await;
        match state.cracked.iter_mut().find(|c| {
            c.project_id == cracked.project_id && c.username == cracked.username && c.hash == cracked.hash
        }) {
            Some(existing) => *existing = cracked,
            None => state.cracked.push(cracked),
        }
        Ok(())
    }
}

#[async_trait]
impl VersionSink for MemoryStore {
    async fn record_version(&self, scan_id: i64, backend: Backend, version: &str) -> Result<()> {
        tracing::debug!(scan_id, %backend, version, "recording version");
        self.state
            .write()
            .await
            .versions
            .insert(scan_id, version.to_string());
        Ok(())
    }
}
