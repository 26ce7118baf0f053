//! Per-scan state machine
//!
//! `NotStarted -> [CheckingPublicAccess] -> Running -> Finished`. A scan
//! ends `Finished` with or without an error; both are terminal. The scanner
//! connection is closed exactly once, whichever way the run ends.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use warden_bruteforce::{bruteforce_all_users, BruteforceProvider, StatusSink, PROGRESS_INTERVAL};
use warden_core::{
    BruteforceUserStatus, CancelToken, Finding, Product, Result, ScanError, ScanStatus, ScanStore,
    Severity,
};
use warden_scanner::Scanner;

use crate::hooks::AfterScanHook;
use crate::nvd::NvdCatalog;

pub const STARTED_MESSAGE: &str = "Started scanning";
pub const FINISHED_MESSAGE: &str = "Finished the scan";
pub const PUBLIC_ACCESS_MESSAGE: &str = "Database is accessible from public internet";
pub const PUBLIC_CHECK_DONE_MESSAGE: &str =
    "Finished checking for public access. Proceeding with queuing to a project specific worker";

pub struct Saver {
    scan_id: i64,
    store: Arc<dyn ScanStore>,
    scanner: Box<dyn Scanner>,
    provider: Arc<dyn BruteforceProvider>,
    nvd: Arc<dyn NvdCatalog>,
    hook: Option<Arc<dyn AfterScanHook>>,
    cancel: CancelToken,
    progress_interval: Duration,
    bruteforce: bool,
    closed: bool,
}

/// Mirrors bruteforce progress into per-user result rows
struct ResultSink {
    store: Arc<dyn ScanStore>,
    scan_id: i64,
}

#[async_trait]
impl StatusSink for ResultSink {
    async fn on_status(&self, statuses: &BTreeMap<String, BruteforceUserStatus>) -> Result<()> {
        for (username, status) in statuses {
            self.store
                .create_or_update_bruteforce_result(
                    self.scan_id,
                    username,
                    status.password.as_deref(),
                    status.tried,
                    status.total,
                )
                .await?;
        }
        Ok(())
    }
}

/// `Ok(None)` for capabilities the backend lacks
fn skip_unsupported<T>(step: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ScanError::NotSupported(_)) => {
            tracing::debug!(step, "not supported by backend, skipping");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

pub fn cve_message(cve_id: &str) -> String {
    format!("Vulnerability {} found. Please update to the latest version", cve_id)
}

impl Saver {
    pub fn new(
        scan_id: i64,
        store: Arc<dyn ScanStore>,
        scanner: Box<dyn Scanner>,
        provider: Arc<dyn BruteforceProvider>,
        nvd: Arc<dyn NvdCatalog>,
    ) -> Self {
        Self {
            scan_id,
            store,
            scanner,
            provider,
            nvd,
            hook: None,
            cancel: CancelToken::new(),
            progress_interval: PROGRESS_INTERVAL,
            bruteforce: true,
            closed: false,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn AfterScanHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Turn the credential bruteforce step on or off. On by default.
    pub fn with_bruteforce(mut self, enabled: bool) -> Self {
        self.bruteforce = enabled;
        self
    }

    async fn record(&self, severity: Severity, message: &str) -> Result<()> {
        self.store
            .create_scan_result(self.scan_id, severity, message, self.scanner.scanner_id())
            .await
    }

    async fn record_all(&self, findings: &[Finding]) -> Result<()> {
        for finding in findings {
            self.record(finding.severity, &finding.message).await?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.scanner.close().await {
            tracing::warn!(scan_id = self.scan_id, error = %e, "closing scanner failed");
        }
    }

    /// Run the full audit and persist the outcome
    pub async fn run(mut self) -> Result<()> {
        let span = tracing::info_span!("scan", scan_id = self.scan_id, backend = %self.scanner.backend());
        self.drive().instrument(span).await
    }

    async fn drive(&mut self) -> Result<()> {
        if let Err(e) = self
            .store
            .update_scan_status(self.scan_id, ScanStatus::Running, None, None)
            .await
        {
            self.close().await;
            return Err(e);
        }
        tracing::info!("started scanning");

        let outcome = self.execute().await;
        self.close().await;

        match outcome {
            Ok(()) => {
                if let Err(e) = self
                    .store
                    .update_scan_status(self.scan_id, ScanStatus::Finished, None, Some(Utc::now()))
                    .await
                {
                    return self.fail(e).await;
                }
                self.record(Severity::Informational, FINISHED_MESSAGE).await?;
                tracing::info!("finished scanning");
                Ok(())
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn fail(&self, err: ScanError) -> Result<()> {
        tracing::error!(error = %err, "scan failed");
        match self
            .store
            .update_scan_status(
                self.scan_id,
                ScanStatus::Finished,
                Some(err.to_string()),
                Some(Utc::now()),
            )
            .await
        {
            Ok(()) => Err(err),
            Err(persist) => Err(ScanError::Persist {
                scan: Box::new(err),
                persist: Box::new(persist),
            }),
        }
    }

    async fn execute(&mut self) -> Result<()> {
        self.record(Severity::Informational, STARTED_MESSAGE).await?;

        self.cancel.check()?;
        skip_unsupported("ping", self.scanner.ping().await)?;
        tracing::debug!("pinged database");

        self.cancel.check()?;
        skip_unsupported("check_permissions", self.scanner.check_permissions().await)?;
        tracing::debug!("checked permissions");

        self.cancel.check()?;
        if let Some(findings) = skip_unsupported("scan_config", self.scanner.scan_config().await)? {
            tracing::debug!(count = findings.len(), "scanned config");
            self.record_all(&findings).await?;
        }

        self.cancel.check()?;
        if let Some(users) = skip_unsupported("get_users", self.scanner.get_users().await)? {
            let privileged = users.iter().filter(|u| u.privileged).count();
            tracing::debug!(count = users.len(), privileged, "got users");
        }

        self.cancel.check()?;
        let version = skip_unsupported("get_version", self.scanner.get_version().await)?;
        if let Some(version) = &version {
            self.check_cves(version).await?;
        }

        if self.bruteforce {
            self.cancel.check()?;
            self.bruteforce().await?;
        } else {
            tracing::debug!("bruteforce disabled, skipping");
        }

        if let Some(hook) = &self.hook {
            hook.after_scan(self.scan_id, self.scanner.backend(), version.as_deref())
                .await?;
        }
        Ok(())
    }

    async fn check_cves(&self, version: &str) -> Result<()> {
        // the catalog gates correlation, the scanner names the product
        let product = match self.nvd.product_for(self.scanner.backend().name()) {
            Product::Unknown => Product::Unknown,
            _ => self.scanner.nvd_product(),
        };
        if product == Product::Unknown {
            return Ok(());
        }

        let cves = self.store.cves_by_product_and_version(product, version).await?;
        for cve in cves.iter().filter(|c| !self.nvd.is_ignored(&c.cve_id)) {
            self.record(Severity::High, &cve_message(&cve.cve_id)).await?;
        }
        tracing::debug!(version, cpe = product.cpe(), count = cves.len(), "verified version for CVEs");
        Ok(())
    }

    async fn bruteforce(&self) -> Result<()> {
        let scan = self.store.get_scan(self.scan_id).await?;
        let group = self.store.get_scan_group(scan.scan_group_id).await?;
        let mut provider = self.provider.provider(group.project_id);
        let sink = ResultSink {
            store: Arc::clone(&self.store),
            scan_id: self.scan_id,
        };

        let findings = bruteforce_all_users(
            self.scanner.as_ref(),
            provider.as_mut(),
            &sink,
            &self.cancel,
            self.progress_interval,
        )
        .await;
        if let Some(findings) = skip_unsupported("bruteforce", findings)? {
            self.record_all(&findings).await?;
        }
        Ok(())
    }

    /// Exposure pre-check. Marks the scan `CheckingPublicAccess` and, if the
    /// database answers from here, records it as publicly reachable. The full
    /// scan runs later elsewhere.
    pub async fn scan_for_public_access_only(mut self) -> Result<()> {
        let result = self.public_access_check().await;
        self.close().await;
        result
    }

    async fn public_access_check(&self) -> Result<()> {
        if !self.scanner.should_not_be_public() {
            return Ok(());
        }

        self.store
            .update_scan_status(self.scan_id, ScanStatus::CheckingPublicAccess, None, None)
            .await?;

        if let Err(e) = self.scanner.ping().await {
            if !e.is_not_supported() {
                tracing::debug!(scan_id = self.scan_id, error = %e, "not reachable from this host");
                return Ok(());
            }
        }

        tracing::info!(scan_id = self.scan_id, "database reachable from public internet");
        self.record(Severity::High, PUBLIC_ACCESS_MESSAGE).await?;
        self.record(Severity::Informational, PUBLIC_CHECK_DONE_MESSAGE).await?;
        Ok(())
    }
}
