//! Dispatch entry points
//!
//! A scheduler decides where a scan runs and then calls into a
//! [`SaverRunner`] on that host. The runner opens the live connection through
//! a [`Connector`] and hands it to a fresh [`Saver`].

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use warden_bruteforce::{BruteforceProvider, PROGRESS_INTERVAL};
use warden_core::{Backend, CancelToken, Result, Scan, ScanError, ScanStatus, ScanStore};
use warden_scanner::Scanner;

use crate::hooks::AfterScanHook;
use crate::nvd::NvdCatalog;
use crate::saver::Saver;

/// Builds the live connection for a scan
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, scan: &Scan, backend: Backend) -> Result<Box<dyn Scanner>>;
}

/// Connects every scan to one fixed URL
pub struct UrlConnector {
    url: String,
    timeout: Duration,
}

impl UrlConnector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Connector for UrlConnector {
    async fn connect(&self, _scan: &Scan, backend: Backend) -> Result<Box<dyn Scanner>> {
        warden_scanner::connect(backend, &self.url, self.timeout).await
    }
}

pub struct SaverRunner {
    store: Arc<dyn ScanStore>,
    connector: Arc<dyn Connector>,
    provider: Arc<dyn BruteforceProvider>,
    nvd: Arc<dyn NvdCatalog>,
    hook: Option<Arc<dyn AfterScanHook>>,
    progress_interval: Duration,
    bruteforce: bool,
}

impl SaverRunner {
    pub fn new(
        store: Arc<dyn ScanStore>,
        connector: Arc<dyn Connector>,
        provider: Arc<dyn BruteforceProvider>,
        nvd: Arc<dyn NvdCatalog>,
    ) -> Self {
        Self {
            store,
            connector,
            provider,
            nvd,
            hook: None,
            progress_interval: PROGRESS_INTERVAL,
            bruteforce: true,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn AfterScanHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_bruteforce(mut self, enabled: bool) -> Self {
        self.bruteforce = enabled;
        self
    }

    fn saver(&self, scan: &Scan, scanner: Box<dyn Scanner>, cancel: CancelToken) -> Saver {
        let saver = Saver::new(
            scan.id,
            Arc::clone(&self.store),
            scanner,
            Arc::clone(&self.provider),
            Arc::clone(&self.nvd),
        )
        .with_cancel(cancel)
        .with_progress_interval(self.progress_interval)
        .with_bruteforce(self.bruteforce);

        match &self.hook {
            Some(hook) => saver.with_hook(Arc::clone(hook)),
            None => saver,
        }
    }

    /// Run the full scan on this host
    pub async fn run_saver_remote(&self, scan: &Scan, backend: Backend) -> Result<()> {
        self.run_saver_remote_with_cancel(scan, backend, CancelToken::new())
            .await
    }

    pub async fn run_saver_remote_with_cancel(
        &self,
        scan: &Scan,
        backend: Backend,
        cancel: CancelToken,
    ) -> Result<()> {
        let scanner = match self.connector.connect(scan, backend).await {
            Ok(scanner) => scanner,
            Err(e) => {
                tracing::error!(scan_id = scan.id, %backend, error = %e, "could not connect");
                return self.fail_unconnected(scan.id, e).await;
            }
        };
        self.saver(scan, scanner, cancel).run().await
    }

    /// Exposure pre-check only. An unreachable database is not an error here.
    pub async fn scan_for_public_access_only(&self, scan: &Scan, backend: Backend) -> Result<()> {
        let scanner = match self.connector.connect(scan, backend).await {
            Ok(scanner) => scanner,
            Err(e) => {
                tracing::debug!(scan_id = scan.id, %backend, error = %e, "not reachable from this host");
                return self
                    .store
                    .update_scan_status(scan.id, ScanStatus::CheckingPublicAccess, None, None)
                    .await;
            }
        };
        self.saver(scan, scanner, CancelToken::new())
            .scan_for_public_access_only()
            .await
    }

    async fn fail_unconnected(&self, scan_id: i64, err: ScanError) -> Result<()> {
        match self
            .store
            .update_scan_status(scan_id, ScanStatus::Finished, Some(err.to_string()), Some(Utc::now()))
            .await
        {
            Ok(()) => Err(err),
            Err(persist) => Err(ScanError::Persist {
                scan: Box::new(err),
                persist: Box::new(persist),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nvd::StaticNvdCatalog;
    use crate::saver::{FINISHED_MESSAGE, PUBLIC_ACCESS_MESSAGE, STARTED_MESSAGE};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_bruteforce::{found_message, ListProviderFactory};
    use warden_cipher::{Credential, Hashes};
    use warden_store::MemoryStore;

    struct Reachable;

    #[async_trait]
    impl Scanner for Reachable {
        fn backend(&self) -> Backend {
            Backend::Redis
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn get_users(&self) -> Result<Vec<Credential>> {
            Ok(vec![Credential::new("default", true, Hashes::redis_acl("foobared"))])
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        refuse: bool,
        connects: AtomicUsize,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, _scan: &Scan, _backend: Backend) -> Result<Box<dyn Scanner>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(ScanError::Connection("connection refused".into()));
            }
            Ok(Box::new(Reachable))
        }
    }

    async fn setup(refuse: bool) -> (Arc<MemoryStore>, Arc<FakeConnector>, SaverRunner, Scan) {
        let store = Arc::new(MemoryStore::new());
        let group = store.create_scan_group(3).await;
        let scan = store.create_scan(Backend::Redis, group.id).await.unwrap();
        let connector = Arc::new(FakeConnector {
            refuse,
            ..Default::default()
        });
        let runner = SaverRunner::new(
            store.clone(),
            connector.clone(),
            Arc::new(ListProviderFactory::new(["foobared"])),
            Arc::new(StaticNvdCatalog::default()),
        );
        (store, connector, runner, scan)
    }

    #[tokio::test]
    async fn test_run_saver_remote() {
        let (store, connector, runner, scan) = setup(false).await;
        runner.run_saver_remote(&scan, Backend::Redis).await.unwrap();

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        let messages: Vec<_> = store
            .results_for(scan.id)
            .await
            .into_iter()
            .map(|r| r.message)
            .collect();
        assert_eq!(
            messages,
            vec![
                STARTED_MESSAGE.to_string(),
                found_message("default", "foobared"),
                FINISHED_MESSAGE.to_string(),
            ]
        );
        assert_eq!(store.bruteforce_results_for(scan.id).await.len(), 1);
        assert_eq!(store.get_scan(scan.id).await.unwrap().status, ScanStatus::Finished);
    }

    #[tokio::test]
    async fn test_run_without_bruteforce() {
        let (store, _, runner, scan) = setup(false).await;
        runner
            .with_bruteforce(false)
            .run_saver_remote(&scan, Backend::Redis)
            .await
            .unwrap();

        assert!(store.bruteforce_results_for(scan.id).await.is_empty());
        let messages: Vec<_> = store
            .results_for(scan.id)
            .await
            .into_iter()
            .map(|r| r.message)
            .collect();
        assert_eq!(messages, vec![STARTED_MESSAGE, FINISHED_MESSAGE]);
        assert_eq!(store.get_scan(scan.id).await.unwrap().status, ScanStatus::Finished);
    }

    #[tokio::test]
    async fn test_connect_failure_fails_scan() {
        let (store, _, runner, scan) = setup(true).await;
        let err = runner.run_saver_remote(&scan, Backend::Redis).await.unwrap_err();
        assert!(matches!(err, ScanError::Connection(_)));

        let stored = store.get_scan(scan.id).await.unwrap();
        assert_eq!(stored.status, ScanStatus::Finished);
        assert!(stored.error.unwrap().contains("connection refused"));
        assert!(store.results_for(scan.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_public_access_only() {
        let (store, _, runner, scan) = setup(false).await;
        runner
            .scan_for_public_access_only(&scan, Backend::Redis)
            .await
            .unwrap();
        let results = store.results_for(scan.id).await;
        assert_eq!(results[0].message, PUBLIC_ACCESS_MESSAGE);
        assert_eq!(results.len(), 2);

        let (store, _, runner, scan) = setup(true).await;
        runner
            .scan_for_public_access_only(&scan, Backend::Redis)
            .await
            .unwrap();
        assert!(store.results_for(scan.id).await.is_empty());
        assert_eq!(
            store.get_scan(scan.id).await.unwrap().status,
            ScanStatus::CheckingPublicAccess
        );
    }
}
