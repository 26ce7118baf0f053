//! After-scan hooks

use async_trait::async_trait;
use std::sync::Arc;
use warden_core::{Backend, Result, VersionSink};

/// Runs once a scan succeeded, before it is marked finished. A failing hook
/// fails the scan.
#[async_trait]
pub trait AfterScanHook: Send + Sync {
    async fn after_scan(&self, scan_id: i64, backend: Backend, version: Option<&str>) -> Result<()>;
}

/// Writes the discovered server version back
pub struct RecordVersion {
    sink: Arc<dyn VersionSink>,
}

impl RecordVersion {
    pub fn new(sink: Arc<dyn VersionSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl AfterScanHook for RecordVersion {
    async fn after_scan(&self, scan_id: i64, backend: Backend, version: Option<&str>) -> Result<()> {
        match version {
            Some(version) => self.sink.record_version(scan_id, backend, version).await,
            None => Ok(()),
        }
    }
}
