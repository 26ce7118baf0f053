//! CVE catalog lookups
//!
//! The catalog decides which backends are correlated at all and which CVEs
//! are ignored. `Product::Unknown` turns CVE correlation off for a backend.

use std::collections::HashSet;
use warden_core::{Backend, Product};

/// CVEs that match on version but do not apply to server deployments
pub const DEFAULT_IGNORED_CVES: &[&str] = &["CVE-2009-2943", "CVE-2010-3781"];

pub trait NvdCatalog: Send + Sync {
    fn product_for(&self, backend_name: &str) -> Product;

    fn is_ignored(&self, cve_id: &str) -> bool;
}

pub struct StaticNvdCatalog {
    ignored: HashSet<String>,
    disabled: HashSet<Backend>,
}

impl StaticNvdCatalog {
    pub fn new<I, S>(ignored: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignored: ignored.into_iter().map(Into::into).collect(),
            disabled: HashSet::new(),
        }
    }

    /// Stop correlating CVEs for `backend`
    pub fn disable(mut self, backend: Backend) -> Self {
        self.disabled.insert(backend);
        self
    }
}

impl Default for StaticNvdCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORED_CVES.iter().copied())
    }
}

impl NvdCatalog for StaticNvdCatalog {
    fn product_for(&self, backend_name: &str) -> Product {
        match backend_name.parse::<Backend>() {
            Ok(backend) if !self.disabled.contains(&backend) => Product::from_backend(backend),
            _ => Product::Unknown,
        }
    }

    fn is_ignored(&self, cve_id: &str) -> bool {
        self.ignored.contains(cve_id)
    }
}
