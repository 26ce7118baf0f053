//! dbwarden saver
//!
//! The saver owns one scan from `Running` to `Finished`. It drives a
//! scanner through its capability set, matches the reported version against
//! known CVEs, bruteforces credentials and persists everything through a
//! [`ScanStore`](warden_core::ScanStore).
//!
//! # Modules
//! - `saver` - The per-scan state machine
//! - `runner` - Entry points used by schedulers
//! - `nvd` - CVE catalog lookups
//! - `hooks` - Work run after a successful scan

pub mod hooks;
pub mod nvd;
pub mod runner;
pub mod saver;

pub use hooks::{AfterScanHook, RecordVersion};
pub use nvd::{NvdCatalog, StaticNvdCatalog, DEFAULT_IGNORED_CVES};
pub use runner::{Connector, SaverRunner, UrlConnector};
pub use saver::{Saver, FINISHED_MESSAGE, PUBLIC_ACCESS_MESSAGE, PUBLIC_CHECK_DONE_MESSAGE, STARTED_MESSAGE};
