//! dbwarden bruteforce
//!
//! Drives a [`PasswordProvider`] against every credential a scanner reports.
//!
//! # Modules
//! - `provider` - Password corpora with resumable cursors and a crack cache
//! - `throttle` - Progress report rate limiting
//! - `engine` - The per-scan bruteforce loop

pub mod engine;
pub mod provider;
pub mod throttle;

pub use engine::{bruteforce_all_users, found_message, StatusSink, PROGRESS_INTERVAL};
pub use provider::{
    BruteforceProvider, CursorGuard, ListPasswordProvider, ListProviderFactory, PasswordProvider,
    StoragePasswordProvider, StorageProviderFactory, DEFAULT_PAGE_SIZE,
};
pub use throttle::ProgressThrottle;
