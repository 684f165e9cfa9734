//! Core Covenant module
//!
//! This module provides the fundamental building blocks shared by the
//! governance engine and its hosts: key/value storage, clocks and hashing.

pub mod storage;
pub mod crypto;
pub mod utils;

// Re-export key components
pub use storage::{Storage, StorageResult, StorageError, FileStorage, MemoryStorage};
pub use utils::{Clock, SystemClock, ManualClock, timestamp_secs};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Package description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Initialize tracing for Covenant binaries.
///
/// The filter is read from `RUST_LOG`, falling back to `info`. Calling this
/// more than once is harmless: later calls leave the first subscriber in place.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }
}
