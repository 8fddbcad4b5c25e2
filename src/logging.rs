//! Global tracing subscriber bootstrap.
//!
//! File rotation (`logs/{dbmanager,error,api}.log`, spec.md §6) is owned by
//! the binary embedding this crate; this helper only wires `RUST_LOG` into a
//! subscriber so library call sites' `tracing::{info,warn,error,debug}!`
//! events go somewhere during tests and standalone runs.

use tracing_subscriber::EnvFilter;

/// Initialize a global subscriber from `RUST_LOG`, defaulting to `info`.
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
