//! Test-only helpers for spinning up a throwaway store, mirroring the
//! teacher's `runtime::test_support` pattern of handing every test an
//! isolated, already-migrated database.

use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::kernel::Store;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

/// A fresh, migrated, in-memory SQLite store, with a deterministic clock
/// that hands out a strictly increasing millisecond value on every call —
/// ordering assertions never depend on wall-clock resolution (spec §9
/// "Clock"). The pool is capped at a single connection so the in-memory
/// database is shared across every checkout instead of each connection
/// getting its own empty database.
pub(crate) async fn test_store() -> Store {
    let config = StoreConfig::new("sqlite::memory:").with_max_connections(1);
    let tick = Arc::new(AtomicI64::new(1));
    let clock = Clock::from_fn(move || tick.fetch_add(1, Ordering::Relaxed));
    let store = Store::connect_with_clock(&config, clock)
        .await
        .expect("connect test store");
    store.migrate().await.expect("migrate test store");
    store
}
