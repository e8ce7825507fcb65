//! Request coalescing: at most one in-flight fetch per cache key.
//!
//! [`DedupCoordinator::request`] either joins the shared future of an
//! existing in-flight fetch or starts a new one. All concurrent callers for
//! the same key receive the same settled snapshot; the underlying fetch
//! function runs exactly once.
//!
//! Every started fetch is additionally driven by a detached task, so it
//! runs to completion (and its result is cached) even when all awaiting
//! callers go away before it settles. The settle path uses
//! `update_if_present`, so a fetch whose entry was evicted in the interim
//! writes nothing and emits no event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

use crate::key::CacheKey;
use crate::store::CacheEntry;
use crate::telemetry;

type SharedFetch = Shared<BoxFuture<'static, CacheEntry>>;

/// Keyed map of in-flight fetches. Entries are removed atomically when the
/// fetch settles; the shared future's own reference counting stands in for
/// an explicit attach count.
#[derive(Default)]
pub struct DedupCoordinator {
    in_flight: Arc<Mutex<HashMap<CacheKey, SharedFetch>>>,
}

impl DedupCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight fetch for `key`, or start one by calling
    /// `make_fetch`. Returns the settled entry snapshot.
    pub async fn request<F>(&self, key: &CacheKey, make_fetch: impl FnOnce() -> F) -> CacheEntry
    where
        F: Future<Output = CacheEntry> + Send + 'static,
    {
        self.join(key, make_fetch).await
    }

    /// Fire-and-forget variant: ensure a fetch for `key` is running without
    /// awaiting it. Used for invalidation refetches and prefetch.
    pub fn spawn<F>(&self, key: &CacheKey, make_fetch: impl FnOnce() -> F)
    where
        F: Future<Output = CacheEntry> + Send + 'static,
    {
        let _ = self.join(key, make_fetch);
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    /// Whether a fetch for `key` is currently in flight.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.in_flight.lock().unwrap().contains_key(key)
    }

    fn join<F>(&self, key: &CacheKey, make_fetch: impl FnOnce() -> F) -> SharedFetch
    where
        F: Future<Output = CacheEntry> + Send + 'static,
    {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(existing) = in_flight.get(key) {
            metrics::counter!(telemetry::FETCHES_DEDUPED_TOTAL).increment(1);
            tracing::trace!(key = %key, "joining in-flight fetch");
            return existing.clone();
        }

        let fetch = make_fetch();
        let map = Arc::clone(&self.in_flight);
        let settle_key = key.clone();
        let shared: SharedFetch = async move {
            let entry = fetch.await;
            map.lock().unwrap().remove(&settle_key);
            entry
        }
        .boxed()
        .shared();

        in_flight.insert(key.clone(), shared.clone());
        // Detached driver: the fetch completes even if every caller that
        // awaited it has been dropped.
        tokio::spawn(shared.clone().map(|_| ()));
        shared
    }
}
