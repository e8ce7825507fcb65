//! Cache entry and subscription types.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::key::CacheKey;
use crate::tags::{Tag, TagIndex};

use super::EntryStore;

/// Status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// No fetch has run yet.
    Idle,
    /// A fetch is in flight. Previous data, if any, stays visible.
    Loading,
    /// The last fetch succeeded; `data` is present.
    Success,
    /// The last fetch failed; `error` is present. Previous data is retained
    /// so callers can keep rendering stale content.
    Error,
}

/// Snapshot of one cache entry.
///
/// Invariants: `Success` implies `data` is present and `error` absent;
/// `Error` implies `error` is present (data may be stale-retained).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub status: QueryStatus,
    pub data: Option<Value>,
    pub error: Option<Value>,
    pub tags: Vec<Tag>,
    pub subscriber_count: u64,
    /// Set when the entry was invalidated while unobserved; the next
    /// subscription refetches it.
    pub stale: bool,
    pub last_updated: Instant,
}

impl CacheEntry {
    /// A snapshot not backed by a store record. Used when a fetch settles
    /// after its entry was evicted.
    pub(crate) fn detached(key: CacheKey, status: QueryStatus) -> Self {
        Self {
            key,
            status,
            data: None,
            error: None,
            tags: Vec::new(),
            subscriber_count: 0,
            stale: false,
            last_updated: Instant::now(),
        }
    }
}

/// An optimistic patch function, applied in place to entry data.
pub type PatchFn = Arc<dyn Fn(&mut Value) + Send + Sync>;

/// One applied optimistic patch, retained until commit or rollback.
///
/// `snapshot` is the entry data before this patch applied; `reapply` lets
/// the stack rebuild later patches when an earlier one rolls back.
pub(crate) struct AppliedPatch {
    pub ticket: u64,
    pub snapshot: Option<Value>,
    pub reapply: PatchFn,
    /// Committed patches are permanent: no longer rollback targets, but
    /// still reapplied as deltas when an earlier pending patch rolls back.
    /// The record is dropped once it reaches the bottom of the stack.
    pub committed: bool,
}

/// Seed values for creating a store record: the originating endpoint and
/// argument, retained for invalidation refetch.
#[derive(Debug, Clone)]
pub(crate) struct EntrySeed {
    pub endpoint: String,
    pub arg: Option<Value>,
}

/// Internal store record backing one [`CacheEntry`].
pub(crate) struct EntryRecord {
    pub entry: CacheEntry,
    pub endpoint: String,
    pub arg: Option<Value>,
    /// Whether the first `loaded` event already fired.
    pub has_loaded: bool,
    /// Optimistic patch stack, oldest first.
    pub patches: Vec<AppliedPatch>,
    /// Bumped each time a record is created for this key; lets delayed
    /// eviction tasks detect that the key was evicted and re-created.
    pub epoch: u64,
    /// Bumped on every subscribe; a pending grace eviction is abandoned
    /// when the generation it captured no longer matches.
    pub idle_gen: u64,
}

impl EntryRecord {
    pub fn new(key: CacheKey, seed: &EntrySeed, epoch: u64) -> Self {
        Self {
            entry: CacheEntry {
                key,
                status: QueryStatus::Idle,
                data: None,
                error: None,
                tags: Vec::new(),
                subscriber_count: 0,
                stale: false,
                last_updated: Instant::now(),
            },
            endpoint: seed.endpoint.clone(),
            arg: seed.arg.clone(),
            has_loaded: false,
            patches: Vec::new(),
            epoch,
            idle_gen: 0,
        }
    }
}

/// One external consumer's interest in a cache entry.
///
/// Dropping the subscription (or calling [`Subscription::unsubscribe`])
/// decrements the entry's subscriber count; when it reaches zero the entry
/// is evicted after the store's grace delay (immediately by default).
pub struct Subscription {
    key: CacheKey,
    store: Arc<EntryStore>,
    tags: Arc<TagIndex>,
    released: bool,
}

impl Subscription {
    pub(crate) fn new(key: CacheKey, store: Arc<EntryStore>, tags: Arc<TagIndex>) -> Self {
        Self {
            key,
            store,
            tags,
            released: false,
        }
    }

    /// The cache key this subscription observes.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Release the subscription eagerly. Equivalent to dropping it.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.store.release(&self.tags, &self.key);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}
