//! Entry store: the single owner of cache entry records.
//!
//! All entry mutations are serialized through the store's internal mutex as
//! atomic read-modify-write operations; concurrent callers never observe
//! partial writes. Lifecycle events are published while the lock is still
//! held, so per-key event order equals mutation commit order.
//!
//! The store owns [`CacheEntry`] records exclusively. The tag index holds
//! non-owning back-references which the client facade keeps consistent:
//! tags are attached on settle and detached on eviction. To keep lock
//! ordering acyclic the store never calls into the tag index while holding
//! its own lock.

mod entry;

pub use entry::{CacheEntry, PatchFn, QueryStatus, Subscription};
pub(crate) use entry::{AppliedPatch, EntryRecord, EntrySeed};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::events::{LifecycleEvent, LifecycleNotifier};
use crate::key::CacheKey;
use crate::tags::TagIndex;
use crate::telemetry;

/// Refcounted entry records behind a single mutex.
pub struct EntryStore {
    inner: Mutex<HashMap<CacheKey, EntryRecord>>,
    notifier: Arc<LifecycleNotifier>,
    /// How long an entry with zero subscribers survives before eviction.
    grace: Duration,
    next_epoch: AtomicU64,
}

impl EntryStore {
    pub(crate) fn new(notifier: Arc<LifecycleNotifier>, grace: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            notifier,
            grace,
            next_epoch: AtomicU64::new(0),
        }
    }

    /// Snapshot of the entry for `key`, if present.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner
            .lock()
            .unwrap()
            .get(key)
            .map(|rec| rec.entry.clone())
    }

    /// Whether an entry exists for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().unwrap().contains_key(key)
    }

    /// Number of entries currently in the store.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current subscriber count for `key`, zero if absent.
    pub fn subscriber_count(&self, key: &CacheKey) -> u64 {
        self.inner
            .lock()
            .unwrap()
            .get(key)
            .map_or(0, |rec| rec.entry.subscriber_count)
    }

    /// The endpoint and argument that populate `key`, for refetch.
    pub(crate) fn refetch_source(&self, key: &CacheKey) -> Option<(String, Option<serde_json::Value>)> {
        self.inner
            .lock()
            .unwrap()
            .get(key)
            .map(|rec| (rec.endpoint.clone(), rec.arg.clone()))
    }

    /// Atomically apply `f` to the entry for `key`, creating a default idle
    /// record from `seed` if absent. Publishes a lifecycle event after the
    /// mutation commits and returns the new snapshot.
    pub(crate) fn upsert(
        &self,
        key: &CacheKey,
        seed: &EntrySeed,
        f: impl FnOnce(&mut CacheEntry),
    ) -> CacheEntry {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.entry(key.clone()).or_insert_with(|| {
            let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
            EntryRecord::new(key.clone(), seed, epoch)
        });
        f(&mut record.entry);
        record.entry.last_updated = Instant::now();
        self.commit(key, record);
        record.entry.clone()
    }

    /// Like [`EntryStore::upsert`] but a no-op when no entry exists. Used by
    /// fetch settle paths: a fetch whose entry was evicted mid-flight must
    /// not write into a now-absent entry.
    pub(crate) fn update_if_present(
        &self,
        key: &CacheKey,
        f: impl FnOnce(&mut CacheEntry),
    ) -> Option<CacheEntry> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.get_mut(key)?;
        f(&mut record.entry);
        record.entry.last_updated = Instant::now();
        self.commit(key, record);
        Some(record.entry.clone())
    }

    /// Record-level atomic mutation, used by settle paths and the mutation
    /// executor's patch stack. The closure returns its result and whether
    /// the mutation should publish a lifecycle event.
    pub(crate) fn mutate_record<R>(
        &self,
        key: &CacheKey,
        f: impl FnOnce(&mut EntryRecord) -> (R, bool),
    ) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.get_mut(key)?;
        let (out, emit) = f(record);
        if emit {
            record.entry.last_updated = Instant::now();
            self.commit(key, record);
        }
        Some(out)
    }

    /// Register interest in `key`, creating an idle record if absent.
    /// Returns the post-subscribe snapshot; the caller wraps it in a
    /// [`Subscription`] guard. Subscribing abandons any pending grace
    /// eviction for the key.
    pub(crate) fn acquire(&self, key: &CacheKey, seed: &EntrySeed) -> CacheEntry {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.entry(key.clone()).or_insert_with(|| {
            let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
            EntryRecord::new(key.clone(), seed, epoch)
        });
        record.idle_gen += 1;
        record.entry.subscriber_count += 1;
        record.entry.last_updated = Instant::now();
        self.commit(key, record);
        record.entry.clone()
    }

    /// Drop one subscriber. At zero the entry is evicted, immediately when
    /// the grace delay is zero, otherwise after the delay elapses with the
    /// count still at zero.
    pub(crate) fn release(self: &Arc<Self>, tags: &Arc<TagIndex>, key: &CacheKey) {
        let schedule = {
            let mut inner = self.inner.lock().unwrap();
            let Some(record) = inner.get_mut(key) else {
                return;
            };
            record.entry.subscriber_count = record.entry.subscriber_count.saturating_sub(1);
            if record.entry.subscriber_count > 0 {
                let snapshot = record.entry.clone();
                self.notifier
                    .publish(key, LifecycleEvent::Updated(snapshot));
                return;
            }
            if self.grace.is_zero() {
                inner.remove(key);
                self.notifier.publish(key, LifecycleEvent::Removed);
                metrics::counter!(telemetry::EVICTIONS_TOTAL).increment(1);
                None
            } else {
                Some((record.epoch, record.idle_gen))
            }
        };

        match schedule {
            None => {
                // Evicted above; detach outside the store lock.
                tracing::debug!(key = %key, "evicted idle entry");
                tags.detach(key);
            }
            Some((epoch, idle_gen)) => {
                let store = Arc::clone(self);
                let tags = Arc::clone(tags);
                let key = key.clone();
                let grace = self.grace;
                // Needs a runtime for the delayed pass; without one the
                // eviction happens immediately.
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            tokio::time::sleep(grace).await;
                            store.evict_if_idle(&tags, &key, epoch, idle_gen);
                        });
                    }
                    Err(_) => self.evict_if_idle(&tags, &key, epoch, idle_gen),
                }
            }
        }
    }

    /// Evict `key` if its record still exists at the captured epoch and idle
    /// generation with no subscribers. Delayed eviction tasks land here
    /// after the grace sleep; a resubscribe in the interim bumped the
    /// generation and the task stands down, so a later drop to zero always
    /// gets its full grace window.
    fn evict_if_idle(&self, tags: &TagIndex, key: &CacheKey, epoch: u64, idle_gen: u64) {
        let evicted = {
            let mut inner = self.inner.lock().unwrap();
            match inner.get(key) {
                Some(rec)
                    if rec.epoch == epoch
                        && rec.idle_gen == idle_gen
                        && rec.entry.subscriber_count == 0 =>
                {
                    inner.remove(key);
                    self.notifier.publish(key, LifecycleEvent::Removed);
                    metrics::counter!(telemetry::EVICTIONS_TOTAL).increment(1);
                    true
                }
                _ => false,
            }
        };
        if evicted {
            tracing::debug!(key = %key, "evicted idle entry after grace delay");
            tags.detach(key);
        }
    }

    /// Publish the event for a committed mutation. Called with the store
    /// lock held so events cannot reorder across intermediate states.
    fn commit(&self, key: &CacheKey, record: &mut EntryRecord) {
        let event = if record.entry.status == QueryStatus::Success && !record.has_loaded {
            record.has_loaded = true;
            LifecycleEvent::Loaded(record.entry.clone())
        } else {
            LifecycleEvent::Updated(record.entry.clone())
        };
        self.notifier.publish(key, event);
    }
}
