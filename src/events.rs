//! Per-entry lifecycle event streams.
//!
//! The [`LifecycleNotifier`] exposes three event classes per key:
//!
//! - [`LifecycleEvent::Loaded`] — first successful population,
//! - [`LifecycleEvent::Updated`] — subsequent data replacement, including
//!   optimistic patches and rollbacks,
//! - [`LifecycleEvent::Removed`] — entry evicted.
//!
//! External collaborators attach logic between `Loaded` and `Removed`; that
//! window is the valid interval for holding resources (e.g. an open socket)
//! tied to the entry. `Removed` fires exactly once, after which the per-key
//! channel is torn down.
//!
//! Events are published by the entry store while it still holds its lock,
//! so per-key event order equals mutation commit order.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::key::CacheKey;
use crate::store::CacheEntry;

/// A lifecycle event for one cache entry.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// First successful population. Carries the entry snapshot.
    Loaded(CacheEntry),
    /// Data or status changed after the entry existed. Carries the snapshot.
    Updated(CacheEntry),
    /// The entry was evicted. Terminal; no further events for this key.
    Removed,
}

/// Default buffer size for per-key broadcast channels.
const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Fan-out of entry store mutations to external subscribers.
pub struct LifecycleNotifier {
    channels: Mutex<HashMap<CacheKey, broadcast::Sender<LifecycleEvent>>>,
    capacity: usize,
}

impl Default for LifecycleNotifier {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl LifecycleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a notifier whose per-key channels buffer `capacity` events.
    /// Slow subscribers that fall further behind observe a lag error on
    /// their stream rather than blocking publication.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to events for `key`. The stream yields events committed
    /// after this call.
    pub fn subscribe(&self, key: &CacheKey) -> BroadcastStream<LifecycleEvent> {
        let mut channels = self.channels.lock().unwrap();
        let sender = channels
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        BroadcastStream::new(sender.subscribe())
    }

    /// Publish an event for `key`. Events for keys nobody listens to are
    /// dropped without allocating a channel.
    pub(crate) fn publish(&self, key: &CacheKey, event: LifecycleEvent) {
        let mut channels = self.channels.lock().unwrap();
        let removed = matches!(event, LifecycleEvent::Removed);
        if let Some(sender) = channels.get(key) {
            // Send fails only when no receiver is alive; that's fine.
            let _ = sender.send(event);
        }
        if removed {
            channels.remove(key);
        }
    }

    /// Number of keys with an active channel.
    #[cfg(test)]
    pub(crate) fn channel_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }
}
