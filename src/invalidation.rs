//! Tag-based invalidation.
//!
//! Given a set of tag queries (computed by a mutation's declared
//! invalidation list), the engine resolves affected cache keys through the
//! tag index and splits them by observation:
//!
//! - entries with subscribers are marked `Loading` — previous data stays
//!   visible until the refetch settles (stale-while-revalidate) — and
//!   returned for refetch dispatch;
//! - unobserved entries are marked stale only; the refetch is deferred to
//!   the next subscription, avoiding network work for data nobody sees.
//!
//! Overlapping queries resolve to a union of keys handled in a single pass;
//! each affected key is marked and dispatched at most once per run.

use std::sync::Arc;

use crate::key::CacheKey;
use crate::store::{EntryStore, QueryStatus};
use crate::tags::{Tag, TagIndex};
use crate::telemetry;

/// The result of one invalidation pass.
#[derive(Debug, Default)]
pub struct InvalidationOutcome {
    /// Subscribed keys now in `Loading`; the caller dispatches refetches,
    /// re-checking the subscriber count immediately before each dispatch.
    pub refetch: Vec<CacheKey>,
    /// Unobserved keys marked stale for deferred refetch.
    pub marked_stale: Vec<CacheKey>,
}

/// Resolves tag queries and transitions affected entries.
pub struct InvalidationEngine {
    store: Arc<EntryStore>,
    tags: Arc<TagIndex>,
}

impl InvalidationEngine {
    pub(crate) fn new(store: Arc<EntryStore>, tags: Arc<TagIndex>) -> Self {
        Self { store, tags }
    }

    /// Run one invalidation pass over `queries`.
    pub fn run(&self, queries: &[Tag]) -> InvalidationOutcome {
        if queries.is_empty() {
            return InvalidationOutcome::default();
        }

        let store = &self.store;
        let keys = self.tags.resolve(queries, |key| store.contains(key));
        let mut outcome = InvalidationOutcome::default();

        for key in keys {
            if self.store.subscriber_count(&key) > 0 {
                // Keep previous data visible during revalidation.
                let updated = self.store.update_if_present(&key, |entry| {
                    entry.status = QueryStatus::Loading;
                    entry.stale = true;
                });
                if updated.is_some() {
                    metrics::counter!(telemetry::INVALIDATED_KEYS_TOTAL, "action" => "refetch")
                        .increment(1);
                    outcome.refetch.push(key);
                }
            } else {
                let updated = self.store.update_if_present(&key, |entry| {
                    entry.stale = true;
                });
                if updated.is_some() {
                    metrics::counter!(telemetry::INVALIDATED_KEYS_TOTAL, "action" => "stale")
                        .increment(1);
                    outcome.marked_stale.push(key);
                }
            }
        }

        tracing::debug!(
            refetch = outcome.refetch.len(),
            stale = outcome.marked_stale.len(),
            "invalidation pass complete"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LifecycleNotifier;
    use crate::key;
    use crate::key::CacheKey;
    use crate::store::EntrySeed;
    use serde_json::json;
    use std::time::Duration;

    fn engine() -> (Arc<EntryStore>, Arc<TagIndex>, InvalidationEngine) {
        let notifier = Arc::new(LifecycleNotifier::new());
        let store = Arc::new(EntryStore::new(notifier, Duration::ZERO));
        let tags = Arc::new(TagIndex::new());
        let eng = InvalidationEngine::new(Arc::clone(&store), Arc::clone(&tags));
        (store, tags, eng)
    }

    fn populate(store: &EntryStore, tags: &TagIndex, id: u64, subscribed: bool) -> CacheKey {
        let key = key::encode("getPost", Some(&json!({"id": id})));
        let seed = EntrySeed {
            endpoint: "getPost".into(),
            arg: Some(json!({"id": id})),
        };
        store.upsert(&key, &seed, |entry| {
            entry.status = QueryStatus::Success;
            entry.data = Some(json!({"id": id}));
            if subscribed {
                entry.subscriber_count = 1;
            }
        });
        tags.attach(&key, &[Tag::with_id("Post", id)]);
        key
    }

    #[test]
    fn subscribed_entries_go_loading() {
        let (store, tags, engine) = engine();
        let key = populate(&store, &tags, 5, true);

        let outcome = engine.run(&[Tag::with_id("Post", 5)]);
        assert_eq!(outcome.refetch, vec![key.clone()]);
        assert!(outcome.marked_stale.is_empty());

        let entry = store.get(&key).unwrap();
        assert_eq!(entry.status, QueryStatus::Loading);
        // Stale data stays visible during revalidation.
        assert!(entry.data.is_some());
    }

    #[test]
    fn unobserved_entries_marked_stale_without_refetch() {
        let (store, tags, engine) = engine();
        let key = populate(&store, &tags, 5, false);

        let outcome = engine.run(&[Tag::with_id("Post", 5)]);
        assert!(outcome.refetch.is_empty());
        assert_eq!(outcome.marked_stale, vec![key.clone()]);

        let entry = store.get(&key).unwrap();
        assert_eq!(entry.status, QueryStatus::Success);
        assert!(entry.stale);
    }

    #[test]
    fn unrelated_ids_unaffected() {
        let (store, tags, engine) = engine();
        let five = populate(&store, &tags, 5, true);
        let seven = populate(&store, &tags, 7, true);

        engine.run(&[Tag::with_id("Post", 5)]);

        assert_eq!(store.get(&five).unwrap().status, QueryStatus::Loading);
        assert_eq!(store.get(&seven).unwrap().status, QueryStatus::Success);
        assert!(!store.get(&seven).unwrap().stale);
    }

    #[test]
    fn kind_wide_query_hits_all_ids() {
        let (store, tags, engine) = engine();
        populate(&store, &tags, 5, true);
        populate(&store, &tags, 7, false);

        let outcome = engine.run(&[Tag::of("Post")]);
        assert_eq!(outcome.refetch.len(), 1);
        assert_eq!(outcome.marked_stale.len(), 1);
    }

    #[test]
    fn overlapping_queries_mark_each_key_once() {
        let (store, tags, engine) = engine();
        populate(&store, &tags, 5, true);

        let outcome = engine.run(&[Tag::of("Post"), Tag::with_id("Post", 5)]);
        assert_eq!(outcome.refetch.len(), 1);
        let _ = store;
    }

    #[test]
    fn empty_query_list_is_noop() {
        let (store, tags, engine) = engine();
        let key = populate(&store, &tags, 5, true);

        let outcome = engine.run(&[]);
        assert!(outcome.refetch.is_empty());
        assert_eq!(store.get(&key).unwrap().status, QueryStatus::Success);
    }
}
