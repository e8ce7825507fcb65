//! Tags and the reverse tag index.
//!
//! A [`Tag`] labels cache entries for bulk invalidation. Tags have a kind
//! and an optional id: `{kind: "Post", id: Some("5")}` labels one logical
//! record, `{kind: "Post", id: None}` labels the kind as a whole.
//!
//! [`TagIndex`] maintains the reverse mapping tag → keys. It holds
//! non-owning back-references only: every bucketed key should exist in the
//! entry store, and stale buckets are pruned lazily during
//! [`TagIndex::resolve`] using a liveness predicate supplied by the caller.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::key::CacheKey;

/// A label used to group cache entries for bulk invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Tag kind, e.g. `"Post"`.
    pub kind: String,
    /// Optional id narrowing the tag to one logical record.
    pub id: Option<String>,
}

impl Tag {
    /// A kind-only tag. As a query it matches every entry tagged with this
    /// kind, regardless of id.
    pub fn of(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
        }
    }

    /// A kind + id tag. As a query it matches only entries carrying this
    /// exact tag.
    pub fn with_id(kind: impl Into<String>, id: impl ToString) -> Self {
        Self {
            kind: kind.into(),
            id: Some(id.to_string()),
        }
    }
}

#[derive(Default)]
struct IndexInner {
    /// Exact tag → keys carrying that tag.
    exact: HashMap<Tag, HashSet<CacheKey>>,
    /// Tag kind → keys carrying any tag of that kind.
    by_kind: HashMap<String, HashSet<CacheKey>>,
    /// Key → its current tag set, for replacement on `attach`.
    reverse: HashMap<CacheKey, Vec<Tag>>,
}

impl IndexInner {
    fn remove_key(&mut self, key: &CacheKey) {
        let Some(tags) = self.reverse.remove(key) else {
            return;
        };
        for tag in tags {
            if let Some(bucket) = self.by_kind.get_mut(&tag.kind) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.by_kind.remove(&tag.kind);
                }
            }
            if let Some(bucket) = self.exact.get_mut(&tag) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.exact.remove(&tag);
                }
            }
        }
    }
}

/// Reverse mapping from tags to the cache keys currently carrying them.
///
/// Thread-safe; all operations take the internal lock briefly. Consistency
/// with entry tag sets is the facade's responsibility: `attach` on every
/// successful settle, `detach` on eviction.
#[derive(Default)]
pub struct TagIndex {
    inner: Mutex<IndexInner>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `key`'s tag set with `tags`, updating all reverse buckets.
    pub fn attach(&self, key: &CacheKey, tags: &[Tag]) {
        let mut inner = self.inner.lock().unwrap();
        inner.remove_key(key);
        if tags.is_empty() {
            return;
        }
        for tag in tags {
            inner
                .by_kind
                .entry(tag.kind.clone())
                .or_default()
                .insert(key.clone());
            inner
                .exact
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        inner.reverse.insert(key.clone(), tags.to_vec());
    }

    /// Remove `key` from all buckets. Used on eviction.
    pub fn detach(&self, key: &CacheKey) {
        self.inner.lock().unwrap().remove_key(key);
    }

    /// Resolve tag queries to the union of matching cache keys.
    ///
    /// A kind-only query matches every key tagged with that kind; a kind+id
    /// query matches only keys carrying the exact tag. Keys for which
    /// `is_live` returns false are pruned from the index and excluded from
    /// the result.
    pub fn resolve(&self, queries: &[Tag], is_live: impl Fn(&CacheKey) -> bool) -> HashSet<CacheKey> {
        let mut inner = self.inner.lock().unwrap();
        let mut matched = HashSet::new();
        for query in queries {
            let bucket = match &query.id {
                Some(_) => inner.exact.get(query),
                None => inner.by_kind.get(&query.kind),
            };
            if let Some(bucket) = bucket {
                matched.extend(bucket.iter().cloned());
            }
        }

        let stale: Vec<CacheKey> = matched
            .iter()
            .filter(|key| !is_live(key))
            .cloned()
            .collect();
        for key in &stale {
            tracing::trace!(key = %key, "pruning stale tag bucket entry");
            inner.remove_key(key);
            matched.remove(key);
        }
        matched
    }

    /// The tags currently attached to `key`, if any.
    pub fn tags_of(&self, key: &CacheKey) -> Option<Vec<Tag>> {
        self.inner.lock().unwrap().reverse.get(key).cloned()
    }
}
