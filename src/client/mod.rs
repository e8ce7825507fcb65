//! QueryClient - the caller-facing facade.
//!
//! Composes the entry store, tag index, dedup coordinator, invalidation
//! engine, mutation executor, and lifecycle notifier behind four primitive
//! operations: [`QueryClient::query`], [`QueryClient::mutate`],
//! [`QueryClient::peek`], and [`QueryClient::prefetch`]. Hook-style call
//! patterns (lazy queries, subscription-only observers, state peeks) are
//! compositions of these primitives plus [`QueryClient::events`]; they need
//! no further subsystems.

mod builder;

pub use builder::{Muninn, MuninnBuilder};

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_stream::wrappers::BroadcastStream;

use crate::dedup::DedupCoordinator;
use crate::endpoint::{Endpoint, EndpointKind, FetchExecutor, FetchFailure, TagContext};
use crate::error::{MuninnError, Result};
use crate::events::{LifecycleEvent, LifecycleNotifier};
use crate::invalidation::InvalidationEngine;
use crate::key::{self, CacheKey};
use crate::mutation::{MutationExecutor, OptimisticPatch, PatchTicket};
use crate::store::{CacheEntry, EntrySeed, EntryStore, QueryStatus, Subscription};
use crate::tags::{Tag, TagIndex};
use crate::telemetry;

/// A live query: the settled entry snapshot plus the subscription guard
/// keeping the entry alive. Dropping the subscription releases interest.
#[derive(Debug)]
pub struct ActiveQuery {
    pub entry: CacheEntry,
    pub subscription: Subscription,
}

pub(crate) struct ClientInner {
    endpoints: HashMap<String, Endpoint>,
    executor: Arc<dyn FetchExecutor>,
    store: Arc<EntryStore>,
    tags: Arc<TagIndex>,
    dedup: DedupCoordinator,
    notifier: Arc<LifecycleNotifier>,
    invalidation: InvalidationEngine,
    mutations: MutationExecutor,
}

impl ClientInner {
    pub(crate) fn new(
        endpoints: HashMap<String, Endpoint>,
        executor: Arc<dyn FetchExecutor>,
        store: Arc<EntryStore>,
        tags: Arc<TagIndex>,
        notifier: Arc<LifecycleNotifier>,
    ) -> Self {
        let invalidation = InvalidationEngine::new(Arc::clone(&store), Arc::clone(&tags));
        let mutations = MutationExecutor::new(Arc::clone(&store));
        Self {
            endpoints,
            executor,
            store,
            tags,
            dedup: DedupCoordinator::new(),
            notifier,
            invalidation,
            mutations,
        }
    }

    fn endpoint(&self, id: &str, expected: EndpointKind) -> Result<&Endpoint> {
        let ep = self
            .endpoints
            .get(id)
            .ok_or_else(|| MuninnError::UnknownEndpoint(id.to_string()))?;
        if ep.kind() != expected {
            return Err(MuninnError::WrongKind {
                endpoint: id.to_string(),
                expected: match expected {
                    EndpointKind::Query => "query",
                    EndpointKind::Mutation => "mutation",
                },
            });
        }
        Ok(ep)
    }

    /// Run one fetch for `key` and settle the entry. Only ever invoked
    /// through the dedup coordinator, so it runs at most once concurrently
    /// per key.
    async fn dispatch(
        self: Arc<Self>,
        key: CacheKey,
        ep: Endpoint,
        arg: Option<Value>,
    ) -> CacheEntry {
        self.store.update_if_present(&key, |entry| {
            entry.status = QueryStatus::Loading;
        });
        tracing::trace!(key = %key, endpoint = %ep.id(), "dispatching fetch");

        match self.executor.execute(ep.id(), arg.as_ref()).await {
            Ok(raw) => {
                let shaped = match &ep.transform_response {
                    Some(f) => f(raw),
                    None => Ok(raw),
                };
                match shaped {
                    Ok(data) => self.settle_success(&key, &ep, arg.as_ref(), data),
                    Err(msg) => {
                        tracing::warn!(key = %key, error = %msg, "response transform failed");
                        self.settle_error(&key, &ep, arg.as_ref(), MuninnError::transform_payload(&msg))
                    }
                }
            }
            Err(FetchFailure(payload)) => {
                let payload = match &ep.transform_error {
                    Some(f) => match f(payload) {
                        Ok(shaped) => shaped,
                        Err(msg) => {
                            tracing::warn!(key = %key, error = %msg, "error transform failed");
                            MuninnError::transform_payload(&msg)
                        }
                    },
                    None => payload,
                };
                self.settle_error(&key, &ep, arg.as_ref(), payload)
            }
        }
    }

    fn settle_success(
        &self,
        key: &CacheKey,
        ep: &Endpoint,
        arg: Option<&Value>,
        data: Value,
    ) -> CacheEntry {
        metrics::counter!(
            telemetry::FETCHES_TOTAL,
            "endpoint" => ep.id().to_string(),
            "status" => "ok",
        )
        .increment(1);

        let provided = ep.provides(&TagContext {
            result: Some(&data),
            error: None,
            arg,
        });
        let updated = self.store.mutate_record(key, |record| {
            record.entry.status = QueryStatus::Success;
            record.entry.data = Some(data.clone());
            record.entry.error = None;
            record.entry.stale = false;
            record.entry.tags = provided.clone();
            // Fetched data is authoritative; pending optimistic patches no
            // longer apply to it.
            record.patches.clear();
            (record.entry.clone(), true)
        });

        match updated {
            Some(entry) => {
                self.tags.attach(key, &provided);
                entry
            }
            None => {
                // Entry evicted while the fetch was in flight: suppress the
                // write and the event, but hand the data to any awaiter.
                tracing::trace!(key = %key, "entry evicted mid-flight, settle suppressed");
                let mut entry = CacheEntry::detached(key.clone(), QueryStatus::Success);
                entry.data = Some(data);
                entry
            }
        }
    }

    fn settle_error(
        &self,
        key: &CacheKey,
        ep: &Endpoint,
        arg: Option<&Value>,
        payload: Value,
    ) -> CacheEntry {
        metrics::counter!(
            telemetry::FETCHES_TOTAL,
            "endpoint" => ep.id().to_string(),
            "status" => "error",
        )
        .increment(1);

        let provided = ep.provides(&TagContext {
            result: None,
            error: Some(&payload),
            arg,
        });
        let updated = self.store.update_if_present(key, |entry| {
            entry.status = QueryStatus::Error;
            entry.error = Some(payload.clone());
            // Previous data is retained so callers can keep rendering it.
            entry.tags = provided.clone();
        });

        match updated {
            Some(entry) => {
                self.tags.attach(key, &provided);
                entry
            }
            None => {
                tracing::trace!(key = %key, "entry evicted mid-flight, settle suppressed");
                let mut entry = CacheEntry::detached(key.clone(), QueryStatus::Error);
                entry.error = Some(payload);
                entry
            }
        }
    }

    /// Run an invalidation pass and dispatch background refetches for the
    /// still-subscribed candidates. Refetches whose audience vanished
    /// between marking and dispatch are dropped.
    fn apply_invalidation(self: &Arc<Self>, queries: &[Tag]) {
        if queries.is_empty() {
            return;
        }
        let outcome = self.invalidation.run(queries);
        for key in outcome.refetch {
            if self.store.subscriber_count(&key) == 0 {
                // Audience gone before dispatch: cancel the refetch, leave
                // the entry stale for the next subscription.
                self.store.update_if_present(&key, |entry| {
                    entry.status = if entry.data.is_some() {
                        QueryStatus::Success
                    } else {
                        QueryStatus::Idle
                    };
                });
                continue;
            }
            let Some((endpoint, arg)) = self.store.refetch_source(&key) else {
                continue;
            };
            let Some(ep) = self.endpoints.get(&endpoint).cloned() else {
                tracing::warn!(key = %key, endpoint = %endpoint, "refetch endpoint not registered");
                continue;
            };
            let inner = Arc::clone(self);
            let dispatch_key = key.clone();
            self.dedup
                .spawn(&key, move || inner.dispatch(dispatch_key, ep, arg));
        }
    }
}

/// Client-side query cache: deduplicated fetching, tag invalidation,
/// optimistic mutations, and per-entry lifecycle events.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

impl QueryClient {
    pub(crate) fn from_inner(inner: ClientInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Subscribe to a query endpoint and resolve its entry.
    ///
    /// Fresh `Success` entries are served from cache without touching the
    /// executor. Otherwise a fetch is dispatched — joining any fetch
    /// already in flight for the same key — and awaited. The returned
    /// [`ActiveQuery`] holds the subscription guard; dropping it releases
    /// interest in the entry.
    pub async fn query(&self, endpoint: &str, arg: Option<Value>) -> Result<ActiveQuery> {
        let ep = self
            .inner
            .endpoint(endpoint, EndpointKind::Query)?
            .clone();
        let key = key::encode(endpoint, arg.as_ref());
        let seed = EntrySeed {
            endpoint: ep.id().to_string(),
            arg: arg.clone(),
        };

        let snapshot = self.inner.store.acquire(&key, &seed);
        let subscription = Subscription::new(
            key.clone(),
            Arc::clone(&self.inner.store),
            Arc::clone(&self.inner.tags),
        );

        if snapshot.status == QueryStatus::Success && !snapshot.stale {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "endpoint" => ep.id().to_string())
                .increment(1);
            return Ok(ActiveQuery {
                entry: snapshot,
                subscription,
            });
        }

        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "endpoint" => ep.id().to_string())
            .increment(1);
        let inner = Arc::clone(&self.inner);
        let dispatch_key = key.clone();
        let entry = self
            .inner
            .dedup
            .request(&key, move || inner.dispatch(dispatch_key, ep, arg))
            .await;

        Ok(ActiveQuery {
            entry,
            subscription,
        })
    }

    /// Execute a mutation endpoint.
    ///
    /// On success, tags declared by the endpoint's `invalidates_tags` are
    /// forwarded to the invalidation engine.
    pub async fn mutate(&self, endpoint: &str, arg: Option<Value>) -> Result<Value> {
        self.mutate_with(endpoint, arg, Vec::new()).await
    }

    /// Execute a mutation with optimistic patches.
    ///
    /// Each patch is applied synchronously to its targeted entry before the
    /// executor runs. On failure every applied patch is rolled back, in
    /// strict reverse order of application, and invalidation does not run.
    pub async fn mutate_with(
        &self,
        endpoint: &str,
        arg: Option<Value>,
        patches: Vec<OptimisticPatch>,
    ) -> Result<Value> {
        let ep = self
            .inner
            .endpoint(endpoint, EndpointKind::Mutation)?
            .clone();

        let mut tickets: Vec<PatchTicket> = Vec::with_capacity(patches.len());
        for patch in &patches {
            let target = patch.key();
            if let Some(ticket) = self.inner.mutations.apply(&target, Arc::clone(&patch.apply)) {
                tickets.push(ticket);
            }
        }

        match self.inner.executor.execute(ep.id(), arg.as_ref()).await {
            Ok(raw) => {
                let shaped = match &ep.transform_response {
                    Some(f) => f(raw),
                    None => Ok(raw),
                };
                match shaped {
                    Ok(result) => {
                        for ticket in tickets {
                            self.inner.mutations.commit(ticket);
                        }
                        metrics::counter!(
                            telemetry::MUTATIONS_TOTAL,
                            "endpoint" => ep.id().to_string(),
                            "status" => "ok",
                        )
                        .increment(1);

                        let queries = ep.invalidates(&TagContext {
                            result: Some(&result),
                            error: None,
                            arg: arg.as_ref(),
                        });
                        self.inner.apply_invalidation(&queries);
                        Ok(result)
                    }
                    Err(msg) => {
                        self.rollback_all(tickets);
                        metrics::counter!(
                            telemetry::MUTATIONS_TOTAL,
                            "endpoint" => ep.id().to_string(),
                            "status" => "error",
                        )
                        .increment(1);
                        Err(MuninnError::Transform(msg))
                    }
                }
            }
            Err(FetchFailure(payload)) => {
                let payload = match &ep.transform_error {
                    Some(f) => match f(payload) {
                        Ok(shaped) => shaped,
                        Err(msg) => MuninnError::transform_payload(&msg),
                    },
                    None => payload,
                };
                self.rollback_all(tickets);
                metrics::counter!(
                    telemetry::MUTATIONS_TOTAL,
                    "endpoint" => ep.id().to_string(),
                    "status" => "error",
                )
                .increment(1);
                Err(MuninnError::Fetch { payload })
            }
        }
    }

    /// Current entry snapshot without subscribing. Never triggers a fetch
    /// and never alters the subscriber count.
    pub fn peek(&self, endpoint: &str, arg: Option<&Value>) -> Result<Option<CacheEntry>> {
        self.inner.endpoint(endpoint, EndpointKind::Query)?;
        let key = key::encode(endpoint, arg);
        Ok(self.inner.store.get(&key))
    }

    /// Populate an entry without creating a long-lived subscription.
    /// Resolves once the fetch settles; a fresh cached entry is a no-op.
    pub async fn prefetch(&self, endpoint: &str, arg: Option<Value>) -> Result<()> {
        let ep = self
            .inner
            .endpoint(endpoint, EndpointKind::Query)?
            .clone();
        let key = key::encode(endpoint, arg.as_ref());

        if let Some(entry) = self.inner.store.get(&key)
            && entry.status == QueryStatus::Success
            && !entry.stale
        {
            return Ok(());
        }

        let seed = EntrySeed {
            endpoint: ep.id().to_string(),
            arg: arg.clone(),
        };
        self.inner.store.upsert(&key, &seed, |_| {});

        let inner = Arc::clone(&self.inner);
        let dispatch_key = key.clone();
        self.inner
            .dedup
            .request(&key, move || inner.dispatch(dispatch_key, ep, arg))
            .await;
        Ok(())
    }

    /// Lifecycle event stream for one (endpoint, argument) entry. Yields
    /// events committed after this call; see [`LifecycleEvent`].
    pub fn events(
        &self,
        endpoint: &str,
        arg: Option<&Value>,
    ) -> Result<BroadcastStream<LifecycleEvent>> {
        self.inner.endpoint(endpoint, EndpointKind::Query)?;
        let key = key::encode(endpoint, arg);
        Ok(self.inner.notifier.subscribe(&key))
    }

    /// Manually invalidate entries by tag, as a mutation's declared
    /// invalidation list would.
    pub fn invalidate(&self, queries: &[Tag]) {
        self.inner.apply_invalidation(queries);
    }

    /// Number of entries currently cached.
    pub fn entry_count(&self) -> usize {
        self.inner.store.len()
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.dedup.in_flight()
    }

    fn rollback_all(&self, tickets: Vec<PatchTicket>) {
        for ticket in tickets.into_iter().rev() {
            self.inner.mutations.rollback(ticket);
        }
    }
}
