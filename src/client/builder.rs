//! Builder for configuring client instances

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{ClientInner, QueryClient};
use crate::endpoint::{Endpoint, FetchExecutor};
use crate::error::{MuninnError, Result};
use crate::events::LifecycleNotifier;
use crate::store::EntryStore;
use crate::tags::TagIndex;

/// Main entry point for creating client instances.
pub struct Muninn;

impl Muninn {
    /// Create a new builder for configuring the client.
    pub fn builder() -> MuninnBuilder {
        MuninnBuilder::new()
    }
}

/// Builder for configuring client instances.
pub struct MuninnBuilder {
    executor: Option<Arc<dyn FetchExecutor>>,
    endpoints: Vec<Endpoint>,
    eviction_grace: Duration,
    event_capacity: Option<usize>,
}

impl MuninnBuilder {
    pub fn new() -> Self {
        Self {
            executor: None,
            endpoints: Vec::new(),
            eviction_grace: Duration::ZERO,
            event_capacity: None,
        }
    }

    /// Set the external fetch executor. Required.
    pub fn executor(mut self, executor: impl FetchExecutor + 'static) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Set an already-shared fetch executor.
    pub fn executor_arc(mut self, executor: Arc<dyn FetchExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Register an endpoint descriptor.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// How long an entry with zero subscribers survives before eviction.
    /// Default: `Duration::ZERO`, i.e. immediate eviction.
    pub fn eviction_grace(mut self, grace: Duration) -> Self {
        self.eviction_grace = grace;
        self
    }

    /// Buffer size for per-entry lifecycle event channels. Subscribers that
    /// fall further behind observe a lag error on their stream.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    /// Build the client.
    ///
    /// Fails with [`MuninnError::NoExecutor`] when no executor was supplied
    /// and with [`MuninnError::Configuration`] on duplicate endpoint ids.
    pub fn build(self) -> Result<QueryClient> {
        let executor = self.executor.ok_or(MuninnError::NoExecutor)?;

        let mut endpoints = HashMap::with_capacity(self.endpoints.len());
        for endpoint in self.endpoints {
            let id = endpoint.id().to_string();
            if endpoints.insert(id.clone(), endpoint).is_some() {
                return Err(MuninnError::Configuration(format!(
                    "duplicate endpoint id '{id}'"
                )));
            }
        }

        let notifier = Arc::new(match self.event_capacity {
            Some(capacity) => LifecycleNotifier::with_capacity(capacity),
            None => LifecycleNotifier::new(),
        });
        let store = Arc::new(EntryStore::new(Arc::clone(&notifier), self.eviction_grace));
        let tags = Arc::new(TagIndex::new());

        Ok(QueryClient::from_inner(ClientInner::new(
            endpoints, executor, store, tags, notifier,
        )))
    }
}

impl Default for MuninnBuilder {
    fn default() -> Self {
        Self::new()
    }
}
