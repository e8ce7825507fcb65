//! Endpoint descriptors and the external fetch executor boundary.
//!
//! Muninn has no transport of its own. The caller supplies a
//! [`FetchExecutor`] — the only component that talks to the outside world —
//! and a set of [`Endpoint`] descriptors declaring, per operation, how
//! results are transformed and which tags they provide or invalidate.
//!
//! Endpoints are plain data records of function references, not trait
//! objects per endpoint: behavior is injected, not inherited.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tags::Tag;

/// An executor-reported fetch failure. The payload is opaque to muninn and
/// preserved verbatim in the cache entry.
#[derive(Debug, Clone)]
pub struct FetchFailure(pub Value);

/// The external collaborator that performs the actual data fetching.
///
/// Muninn mandates no retry or backoff policy; that belongs to the
/// implementation behind this trait.
#[async_trait]
pub trait FetchExecutor: Send + Sync {
    /// Execute the operation identified by `endpoint` with `arg`.
    async fn execute(&self, endpoint: &str, arg: Option<&Value>)
    -> Result<Value, FetchFailure>;
}

/// Whether an endpoint reads (cacheable, deduplicated) or writes
/// (never deduplicated, may invalidate tags).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Query,
    Mutation,
}

/// Inputs available to tag functions: the settled result or error, and the
/// original argument.
#[derive(Debug, Clone, Copy)]
pub struct TagContext<'a> {
    pub result: Option<&'a Value>,
    pub error: Option<&'a Value>,
    pub arg: Option<&'a Value>,
}

type TagsFn = Arc<dyn Fn(&TagContext<'_>) -> Vec<Tag> + Send + Sync>;
type TransformFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Declarative description of one operation.
///
/// ```rust
/// use muninn::{Endpoint, Tag};
///
/// let get_post = Endpoint::query("getPost").provides_tags(|cx| {
///     let id = cx.arg.and_then(|a| a.get("id")).cloned();
///     match id {
///         Some(id) => vec![Tag::with_id("Post", id)],
///         None => vec![Tag::of("Post")],
///     }
/// });
///
/// let delete_post = Endpoint::mutation("deletePost")
///     .invalidates_tags(|cx| match cx.arg.and_then(|a| a.get("id")) {
///         Some(id) => vec![Tag::with_id("Post", id.clone())],
///         None => vec![],
///     });
/// ```
#[derive(Clone)]
pub struct Endpoint {
    pub(crate) id: String,
    pub(crate) kind: EndpointKind,
    pub(crate) provides_tags: Option<TagsFn>,
    pub(crate) invalidates_tags: Option<TagsFn>,
    pub(crate) transform_response: Option<TransformFn>,
    pub(crate) transform_error: Option<TransformFn>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("provides_tags", &self.provides_tags.is_some())
            .field("invalidates_tags", &self.invalidates_tags.is_some())
            .field("transform_response", &self.transform_response.is_some())
            .field("transform_error", &self.transform_error.is_some())
            .finish()
    }
}

impl Endpoint {
    fn new(id: impl Into<String>, kind: EndpointKind) -> Self {
        Self {
            id: id.into(),
            kind,
            provides_tags: None,
            invalidates_tags: None,
            transform_response: None,
            transform_error: None,
        }
    }

    /// A read endpoint. Results are cached and concurrent fetches for the
    /// same key are coalesced.
    pub fn query(id: impl Into<String>) -> Self {
        Self::new(id, EndpointKind::Query)
    }

    /// A write endpoint. Never cached or deduplicated; may declare
    /// invalidated tags.
    pub fn mutation(id: impl Into<String>) -> Self {
        Self::new(id, EndpointKind::Mutation)
    }

    /// Endpoint identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Endpoint kind.
    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Tags an entry produced by this endpoint carries. Called on every
    /// settle with the result or error and the original argument.
    pub fn provides_tags(
        mut self,
        f: impl Fn(&TagContext<'_>) -> Vec<Tag> + Send + Sync + 'static,
    ) -> Self {
        self.provides_tags = Some(Arc::new(f));
        self
    }

    /// Tags invalidated by a successful run of this (mutation) endpoint.
    /// The list is computed, not static: it may depend on the result, the
    /// error, and the original argument.
    pub fn invalidates_tags(
        mut self,
        f: impl Fn(&TagContext<'_>) -> Vec<Tag> + Send + Sync + 'static,
    ) -> Self {
        self.invalidates_tags = Some(Arc::new(f));
        self
    }

    /// Reshape the raw success payload before it is cached or returned.
    pub fn transform_response(
        mut self,
        f: impl Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.transform_response = Some(Arc::new(f));
        self
    }

    /// Reshape the raw failure payload before it is recorded.
    pub fn transform_error(
        mut self,
        f: impl Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.transform_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn provides(&self, cx: &TagContext<'_>) -> Vec<Tag> {
        match &self.provides_tags {
            Some(f) => f(cx),
            None => Vec::new(),
        }
    }

    pub(crate) fn invalidates(&self, cx: &TagContext<'_>) -> Vec<Tag> {
        match &self.invalidates_tags {
            Some(f) => f(cx),
            None => Vec::new(),
        }
    }
}
