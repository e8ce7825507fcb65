//! Muninn - tag-indexed query cache with request deduplication
//!
//! This crate provides a client-side caching layer that sits between
//! orchestration code and an external, caller-supplied fetch executor.
//! Results are cached under deterministic keys, concurrent fetches for the
//! same key are coalesced, entries are grouped by tags for bulk
//! invalidation, and mutations can apply optimistic patches that roll back
//! on failure.
//!
//! # Example
//!
//! ```rust,no_run
//! use muninn::{Endpoint, FetchExecutor, FetchFailure, Muninn, Tag};
//! use serde_json::{Value, json};
//!
//! struct HttpExecutor;
//!
//! #[async_trait::async_trait]
//! impl FetchExecutor for HttpExecutor {
//!     async fn execute(
//!         &self,
//!         endpoint: &str,
//!         arg: Option<&Value>,
//!     ) -> Result<Value, FetchFailure> {
//!         // Perform the actual request with your transport of choice.
//!         # let _ = (endpoint, arg);
//!         Ok(json!({"id": 1, "title": "hello"}))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> muninn::Result<()> {
//!     let client = Muninn::builder()
//!         .executor(HttpExecutor)
//!         .endpoint(Endpoint::query("getPost").provides_tags(|cx| {
//!             match cx.arg.and_then(|a| a.get("id")) {
//!                 Some(id) => vec![Tag::with_id("Post", id)],
//!                 None => vec![Tag::of("Post")],
//!             }
//!         }))
//!         .endpoint(Endpoint::mutation("deletePost").invalidates_tags(|cx| {
//!             match cx.arg.and_then(|a| a.get("id")) {
//!                 Some(id) => vec![Tag::with_id("Post", id)],
//!                 None => vec![],
//!             }
//!         }))
//!         .build()?;
//!
//!     let post = client.query("getPost", Some(json!({"id": 1}))).await?;
//!     println!("{:?}", post.entry.data);
//!
//!     // Invalidates the cached post; subscribed entries refetch.
//!     client.mutate("deletePost", Some(json!({"id": 1}))).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod dedup;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod invalidation;
pub mod key;
pub mod mutation;
pub mod store;
pub mod tags;
pub mod telemetry;

// Re-export main types at crate root
pub use client::{ActiveQuery, Muninn, MuninnBuilder, QueryClient};
pub use endpoint::{Endpoint, EndpointKind, FetchExecutor, FetchFailure, TagContext};
pub use error::{MuninnError, Result};
pub use events::{LifecycleEvent, LifecycleNotifier};
pub use invalidation::InvalidationOutcome;
pub use key::{CacheKey, to_arg};
pub use mutation::{OptimisticPatch, PatchTicket};
pub use store::{CacheEntry, QueryStatus, Subscription};
pub use tags::{Tag, TagIndex};
