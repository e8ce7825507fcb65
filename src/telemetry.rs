//! Telemetry metric name constants.
//!
//! Centralised metric names for muninn operations. Consumers install their
//! own `metrics` recorder (e.g. prometheus, statsd); without a recorder
//! installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `muninn_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `endpoint` — endpoint identifier (e.g. "getPost", "deletePost")
//! - `status` — outcome: "ok" or "error"

/// Total cache hits served without touching the fetch executor.
///
/// Labels: `endpoint`.
pub const CACHE_HITS_TOTAL: &str = "muninn_cache_hits_total";

/// Total cache misses that required a fetch (or joined an in-flight one).
///
/// Labels: `endpoint`.
pub const CACHE_MISSES_TOTAL: &str = "muninn_cache_misses_total";

/// Total fetches dispatched to the executor.
///
/// Labels: `endpoint`, `status` ("ok" | "error").
pub const FETCHES_TOTAL: &str = "muninn_fetches_total";

/// Total requests that attached to an already in-flight fetch instead of
/// starting their own.
pub const FETCHES_DEDUPED_TOTAL: &str = "muninn_fetches_deduped_total";

/// Total mutations executed.
///
/// Labels: `endpoint`, `status` ("ok" | "error").
pub const MUTATIONS_TOTAL: &str = "muninn_mutations_total";

/// Total optimistic patch rollbacks.
pub const ROLLBACKS_TOTAL: &str = "muninn_rollbacks_total";

/// Total cache keys affected by tag invalidation.
///
/// Labels: `action` ("refetch" | "stale").
pub const INVALIDATED_KEYS_TOTAL: &str = "muninn_invalidated_keys_total";

/// Total entries evicted from the store.
pub const EVICTIONS_TOTAL: &str = "muninn_evictions_total";
