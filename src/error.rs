//! Muninn error types

use serde_json::Value;

/// Muninn error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum MuninnError {
    /// The argument could not be serialized into a cache key (e.g. a map
    /// with non-string keys). Surfaced to the immediate caller only; never
    /// recorded in the entry store or tag index.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The fetch executor reported a failure. The opaque payload is
    /// preserved verbatim.
    #[error("fetch failed: {payload}")]
    Fetch { payload: Value },

    /// A transform function failed while shaping a payload. Fatal to that
    /// single request only; unrelated cache entries are unaffected.
    #[error("transform error: {0}")]
    Transform(String),

    /// No endpoint with this identifier is registered on the client.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// The operation does not match the endpoint kind (e.g. `mutate` on a
    /// query endpoint).
    #[error("endpoint '{endpoint}' is not a {expected} endpoint")]
    WrongKind {
        endpoint: String,
        expected: &'static str,
    },

    // Configuration errors
    #[error("no fetch executor configured")]
    NoExecutor,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl MuninnError {
    /// Wrap a transform failure as an opaque fetch-error payload for
    /// recording in a cache entry.
    ///
    /// Transform failures are reported through the entry's `error` field as
    /// a fetch error wrapping the transform message, so subscribers see a
    /// uniform error shape.
    pub(crate) fn transform_payload(message: &str) -> Value {
        serde_json::json!({ "transformError": message })
    }
}

/// Result type alias for Muninn operations
pub type Result<T> = std::result::Result<T, MuninnError>;
