//! Deterministic cache key encoding.
//!
//! A [`CacheKey`] identifies one (endpoint, argument) pair. Keys are
//! canonical: object keys are sorted recursively before serialization, so
//! two logically-equal arguments encode to the same key regardless of map
//! insertion order.
//!
//! The key format is `endpoint(canonical-json)`, or `endpoint()` when the
//! operation takes no argument. A `null` argument is not the same as no
//! argument — `getPosts(null)` and `getPosts()` are distinct keys.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{MuninnError, Result};

/// Deterministic identifier for one (endpoint, argument) pair.
///
/// Cheap to clone (`Arc<str>` internally). Equality is structural over the
/// canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Convert a caller-supplied argument into its JSON value form.
///
/// Fails with [`MuninnError::Encoding`] when the argument cannot be
/// serialized (e.g. a map with non-string keys, or a non-finite float).
pub fn to_arg<T: Serialize>(arg: T) -> Result<Value> {
    serde_json::to_value(arg).map_err(|e| MuninnError::Encoding(e.to_string()))
}

/// Encode an (endpoint, argument) pair into a [`CacheKey`].
///
/// Deterministic: the same logical argument always produces the same key.
pub fn encode(endpoint: &str, arg: Option<&Value>) -> CacheKey {
    let mut out = String::with_capacity(endpoint.len() + 16);
    out.push_str(endpoint);
    out.push('(');
    if let Some(value) = arg {
        write_canonical(value, &mut out);
    }
    out.push(')');
    CacheKey(out.into())
}

/// Write `value` as compact JSON with object keys sorted recursively.
///
/// `serde_json`'s default map is already ordered, but sorting here keeps the
/// encoding canonical even when the `preserve_order` feature is unified into
/// the build by a downstream crate.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Key strings round-trip through serde_json for escaping.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
