//! Tests for [`QueryClient`] — the caller-facing facade.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use muninn::{
    Endpoint, FetchExecutor, FetchFailure, Muninn, MuninnError, QueryClient, QueryStatus, Tag,
};
use serde_json::{Value, json};

/// Executor with a canned response per endpoint and a call counter.
#[derive(Default)]
struct StubExecutor {
    responses: Mutex<std::collections::HashMap<String, Result<Value, Value>>>,
    calls: AtomicUsize,
}

impl StubExecutor {
    fn respond(self, endpoint: &str, response: Value) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), Ok(response));
        self
    }

    fn fail(self, endpoint: &str, payload: Value) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), Err(payload));
        self
    }
}

#[async_trait]
impl FetchExecutor for StubExecutor {
    async fn execute(&self, endpoint: &str, _arg: Option<&Value>) -> Result<Value, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().get(endpoint) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(payload)) => Err(FetchFailure(payload.clone())),
            None => Err(FetchFailure(json!({"status": 404}))),
        }
    }
}

fn client_with(executor: StubExecutor) -> QueryClient {
    Muninn::builder()
        .executor(executor)
        .endpoint(Endpoint::query("getPost").provides_tags(|cx| {
            match cx.arg.and_then(|a| a.get("id")) {
                Some(id) => vec![Tag::with_id("Post", id)],
                None => vec![Tag::of("Post")],
            }
        }))
        .endpoint(Endpoint::query("getPosts").provides_tags(|_| vec![Tag::of("Post")]))
        .endpoint(Endpoint::mutation("deletePost").invalidates_tags(|cx| {
            match cx.arg.and_then(|a| a.get("id")) {
                Some(id) => vec![Tag::with_id("Post", id)],
                None => vec![],
            }
        }))
        .build()
        .unwrap()
}

// =========================================================================
// Builder
// =========================================================================

#[test]
fn build_without_executor_fails() {
    let result = Muninn::builder().endpoint(Endpoint::query("getPost")).build();
    assert!(matches!(result, Err(MuninnError::NoExecutor)));
}

#[test]
fn build_with_duplicate_endpoint_fails() {
    let result = Muninn::builder()
        .executor(StubExecutor::default())
        .endpoint(Endpoint::query("getPost"))
        .endpoint(Endpoint::mutation("getPost"))
        .build();
    assert!(matches!(result, Err(MuninnError::Configuration(_))));
}

// =========================================================================
// query
// =========================================================================

#[tokio::test]
async fn query_fetches_and_caches() {
    let client = client_with(
        StubExecutor::default().respond("getPost", json!({"id": 1, "title": "X"})),
    );

    let active = client.query("getPost", Some(json!({"id": 1}))).await.unwrap();
    assert_eq!(active.entry.status, QueryStatus::Success);
    assert_eq!(active.entry.data, Some(json!({"id": 1, "title": "X"})));
    assert!(active.entry.error.is_none());
    assert_eq!(active.entry.tags, vec![Tag::with_id("Post", 1)]);
}

#[tokio::test]
async fn second_query_is_served_from_cache() {
    let executor = Arc::new(StubExecutor::default().respond("getPost", json!({"id": 1})));
    let client = Muninn::builder()
        .executor_arc(executor.clone())
        .endpoint(Endpoint::query("getPost"))
        .build()
        .unwrap();

    let first = client.query("getPost", Some(json!({"id": 1}))).await.unwrap();
    let second = client.query("getPost", Some(json!({"id": 1}))).await.unwrap();

    assert_eq!(second.entry.data, first.entry.data);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    // Snapshot counts both guards.
    assert_eq!(second.entry.subscriber_count, 2);
}

#[tokio::test]
async fn distinct_arguments_are_distinct_entries() {
    let client = client_with(StubExecutor::default().respond("getPost", json!({"ok": true})));

    let one = client.query("getPost", Some(json!({"id": 1}))).await.unwrap();
    let two = client.query("getPost", Some(json!({"id": 2}))).await.unwrap();

    assert_ne!(one.subscription.key(), two.subscription.key());
    assert_eq!(client.entry_count(), 2);
}

#[tokio::test]
async fn query_unknown_endpoint_fails() {
    let client = client_with(StubExecutor::default());
    let err = client.query("nope", None).await.unwrap_err();
    assert!(matches!(err, MuninnError::UnknownEndpoint(_)));
}

#[tokio::test]
async fn query_on_mutation_endpoint_fails() {
    let client = client_with(StubExecutor::default());
    let err = client.query("deletePost", None).await.unwrap_err();
    assert!(matches!(err, MuninnError::WrongKind { .. }));
}

#[tokio::test]
async fn executor_failure_is_recorded_not_thrown() {
    let client = client_with(
        StubExecutor::default().fail("getPost", json!({"status": 500, "body": "boom"})),
    );

    let active = client.query("getPost", Some(json!({"id": 1}))).await.unwrap();
    assert_eq!(active.entry.status, QueryStatus::Error);
    // Opaque payload preserved verbatim.
    assert_eq!(active.entry.error, Some(json!({"status": 500, "body": "boom"})));
    assert!(active.entry.data.is_none());
}

// =========================================================================
// Deduplication through the facade
// =========================================================================

/// Executor that stalls long enough for every concurrent caller to join
/// the same in-flight fetch.
struct SlowStub {
    calls: AtomicUsize,
}

#[async_trait]
impl FetchExecutor for SlowStub {
    async fn execute(&self, _endpoint: &str, _arg: Option<&Value>) -> Result<Value, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        Ok(json!({"id": 1}))
    }
}

#[tokio::test]
async fn concurrent_queries_share_one_fetch() {
    let executor = Arc::new(SlowStub {
        calls: AtomicUsize::new(0),
    });
    let client = Muninn::builder()
        .executor_arc(executor.clone())
        .endpoint(Endpoint::query("getPost"))
        .build()
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client.query("getPost", Some(json!({"id": 1}))).await
        }));
    }

    for handle in handles {
        let active = handle.await.unwrap().unwrap();
        assert_eq!(active.entry.status, QueryStatus::Success);
        assert_eq!(active.entry.data, Some(json!({"id": 1})));
    }
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

// =========================================================================
// Transforms
// =========================================================================

#[tokio::test]
async fn transform_response_reshapes_data() {
    let executor = StubExecutor::default().respond("getPost", json!({"data": {"id": 1}}));
    let client = Muninn::builder()
        .executor(executor)
        .endpoint(Endpoint::query("getPost").transform_response(|raw| {
            raw.get("data").cloned().ok_or_else(|| "missing data".to_string())
        }))
        .build()
        .unwrap();

    let active = client.query("getPost", None).await.unwrap();
    assert_eq!(active.entry.data, Some(json!({"id": 1})));
}

#[tokio::test]
async fn transform_failure_settles_as_error() {
    let executor = StubExecutor::default().respond("getPost", json!({"unexpected": true}));
    let client = Muninn::builder()
        .executor(executor)
        .endpoint(Endpoint::query("getPost").transform_response(|raw| {
            raw.get("data").cloned().ok_or_else(|| "missing data".to_string())
        }))
        .build()
        .unwrap();

    let active = client.query("getPost", None).await.unwrap();
    assert_eq!(active.entry.status, QueryStatus::Error);
    // Transform failures are recorded as a fetch error wrapping the message.
    assert_eq!(
        active.entry.error,
        Some(json!({"transformError": "missing data"}))
    );
}

#[tokio::test]
async fn transform_error_reshapes_failure_payload() {
    let executor = StubExecutor::default().fail("getPost", json!({"status": 404}));
    let client = Muninn::builder()
        .executor(executor)
        .endpoint(Endpoint::query("getPost").transform_error(|payload| {
            Ok(json!({"code": payload.get("status").cloned().unwrap_or(Value::Null)}))
        }))
        .build()
        .unwrap();

    let active = client.query("getPost", None).await.unwrap();
    assert_eq!(active.entry.error, Some(json!({"code": 404})));
}

// =========================================================================
// peek
// =========================================================================

#[tokio::test]
async fn peek_never_fetches_or_subscribes() {
    let executor = StubExecutor::default().respond("getPost", json!({"id": 1}));
    let client = Muninn::builder()
        .executor(executor)
        .endpoint(Endpoint::query("getPost"))
        .build()
        .unwrap();

    // Nothing cached, nothing fetched.
    assert!(client.peek("getPost", Some(&json!({"id": 1}))).unwrap().is_none());
    assert_eq!(client.entry_count(), 0);

    let active = client.query("getPost", Some(json!({"id": 1}))).await.unwrap();
    let before = active.entry.subscriber_count;

    let peeked = client
        .peek("getPost", Some(&json!({"id": 1})))
        .unwrap()
        .unwrap();
    assert_eq!(peeked.subscriber_count, before);
    assert_eq!(peeked.data, Some(json!({"id": 1})));
}

// =========================================================================
// prefetch
// =========================================================================

#[tokio::test]
async fn prefetch_populates_without_subscription() {
    let client = client_with(StubExecutor::default().respond("getPost", json!({"id": 1})));

    client.prefetch("getPost", Some(json!({"id": 1}))).await.unwrap();

    let entry = client
        .peek("getPost", Some(&json!({"id": 1})))
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, QueryStatus::Success);
    assert_eq!(entry.subscriber_count, 0);
}

#[tokio::test]
async fn prefetch_of_fresh_entry_is_noop() {
    let executor = Arc::new(StubExecutor::default().respond("getPost", json!({"id": 1})));
    let client = Muninn::builder()
        .executor_arc(executor.clone())
        .endpoint(Endpoint::query("getPost"))
        .build()
        .unwrap();

    client.prefetch("getPost", Some(json!({"id": 1}))).await.unwrap();
    client.prefetch("getPost", Some(json!({"id": 1}))).await.unwrap();

    assert_eq!(client.entry_count(), 1);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

// =========================================================================
// Subscriptions and eviction
// =========================================================================

#[tokio::test]
async fn last_unsubscribe_evicts_entry() {
    let client = client_with(StubExecutor::default().respond("getPost", json!({"id": 1})));

    let active = client.query("getPost", Some(json!({"id": 1}))).await.unwrap();
    assert_eq!(client.entry_count(), 1);

    active.subscription.unsubscribe();
    assert_eq!(client.entry_count(), 0);
    assert!(client.peek("getPost", Some(&json!({"id": 1}))).unwrap().is_none());
}

#[tokio::test]
async fn entry_survives_while_other_subscribers_remain() {
    let client = client_with(StubExecutor::default().respond("getPost", json!({"id": 1})));

    let first = client.query("getPost", Some(json!({"id": 1}))).await.unwrap();
    let second = client.query("getPost", Some(json!({"id": 1}))).await.unwrap();

    drop(first);
    assert_eq!(client.entry_count(), 1);
    drop(second);
    assert_eq!(client.entry_count(), 0);
}

// =========================================================================
// End-to-end scenario (delete invalidates the cached post)
// =========================================================================

#[tokio::test]
async fn delete_invalidates_cached_post() {
    let executor = StubExecutor::default()
        .respond("getPost", json!({"id": 1, "title": "X"}))
        .respond("deletePost", json!({"deleted": true}));
    let client = client_with(executor);

    let active = client.query("getPost", Some(json!({"id": 1}))).await.unwrap();
    assert_eq!(active.entry.data, Some(json!({"id": 1, "title": "X"})));

    client.mutate("deletePost", Some(json!({"id": 1}))).await.unwrap();

    // The subscribed entry is revalidating, never silently stale.
    let peeked = client
        .peek("getPost", Some(&json!({"id": 1})))
        .unwrap()
        .unwrap();
    assert!(peeked.stale || peeked.status == QueryStatus::Loading);

    // Let the background refetch settle.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let settled = client
        .peek("getPost", Some(&json!({"id": 1})))
        .unwrap()
        .unwrap();
    assert_eq!(settled.status, QueryStatus::Success);
    assert!(!settled.stale);
}
