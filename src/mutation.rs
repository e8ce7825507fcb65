//! Optimistic mutation support.
//!
//! An optimistic patch is applied synchronously to a targeted entry before
//! the mutation's fetch resolves; the pre-patch snapshot is retained. On
//! success the patch is committed (or superseded by the real response); on
//! failure the snapshot is restored and a rollback event is emitted.
//!
//! Concurrent patches on one entry compose as independent reversible deltas
//! with stack discipline: rolling back a patch that is not on top undoes
//! the later patches, restores the target's snapshot, then reapplies the
//! later deltas on the rolled-back base — never a blind overwrite.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::key::{self, CacheKey};
use crate::store::{AppliedPatch, EntryStore, PatchFn};
use crate::telemetry;

/// A declared optimistic patch: which cached (endpoint, argument) entry to
/// touch and how.
#[derive(Clone)]
pub struct OptimisticPatch {
    pub(crate) endpoint: String,
    pub(crate) arg: Option<Value>,
    pub(crate) apply: PatchFn,
}

impl OptimisticPatch {
    pub fn new(
        endpoint: impl Into<String>,
        arg: Option<Value>,
        apply: impl Fn(&mut Value) + Send + Sync + 'static,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            arg,
            apply: Arc::new(apply),
        }
    }

    pub(crate) fn key(&self) -> CacheKey {
        key::encode(&self.endpoint, self.arg.as_ref())
    }
}

impl std::fmt::Debug for OptimisticPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticPatch")
            .field("endpoint", &self.endpoint)
            .field("arg", &self.arg)
            .finish()
    }
}

/// Handle for one applied patch, used to commit or roll it back.
#[derive(Debug)]
pub struct PatchTicket {
    key: CacheKey,
    id: u64,
}

/// Applies, commits, and rolls back optimistic patches against the entry
/// store. Pure logic over store state; it keeps no copies of entry data
/// outside the per-entry patch stacks.
pub struct MutationExecutor {
    store: Arc<EntryStore>,
    next_ticket: AtomicU64,
}

impl MutationExecutor {
    pub(crate) fn new(store: Arc<EntryStore>) -> Self {
        Self {
            store,
            next_ticket: AtomicU64::new(0),
        }
    }

    /// Apply `patch` to the entry for `key`, retaining the pre-patch
    /// snapshot. Returns `None` when the entry is absent or holds no data;
    /// such targets are skipped, not created.
    pub fn apply(&self, key: &CacheKey, patch: PatchFn) -> Option<PatchTicket> {
        let id = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.store
            .mutate_record(key, |record| {
                let Some(data) = record.entry.data.as_mut() else {
                    return (None, false);
                };
                let snapshot = Some(data.clone());
                patch(data);
                record.patches.push(AppliedPatch {
                    ticket: id,
                    snapshot,
                    reapply: Arc::clone(&patch),
                    committed: false,
                });
                (
                    Some(PatchTicket {
                        key: key.clone(),
                        id,
                    }),
                    true,
                )
            })
            .flatten()
    }

    /// Make the patch permanent. The entry data is left as-is.
    ///
    /// The record stays on the stack, flagged, while earlier pending
    /// patches exist below it: their rollback restores a snapshot that
    /// predates this patch, so its delta must be reapplied like any other
    /// later patch. Records are only dropped from the bottom of the stack,
    /// where no rollback can reach under them.
    pub fn commit(&self, ticket: PatchTicket) {
        self.store.mutate_record(&ticket.key, |record| {
            if let Some(patch) = record.patches.iter_mut().find(|p| p.ticket == ticket.id) {
                patch.committed = true;
            }
            drain_committed_bottom(&mut record.patches);
            ((), false)
        });
    }

    /// Undo the patch, all-or-nothing. Later patches — committed siblings
    /// included — are undone, the target's snapshot restored, then the
    /// later deltas reapplied on the new base with fresh snapshots.
    ///
    /// A ticket whose patch is gone (entry evicted, or the stack cleared by
    /// an authoritative refetch) is a no-op.
    pub fn rollback(&self, ticket: PatchTicket) {
        let rolled_back = self
            .store
            .mutate_record(&ticket.key, |record| {
                let Some(pos) = record.patches.iter().position(|p| p.ticket == ticket.id)
                else {
                    return (false, false);
                };
                let tail = record.patches.split_off(pos);
                // The oldest popped snapshot predates the whole tail, so
                // restoring it undoes the target and everything after it.
                record.entry.data = tail[0].snapshot.clone();
                for later in tail.into_iter().skip(1) {
                    let snapshot = record.entry.data.clone();
                    if let Some(data) = record.entry.data.as_mut() {
                        (later.reapply)(data);
                    }
                    record.patches.push(AppliedPatch {
                        ticket: later.ticket,
                        snapshot,
                        reapply: later.reapply,
                        committed: later.committed,
                    });
                }
                drain_committed_bottom(&mut record.patches);
                (true, true)
            })
            .unwrap_or(false);

        if rolled_back {
            metrics::counter!(telemetry::ROLLBACKS_TOTAL).increment(1);
            tracing::debug!(key = %ticket.key, "rolled back optimistic patch");
        }
    }
}

/// Drop committed records that have reached the bottom of the stack. Their
/// effect is baked into every remaining snapshot, so nothing can roll them
/// back or need their delta again.
fn drain_committed_bottom(patches: &mut Vec<AppliedPatch>) {
    while patches.first().is_some_and(|p| p.committed) {
        patches.remove(0);
    }
}
