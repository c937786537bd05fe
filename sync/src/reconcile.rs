//! Change feed reconciliation: merging authoritative records into the
//! object store.
//!
//! Create and update notifications reconcile identically once mapped —
//! the distinction exists only because the backend signals them as
//! different kinds. Everything funnels through the store's
//! last-writer-wins `upsert`, which also makes replay of duplicate
//! deliveries a no-op. Events that cannot be trusted (foreign workspace,
//! malformed payload, unknown op) are dropped with a diagnostic log and
//! never reach the store.

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod reconcile_test;

use tracing::{debug, warn};
use wire::{Frame, ObjectRecord, op};

use crate::store::{CanvasObject, ObjectStore};

/// Merge one authoritative record into the store, clamped, under
/// last-writer-wins. Returns `true` if the store changed.
pub fn apply_record(store: &mut ObjectStore, record: ObjectRecord) -> bool {
    store.upsert(CanvasObject::from(record).clamped())
}

/// Merge a full snapshot, record by record.
///
/// Deliberately not a destructive clear: an optimistic entry created
/// while the load was in flight carries a newer `updated_at` than
/// anything the load returned, so it survives the merge.
pub fn apply_snapshot(store: &mut ObjectStore, records: Vec<ObjectRecord>) -> bool {
    let mut changed = false;
    for record in records {
        changed |= apply_record(store, record);
    }
    changed
}

/// Apply one change-feed frame for the active workspace. Returns `true`
/// if the store changed.
pub fn apply_feed_frame(store: &mut ObjectStore, workspace_id: &str, frame: &Frame) -> bool {
    match frame.op.as_str() {
        op::OBJECT_CREATED | op::OBJECT_UPDATED => match frame.object_record() {
            Ok(record) if record.workspace_id == workspace_id => apply_record(store, record),
            Ok(record) => {
                debug!(
                    workspace = %record.workspace_id,
                    active = %workspace_id,
                    "discarding change event for foreign workspace"
                );
                false
            }
            Err(error) => {
                warn!(error = %error, op = %frame.op, "dropping malformed change event");
                false
            }
        },
        other => {
            debug!(op = other, "ignoring unknown change-feed op");
            false
        }
    }
}
