//! Optimistic mutation pipeline: local intents made visible instantly,
//! reconciled against the durable write's outcome.
//!
//! DESIGN
//! ======
//! Per-mutation lifecycle: Pending → Confirmed (the canonical record is
//! echoed back and merged) or Pending → RolledBack (the durable create
//! failed and the object disappears). Object identity is client-assigned
//! — the durable create carries the same id the optimistic insert used,
//! so confirmation is just another `upsert` with the same key, never an
//! id remap. A failed move has no known-good position to roll back to;
//! the caller schedules a full reload instead.
//!
//! Drags on different objects are independent. A second local drag on an
//! object with a write still in flight simply supersedes it — the stale
//! write's eventual resolution loses by last-writer-wins, which is the
//! correct outcome without any cancellation machinery.

#[cfg(test)]
#[path = "mutate_test.rs"]
mod mutate_test;

use std::collections::HashSet;

use uuid::Uuid;
use wire::{ObjectPatch, ObjectRecord};

use crate::consts::{DEFAULT_SIZE, PALETTE};
use crate::identity::Identity;
use crate::store::{CanvasObject, ObjectId, ObjectStore, clamp_position};

/// Local mutation state: round-robin creation color and the set of
/// creates whose durable writes are still in flight.
pub struct Pipeline {
    workspace_id: String,
    color_cursor: usize,
    pending_creates: HashSet<ObjectId>,
}

impl Pipeline {
    /// Create a pipeline for one workspace session.
    #[must_use]
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            color_cursor: 0,
            pending_creates: HashSet::new(),
        }
    }

    /// Build a new object at the given point, apply it to the store
    /// immediately, and return the record to persist.
    ///
    /// Position is clamped, size is `DEFAULT_SIZE` square, and the color
    /// cycles round-robin through the palette.
    pub fn create_at(
        &mut self,
        store: &mut ObjectStore,
        identity: &Identity,
        x: f64,
        y: f64,
        now_ms: f64,
    ) -> ObjectRecord {
        let color = PALETTE[self.color_cursor].to_owned();
        self.color_cursor = (self.color_cursor + 1) % PALETTE.len();

        let (x, y) = clamp_position(DEFAULT_SIZE, DEFAULT_SIZE, x, y);
        let obj = CanvasObject {
            id: Uuid::new_v4().to_string(),
            x,
            y,
            width: DEFAULT_SIZE,
            height: DEFAULT_SIZE,
            color,
            created_by: Some(identity.user_id.clone()),
            created_at: now_ms,
            updated_at: now_ms,
            workspace_id: self.workspace_id.clone(),
        };

        self.pending_creates.insert(obj.id.clone());
        store.upsert(obj.clone());
        obj.into()
    }

    /// Local optimistic move during a drag. Clamps and updates the store;
    /// no durable write. Returns `true` if the store changed.
    pub fn drag_to(&self, store: &mut ObjectStore, id: &str, x: f64, y: f64, now_ms: f64) -> bool {
        let Some(existing) = store.get(id) else {
            return false;
        };

        let (x, y) = clamp_position(existing.width, existing.height, x, y);
        let mut moved = existing.clone();
        moved.x = x;
        moved.y = y;
        moved.updated_at = now_ms;
        store.upsert(moved)
    }

    /// Final move of a drag: apply locally and return the patch to
    /// persist, or `None` if the object is unknown.
    pub fn drag_end(
        &self,
        store: &mut ObjectStore,
        id: &str,
        x: f64,
        y: f64,
        now_ms: f64,
    ) -> Option<ObjectPatch> {
        if !self.drag_to(store, id, x, y, now_ms) {
            return None;
        }
        let obj = store.get(id)?;
        Some(ObjectPatch {
            x: Some(obj.x),
            y: Some(obj.y),
            width: None,
            height: None,
            updated_at: now_ms,
        })
    }

    /// A durable create succeeded: merge the canonical record. Visually a
    /// no-op — id, position, and color match the optimistic insert —
    /// though timestamps may tighten. Returns `true` if the store changed.
    pub fn confirm_create(&mut self, store: &mut ObjectStore, record: ObjectRecord) -> bool {
        self.pending_creates.remove(&record.id);
        store.upsert(CanvasObject::from(record).clamped())
    }

    /// A durable create failed: roll the optimistic object back out. The
    /// create silently disappears. Returns `true` if the store changed.
    pub fn rollback_create(&mut self, store: &mut ObjectStore, id: &str) -> bool {
        self.pending_creates.remove(id);
        store.remove(id).is_some()
    }

    /// Whether a create for this id is still awaiting its durable write.
    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending_creates.contains(id)
    }
}
