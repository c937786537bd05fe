//! Object store: the reconciled in-memory view of all canvas objects.
//!
//! DESIGN
//! ======
//! The store is the single owner of live `CanvasObject`s; every mutation
//! funnels through `upsert`, which applies the last-writer-wins rule: an
//! incoming record replaces the stored one only when its `updated_at` is
//! at least as new. Stale records are discarded silently (they are an
//! expected, frequent event under concurrent editing, not a failure), and
//! replaying the same record is a no-op replace, which makes the store
//! idempotent under at-least-once delivery.
//!
//! Callers clamp positions and sizes before calling `upsert`; the pure
//! clamping helpers here are shared by every mutation path (optimistic,
//! drag-in-progress, reconciled).

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use wire::ObjectRecord;

use crate::consts::{MIN_SIZE, WORKSPACE_SIZE};

/// Unique identifier for a canvas object (UUID string, client-generated).
pub type ObjectId = String;

/// A positioned, sized, colored rectangle on the shared workspace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasObject {
    /// Unique identifier.
    pub id: ObjectId,
    /// Left edge in workspace coordinates.
    pub x: f64,
    /// Top edge in workspace coordinates.
    pub y: f64,
    /// Width in workspace units.
    pub width: f64,
    /// Height in workspace units.
    pub height: f64,
    /// Fill color, one of the fixed palette.
    pub color: String,
    /// User who created the object, if known.
    pub created_by: Option<String>,
    /// Creation time, ms since the Unix epoch. Drives stable list order.
    pub created_at: f64,
    /// Last accepted mutation time, ms since the Unix epoch. Drives
    /// last-writer-wins resolution only, never display.
    pub updated_at: f64,
    /// Workspace this object belongs to.
    pub workspace_id: String,
}

impl CanvasObject {
    /// Copy of this object with size and position clamped into the
    /// workspace.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        let (width, height) = clamp_size(self.width, self.height);
        let (x, y) = clamp_position(width, height, self.x, self.y);
        self.x = x;
        self.y = y;
        self.width = width;
        self.height = height;
        self
    }
}

impl From<ObjectRecord> for CanvasObject {
    fn from(record: ObjectRecord) -> Self {
        Self {
            id: record.id,
            x: record.x,
            y: record.y,
            width: record.width,
            height: record.height,
            color: record.color,
            created_by: record.created_by,
            created_at: record.created_at,
            updated_at: record.updated_at,
            workspace_id: record.workspace_id,
        }
    }
}

impl From<CanvasObject> for ObjectRecord {
    fn from(obj: CanvasObject) -> Self {
        Self {
            id: obj.id,
            x: obj.x,
            y: obj.y,
            width: obj.width,
            height: obj.height,
            color: obj.color,
            created_by: obj.created_by,
            created_at: obj.created_at,
            updated_at: obj.updated_at,
            workspace_id: obj.workspace_id,
        }
    }
}

/// Clip a proposed position so a `width` × `height` rectangle stays fully
/// inside the workspace on both axes.
#[must_use]
pub fn clamp_position(width: f64, height: f64, x: f64, y: f64) -> (f64, f64) {
    (
        x.clamp(0.0, (WORKSPACE_SIZE - width).max(0.0)),
        y.clamp(0.0, (WORKSPACE_SIZE - height).max(0.0)),
    )
}

/// Enforce the minimum object size and keep dimensions inside the
/// workspace.
#[must_use]
pub fn clamp_size(width: f64, height: f64) -> (f64, f64) {
    (
        width.clamp(MIN_SIZE, WORKSPACE_SIZE),
        height.clamp(MIN_SIZE, WORKSPACE_SIZE),
    )
}

/// In-memory store of canvas objects, keyed by id.
pub struct ObjectStore {
    objects: HashMap<ObjectId, CanvasObject>,
}

impl ObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { objects: HashMap::new() }
    }

    /// Insert-or-replace under last-writer-wins.
    ///
    /// Returns `true` if the incoming object was applied, `false` if it was
    /// discarded as stale (`updated_at` older than the stored entry's).
    pub fn upsert(&mut self, obj: CanvasObject) -> bool {
        if let Some(existing) = self.objects.get(&obj.id) {
            if obj.updated_at < existing.updated_at {
                return false;
            }
        }
        self.objects.insert(obj.id.clone(), obj);
        true
    }

    /// Remove an object unconditionally, returning it if present.
    ///
    /// Deletion is outside the base editing model; this exists for the
    /// optimistic-create rollback path and future delete extensions.
    pub fn remove(&mut self, id: &str) -> Option<CanvasObject> {
        self.objects.remove(id)
    }

    /// Return a reference to an object by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CanvasObject> {
        self.objects.get(id)
    }

    /// All objects ordered by `(created_at, id)`.
    ///
    /// The ordering is insertion-stable and identical on every client no
    /// matter what order events arrived in.
    #[must_use]
    pub fn list(&self) -> Vec<CanvasObject> {
        let mut objs: Vec<CanvasObject> = self.objects.values().cloned().collect();
        objs.sort_by(|a, b| {
            a.created_at
                .total_cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        objs
    }

    /// Number of objects currently in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if the store contains no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}
