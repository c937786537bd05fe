//! In-process backend: a loopback hub standing in for the durable store
//! and its broadcast channels.
//!
//! DESIGN
//! ======
//! The hub owns the authoritative object map per workspace and resolves
//! writes with the same last-writer-wins rule the engine applies, so
//! every client converges on the hub's view. Broadcasts are best-effort
//! `try_send` — a subscriber with a full channel misses events, matching
//! the at-least-once, unordered-across-writers channel contract the
//! engine must tolerate. Fault-injection hooks simulate write failures
//! and connection drops for tests and the simulation driver.

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;
use wire::{
    CursorPayload, Frame, ObjectPatch, ObjectRecord, PresencePayload, PresenceSnapshot,
    encode_frame, op, to_data,
};

use crate::backend::{Backend, BackendError, Subscription};
use crate::engine::now_ms;
use crate::identity::Identity;
use crate::store::CanvasObject;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct WorkspaceHub {
    objects: HashMap<String, ObjectRecord>,
    feed_subs: HashMap<String, mpsc::Sender<Vec<u8>>>,
    presence_subs: HashMap<String, mpsc::Sender<Vec<u8>>>,
    participants: HashMap<String, PresencePayload>,
}

impl WorkspaceHub {
    fn broadcast_feed(&self, frame: &Frame, duplicate: bool) {
        let bytes = encode_frame(frame);
        for tx in self.feed_subs.values() {
            let _ = tx.try_send(bytes.clone());
            if duplicate {
                let _ = tx.try_send(bytes.clone());
            }
        }
    }

    fn broadcast_presence(&self, frame: &Frame, exclude: Option<&str>) {
        let bytes = encode_frame(frame);
        for (conn_id, tx) in &self.presence_subs {
            if exclude == Some(conn_id.as_str()) {
                continue;
            }
            let _ = tx.try_send(bytes.clone());
        }
    }
}

#[derive(Default)]
struct HubInner {
    workspaces: HashMap<String, WorkspaceHub>,
    fail_next_create: bool,
    fail_next_update: bool,
    duplicate_feed: bool,
}

/// Loopback [`Backend`] used by tests and the simulation driver.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryBackend {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next durable create with a transient error.
    pub fn fail_next_create(&self) {
        self.locked().fail_next_create = true;
    }

    /// Fail the next durable update with a transient error.
    pub fn fail_next_update(&self) {
        self.locked().fail_next_update = true;
    }

    /// Deliver every subsequent feed event twice, simulating
    /// at-least-once duplicate delivery.
    pub fn set_duplicate_feed(&self, enabled: bool) {
        self.locked().duplicate_feed = enabled;
    }

    /// Sever every live channel in a workspace, simulating an outage.
    /// Events broadcast while down are not replayed; clients converge
    /// again through the full reload on resubscribe.
    pub fn drop_connections(&self, workspace_id: &str) {
        let mut inner = self.locked();
        if let Some(hub) = inner.workspaces.get_mut(workspace_id) {
            hub.feed_subs.clear();
            hub.presence_subs.clear();
        }
    }

    /// The authoritative object set, ordered by creation time.
    #[must_use]
    pub fn authoritative(&self, workspace_id: &str) -> Vec<ObjectRecord> {
        let inner = self.locked();
        let Some(hub) = inner.workspaces.get(workspace_id) else {
            return Vec::new();
        };
        let mut records: Vec<ObjectRecord> = hub.objects.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .total_cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    #[allow(clippy::cast_possible_truncation)]
    fn event_frame(
        workspace_id: &str,
        from: Option<String>,
        op_name: &str,
        data: serde_json::Value,
    ) -> Frame {
        Frame {
            id: Uuid::new_v4().to_string(),
            ts: now_ms() as i64,
            workspace_id: Some(workspace_id.to_owned()),
            from,
            op: op_name.to_owned(),
            data,
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn load_all(&self, workspace_id: &str) -> Result<Vec<ObjectRecord>, BackendError> {
        Ok(self.authoritative(workspace_id))
    }

    async fn create_object(&self, record: ObjectRecord) -> Result<ObjectRecord, BackendError> {
        let mut inner = self.locked();
        if inner.fail_next_create {
            inner.fail_next_create = false;
            return Err(BackendError::Unavailable("injected create failure".to_owned()));
        }
        let duplicate = inner.duplicate_feed;
        let hub = inner
            .workspaces
            .entry(record.workspace_id.clone())
            .or_default();

        // Bounds-check on the way in; the client-chosen id is preserved.
        let canonical: ObjectRecord = CanvasObject::from(record).clamped().into();

        if let Some(existing) = hub.objects.get(&canonical.id) {
            if canonical.updated_at < existing.updated_at {
                // Duplicate of a create that has since been superseded.
                return Ok(existing.clone());
            }
        }

        hub.objects.insert(canonical.id.clone(), canonical.clone());
        let frame = Self::event_frame(
            &canonical.workspace_id,
            canonical.created_by.clone(),
            op::OBJECT_CREATED,
            to_data(&canonical),
        );
        hub.broadcast_feed(&frame, duplicate);

        Ok(canonical)
    }

    async fn update_object(
        &self,
        workspace_id: &str,
        id: &str,
        patch: ObjectPatch,
    ) -> Result<ObjectRecord, BackendError> {
        let mut inner = self.locked();
        if inner.fail_next_update {
            inner.fail_next_update = false;
            return Err(BackendError::Unavailable("injected update failure".to_owned()));
        }
        let duplicate = inner.duplicate_feed;
        let hub = inner
            .workspaces
            .get_mut(workspace_id)
            .ok_or_else(|| BackendError::WorkspaceNotFound(workspace_id.to_owned()))?;
        let existing = hub
            .objects
            .get(id)
            .ok_or_else(|| BackendError::ObjectNotFound(id.to_owned()))?;

        if patch.updated_at < existing.updated_at {
            // Stale by last-writer-wins: the current record is the answer,
            // not an error.
            return Ok(existing.clone());
        }

        let mut updated = existing.clone();
        if let Some(x) = patch.x {
            updated.x = x;
        }
        if let Some(y) = patch.y {
            updated.y = y;
        }
        if let Some(width) = patch.width {
            updated.width = width;
        }
        if let Some(height) = patch.height {
            updated.height = height;
        }
        updated.updated_at = patch.updated_at;

        let canonical: ObjectRecord = CanvasObject::from(updated).clamped().into();
        hub.objects.insert(canonical.id.clone(), canonical.clone());
        let frame =
            Self::event_frame(workspace_id, None, op::OBJECT_UPDATED, to_data(&canonical));
        hub.broadcast_feed(&frame, duplicate);

        Ok(canonical)
    }

    async fn subscribe(
        &self,
        workspace_id: &str,
        identity: Option<&Identity>,
        conn_id: &str,
    ) -> Result<Subscription, BackendError> {
        let mut inner = self.locked();
        let hub = inner.workspaces.entry(workspace_id.to_owned()).or_default();

        let (feed_tx, feed_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (presence_tx, presence_rx) = mpsc::channel(CHANNEL_CAPACITY);
        hub.feed_subs.insert(conn_id.to_owned(), feed_tx);

        if let Some(identity) = identity {
            let payload = PresencePayload {
                user_id: identity.user_id.clone(),
                display_name: identity.display_name.clone(),
                color: identity.color.clone(),
                conn_id: conn_id.to_owned(),
            };
            hub.participants.insert(conn_id.to_owned(), payload.clone());
            let frame = Self::event_frame(
                workspace_id,
                Some(identity.user_id.clone()),
                op::PRESENCE_JOIN,
                to_data(&payload),
            );
            hub.broadcast_presence(&frame, Some(conn_id));
        }

        // Roster snapshot for the new subscriber, then register it for
        // subsequent broadcasts.
        let snapshot = PresenceSnapshot { users: hub.participants.values().cloned().collect() };
        let frame =
            Self::event_frame(workspace_id, None, op::PRESENCE_SNAPSHOT, to_data(&snapshot));
        let _ = presence_tx.try_send(encode_frame(&frame));
        hub.presence_subs.insert(conn_id.to_owned(), presence_tx);

        Ok(Subscription { feed: feed_rx, presence: presence_rx })
    }

    async fn send_cursor(
        &self,
        workspace_id: &str,
        conn_id: &str,
        cursor: CursorPayload,
    ) -> Result<(), BackendError> {
        let inner = self.locked();
        let Some(hub) = inner.workspaces.get(workspace_id) else {
            debug!(workspace = %workspace_id, "cursor for unknown workspace dropped");
            return Ok(());
        };
        let frame = Self::event_frame(
            workspace_id,
            Some(cursor.user_id.clone()),
            op::CURSOR_MOVED,
            to_data(&cursor),
        );
        hub.broadcast_presence(&frame, Some(conn_id));
        Ok(())
    }

    async fn leave(&self, workspace_id: &str, conn_id: &str) -> Result<(), BackendError> {
        let mut inner = self.locked();
        let Some(hub) = inner.workspaces.get_mut(workspace_id) else {
            return Ok(());
        };
        hub.feed_subs.remove(conn_id);
        hub.presence_subs.remove(conn_id);
        let Some(payload) = hub.participants.remove(conn_id) else {
            return Ok(());
        };

        let leave = Self::event_frame(
            workspace_id,
            Some(payload.user_id.clone()),
            op::PRESENCE_LEAVE,
            to_data(&payload),
        );
        hub.broadcast_presence(&leave, None);

        // Explicit hide so peers drop the cursor without waiting out the TTL.
        let hide = CursorPayload {
            user_id: payload.user_id.clone(),
            display_name: payload.display_name.clone(),
            color: payload.color.clone(),
            x: 0.0,
            y: 0.0,
            visible: false,
            ts: now_ms(),
        };
        let hide_frame = Self::event_frame(
            workspace_id,
            Some(payload.user_id),
            op::CURSOR_MOVED,
            to_data(&hide),
        );
        hub.broadcast_presence(&hide_frame, None);

        Ok(())
    }
}
