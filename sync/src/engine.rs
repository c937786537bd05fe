//! The synchronization engine: one task owning all live state.
//!
//! DESIGN
//! ======
//! Every input — user intents, decoded channel frames, durable-write
//! completions, sweep and broadcast ticks — arrives on a single event
//! queue and is processed to completion, one message at a time. No locks
//! guard the object store, roster, or pipeline: only this task mutates
//! them.
//!
//! Durable writes are spawned as tasks whose results re-enter the queue,
//! so the store stays freely mutable while a write is in flight — remote
//! notifications and further local edits interleave — and every
//! resolution, including the suspended write's own, passes through the
//! same last-writer-wins merge.
//!
//! Read-side consumers (rendering, input) receive watch-channel
//! snapshots, published in the same processing turn as the change; they
//! never mutate core state.

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wire::{CursorPayload, Frame, ObjectRecord, decode_frame, op};

use crate::backend::{Backend, BackendError};
use crate::consts::{CURSOR_SEND_INTERVAL_MS, CURSOR_SWEEP_INTERVAL_MS};
use crate::identity::Identity;
use crate::mutate::Pipeline;
use crate::presence::{CursorGate, CursorMap, PresenceEntry, PresenceRoster, RemoteCursor};
use crate::reconcile;
use crate::store::{CanvasObject, ObjectId, ObjectStore};
use crate::supervisor::{self, ConnectionStatus};

const EVENT_QUEUE_CAPACITY: usize = 256;

/// Wall-clock milliseconds since the Unix epoch.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub(crate) fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_millis() as f64)
}

/// A user intent from the input seam.
#[derive(Clone, Debug)]
pub enum Intent {
    /// Create a default-sized object at a point.
    CreateAt { x: f64, y: f64 },
    /// Optimistic per-frame move during a drag; no durable write.
    DragTo { id: ObjectId, x: f64, y: f64 },
    /// Final position of a drag; issues one durable update.
    DragEnd { id: ObjectId, x: f64, y: f64 },
    /// Local-only selection change.
    Select(Option<ObjectId>),
    /// Local pointer moved inside the workspace.
    PointerMoved { x: f64, y: f64 },
    /// Local pointer left the workspace.
    PointerLeft,
}

/// Everything the engine task reacts to.
pub(crate) enum EngineEvent {
    Intent(Intent),
    Status(ConnectionStatus),
    FeedBytes(Vec<u8>),
    PresenceBytes(Vec<u8>),
    LoadResult(Result<Vec<ObjectRecord>, BackendError>),
    CreateResult { id: ObjectId, result: Result<ObjectRecord, BackendError> },
    UpdateResult { id: ObjectId, result: Result<ObjectRecord, BackendError> },
}

/// Everything needed to bring an engine up for one workspace session.
pub struct EngineConfig {
    /// The workspace to join.
    pub workspace_id: String,
    /// Local identity; `None` refuses all mutation intents.
    pub identity: Option<Identity>,
    /// The durable backend and its channels.
    pub backend: Arc<dyn Backend>,
}

/// Handle held by the rendering/input seam.
///
/// Intent methods enqueue into the engine's event queue; subscription
/// methods hand out watch receivers whose snapshots update in the same
/// processing turn as the underlying change. Call
/// [`shutdown`](Self::shutdown) to tear the session down gracefully.
pub struct EngineHandle {
    events: mpsc::Sender<EngineEvent>,
    objects: watch::Receiver<Vec<CanvasObject>>,
    cursors: watch::Receiver<Vec<RemoteCursor>>,
    presence: watch::Receiver<Vec<PresenceEntry>>,
    selection: watch::Receiver<Option<ObjectId>>,
    status: watch::Receiver<ConnectionStatus>,
    shutdown: watch::Sender<bool>,
    supervisor_task: Option<JoinHandle<()>>,
    engine_task: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Snapshot stream of the reconciled object list.
    #[must_use]
    pub fn subscribe_to_objects(&self) -> watch::Receiver<Vec<CanvasObject>> {
        self.objects.clone()
    }

    /// Snapshot stream of visible remote cursors.
    #[must_use]
    pub fn subscribe_to_cursors(&self) -> watch::Receiver<Vec<RemoteCursor>> {
        self.cursors.clone()
    }

    /// Snapshot stream of the online roster.
    #[must_use]
    pub fn subscribe_to_presence(&self) -> watch::Receiver<Vec<PresenceEntry>> {
        self.presence.clone()
    }

    /// Snapshot stream of the local selection.
    #[must_use]
    pub fn subscribe_to_selection(&self) -> watch::Receiver<Option<ObjectId>> {
        self.selection.clone()
    }

    /// Snapshot stream of the connection status.
    #[must_use]
    pub fn subscribe_to_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Create a default-sized object at a point.
    pub async fn create_at(&self, x: f64, y: f64) {
        self.send_intent(Intent::CreateAt { x, y }).await;
    }

    /// Optimistic per-frame move during a drag.
    pub async fn drag_to(&self, id: impl Into<ObjectId>, x: f64, y: f64) {
        self.send_intent(Intent::DragTo { id: id.into(), x, y }).await;
    }

    /// Final position of a drag; issues one durable update.
    pub async fn drag_end(&self, id: impl Into<ObjectId>, x: f64, y: f64) {
        self.send_intent(Intent::DragEnd { id: id.into(), x, y }).await;
    }

    /// Change the local selection.
    pub async fn select(&self, id: Option<ObjectId>) {
        self.send_intent(Intent::Select(id)).await;
    }

    /// Report the local pointer position inside the workspace.
    pub async fn pointer_moved(&self, x: f64, y: f64) {
        self.send_intent(Intent::PointerMoved { x, y }).await;
    }

    /// Report the local pointer leaving the workspace.
    pub async fn pointer_left(&self) {
        self.send_intent(Intent::PointerLeft).await;
    }

    /// Tear the session down: leave presence, close both channels, stop
    /// both tasks.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        // The supervisor exits first (announcing the leave and reporting
        // Terminated), which in turn lets the engine task drain and stop.
        if let Some(task) = self.supervisor_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.engine_task.take() {
            let _ = task.await;
        }
    }

    async fn send_intent(&self, intent: Intent) {
        if self.events.send(EngineEvent::Intent(intent)).await.is_err() {
            warn!("engine is gone; intent dropped");
        }
    }
}

/// Spawn the engine and its supervisor for one workspace session.
#[must_use]
pub fn spawn(config: EngineConfig) -> EngineHandle {
    let EngineConfig { workspace_id, identity, backend } = config;
    let conn_id = Uuid::new_v4().to_string();

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (objects_tx, objects_rx) = watch::channel(Vec::new());
    let (cursors_tx, cursors_rx) = watch::channel(Vec::new());
    let (presence_tx, presence_rx) = watch::channel(Vec::new());
    let (selection_tx, selection_rx) = watch::channel(None);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);

    let supervisor_task = tokio::spawn(supervisor::run(
        backend.clone(),
        workspace_id.clone(),
        identity.clone(),
        conn_id.clone(),
        events_tx.clone(),
        shutdown_rx,
    ));

    let engine = Engine {
        workspace_id: workspace_id.clone(),
        identity,
        backend,
        conn_id,
        events_tx: events_tx.clone(),
        store: ObjectStore::new(),
        pipeline: Pipeline::new(workspace_id),
        roster: PresenceRoster::new(),
        cursors: CursorMap::new(),
        gate: CursorGate::new(CURSOR_SEND_INTERVAL_MS as f64),
        objects_tx,
        cursors_tx,
        presence_tx,
        selection_tx,
        status_tx,
    };
    let engine_task = tokio::spawn(engine.run(events_rx));

    EngineHandle {
        events: events_tx,
        objects: objects_rx,
        cursors: cursors_rx,
        presence: presence_rx,
        selection: selection_rx,
        status: status_rx,
        shutdown: shutdown_tx,
        supervisor_task: Some(supervisor_task),
        engine_task: Some(engine_task),
    }
}

struct Engine {
    workspace_id: String,
    identity: Option<Identity>,
    backend: Arc<dyn Backend>,
    conn_id: String,
    events_tx: mpsc::Sender<EngineEvent>,
    store: ObjectStore,
    pipeline: Pipeline,
    roster: PresenceRoster,
    cursors: CursorMap,
    gate: CursorGate,
    objects_tx: watch::Sender<Vec<CanvasObject>>,
    cursors_tx: watch::Sender<Vec<RemoteCursor>>,
    presence_tx: watch::Sender<Vec<PresenceEntry>>,
    selection_tx: watch::Sender<Option<ObjectId>>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl Engine {
    async fn run(mut self, mut events: mpsc::Receiver<EngineEvent>) {
        let mut sweep = tokio::time::interval(Duration::from_millis(CURSOR_SWEEP_INTERVAL_MS));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cursor_tick = tokio::time::interval(Duration::from_millis(CURSOR_SEND_INTERVAL_MS));
        cursor_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(EngineEvent::Status(ConnectionStatus::Terminated)) => {
                        self.roster.clear_self();
                        self.publish_presence();
                        let _ = self.status_tx.send(ConnectionStatus::Terminated);
                        break;
                    }
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = sweep.tick() => {
                    if self.cursors.sweep(now_ms()) {
                        self.publish_cursors();
                    }
                }
                _ = cursor_tick.tick() => self.flush_cursor(),
            }
        }
        info!(workspace = %self.workspace_id, "engine stopped");
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Intent(intent) => self.handle_intent(intent),
            EngineEvent::Status(status) => self.handle_status(status),
            EngineEvent::FeedBytes(bytes) => match decode_frame(&bytes) {
                Ok(frame) => {
                    if reconcile::apply_feed_frame(&mut self.store, &self.workspace_id, &frame) {
                        self.publish_objects();
                    }
                }
                Err(error) => warn!(error = %error, "dropping undecodable feed frame"),
            },
            EngineEvent::PresenceBytes(bytes) => match decode_frame(&bytes) {
                Ok(frame) => self.handle_presence_frame(&frame),
                Err(error) => warn!(error = %error, "dropping undecodable presence frame"),
            },
            EngineEvent::LoadResult(Ok(records)) => {
                info!(count = records.len(), "full reload merged");
                if reconcile::apply_snapshot(&mut self.store, records) {
                    self.publish_objects();
                }
            }
            EngineEvent::LoadResult(Err(error)) => {
                // The supervisor's reconnect loop owns recovery from here.
                warn!(error = %error, "full reload failed");
            }
            EngineEvent::CreateResult { id: _, result: Ok(record) } => {
                if self.pipeline.confirm_create(&mut self.store, record) {
                    self.publish_objects();
                }
            }
            EngineEvent::CreateResult { id, result: Err(error) } => {
                warn!(error = %error, object = %id, "durable create failed; rolling back");
                if self.pipeline.rollback_create(&mut self.store, &id) {
                    self.publish_objects();
                }
            }
            EngineEvent::UpdateResult { id: _, result: Ok(record) } => {
                if reconcile::apply_record(&mut self.store, record) {
                    self.publish_objects();
                }
            }
            EngineEvent::UpdateResult { id, result: Err(error) } => {
                // No known-good position to roll back to; reload instead of
                // silently diverging. The optimistic position stays visible
                // in the meantime.
                warn!(error = %error, object = %id, "durable update failed; scheduling full resync");
                self.request_load();
            }
        }
    }

    fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::CreateAt { x, y } => self.handle_create(x, y),
            Intent::DragTo { id, x, y } => {
                if self.identity.is_none() {
                    warn!("drag refused: no authenticated identity");
                    return;
                }
                if self.pipeline.drag_to(&mut self.store, &id, x, y, now_ms()) {
                    self.publish_objects();
                }
            }
            Intent::DragEnd { id, x, y } => self.handle_drag_end(&id, x, y),
            Intent::Select(selection) => {
                let _ = self.selection_tx.send(selection);
            }
            Intent::PointerMoved { x, y } => self.gate.offer(x, y),
            Intent::PointerLeft => {
                self.gate.clear();
                self.send_cursor_hidden();
            }
        }
    }

    fn handle_create(&mut self, x: f64, y: f64) {
        let Some(identity) = self.identity.clone() else {
            warn!("create refused: no authenticated identity");
            return;
        };

        let record = self
            .pipeline
            .create_at(&mut self.store, &identity, x, y, now_ms());
        self.publish_objects();

        let backend = self.backend.clone();
        let events = self.events_tx.clone();
        let id = record.id.clone();
        tokio::spawn(async move {
            let result = backend.create_object(record).await;
            let _ = events.send(EngineEvent::CreateResult { id, result }).await;
        });
    }

    fn handle_drag_end(&mut self, id: &str, x: f64, y: f64) {
        if self.identity.is_none() {
            warn!("drag refused: no authenticated identity");
            return;
        }
        let Some(patch) = self.pipeline.drag_end(&mut self.store, id, x, y, now_ms()) else {
            debug!(object = %id, "drag end for unknown object ignored");
            return;
        };
        self.publish_objects();

        let backend = self.backend.clone();
        let events = self.events_tx.clone();
        let workspace_id = self.workspace_id.clone();
        let id = id.to_owned();
        tokio::spawn(async move {
            let result = backend.update_object(&workspace_id, &id, patch).await;
            let _ = events.send(EngineEvent::UpdateResult { id, result }).await;
        });
    }

    fn handle_status(&mut self, status: ConnectionStatus) {
        let _ = self.status_tx.send(status);
        match status {
            ConnectionStatus::Subscribed => {
                if let Some(identity) = self.identity.clone() {
                    self.roster.set_self(&identity);
                    self.publish_presence();
                }
                // Initial hydration and post-outage convergence are the
                // same operation: merge a full read.
                self.request_load();
            }
            // Keep last-known store contents visible while down.
            ConnectionStatus::Connecting
            | ConnectionStatus::Degraded
            | ConnectionStatus::Closed
            | ConnectionStatus::Terminated => {}
        }
    }

    fn handle_presence_frame(&mut self, frame: &Frame) {
        match frame.op.as_str() {
            op::PRESENCE_JOIN => match frame.presence_payload() {
                Ok(payload) => {
                    self.roster.apply_join(payload);
                    self.publish_presence();
                }
                Err(error) => warn!(error = %error, "dropping malformed presence join"),
            },
            op::PRESENCE_SNAPSHOT => match frame.presence_snapshot() {
                Ok(snapshot) => {
                    self.roster.apply_snapshot(snapshot.users);
                    self.publish_presence();
                }
                Err(error) => warn!(error = %error, "dropping malformed presence snapshot"),
            },
            op::PRESENCE_LEAVE => match frame.presence_payload() {
                Ok(payload) => {
                    if self.roster.apply_leave(&payload.user_id, &payload.conn_id)
                        && self.cursors.remove_user(&payload.user_id)
                    {
                        self.publish_cursors();
                    }
                    self.publish_presence();
                }
                Err(error) => warn!(error = %error, "dropping malformed presence leave"),
            },
            op::CURSOR_MOVED => match frame.cursor_payload() {
                Ok(payload) => {
                    let self_user = self.identity.as_ref().map(|i| i.user_id.as_str());
                    if self.cursors.apply(payload, self_user, now_ms()) {
                        self.publish_cursors();
                    }
                }
                Err(error) => warn!(error = %error, "dropping malformed cursor message"),
            },
            other => debug!(op = other, "ignoring unknown presence op"),
        }
    }

    fn flush_cursor(&mut self) {
        let Some(identity) = self.identity.clone() else {
            return;
        };
        let Some((x, y)) = self.gate.take_due(now_ms()) else {
            return;
        };

        let cursor = CursorPayload {
            user_id: identity.user_id,
            display_name: identity.display_name,
            color: identity.color,
            x,
            y,
            visible: true,
            ts: now_ms(),
        };
        self.spawn_cursor_send(cursor);
    }

    fn send_cursor_hidden(&mut self) {
        let Some(identity) = self.identity.clone() else {
            return;
        };
        let cursor = CursorPayload {
            user_id: identity.user_id,
            display_name: identity.display_name,
            color: identity.color,
            x: 0.0,
            y: 0.0,
            visible: false,
            ts: now_ms(),
        };
        self.spawn_cursor_send(cursor);
    }

    fn spawn_cursor_send(&self, cursor: CursorPayload) {
        let backend = self.backend.clone();
        let workspace_id = self.workspace_id.clone();
        let conn_id = self.conn_id.clone();
        tokio::spawn(async move {
            if let Err(error) = backend.send_cursor(&workspace_id, &conn_id, cursor).await {
                // Fire-and-forget: the next tick or the TTL covers the gap.
                debug!(error = %error, "cursor broadcast failed");
            }
        });
    }

    fn request_load(&self) {
        let backend = self.backend.clone();
        let events = self.events_tx.clone();
        let workspace_id = self.workspace_id.clone();
        tokio::spawn(async move {
            let result = backend.load_all(&workspace_id).await;
            let _ = events.send(EngineEvent::LoadResult(result)).await;
        });
    }

    fn publish_objects(&self) {
        let _ = self.objects_tx.send(self.store.list());
    }

    fn publish_cursors(&self) {
        let _ = self.cursors_tx.send(self.cursors.visible(now_ms()));
    }

    fn publish_presence(&self) {
        let _ = self.presence_tx.send(self.roster.roster());
    }
}
