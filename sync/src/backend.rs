//! Backend seam: the durable store and event channels the engine drives.
//!
//! The concrete transport is out of scope — anything that can satisfy
//! this trait (a websocket gateway, an in-process hub) plugs in. The
//! channels deliver at-least-once with no ordering across distinct
//! senders; a closed receiver means the connection dropped and the
//! supervisor must resubscribe and resync.

use async_trait::async_trait;
use tokio::sync::mpsc;
use wire::{CursorPayload, ObjectPatch, ObjectRecord};

use crate::identity::Identity;

/// Error returned by backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend could not be reached or refused service.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The request was understood but rejected.
    #[error("request rejected: {0}")]
    Rejected(String),
    /// No such object in the caller's workspace.
    #[error("object not found: {0}")]
    ObjectNotFound(String),
    /// No such workspace.
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),
}

/// Live channel pair produced by a successful subscription.
///
/// Both receivers carry encoded frames ([`wire::decode_frame`]); the
/// change feed carries object events, the presence channel carries
/// join/leave/snapshot and cursor messages.
pub struct Subscription {
    /// Authoritative object change notifications.
    pub feed: mpsc::Receiver<Vec<u8>>,
    /// Presence roster and cursor traffic.
    pub presence: mpsc::Receiver<Vec<u8>>,
}

/// The durable backend and its event channels.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Full read of a workspace's objects, ordered by creation time.
    async fn load_all(&self, workspace_id: &str) -> Result<Vec<ObjectRecord>, BackendError>;

    /// Durable insert. The client-chosen id is preserved, never
    /// reassigned; the backend validates bounds and timestamps.
    async fn create_object(&self, record: ObjectRecord) -> Result<ObjectRecord, BackendError>;

    /// Durable partial update, position at minimum. Fails for objects
    /// outside the caller's workspace. A stale patch resolves by
    /// last-writer-wins and returns the winning record instead of
    /// failing.
    async fn update_object(
        &self,
        workspace_id: &str,
        id: &str,
        patch: ObjectPatch,
    ) -> Result<ObjectRecord, BackendError>;

    /// Open the change-feed and presence channels for one connection.
    ///
    /// When an identity is given, the connection is announced to the
    /// workspace (join broadcast) and receives a full roster snapshot;
    /// without one, the connection observes only.
    async fn subscribe(
        &self,
        workspace_id: &str,
        identity: Option<&Identity>,
        conn_id: &str,
    ) -> Result<Subscription, BackendError>;

    /// Fire-and-forget cursor broadcast; best-effort delivery.
    async fn send_cursor(
        &self,
        workspace_id: &str,
        conn_id: &str,
        cursor: CursorPayload,
    ) -> Result<(), BackendError>;

    /// Graceful presence exit for a connection, broadcasting leave and a
    /// cursor hide so peers don't wait out the TTL.
    async fn leave(&self, workspace_id: &str, conn_id: &str) -> Result<(), BackendError>;
}
