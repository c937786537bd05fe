//! Client-side realtime synchronization engine for a shared rectangle
//! workspace.
//!
//! Several clients view and edit the same set of canvas objects, each
//! applying its own edits optimistically and reconciling them against
//! authoritative change events from a shared backend. Concurrent edits
//! resolve deterministically by last-writer-wins on `updated_at`;
//! ephemeral cursors and presence flow over a separate channel with
//! expiry-based liveness; connection loss recovers through resubscribe
//! plus a full reload.
//!
//! [`spawn`] brings up one workspace session: a single engine task owns
//! all live state and processes every input — intents, channel frames,
//! write completions, timer ticks — one event at a time. The returned
//! [`EngineHandle`] is the only seam rendering and input layers touch.

pub mod backend;
pub mod consts;
pub mod engine;
pub mod identity;
pub mod memory;
pub mod mutate;
pub mod presence;
pub mod reconcile;
pub mod store;
pub mod supervisor;

pub use backend::{Backend, BackendError, Subscription};
pub use engine::{EngineConfig, EngineHandle, Intent, spawn};
pub use identity::Identity;
pub use memory::MemoryBackend;
pub use presence::{PresenceEntry, RemoteCursor};
pub use store::{CanvasObject, ObjectId, ObjectStore};
pub use supervisor::ConnectionStatus;
