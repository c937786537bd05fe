//! Connection supervision: channel lifecycle, reconnect, resync triggers.
//!
//! DESIGN
//! ======
//! One supervisor task per engine owns both subscriptions. Status
//! transitions and raw channel bytes are forwarded into the engine's
//! event queue; the engine never touches the transport. Every successful
//! (re)subscription makes the engine run a full reload, because
//! notifications missed while a channel was down are not replayed —
//! only a full read guarantees convergence after an outage.
//!
//! Reconnection backs off exponentially from 1 s to a 10 s ceiling and
//! is cancelled promptly by teardown. On teardown the supervisor sends
//! the explicit presence leave before reporting `Terminated`.

#[cfg(test)]
#[path = "supervisor_test.rs"]
mod supervisor_test;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::backend::{Backend, Subscription};
use crate::consts::{INITIAL_BACKOFF_MS, MAX_BACKOFF_MS};
use crate::engine::EngineEvent;
use crate::identity::Identity;

/// Lifecycle of the engine's network channels.
///
/// `Degraded` means a channel dropped mid-session; `Closed` means both
/// are torn down and a reconnect is pending. Neither clears the object
/// store — last-known contents stay visible.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Subscription attempt in progress.
    #[default]
    Connecting,
    /// Both channels live.
    Subscribed,
    /// A channel dropped; teardown of the rest is imminent.
    Degraded,
    /// Channels down, reconnect pending.
    Closed,
    /// Explicit teardown; no further reconnects.
    Terminated,
}

/// Next reconnect delay: exponential, bounded by [`MAX_BACKOFF_MS`].
#[must_use]
pub fn next_backoff(current_ms: u64) -> u64 {
    current_ms.saturating_mul(2).min(MAX_BACKOFF_MS)
}

/// Drive the subscribe → pump → reconnect loop until teardown.
pub(crate) async fn run(
    backend: Arc<dyn Backend>,
    workspace_id: String,
    identity: Option<Identity>,
    conn_id: String,
    events: mpsc::Sender<EngineEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        if *shutdown.borrow() {
            break;
        }
        let _ = events.send(EngineEvent::Status(ConnectionStatus::Connecting)).await;

        match backend.subscribe(&workspace_id, identity.as_ref(), &conn_id).await {
            Ok(subscription) => {
                backoff_ms = INITIAL_BACKOFF_MS;
                info!(workspace = %workspace_id, "channels subscribed");
                let _ = events.send(EngineEvent::Status(ConnectionStatus::Subscribed)).await;

                pump(subscription, &events, &mut shutdown).await;
                if *shutdown.borrow() {
                    break;
                }
                warn!(workspace = %workspace_id, "channel dropped");
                let _ = events.send(EngineEvent::Status(ConnectionStatus::Degraded)).await;
            }
            Err(error) => {
                warn!(error = %error, workspace = %workspace_id, "subscribe failed");
            }
        }

        if *shutdown.borrow() {
            break;
        }
        let _ = events.send(EngineEvent::Status(ConnectionStatus::Closed)).await;

        // Bounded backoff, cancelled immediately by teardown.
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
            _ = shutdown.changed() => {}
        }
        backoff_ms = next_backoff(backoff_ms);
    }

    // Graceful exit: explicit leave so peers don't wait out the cursor TTL.
    if identity.is_some() {
        if let Err(error) = backend.leave(&workspace_id, &conn_id).await {
            warn!(error = %error, "presence leave failed during teardown");
        }
    }
    let _ = events.send(EngineEvent::Status(ConnectionStatus::Terminated)).await;
}

/// Forward channel bytes into the engine queue until a channel drops or
/// teardown is requested.
async fn pump(
    mut subscription: Subscription,
    events: &mpsc::Sender<EngineEvent>,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            message = subscription.feed.recv() => match message {
                Some(bytes) => {
                    if events.send(EngineEvent::FeedBytes(bytes)).await.is_err() {
                        return;
                    }
                }
                None => return,
            },
            message = subscription.presence.recv() => match message {
                Some(bytes) => {
                    if events.send(EngineEvent::PresenceBytes(bytes)).await.is_err() {
                        return;
                    }
                }
                None => return,
            },
            _ = shutdown.changed() => return,
        }
    }
}
