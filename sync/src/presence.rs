//! Ephemeral presence and cursor state.
//!
//! DESIGN
//! ======
//! Nothing here is persisted or conflict-resolved: every message fully
//! replaces the sender's last-known state, which is safe because each
//! sender publishes only its own. Cursor liveness is expiry-based — an
//! entry not refreshed within the TTL is swept out, covering abrupt
//! disconnects that never send an explicit hide. The roster de-duplicates
//! users across connection keys so a user with two tabs counts once.

#[cfg(test)]
#[path = "presence_test.rs"]
mod presence_test;

use std::collections::{HashMap, HashSet};

use wire::{CursorPayload, PresencePayload};

use crate::consts::CURSOR_TTL_MS;
use crate::identity::Identity;

// =============================================================================
// ROSTER
// =============================================================================

/// A participant shown in the online roster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Stable user id.
    pub user_id: String,
    /// Display name.
    pub display_name: String,
    /// Presence color (hex).
    pub color: String,
    /// True for the local session's own entry.
    pub is_self: bool,
}

struct RosterSlot {
    display_name: String,
    color: String,
    conns: HashSet<String>,
}

/// Online roster, keyed by user id, de-duplicated across connections.
#[derive(Default)]
pub struct PresenceRoster {
    slots: HashMap<String, RosterSlot>,
    self_entry: Option<PresenceEntry>,
}

impl PresenceRoster {
    /// Create an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the local session as connected. The entry stays in the roster,
    /// flagged "self", until [`clear_self`](Self::clear_self).
    pub fn set_self(&mut self, identity: &Identity) {
        self.self_entry = Some(PresenceEntry {
            user_id: identity.user_id.clone(),
            display_name: identity.display_name.clone(),
            color: identity.color.clone(),
            is_self: true,
        });
    }

    /// Drop the local session's own entry (session terminated).
    pub fn clear_self(&mut self) {
        self.self_entry = None;
    }

    /// Record a join notification for one connection of a user.
    pub fn apply_join(&mut self, payload: PresencePayload) {
        let slot = self
            .slots
            .entry(payload.user_id)
            .or_insert_with(|| RosterSlot {
                display_name: payload.display_name,
                color: payload.color,
                conns: HashSet::new(),
            });
        slot.conns.insert(payload.conn_id);
    }

    /// Record a leave notification for one connection of a user.
    ///
    /// Returns `true` if that was the user's last connection — the caller
    /// should then also drop the user's remote cursor.
    pub fn apply_leave(&mut self, user_id: &str, conn_id: &str) -> bool {
        let Some(slot) = self.slots.get_mut(user_id) else {
            return false;
        };
        slot.conns.remove(conn_id);
        if slot.conns.is_empty() {
            self.slots.remove(user_id);
            return true;
        }
        false
    }

    /// Replace the remote roster wholesale from a full snapshot. The local
    /// self entry is unaffected.
    pub fn apply_snapshot(&mut self, users: Vec<PresencePayload>) {
        self.slots.clear();
        for user in users {
            self.apply_join(user);
        }
    }

    /// The de-duplicated roster, ordered by user id for deterministic
    /// rendering. The local user appears exactly once, flagged "self",
    /// even when also observed through the network (another tab).
    #[must_use]
    pub fn roster(&self) -> Vec<PresenceEntry> {
        let self_user_id = self.self_entry.as_ref().map(|e| e.user_id.as_str());

        let mut entries: Vec<PresenceEntry> = self
            .slots
            .iter()
            .filter(|(user_id, _)| Some(user_id.as_str()) != self_user_id)
            .map(|(user_id, slot)| PresenceEntry {
                user_id: user_id.clone(),
                display_name: slot.display_name.clone(),
                color: slot.color.clone(),
                is_self: false,
            })
            .collect();

        if let Some(own) = &self.self_entry {
            entries.push(own.clone());
        }

        entries.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        entries
    }
}

// =============================================================================
// REMOTE CURSORS
// =============================================================================

/// A remote participant's live pointer.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteCursor {
    /// Owning user id.
    pub user_id: String,
    /// Display name shown next to the cursor.
    pub display_name: String,
    /// Presence color (hex).
    pub color: String,
    /// Pointer x in workspace coordinates.
    pub x: f64,
    /// Pointer y in workspace coordinates.
    pub y: f64,
    /// Local receipt time of the last message, ms since the Unix epoch.
    pub last_seen_at: f64,
}

/// Last-known remote cursors, keyed by user id.
#[derive(Default)]
pub struct CursorMap {
    cursors: HashMap<String, RemoteCursor>,
}

impl CursorMap {
    /// Create an empty cursor map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one cursor message, stamping it with the local receipt time.
    ///
    /// The local user's own echo is ignored; a `visible: false` message
    /// removes the sender's cursor. Returns `true` if the visible set
    /// changed.
    pub fn apply(&mut self, payload: CursorPayload, self_user_id: Option<&str>, now_ms: f64) -> bool {
        if Some(payload.user_id.as_str()) == self_user_id {
            return false;
        }
        if !payload.visible {
            return self.cursors.remove(&payload.user_id).is_some();
        }

        self.cursors.insert(
            payload.user_id.clone(),
            RemoteCursor {
                user_id: payload.user_id,
                display_name: payload.display_name,
                color: payload.color,
                x: payload.x,
                y: payload.y,
                last_seen_at: now_ms,
            },
        );
        true
    }

    /// Remove a user's cursor (their last connection left).
    pub fn remove_user(&mut self, user_id: &str) -> bool {
        self.cursors.remove(user_id).is_some()
    }

    /// Drop entries whose last message is older than the TTL. Returns
    /// `true` if anything was removed.
    pub fn sweep(&mut self, now_ms: f64) -> bool {
        let before = self.cursors.len();
        self.cursors
            .retain(|_, cursor| now_ms - cursor.last_seen_at <= CURSOR_TTL_MS);
        self.cursors.len() != before
    }

    /// Cursors currently within the liveness window, ordered by user id.
    #[must_use]
    pub fn visible(&self, now_ms: f64) -> Vec<RemoteCursor> {
        let mut cursors: Vec<RemoteCursor> = self
            .cursors
            .values()
            .filter(|cursor| now_ms - cursor.last_seen_at <= CURSOR_TTL_MS)
            .cloned()
            .collect();
        cursors.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        cursors
    }
}

// =============================================================================
// OUTGOING GATE
// =============================================================================

/// Fixed-interval gate for outgoing cursor broadcasts.
///
/// Pointer-move input fires far more often than the send budget allows;
/// the gate keeps only the latest sample and releases at most one per
/// interval. Intermediate samples are dropped, never queued, so both
/// memory and bandwidth stay bounded.
pub struct CursorGate {
    interval_ms: f64,
    last_sent_at: f64,
    pending: Option<(f64, f64)>,
}

impl CursorGate {
    /// Create a gate releasing at most one sample per `interval_ms`.
    #[must_use]
    pub fn new(interval_ms: f64) -> Self {
        Self { interval_ms, last_sent_at: f64::NEG_INFINITY, pending: None }
    }

    /// Record the latest pointer sample, replacing any pending one.
    pub fn offer(&mut self, x: f64, y: f64) {
        self.pending = Some((x, y));
    }

    /// Discard the pending sample (pointer left the workspace).
    pub fn clear(&mut self) {
        self.pending = None;
    }

    /// The sample to send now, if one is pending and the interval since
    /// the previous send has elapsed.
    pub fn take_due(&mut self, now_ms: f64) -> Option<(f64, f64)> {
        if now_ms - self.last_sent_at < self.interval_ms {
            return None;
        }
        let sample = self.pending.take()?;
        self.last_sent_at = now_ms;
        Some(sample)
    }
}
