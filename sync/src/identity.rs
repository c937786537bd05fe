//! Identity context: who the local user is and how they are shown.

#[cfg(test)]
#[path = "identity_test.rs"]
mod identity_test;

use crate::consts::PALETTE;

/// Resolved identity of the local participant.
///
/// All fields are cheap reads with no side effects; the color is derived
/// deterministically from the user id so every client renders the same
/// user in the same color.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Stable user id.
    pub user_id: String,
    /// Name shown next to cursors and in the roster.
    pub display_name: String,
    /// Presence color (hex), hashed from the user id.
    pub color: String,
}

impl Identity {
    /// Build an identity, deriving the display color from the user id.
    #[must_use]
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let color = color_for(&user_id).to_owned();
        Self { user_id, display_name: display_name.into(), color }
    }
}

/// Deterministic palette color for a user id.
///
/// FNV-1a over the id bytes, reduced modulo the palette size. The hash is
/// spelled out rather than taken from `std` so the reduction is stable
/// across builds and therefore identical on every client.
#[must_use]
pub fn color_for(user_id: &str) -> &'static str {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in user_id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }

    #[allow(clippy::cast_possible_truncation)]
    let index = (hash % PALETTE.len() as u64) as usize;
    PALETTE[index]
}
