//! IP tag slots on an Ethernet-connected chip.
//!
//! Each Ethernet chip owns a small table of tag slots translating between
//! SDP traffic and host UDP endpoints. The table is shared by everything that
//! talks through that board, so the host clears all of it before loading.

/// Number of tag slots the host clears and may load (`0..MAX_TAG_ID`).
pub const MAX_TAG_ID: u8 = 7;

/// True if `tag` is a slot the host manages.
#[must_use]
pub const fn is_valid_tag(tag: u8) -> bool {
    tag < MAX_TAG_ID
}
