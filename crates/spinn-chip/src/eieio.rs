//! Send-buffer entry layout and key prefixes.
//!
//! The host pre-loads (and later refills) a core's send buffer with one
//! entry per tick. Each entry is a timed EIEIO block:
//!
//! ```text
//! Offset  Size  Field
//!  0      2     header      (EIEIO command 0x4005: timed key block)
//!  2      2     key count   n
//!  4      4     tick
//!  8      4·n   keys
//! ```

/// EIEIO header of a timed key block.
pub const TIMED_KEY_BLOCK_HEADER: u16 = 0x4005;

/// Fixed per-tick overhead in bytes (header, count, tick).
pub const TICK_HEADER_BYTES: usize = 8;

/// Bytes per key.
pub const BYTES_PER_KEY: usize = 4;

/// Largest number of keys one entry can carry.
pub const MAX_KEYS_PER_ENTRY: usize = u16::MAX as usize;

/// Default on-chip send buffer size (1 MiB).
pub const MAX_SIZE_OF_BUFFERED_REGION_ON_CHIP: u32 = 1024 * 1024;

/// Default free space at which a core asks the host for more data.
pub const DEFAULT_SPACE_BEFORE_NOTIFY: u32 = 640;

/// Where a 16-bit key prefix is placed within a 32-bit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PrefixType {
    /// Prefix occupies bits 15:0.
    LowerHalfWord = 0,
    /// Prefix occupies bits 31:16.
    UpperHalfWord = 1,
}

impl PrefixType {
    /// Numeric value written into configuration regions.
    #[must_use]
    pub const fn value(self) -> u32 {
        self as u32
    }
}

/// Packet format a live gatherer emits towards the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// 16-bit keys.
    Key16Bit = 0,
    /// 16-bit keys with 16-bit payloads.
    KeyPayload16Bit = 1,
    /// 32-bit keys.
    Key32Bit = 2,
    /// 32-bit keys with 32-bit payloads.
    KeyPayload32Bit = 3,
}

impl MessageType {
    /// Numeric value written into configuration regions.
    #[must_use]
    pub const fn value(self) -> u32 {
        self as u32
    }
}

/// Bytes an entry with `n_keys` keys occupies.
#[must_use]
pub const fn entry_bytes(n_keys: usize) -> usize {
    TICK_HEADER_BYTES + BYTES_PER_KEY * n_keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_sizes() {
        assert_eq!(entry_bytes(0), 8);
        assert_eq!(entry_bytes(3), 20);
    }
}
