//! Multicast key and mask allocation
//!
//! A channel of `n` keys is given a contiguous block whose size is the next
//! power of two. The mask keeps the high "network id" bits and leaves the low
//! bits free for the channel id:
//!
//! ```text
//! n_keys = 5  →  k = 3  →  capacity = 0b111  →  mask = 0xFFFF_FFF8
//!                                     key = base | channel (channel ≤ 7)
//! ```

use crate::error::{HostError, Result};
pub use spinn_chip::eieio::PrefixType;
use tracing::{debug, warn};

/// Largest number of keys a single mask can describe (the whole key space).
pub const MAX_KEYS: u64 = 1 << 32;

/// Compute `(mask, capacity)` for a channel of `n_keys` keys
///
/// `capacity = 2^k - 1` with `k = ceil(log2(n_keys))` and
/// `mask = 0xFFFFFFFF ^ capacity`. A single key needs no channel bits, so
/// `n_keys == 1` yields `(0xFFFFFFFF, 1)`.
///
/// # Errors
///
/// Returns `HostError::InvalidKeyCount` if `n_keys` is zero or exceeds
/// the 32-bit key space.
pub fn compute_mask(n_keys: u64) -> Result<(u32, u32)> {
    if n_keys == 0 || n_keys > MAX_KEYS {
        return Err(HostError::InvalidKeyCount { n_keys });
    }
    if n_keys == 1 {
        return Ok((u32::MAX, 1));
    }
    let bits = u64::BITS - (n_keys - 1).leading_zeros();
    #[allow(clippy::cast_possible_truncation)]
    let capacity = ((1u64 << bits) - 1) as u32;
    Ok((u32::MAX ^ capacity, capacity))
}

/// Check that a fixed base key and an address prefix form one key
///
/// # Errors
///
/// Returns `HostError::KeyPrefixConflict` unless `(key | prefix) & mask == key`.
pub fn validate_virtual_key(key: u32, mask: u32, prefix: u32) -> Result<()> {
    if (key | prefix) & mask != key {
        return Err(HostError::KeyPrefixConflict { key, mask, prefix });
    }
    Ok(())
}

/// 16-bit prefix taken from one half of a key
#[must_use]
pub const fn generate_prefix(key: u32, prefix_type: PrefixType) -> u16 {
    match prefix_type {
        PrefixType::LowerHalfWord => (key & 0xFFFF) as u16,
        PrefixType::UpperHalfWord => ((key >> 16) & 0xFFFF) as u16,
    }
}

/// A 16-bit prefix and the half of the key it applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPrefix {
    /// Prefix value as supplied
    pub prefix: u16,
    /// Half of the key the prefix occupies
    pub prefix_type: PrefixType,
}

impl KeyPrefix {
    /// Prefix for the upper half word (the default placement)
    #[must_use]
    pub const fn upper(prefix: u16) -> Self {
        Self {
            prefix,
            prefix_type: PrefixType::UpperHalfWord,
        }
    }

    /// Prefix for the lower half word
    #[must_use]
    pub const fn lower(prefix: u16) -> Self {
        Self {
            prefix,
            prefix_type: PrefixType::LowerHalfWord,
        }
    }

    /// Prefix positioned within a 32-bit key
    #[must_use]
    pub const fn positioned(&self) -> u32 {
        match self.prefix_type {
            PrefixType::UpperHalfWord => (self.prefix as u32) << 16,
            PrefixType::LowerHalfWord => self.prefix as u32,
        }
    }
}

/// Fixed key and mask exported as an outgoing routing constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BaseKeyAndMask {
    /// Base key
    pub key: u32,
    /// Mask
    pub mask: u32,
}

impl BaseKeyAndMask {
    /// Number of keys the mask leaves free
    #[must_use]
    pub const fn n_keys(&self) -> u64 {
        (!self.mask) as u64 + 1
    }

    /// True if `key` routes through this key/mask pair
    #[must_use]
    pub const fn matches(&self, key: u32) -> bool {
        key & self.mask == self.key & self.mask
    }
}

/// Keys, mask and prefix resolved for one event source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyAllocation {
    /// Number of keys in the channel
    pub n_keys: u64,
    /// Fixed base key, if one was requested
    pub virtual_key: Option<u32>,
    /// Mask for the fixed key
    pub mask: Option<u32>,
    /// Prefix positioned within the key
    pub prefix: Option<u32>,
    /// Half word the prefix applies to
    pub prefix_type: Option<PrefixType>,
}

impl KeyAllocation {
    /// Resolve key settings for an event source
    ///
    /// With a fixed `virtual_key`, the mask is computed from `n_keys` and an
    /// explicit `prefix` must agree with it. Without a prefix, the virtual key
    /// itself becomes the upper-half-word prefix.
    ///
    /// # Errors
    ///
    /// Returns `HostError::InvalidKeyCount` or `HostError::KeyPrefixConflict`.
    pub fn resolve(n_keys: u64, virtual_key: Option<u32>, prefix: Option<KeyPrefix>) -> Result<Self> {
        let (mask, _) = compute_mask(n_keys)?;

        let Some(key) = virtual_key else {
            return Ok(Self {
                n_keys,
                virtual_key: None,
                mask: None,
                prefix: prefix.map(|p| p.positioned()),
                prefix_type: prefix.map(|p| p.prefix_type),
            });
        };

        if key & !mask != 0 {
            warn!("Virtual key 0x{key:08x} has bits inside its channel range (mask 0x{mask:08x})");
        }

        let (prefix_value, prefix_type) = match prefix {
            Some(p) => {
                validate_virtual_key(key, mask, p.positioned())?;
                (p.positioned(), p.prefix_type)
            }
            None => (key, PrefixType::UpperHalfWord),
        };

        debug!("Keys: base 0x{key:08x} mask 0x{mask:08x} prefix 0x{prefix_value:08x}");
        Ok(Self {
            n_keys,
            virtual_key: Some(key),
            mask: Some(mask),
            prefix: Some(prefix_value),
            prefix_type: Some(prefix_type),
        })
    }

    /// Adopt a key and mask assigned later by routing, keeping any prefix
    #[must_use]
    pub fn with_routing_key(mut self, key: u32, mask: u32) -> Self {
        if self.virtual_key.is_none() {
            self.virtual_key = Some(key);
            self.mask = Some(mask);
            if self.prefix.is_none() {
                self.prefix = Some(key);
                self.prefix_type = Some(PrefixType::UpperHalfWord);
            }
        }
        self
    }

    /// Outgoing constraint, present only for a fixed key
    #[must_use]
    pub fn constraint(&self) -> Option<BaseKeyAndMask> {
        match (self.virtual_key, self.mask) {
            (Some(key), Some(mask)) => Some(BaseKeyAndMask { key, mask }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_mask_reference_values() {
        assert_eq!(compute_mask(1).unwrap(), (0xFFFF_FFFF, 1));
        assert_eq!(compute_mask(2).unwrap(), (0xFFFF_FFFE, 1));
        assert_eq!(compute_mask(5).unwrap(), (0xFFFF_FFF8, 7));
        assert_eq!(compute_mask(8).unwrap(), (0xFFFF_FFF8, 7));
        assert_eq!(compute_mask(9).unwrap(), (0xFFFF_FFF0, 15));
        assert_eq!(compute_mask(MAX_KEYS).unwrap(), (0, u32::MAX));
    }

    #[test]
    fn compute_mask_properties_hold_over_a_range() {
        for n in 2..=4096u64 {
            let (mask, capacity) = compute_mask(n).unwrap();
            assert_eq!(mask & capacity, 0);
            assert_eq!(mask | capacity, u32::MAX);
            assert!(u64::from(capacity) >= n - 1);
            // Smallest such value: halving the block would not fit
            assert!(u64::from(capacity >> 1) < n - 1);
            assert!((u64::from(capacity) + 1).is_power_of_two());
        }
    }

    #[test]
    fn compute_mask_rejects_bad_counts() {
        assert!(matches!(compute_mask(0), Err(HostError::InvalidKeyCount { n_keys: 0 })));
        assert!(compute_mask(MAX_KEYS + 1).is_err());
    }

    #[test]
    fn prefix_must_not_touch_masked_bits_of_key() {
        // Prefix lives in the upper half, key in the upper half too: fine
        assert!(validate_virtual_key(0x1234_0000, 0xFFFF_FFF0, 0x1234_0000).is_ok());
        // Prefix adds a bit the key does not have
        assert!(matches!(
            validate_virtual_key(0x1234_0000, 0xFFFF_FFF0, 0x0001_0000),
            Err(HostError::KeyPrefixConflict { .. })
        ));
    }

    #[test]
    fn upper_prefix_is_shifted() {
        assert_eq!(KeyPrefix::upper(0xABCD).positioned(), 0xABCD_0000);
        assert_eq!(KeyPrefix::lower(0xABCD).positioned(), 0x0000_ABCD);
        assert_eq!(generate_prefix(0xABCD_1234, PrefixType::UpperHalfWord), 0xABCD);
        assert_eq!(generate_prefix(0xABCD_1234, PrefixType::LowerHalfWord), 0x1234);
    }

    #[test]
    fn virtual_key_without_prefix_becomes_prefix() {
        let alloc = KeyAllocation::resolve(5, Some(0x0010_0000), None).unwrap();
        assert_eq!(alloc.mask, Some(0xFFFF_FFF8));
        assert_eq!(alloc.prefix, Some(0x0010_0000));
        assert_eq!(alloc.prefix_type, Some(PrefixType::UpperHalfWord));
        assert_eq!(
            alloc.constraint(),
            Some(BaseKeyAndMask { key: 0x0010_0000, mask: 0xFFFF_FFF8 })
        );
    }

    #[test]
    fn conflicting_prefix_is_rejected() {
        let err = KeyAllocation::resolve(16, Some(0x0000_0100), Some(KeyPrefix::upper(0x0002)));
        assert!(matches!(err, Err(HostError::KeyPrefixConflict { .. })));
    }

    #[test]
    fn routing_key_fills_in_unset_key() {
        let alloc = KeyAllocation::resolve(4, None, None)
            .unwrap()
            .with_routing_key(0x0800, 0xFFFF_FFFC);
        assert_eq!(alloc.virtual_key, Some(0x0800));
        assert_eq!(alloc.prefix, Some(0x0800));
        let constraint = alloc.constraint().unwrap();
        assert_eq!(constraint.n_keys(), 4);
        assert!(constraint.matches(0x0803));
        assert!(!constraint.matches(0x0804));
    }
}
