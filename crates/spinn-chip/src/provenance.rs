//! System provenance block.
//!
//! Every core that supports provenance writes the same five counters at the
//! start of its provenance region, followed by any application-specific
//! counters. All counters are 32-bit little-endian words.
//!
//! | Word | Counter |
//! |------|---------|
//! | 0 | Transmission event overflows |
//! | 1 | Callback queue overloads |
//! | 2 | DMA queue overloads |
//! | 3 | Timer tick overruns |
//! | 4 | Maximum consecutive timer tick overruns |

/// Number of system counters at the start of every provenance region.
pub const N_SYSTEM_ITEMS: usize = 5;

/// Bytes per counter.
pub const BYTES_PER_ITEM: usize = 4;

/// Word index of each system counter.
pub mod index {
    /// Multicast packets that could not be sent.
    pub const TRANSMISSION_EVENT_OVERFLOW: usize = 0;
    /// Callback queue overloads.
    pub const CALLBACK_QUEUE_OVERLOADED: usize = 1;
    /// DMA queue overloads.
    pub const DMA_QUEUE_OVERLOADED: usize = 2;
    /// Timer ticks that overran.
    pub const TIMER_TIC_OVERRUN: usize = 3;
    /// Largest number of overruns in a row.
    pub const MAX_TIMER_TIC_OVERRUN: usize = 4;
}

/// Bytes occupied by a provenance block with `additional` extra counters.
#[must_use]
pub const fn region_bytes(additional: usize) -> usize {
    (N_SYSTEM_ITEMS + additional) * BYTES_PER_ITEM
}
