//! Buffered sending region
//!
//! Host-side copy of the events a core will emit, indexed by tick. The
//! region is filled before the run (and refilled whenever the simulation
//! window changes) and is only read while streaming.
//!
//! On the wire each tick becomes one or more timed key blocks
//! (`spinn_chip::eieio`): an 8-byte header followed by 4 bytes per key.

use crate::config::SimulationContext;
use bytes::{BufMut, Bytes, BytesMut};
use spinn_chip::eieio::{
    entry_bytes, MAX_KEYS_PER_ENTRY, TICK_HEADER_BYTES, TIMED_KEY_BLOCK_HEADER,
};
use std::collections::btree_map;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Keys to send, by tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedSendingRegion {
    max_buffer_size: u32,
    entries: BTreeMap<u32, Vec<u32>>,
    n_keys: usize,
}

impl BufferedSendingRegion {
    /// Empty region backed by `max_buffer_size` bytes on the core
    pub fn new(max_buffer_size: u32) -> Self {
        Self {
            max_buffer_size,
            entries: BTreeMap::new(),
            n_keys: 0,
        }
    }

    /// Size of the on-core buffer
    #[must_use]
    pub const fn max_buffer_size(&self) -> u32 {
        self.max_buffer_size
    }

    /// Add one key at `tick`
    pub fn add_key(&mut self, tick: u32, key: u32) {
        self.entries.entry(tick).or_default().push(key);
        self.n_keys += 1;
    }

    /// Add several keys at `tick`
    ///
    /// An empty `keys` leaves the region untouched.
    pub fn add_keys(&mut self, tick: u32, keys: impl IntoIterator<Item = u32>) {
        let mut keys = keys.into_iter().peekable();
        if keys.peek().is_none() {
            return;
        }
        let slot = self.entries.entry(tick).or_default();
        let before = slot.len();
        slot.extend(keys);
        self.n_keys += slot.len() - before;
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.entries.clear();
        self.n_keys = 0;
    }

    /// True if no keys are buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct ticks
    #[must_use]
    pub fn n_ticks(&self) -> usize {
        self.entries.len()
    }

    /// Total number of buffered keys
    #[must_use]
    pub const fn n_keys(&self) -> usize {
        self.n_keys
    }

    /// Earliest buffered tick
    #[must_use]
    pub fn first_tick(&self) -> Option<u32> {
        self.entries.keys().next().copied()
    }

    /// Latest buffered tick
    #[must_use]
    pub fn last_tick(&self) -> Option<u32> {
        self.entries.keys().next_back().copied()
    }

    /// Keys at exactly `tick`
    #[must_use]
    pub fn keys_at(&self, tick: u32) -> Option<&[u32]> {
        self.entries.get(&tick).map(Vec::as_slice)
    }

    /// Encoded size of the entry at `tick`
    #[must_use]
    pub fn bytes_at(&self, tick: u32) -> Option<usize> {
        self.entries.get(&tick).map(|keys| tick_bytes(keys.len()))
    }

    /// Ascending `(tick, keys)` from `tick` onwards
    ///
    /// The iterator is lazy and finite; calling again restarts it.
    #[must_use]
    pub fn iter_from(&self, tick: u32) -> TickIter<'_> {
        TickIter {
            inner: self.entries.range(tick..),
        }
    }

    /// Bytes needed to hold every entry on the core
    #[must_use]
    pub fn bytes_required(&self) -> usize {
        self.entries.values().map(|keys| tick_bytes(keys.len())).sum()
    }

    /// True if every entry fits in the on-core buffer at once
    #[must_use]
    pub fn fits(&self) -> bool {
        self.bytes_required() <= self.max_buffer_size as usize
    }

    /// Pack whole ticks, starting at `tick`, into at most `space` bytes
    ///
    /// Ticks are never split. `next_tick` is the first tick left unsent, or
    /// `None` once everything from `tick` onwards has been packed.
    #[must_use]
    pub fn encode_from(&self, tick: u32, space: usize) -> EncodedChunk {
        let mut buf = BytesMut::new();
        let mut n_ticks = 0usize;
        let mut next_tick = None;

        for (t, keys) in self.iter_from(tick) {
            if buf.len() + tick_bytes(keys.len()) > space {
                next_tick = Some(t);
                break;
            }
            for block in keys.chunks(MAX_KEYS_PER_ENTRY) {
                buf.put_u16_le(TIMED_KEY_BLOCK_HEADER);
                #[allow(clippy::cast_possible_truncation)]
                buf.put_u16_le(block.len() as u16);
                buf.put_u32_le(t);
                for &key in block {
                    buf.put_u32_le(key);
                }
            }
            n_ticks += 1;
        }

        debug!(
            "Encoded {n_ticks} ticks ({} bytes) from tick {tick}, next {next_tick:?}",
            buf.len()
        );
        EncodedChunk {
            bytes: buf.freeze(),
            n_ticks,
            next_tick,
        }
    }

    /// Replace the contents with `schedule`, keeping only ticks in the window
    ///
    /// Key `base_key + i` is emitted for channel `i`. Timestamps are sorted
    /// before conversion, so insertion order is always ascending per key.
    pub fn fill(
        &mut self,
        schedule: &SendSchedule,
        base_key: u32,
        n_keys: u32,
        ctx: &SimulationContext,
    ) -> FillStats {
        self.clear();
        let mut stats = FillStats::default();

        match schedule {
            SendSchedule::PerKey(times) => {
                for (channel, key_times) in times.iter().enumerate().take(n_keys as usize) {
                    #[allow(clippy::cast_possible_truncation)]
                    let key = base_key.wrapping_add(channel as u32);
                    for tick in sorted_ticks(key_times, ctx, &mut stats) {
                        self.add_key(tick, key);
                        stats.inserted += 1;
                    }
                }
            }
            SendSchedule::Shared(times) => {
                for tick in sorted_ticks(times, ctx, &mut stats) {
                    self.add_keys(tick, (0..n_keys).map(|i| base_key.wrapping_add(i)));
                    stats.inserted += n_keys as usize;
                }
            }
        }

        if stats.dropped > 0 {
            debug!(
                "Dropped {} timestamps outside window [{}, {:?})",
                stats.dropped, ctx.first_tick, ctx.last_tick
            );
        }
        if !self.fits() {
            warn!(
                "Send buffer needs {} bytes but core holds {}; streaming will refill",
                self.bytes_required(),
                self.max_buffer_size
            );
        }
        stats
    }
}

/// Convert, window-filter and sort a timestamp list
fn sorted_ticks(times_ms: &[f64], ctx: &SimulationContext, stats: &mut FillStats) -> Vec<u32> {
    let mut sorted = times_ms.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut ticks = Vec::with_capacity(sorted.len());
    for ts in sorted {
        match ctx.timestamp_to_tick(ts) {
            Some(tick) if ctx.in_window(tick) => ticks.push(tick),
            _ => stats.dropped += 1,
        }
    }
    ticks
}

/// Bytes a tick with `n_keys` keys occupies, including split blocks
fn tick_bytes(n_keys: usize) -> usize {
    let blocks = n_keys.div_ceil(MAX_KEYS_PER_ENTRY).max(1);
    entry_bytes(n_keys) + (blocks - 1) * TICK_HEADER_BYTES
}

/// Timestamps (milliseconds) at which keys are sent
#[derive(Debug, Clone, PartialEq)]
pub enum SendSchedule {
    /// One list per key
    PerKey(Vec<Vec<f64>>),
    /// One list shared by every key
    Shared(Vec<f64>),
}

impl SendSchedule {
    /// True if no timestamps are given at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::PerKey(times) => times.iter().all(Vec::is_empty),
            Self::Shared(times) => times.is_empty(),
        }
    }
}

/// Outcome of a fill
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillStats {
    /// Keys inserted
    pub inserted: usize,
    /// Timestamps dropped by the window
    pub dropped: usize,
}

/// Packed entries ready for the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Encoded timed key blocks
    pub bytes: Bytes,
    /// Ticks packed
    pub n_ticks: usize,
    /// First tick not packed
    pub next_tick: Option<u32>,
}

/// Ascending iterator over `(tick, keys)`
#[derive(Debug, Clone)]
pub struct TickIter<'a> {
    inner: btree_map::Range<'a, u32, Vec<u32>>,
}

impl<'a> Iterator for TickIter<'a> {
    type Item = (u32, &'a [u32]);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(&t, keys)| (t, keys.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(region: &BufferedSendingRegion) -> Vec<(u32, Vec<u32>)> {
        region.iter_from(0).map(|(t, k)| (t, k.to_vec())).collect()
    }

    #[test]
    fn iteration_is_ascending_and_restartable() {
        let mut region = BufferedSendingRegion::new(1024);
        region.add_key(5, 1);
        region.add_keys(2, [7, 8]);
        region.add_key(5, 2);

        let first: Vec<_> = region.iter_from(0).map(|(t, _)| t).collect();
        let second: Vec<_> = region.iter_from(0).map(|(t, _)| t).collect();
        assert_eq!(first, [2, 5]);
        assert_eq!(first, second);
        assert_eq!(region.iter_from(3).count(), 1);
        assert_eq!(region.keys_at(5), Some(&[1, 2][..]));
        assert_eq!(region.n_keys(), 4);
    }

    #[test]
    fn bytes_required_counts_header_and_keys() {
        let mut region = BufferedSendingRegion::new(1024);
        assert_eq!(region.bytes_required(), 0);
        region.add_keys(1, [1, 2, 3]);
        region.add_key(4, 9);
        assert_eq!(region.bytes_required(), (8 + 12) + (8 + 4));
        assert!(region.fits());
    }

    #[test]
    fn adding_no_keys_creates_no_tick() {
        let mut region = BufferedSendingRegion::new(1024);
        region.add_keys(3, []);
        assert!(region.is_empty());
        assert_eq!(region.bytes_required(), 0);
        assert_eq!(region.encode_from(0, 1024).n_ticks, 0);

        region.add_keys(3, [1]);
        assert_eq!(region.bytes_at(3), Some(12));
    }

    #[test]
    fn window_truncates_ticks() {
        let ctx = SimulationContext::new(1000, 1).with_window(10, Some(20));
        let mut region = BufferedSendingRegion::new(1024);
        let schedule = SendSchedule::PerKey(vec![vec![25.0, 5.0, 15.0, 10.0, 20.0]]);

        let stats = region.fill(&schedule, 0x100, 1, &ctx);

        let ticks: Vec<u32> = region.iter_from(0).map(|(t, _)| t).collect();
        assert_eq!(ticks, [10, 15]);
        assert_eq!(stats, FillStats { inserted: 2, dropped: 3 });
    }

    #[test]
    fn refill_is_idempotent() {
        let ctx = SimulationContext::new(1000, 1);
        let schedule = SendSchedule::PerKey(vec![vec![3.0, 1.0], vec![1.0, 2.5]]);
        let mut region = BufferedSendingRegion::new(1024);

        region.fill(&schedule, 0x40, 2, &ctx);
        let once = collect(&region);
        region.fill(&schedule, 0x40, 2, &ctx);
        assert_eq!(collect(&region), once);
        assert_eq!(once, vec![(1, vec![0x40, 0x41]), (3, vec![0x40, 0x41])]);
    }

    #[test]
    fn shared_schedule_sends_every_key() {
        let ctx = SimulationContext::new(1000, 1);
        let mut region = BufferedSendingRegion::new(1024);
        let stats = region.fill(&SendSchedule::Shared(vec![2.0, 1.0]), 10, 3, &ctx);
        assert_eq!(stats.inserted, 6);
        assert_eq!(collect(&region), vec![(1, vec![10, 11, 12]), (2, vec![10, 11, 12])]);
    }

    #[test]
    fn encode_packs_whole_ticks_only() {
        let mut region = BufferedSendingRegion::new(1024);
        region.add_keys(1, [0xA, 0xB]); // 16 bytes
        region.add_key(2, 0xC); // 12 bytes

        let chunk = region.encode_from(0, 20);
        assert_eq!(chunk.n_ticks, 1);
        assert_eq!(chunk.next_tick, Some(2));
        assert_eq!(
            chunk.bytes.as_ref(),
            &[0x05, 0x40, 2, 0, 1, 0, 0, 0, 0xA, 0, 0, 0, 0xB, 0, 0, 0]
        );

        let rest = region.encode_from(2, 20);
        assert_eq!(rest.n_ticks, 1);
        assert_eq!(rest.next_tick, None);
    }
}
