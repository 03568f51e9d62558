//! Streaming flow control for send buffers
//!
//! While a run is in progress the core drains its send buffer and reports
//! the free space back. The host refills only once enough space has opened
//! up, and stops for good once the buffered data has run out.

use crate::buffers::BufferedSendingRegion;
use crate::error::{HostError, Result};
use bytes::Bytes;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Live,
    Exhausted { after_tick: Option<u32> },
}

/// Decides when a core's send buffer gets refilled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingFlowController {
    max_space: u32,
    space_before_notify: u32,
    last_free_space: u32,
    state: StreamState,
}

impl StreamingFlowController {
    /// Controller for a buffer of `max_space` bytes
    ///
    /// `space_before_notify` larger than the buffer is clamped to it.
    pub fn new(max_space: u32, space_before_notify: u32) -> Self {
        let clamped = if space_before_notify > max_space {
            warn!(
                "space_before_notify {space_before_notify} exceeds buffer size {max_space}; clamping"
            );
            max_space
        } else {
            space_before_notify
        };
        Self {
            max_space,
            space_before_notify: clamped,
            last_free_space: max_space,
            state: StreamState::Live,
        }
    }

    /// Size of the on-core buffer
    #[must_use]
    pub const fn max_space(&self) -> u32 {
        self.max_space
    }

    /// Free space that triggers a refill
    #[must_use]
    pub const fn space_before_notify(&self) -> u32 {
        self.space_before_notify
    }

    /// Free space from the most recent report
    #[must_use]
    pub const fn last_free_space(&self) -> u32 {
        self.last_free_space
    }

    /// True once at least `space_before_notify` bytes are free on a live stream
    #[must_use]
    pub fn should_notify_for_refill(&self, remaining: u32) -> bool {
        self.state == StreamState::Live && remaining >= self.space_before_notify
    }

    /// Store the core's latest free-space report
    ///
    /// # Errors
    ///
    /// Returns `HostError::StreamAlreadyExhausted` after the stream has ended.
    pub fn record_free_space(&mut self, free: u32) -> Result<()> {
        self.ensure_live()?;
        self.last_free_space = free.min(self.max_space);
        Ok(())
    }

    /// End the stream without a known last tick
    pub fn on_stream_exhausted(&mut self) {
        self.exhaust(None);
    }

    /// End the stream; no data exists after `last_tick`
    pub fn on_stream_exhausted_after(&mut self, last_tick: u32) {
        self.exhaust(Some(last_tick));
    }

    fn exhaust(&mut self, after_tick: Option<u32>) {
        if let StreamState::Exhausted { after_tick: prev } = self.state {
            debug!("Stream already exhausted (after {prev:?})");
            return;
        }
        info!("Send stream exhausted after tick {after_tick:?}");
        self.state = StreamState::Exhausted { after_tick };
    }

    /// True once the stream has ended
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, StreamState::Exhausted { .. })
    }

    /// Last tick carrying data, once the stream has ended with one
    #[must_use]
    pub fn exhausted_after(&self) -> Option<u32> {
        match self.state {
            StreamState::Exhausted { after_tick } => after_tick,
            StreamState::Live => None,
        }
    }

    /// Fail if the stream has ended
    ///
    /// # Errors
    ///
    /// Returns `HostError::StreamAlreadyExhausted` after the stream has ended.
    pub fn ensure_live(&self) -> Result<()> {
        match self.state {
            StreamState::Live => Ok(()),
            StreamState::Exhausted { after_tick } => {
                Err(HostError::StreamAlreadyExhausted { after_tick })
            }
        }
    }
}

/// Streams one buffered sending region into a core's send buffer
#[derive(Debug, Clone)]
pub struct SendBufferStreamer {
    region: BufferedSendingRegion,
    controller: StreamingFlowController,
    next_tick: Option<u32>,
    dropped_ticks: usize,
}

impl SendBufferStreamer {
    /// Stream `region` through `controller`
    pub fn new(region: BufferedSendingRegion, controller: StreamingFlowController) -> Self {
        let next_tick = region.first_tick();
        Self {
            region,
            controller,
            next_tick,
            dropped_ticks: 0,
        }
    }

    /// Flow controller state
    #[must_use]
    pub const fn controller(&self) -> &StreamingFlowController {
        &self.controller
    }

    /// Region being streamed
    #[must_use]
    pub const fn region(&self) -> &BufferedSendingRegion {
        &self.region
    }

    /// First tick not yet sent
    #[must_use]
    pub const fn next_tick(&self) -> Option<u32> {
        self.next_tick
    }

    /// Ticks skipped because their entry is larger than the whole buffer
    #[must_use]
    pub const fn dropped_ticks(&self) -> usize {
        self.dropped_ticks
    }

    /// Data written before the run starts, up to the whole buffer
    ///
    /// # Errors
    ///
    /// Returns `HostError::StreamAlreadyExhausted` if called after the stream
    /// has ended.
    pub fn initial_fill(&mut self) -> Result<Bytes> {
        self.controller.ensure_live()?;
        let space = self.controller.max_space() as usize;
        Ok(self.take(space).unwrap_or_default())
    }

    /// Respond to a free-space report from the core
    ///
    /// Returns `None` while the free space is below the notify threshold or
    /// when the next tick does not fit yet.
    ///
    /// # Errors
    ///
    /// Returns `HostError::StreamAlreadyExhausted` once every tick has been
    /// sent.
    pub fn refill(&mut self, free_space: u32) -> Result<Option<Bytes>> {
        self.controller.record_free_space(free_space)?;
        if !self.controller.should_notify_for_refill(free_space) {
            debug!(
                "Free space {free_space} below notify threshold {}",
                self.controller.space_before_notify()
            );
            return Ok(None);
        }
        let space = self.controller.last_free_space() as usize;
        Ok(self.take(space))
    }

    fn take(&mut self, space: usize) -> Option<Bytes> {
        let max_space = self.controller.max_space() as usize;
        loop {
            let Some(from) = self.next_tick else {
                self.finish();
                return None;
            };
            let chunk = self.region.encode_from(from, space);
            let oversized = if chunk.n_ticks == 0 {
                self.region.bytes_at(from).filter(|&b| b > max_space)
            } else {
                None
            };
            if let Some(needed) = oversized {
                warn!(
                    "Tick {from} needs {needed} bytes but the buffer holds {max_space}; dropping it"
                );
                self.dropped_ticks += 1;
                self.next_tick = from
                    .checked_add(1)
                    .and_then(|t| self.region.iter_from(t).next())
                    .map(|(t, _)| t);
                continue;
            }
            self.next_tick = chunk.next_tick;
            if self.next_tick.is_none() {
                self.finish();
            }
            if chunk.n_ticks == 0 {
                debug!("Tick {from} does not fit in {space} free bytes yet");
                return None;
            }
            return Some(chunk.bytes);
        }
    }

    fn finish(&mut self) {
        match self.region.last_tick() {
            Some(last) => self.controller.on_stream_exhausted_after(last),
            None => self.controller.on_stream_exhausted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_threshold_is_inclusive() {
        let flow = StreamingFlowController::new(1024, 640);
        assert!(!flow.should_notify_for_refill(639));
        assert!(flow.should_notify_for_refill(640));
        assert!(flow.should_notify_for_refill(1024));
    }

    #[test]
    fn notify_threshold_clamped_to_buffer() {
        let flow = StreamingFlowController::new(256, 640);
        assert_eq!(flow.space_before_notify(), 256);
    }

    #[test]
    fn exhaustion_is_terminal() {
        let mut flow = StreamingFlowController::new(1024, 100);
        flow.record_free_space(2048).unwrap();
        assert_eq!(flow.last_free_space(), 1024);

        flow.on_stream_exhausted_after(42);
        assert!(flow.is_exhausted());
        assert_eq!(flow.exhausted_after(), Some(42));
        assert!(!flow.should_notify_for_refill(1024));
        assert!(matches!(
            flow.record_free_space(512),
            Err(HostError::StreamAlreadyExhausted { after_tick: Some(42) })
        ));

        // A second end does not move the terminal tick
        flow.on_stream_exhausted_after(99);
        assert_eq!(flow.exhausted_after(), Some(42));
    }

    #[test]
    fn streamer_refills_until_exhausted() {
        let mut region = BufferedSendingRegion::new(32);
        for tick in 0..4 {
            region.add_key(tick, 0x100 + tick); // 12 bytes each
        }
        let mut streamer = SendBufferStreamer::new(region, StreamingFlowController::new(32, 12));

        let first = streamer.initial_fill().unwrap();
        assert_eq!(first.len(), 24);
        assert_eq!(streamer.next_tick(), Some(2));

        assert_eq!(streamer.refill(8).unwrap(), None);
        let second = streamer.refill(12).unwrap().unwrap();
        assert_eq!(second.len(), 12);
        let third = streamer.refill(32).unwrap().unwrap();
        assert_eq!(third.len(), 12);

        assert_eq!(streamer.controller().exhausted_after(), Some(3));
        assert!(streamer.refill(32).is_err());
    }

    #[test]
    fn oversized_tick_is_dropped_not_stalled() {
        let mut region = BufferedSendingRegion::new(32);
        region.add_keys(1, 0..10); // 48 bytes
        region.add_keys(2, [0xA, 0xB]); // 16 bytes
        region.add_keys(3, 0..10);
        region.add_key(4, 0xC); // 12 bytes
        let mut streamer = SendBufferStreamer::new(region, StreamingFlowController::new(32, 12));

        let first = streamer.initial_fill().unwrap();
        assert_eq!(first.len(), 16);
        assert_eq!(streamer.dropped_ticks(), 1);
        assert_eq!(streamer.next_tick(), Some(3));

        let second = streamer.refill(32).unwrap().unwrap();
        assert_eq!(second.len(), 12);
        assert_eq!(streamer.dropped_ticks(), 2);
        assert_eq!(streamer.controller().exhausted_after(), Some(4));
    }

    #[test]
    fn empty_region_ends_at_initial_fill() {
        let mut streamer = SendBufferStreamer::new(
            BufferedSendingRegion::new(64),
            StreamingFlowController::new(64, 16),
        );
        assert!(streamer.initial_fill().unwrap().is_empty());
        assert!(streamer.controller().is_exhausted());
        assert_eq!(streamer.controller().exhausted_after(), None);
    }
}
