//! Event injector: live input from a host socket and/or a pre-buffered
//! schedule of keys sent at given times.
//!
//! Region table:
//!
//! | Id | Region | Size |
//! |----|--------|------|
//! | 0 | System | 12 bytes |
//! | 1 | Configuration | 40 bytes |
//! | 2 | Send buffer | `send_buffer_max_space` (only with a schedule) |
//! | 3 | Recording buffer | recording size (only when recording) |
//! | 4 | Recording state | 8 bytes (only when recording) |
//! | 5 | Provenance | system block |
//!
//! Configuration words: apply-prefix flag, prefix, prefix type, check-keys
//! flag, has-key flag, key, mask, send buffer size, space before notify,
//! notification tag.

use crate::address::ChipAddress;
use crate::buffers::{BufferedSendingRegion, SendSchedule};
use crate::error::{HostError, Result};
use crate::flow::{SendBufferStreamer, StreamingFlowController};
use crate::keys::{BaseKeyAndMask, KeyAllocation, KeyPrefix};
use crate::spec::{DataSpecification, SpecificationWriter};
use crate::tags::{IpTag, ReverseIpTag};
use crate::vertices::{
    GenerationContext, GeneratesSpecification, MachineVertex, ProvidesOutgoingKeyConstraint,
    ProvidesProvenance, RegionRewriteRequest, RequiresRegionReload,
};
use spinn_chip::eieio::{DEFAULT_SPACE_BEFORE_NOTIFY, MAX_SIZE_OF_BUFFERED_REGION_ON_CHIP};
use spinn_chip::provenance::region_bytes;
use spinn_chip::scp::ports;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use tracing::debug;

const SYSTEM_BYTES: u32 = 12;
const CONFIGURATION_BYTES: u32 = 40;
const RECORDING_STATE_BYTES: u32 = 8;

/// Regions of an injector
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SourceRegion {
    /// Timing
    System = 0,
    /// Keys and buffer settings
    Configuration = 1,
    /// Pre-buffered keys
    SendBuffer = 2,
    /// Recorded events
    RecordingBuffer = 3,
    /// Recording bookkeeping
    RecordingBufferState = 4,
    /// Counter block
    Provenance = 5,
}

impl SourceRegion {
    /// Region id
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Region label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::System => "SYSTEM",
            Self::Configuration => "CONFIGURATION",
            Self::SendBuffer => "SEND_BUFFER",
            Self::RecordingBuffer => "RECORDING_BUFFER",
            Self::RecordingBufferState => "RECORDING_BUFFER_STATE",
            Self::Provenance => "PROVENANCE",
        }
    }

    const fn unfilled(self) -> bool {
        matches!(self, Self::RecordingBuffer | Self::Provenance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LiveInput {
    port: u16,
    tag: u8,
    sdp_port: u8,
}

#[derive(Debug, Clone, PartialEq)]
struct SendBufferSettings {
    schedule: SendSchedule,
    max_space: u32,
    space_before_notify: u32,
    notification_ip: Ipv4Addr,
    notification_port: u16,
    notification_tag: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Recording {
    buffer_size: u32,
    size_before_receive: u32,
}

/// Builder for [`ReverseIpTagMulticastSource`]
#[derive(Debug, Clone)]
pub struct ReverseIpTagMulticastSourceBuilder {
    label: String,
    n_keys: u64,
    board_address: Option<Ipv4Addr>,
    live_input: Option<(u16, u8)>,
    receive_sdp_port: u8,
    virtual_key: Option<u32>,
    prefix: Option<KeyPrefix>,
    check_keys: bool,
    send_buffer_times: Option<SendSchedule>,
    send_buffer_max_space: u32,
    space_before_notify: u32,
    notification: Option<(Ipv4Addr, u16, Option<u8>)>,
    recording: Option<Recording>,
}

impl ReverseIpTagMulticastSourceBuilder {
    /// Injector sending `n_keys` keys
    pub fn new(label: impl Into<String>, n_keys: u64) -> Self {
        Self {
            label: label.into(),
            n_keys,
            board_address: None,
            live_input: None,
            receive_sdp_port: ports::INPUT_BUFFERING,
            virtual_key: None,
            prefix: None,
            check_keys: false,
            send_buffer_times: None,
            send_buffer_max_space: MAX_SIZE_OF_BUFFERED_REGION_ON_CHIP,
            space_before_notify: DEFAULT_SPACE_BEFORE_NOTIFY,
            notification: None,
            recording: None,
        }
    }

    /// Ethernet chip for tags
    #[must_use]
    pub fn board_address(mut self, address: Ipv4Addr) -> Self {
        self.board_address = Some(address);
        self
    }

    /// Accept live events on board UDP `port` through reverse tag `tag`
    #[must_use]
    pub fn live_input(mut self, port: u16, tag: u8) -> Self {
        self.live_input = Some((port, tag));
        self
    }

    /// SDP port live events are delivered to
    #[must_use]
    pub fn receive_sdp_port(mut self, sdp_port: u8) -> Self {
        self.receive_sdp_port = sdp_port;
        self
    }

    /// Fixed base key
    #[must_use]
    pub fn virtual_key(mut self, key: u32) -> Self {
        self.virtual_key = Some(key);
        self
    }

    /// Prefix ORed into received keys
    #[must_use]
    pub fn prefix(mut self, prefix: KeyPrefix) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Check received keys against the key and mask
    #[must_use]
    pub fn check_keys(mut self, check: bool) -> Self {
        self.check_keys = check;
        self
    }

    /// Keys to send at given times
    #[must_use]
    pub fn send_buffer_times(mut self, schedule: SendSchedule) -> Self {
        self.send_buffer_times = Some(schedule);
        self
    }

    /// Size of the on-core send buffer
    #[must_use]
    pub fn send_buffer_max_space(mut self, bytes: u32) -> Self {
        self.send_buffer_max_space = bytes;
        self
    }

    /// Free space at which the core asks for more data
    #[must_use]
    pub fn space_before_notify(mut self, bytes: u32) -> Self {
        self.space_before_notify = bytes;
        self
    }

    /// Host endpoint told about free send-buffer space
    #[must_use]
    pub fn send_buffer_notification(mut self, ip: Ipv4Addr, port: u16, tag: Option<u8>) -> Self {
        self.notification = Some((ip, port, tag));
        self
    }

    /// Record events into a buffer of `buffer_size` bytes
    #[must_use]
    pub fn recording(mut self, buffer_size: u32, size_before_receive: u32) -> Self {
        self.recording = Some(Recording {
            buffer_size,
            size_before_receive,
        });
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// Returns `HostError::InvalidKeyCount` or `HostError::KeyPrefixConflict`
    /// for bad key settings, and `HostError::MissingNotificationTag` for a
    /// schedule with no notification endpoint.
    pub fn build(self) -> Result<ReverseIpTagMulticastSource> {
        let keys = KeyAllocation::resolve(self.n_keys, self.virtual_key, self.prefix)?;

        let send_buffer = match self.send_buffer_times {
            None => None,
            Some(schedule) => {
                let (ip, port, tag) =
                    self.notification
                        .ok_or_else(|| HostError::MissingNotificationTag {
                            label: self.label.clone(),
                        })?;
                let flow = StreamingFlowController::new(
                    self.send_buffer_max_space,
                    self.space_before_notify,
                );
                Some(SendBufferSettings {
                    schedule,
                    max_space: flow.max_space(),
                    space_before_notify: flow.space_before_notify(),
                    notification_ip: ip,
                    notification_port: port,
                    notification_tag: tag,
                })
            }
        };

        debug!(
            "Injector {}: {} keys, live input {:?}, send buffer {}",
            self.label,
            self.n_keys,
            self.live_input,
            send_buffer.is_some()
        );
        Ok(ReverseIpTagMulticastSource {
            label: self.label,
            board_address: self.board_address,
            live_input: self.live_input.map(|(port, tag)| LiveInput {
                port,
                tag,
                sdp_port: self.receive_sdp_port,
            }),
            keys,
            check_keys: self.check_keys,
            send_buffer,
            recording: self.recording,
            dirty: BTreeSet::new(),
        })
    }
}

/// Injects multicast events into the fabric
#[derive(Debug, Clone)]
pub struct ReverseIpTagMulticastSource {
    label: String,
    board_address: Option<Ipv4Addr>,
    live_input: Option<LiveInput>,
    keys: KeyAllocation,
    check_keys: bool,
    send_buffer: Option<SendBufferSettings>,
    recording: Option<Recording>,
    dirty: BTreeSet<u8>,
}

impl ReverseIpTagMulticastSource {
    /// Start building an injector
    pub fn builder(label: impl Into<String>, n_keys: u64) -> ReverseIpTagMulticastSourceBuilder {
        ReverseIpTagMulticastSourceBuilder::new(label, n_keys)
    }

    /// Resolved key settings
    #[must_use]
    pub const fn keys(&self) -> &KeyAllocation {
        &self.keys
    }

    /// True if live events are accepted
    #[must_use]
    pub const fn is_in_injection_mode(&self) -> bool {
        self.live_input.is_some()
    }

    /// True if events are recorded
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Reverse tag delivering live events to this vertex on `core`
    #[must_use]
    pub fn reverse_ip_tag(&self, core: ChipAddress) -> Option<ReverseIpTag> {
        self.live_input.map(|input| ReverseIpTag {
            board_address: self.board_address,
            tag: input.tag,
            port: input.port,
            destination: core,
            sdp_port: input.sdp_port,
        })
    }

    /// IP tag carrying send-buffer notifications, when its slot is fixed
    #[must_use]
    pub fn notification_ip_tag(&self) -> Option<IpTag> {
        let settings = self.send_buffer.as_ref()?;
        let tag = settings.notification_tag?;
        Some(IpTag::new(
            self.board_address,
            tag,
            settings.notification_ip,
            settings.notification_port,
            true,
        ))
    }

    /// Replace the send schedule; the send buffer is rewritten on next reload
    ///
    /// # Errors
    ///
    /// Returns a specification error if the vertex was built without a send
    /// buffer.
    pub fn set_send_buffer_times(&mut self, schedule: SendSchedule) -> Result<()> {
        let settings = self.send_buffer.as_mut().ok_or_else(|| {
            HostError::specification(format!("{} has no send buffer", self.label))
        })?;
        settings.schedule = schedule;
        self.dirty.insert(SourceRegion::SendBuffer.id());
        Ok(())
    }

    /// The execution window moved; timing and buffered keys need rewriting
    pub fn window_changed(&mut self) {
        self.dirty.insert(SourceRegion::System.id());
        if self.send_buffer.is_some() {
            self.dirty.insert(SourceRegion::SendBuffer.id());
        }
    }

    /// Keys to send in the window of `ctx`, or `None` without a schedule
    ///
    /// # Errors
    ///
    /// Returns a specification error if no base key is known yet.
    pub fn fill_send_buffer(
        &self,
        ctx: &GenerationContext<'_>,
    ) -> Result<Option<BufferedSendingRegion>> {
        let Some(settings) = &self.send_buffer else {
            return Ok(None);
        };
        let base_key = self.resolved_keys(ctx).virtual_key.ok_or_else(|| {
            HostError::specification(format!("{} has no base key for its send buffer", self.label))
        })?;
        let n_keys = u32::try_from(self.keys.n_keys).unwrap_or(u32::MAX);
        let mut region = BufferedSendingRegion::new(settings.max_space);
        region.fill(&settings.schedule, base_key, n_keys, &ctx.simulation);
        Ok(Some(region))
    }

    /// Streamer for the send buffer, or `None` without a schedule
    ///
    /// # Errors
    ///
    /// See [`fill_send_buffer`](Self::fill_send_buffer).
    pub fn send_buffer_streamer(
        &self,
        ctx: &GenerationContext<'_>,
    ) -> Result<Option<SendBufferStreamer>> {
        let Some(settings) = &self.send_buffer else {
            return Ok(None);
        };
        Ok(self.fill_send_buffer(ctx)?.map(|region| {
            SendBufferStreamer::new(
                region,
                StreamingFlowController::new(settings.max_space, settings.space_before_notify),
            )
        }))
    }

    fn resolved_keys(&self, ctx: &GenerationContext<'_>) -> KeyAllocation {
        match ctx.routing_key {
            Some(k) => self.keys.with_routing_key(k.key, k.mask),
            None => self.keys,
        }
    }

    fn regions(&self) -> Vec<(SourceRegion, u32)> {
        let mut table = vec![
            (SourceRegion::System, SYSTEM_BYTES),
            (SourceRegion::Configuration, CONFIGURATION_BYTES),
        ];
        if let Some(settings) = &self.send_buffer {
            table.push((SourceRegion::SendBuffer, settings.max_space));
        }
        if let Some(recording) = self.recording {
            table.push((SourceRegion::RecordingBuffer, recording.buffer_size));
            table.push((SourceRegion::RecordingBufferState, RECORDING_STATE_BYTES));
        }
        #[allow(clippy::cast_possible_truncation)]
        table.push((SourceRegion::Provenance, region_bytes(0) as u32));
        table
    }

    fn configuration_words(&self, ctx: &GenerationContext<'_>) -> Result<[u32; 10]> {
        let keys = self.resolved_keys(ctx);
        let mut words = [0u32; 10];

        if let (Some(prefix), Some(prefix_type)) = (keys.prefix, keys.prefix_type) {
            words[0] = 1;
            words[1] = prefix;
            words[2] = prefix_type.value();
        }
        words[3] = u32::from(self.check_keys);
        if let (Some(key), Some(mask)) = (keys.virtual_key, keys.mask) {
            words[4] = 1;
            words[5] = key;
            words[6] = mask;
        }
        if let Some(settings) = &self.send_buffer {
            let tag = ctx
                .ip_tags
                .iter()
                .find(|t| {
                    t.ip_address == settings.notification_ip
                        && t.port == settings.notification_port
                })
                .ok_or_else(|| HostError::MissingNotificationTag {
                    label: self.label.clone(),
                })?;
            words[7] = settings.max_space;
            words[8] = settings.space_before_notify;
            words[9] = u32::from(tag.tag);
        }
        Ok(words)
    }
}

impl GeneratesSpecification for ReverseIpTagMulticastSource {
    fn region_table(&self) -> Vec<(u8, u32, &'static str)> {
        self.regions()
            .into_iter()
            .map(|(r, size)| (r.id(), size, r.label()))
            .collect()
    }

    fn generate_data_specification(
        &self,
        ctx: &GenerationContext<'_>,
    ) -> Result<DataSpecification> {
        let mut spec = SpecificationWriter::new();
        for (region, size) in self.regions() {
            spec.reserve_memory_region(region.id(), size, region.label(), region.unfilled())?;
        }

        let sim = &ctx.simulation;
        let run_ticks = sim
            .last_tick
            .map_or(u32::MAX, |last| last.saturating_sub(sim.first_tick));
        spec.comment("timing");
        spec.switch_write_focus(SourceRegion::System.id())?;
        spec.write_array(&[sim.machine_time_step_us, sim.time_scale_factor, run_ticks])?;

        if let Some(region) = self.fill_send_buffer(ctx)? {
            let max_space = self.send_buffer.as_ref().map_or(0, |s| s.max_space);
            let chunk = region.encode_from(sim.first_tick, max_space as usize);
            let words: Vec<u32> = chunk
                .bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            spec.comment(format!("send buffer: {} ticks", chunk.n_ticks));
            spec.switch_write_focus(SourceRegion::SendBuffer.id())?;
            if !words.is_empty() {
                spec.write_array(&words)?;
            }
        }

        if let Some(recording) = self.recording {
            spec.switch_write_focus(SourceRegion::RecordingBufferState.id())?;
            spec.write_array(&[recording.buffer_size, recording.size_before_receive])?;
        }

        spec.comment("configuration");
        spec.switch_write_focus(SourceRegion::Configuration.id())?;
        spec.write_array(&self.configuration_words(ctx)?)?;

        Ok(spec.end_specification())
    }
}

impl RequiresRegionReload for ReverseIpTagMulticastSource {
    fn requires_regions_to_be_reloaded(&self) -> bool {
        !self.dirty.is_empty()
    }

    fn regions_to_rewrite(&self, ctx: &GenerationContext<'_>) -> Result<RegionRewriteRequest> {
        Ok(RegionRewriteRequest {
            regions: self.dirty.iter().copied().collect(),
            spec: self.generate_data_specification(ctx)?,
        })
    }

    fn mark_regions_reloaded(&mut self, regions: &[u8]) {
        for region in regions {
            self.dirty.remove(region);
        }
    }
}

impl ProvidesProvenance for ReverseIpTagMulticastSource {
    fn provenance_region_id(&self) -> u8 {
        SourceRegion::Provenance.id()
    }
}

impl ProvidesOutgoingKeyConstraint for ReverseIpTagMulticastSource {
    fn outgoing_key_constraint(&self) -> Option<BaseKeyAndMask> {
        self.keys.constraint()
    }
}

impl MachineVertex for ReverseIpTagMulticastSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn as_spec_generator(&self) -> Option<&dyn GeneratesSpecification> {
        Some(self)
    }

    fn as_reloadable_mut(&mut self) -> Option<&mut dyn RequiresRegionReload> {
        Some(self)
    }

    fn as_provenance(&self) -> Option<&dyn ProvidesProvenance> {
        Some(self)
    }

    fn as_key_constraint(&self) -> Option<&dyn ProvidesOutgoingKeyConstraint> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationContext;
    use crate::keys::PrefixType;
    use crate::spec::SpecificationExecutor;

    const HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    fn words(data: &[u8]) -> Vec<u32> {
        data.chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn buffered() -> ReverseIpTagMulticastSource {
        ReverseIpTagMulticastSource::builder("src", 2)
            .virtual_key(0x0001_0000)
            .send_buffer_times(SendSchedule::PerKey(vec![vec![1.0, 3.0], vec![2.0]]))
            .send_buffer_max_space(256)
            .space_before_notify(1000)
            .send_buffer_notification(HOST, 17_895, Some(3))
            .build()
            .unwrap()
    }

    #[test]
    fn configuration_region_layout() {
        let source = buffered();
        let tags = [source.notification_ip_tag().unwrap()];
        let ctx = GenerationContext::new(SimulationContext::default()).with_ip_tags(&tags);
        let spec = source.generate_data_specification(&ctx).unwrap();
        let out = SpecificationExecutor::new().execute(&spec).unwrap();

        let config = words(&out.image(SourceRegion::Configuration.id()).unwrap().data);
        assert_eq!(
            config,
            vec![
                1,
                0x0001_0000,
                PrefixType::UpperHalfWord.value(),
                0,
                1,
                0x0001_0000,
                0xFFFF_FFFE,
                256,
                256, // clamped to the buffer size
                3,
            ]
        );

        let send = out.image(SourceRegion::SendBuffer.id()).unwrap();
        assert_eq!(send.data.len(), 3 * 12);
        let system = words(&out.image(SourceRegion::System.id()).unwrap().data);
        assert_eq!(system, vec![1000, 1, u32::MAX]);
    }

    #[test]
    fn schedule_needs_notification_endpoint() {
        let err = ReverseIpTagMulticastSource::builder("src", 1)
            .send_buffer_times(SendSchedule::Shared(vec![1.0]))
            .build();
        assert!(matches!(err, Err(HostError::MissingNotificationTag { .. })));

        // Endpoint given but no tag allocated for it
        let source = buffered();
        let ctx = GenerationContext::new(SimulationContext::default());
        assert!(matches!(
            source.generate_data_specification(&ctx),
            Err(HostError::MissingNotificationTag { .. })
        ));
    }

    #[test]
    fn live_only_source_has_no_send_buffer() {
        let source = ReverseIpTagMulticastSource::builder("live", 8)
            .board_address(Ipv4Addr::new(192, 168, 0, 2))
            .live_input(12_345, 1)
            .build()
            .unwrap();
        assert!(source.is_in_injection_mode());
        let ids: Vec<u8> = source.region_table().iter().map(|r| r.0).collect();
        assert_eq!(ids, vec![0, 1, 5]);

        let core = ChipAddress::new(0, 0, 4).unwrap();
        let tag = source.reverse_ip_tag(core).unwrap();
        assert_eq!(tag.destination, core);
        assert_eq!(tag.sdp_port, ports::INPUT_BUFFERING);
        assert_eq!(source.outgoing_key_constraint(), None);
    }

    #[test]
    fn recording_adds_buffer_and_state_regions() {
        let source = ReverseIpTagMulticastSource::builder("rec", 1)
            .recording(4096, 512)
            .build()
            .unwrap();
        assert!(source.is_recording());
        let ids: Vec<u8> = source.region_table().iter().map(|r| r.0).collect();
        assert_eq!(ids, vec![0, 1, 3, 4, 5]);

        let ctx = GenerationContext::new(SimulationContext::default());
        let spec = source.generate_data_specification(&ctx).unwrap();
        let out = SpecificationExecutor::new().execute(&spec).unwrap();
        let state = words(&out.image(SourceRegion::RecordingBufferState.id()).unwrap().data);
        assert_eq!(state, vec![4096, 512]);
        let buffer = out.image(SourceRegion::RecordingBuffer.id()).unwrap();
        assert!(buffer.region.unfilled);
    }

    #[test]
    fn routing_key_used_when_no_fixed_key() {
        let source = ReverseIpTagMulticastSource::builder("src", 4).build().unwrap();
        let ctx = GenerationContext::new(SimulationContext::default()).with_routing_key(
            BaseKeyAndMask {
                key: 0x0800,
                mask: 0xFFFF_FFFC,
            },
        );
        let spec = source.generate_data_specification(&ctx).unwrap();
        let out = SpecificationExecutor::new().execute(&spec).unwrap();
        let config = words(&out.image(SourceRegion::Configuration.id()).unwrap().data);
        assert_eq!(&config[4..7], &[1, 0x0800, 0xFFFF_FFFC]);
    }

    #[test]
    fn dirty_set_tracks_changed_regions() {
        let mut source = buffered();
        assert!(!source.requires_regions_to_be_reloaded());

        source
            .set_send_buffer_times(SendSchedule::Shared(vec![5.0]))
            .unwrap();
        source.window_changed();
        assert!(source.requires_regions_to_be_reloaded());

        let tags = [source.notification_ip_tag().unwrap()];
        let ctx = GenerationContext::new(SimulationContext::default()).with_ip_tags(&tags);
        let request = source.regions_to_rewrite(&ctx).unwrap();
        assert_eq!(request.regions, vec![0, 2]);

        source.mark_regions_reloaded(&[2]);
        assert!(source.requires_regions_to_be_reloaded());
        source.mark_regions_reloaded(&[0]);
        assert!(!source.requires_regions_to_be_reloaded());
    }

    #[test]
    fn window_limits_initial_send_buffer() {
        let source = buffered();
        let ctx = GenerationContext::new(SimulationContext::default().with_window(2, Some(3)));
        let region = source.fill_send_buffer(&ctx).unwrap().unwrap();
        let ticks: Vec<u32> = region.iter_from(0).map(|(t, _)| t).collect();
        assert_eq!(ticks, vec![2]);
        assert_eq!(region.keys_at(2), Some(&[0x0001_0001][..]));
    }
}
