//! Live event gatherer: forwards multicast events from the fabric to a host
//! socket through an IP tag.

use crate::error::{HostError, Result};
use crate::keys::KeyPrefix;
use crate::provenance::ProvenanceItem;
use crate::spec::{DataSpecification, SpecificationWriter};
use crate::tags::IpTag;
use crate::vertices::{GenerationContext, GeneratesSpecification, MachineVertex, ProvidesProvenance};
use spinn_chip::eieio::MessageType;
use spinn_chip::provenance::region_bytes;
use spinn_chip::scp::HOST_PORT_CPU;
use std::net::Ipv4Addr;

/// Traffic class of the gatherer's IP tag
pub const TRAFFIC_IDENTIFIER: &str = "LPG_EVENT_STREAM";

const N_ADDITIONAL_PROVENANCE_ITEMS: usize = 2;
const SYSTEM_BYTES: u32 = 12;
const CONFIG_BYTES: u32 = 48;

/// Regions of a gatherer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum GatherRegion {
    /// Timing
    System = 0,
    /// Packet format and destination
    Config = 1,
    /// Counter block
    Provenance = 2,
}

impl GatherRegion {
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
            Self::Config => "CONFIG",
            Self::Provenance => "PROVENANCE",
        }
    }
}

/// Packet format and host endpoint of a gatherer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivePacketGatherParams {
    /// Host receiving the events
    pub hostname: Ipv4Addr,
    /// Host UDP port
    pub port: u16,
    /// IP tag slot
    pub tag: u8,
    /// Ethernet chip holding the tag
    pub board_address: Option<Ipv4Addr>,
    /// Strip the SDP header before forwarding
    pub strip_sdp: bool,
    /// Prefix applied to outgoing keys
    pub key_prefix: Option<KeyPrefix>,
    /// Packet format
    pub message_type: MessageType,
    /// Right shift applied to keys
    pub right_shift: u32,
    /// Send the tick as payload
    pub payload_as_time_stamps: bool,
    /// Apply `payload_prefix` to payloads
    pub use_payload_prefix: bool,
    /// Payload prefix
    pub payload_prefix: u32,
    /// Right shift applied to payloads
    pub payload_right_shift: u32,
    /// Packets per tick limit (0 for none)
    pub packets_per_time_step: u32,
}

impl Default for LivePacketGatherParams {
    fn default() -> Self {
        Self {
            hostname: Ipv4Addr::LOCALHOST,
            port: 17_895,
            tag: 1,
            board_address: None,
            strip_sdp: true,
            key_prefix: None,
            message_type: MessageType::Key32Bit,
            right_shift: 0,
            payload_as_time_stamps: true,
            use_payload_prefix: true,
            payload_prefix: 0,
            payload_right_shift: 0,
            packets_per_time_step: 0,
        }
    }
}

/// Gathers events and forwards them to the host
#[derive(Debug, Clone)]
pub struct LivePacketGather {
    label: String,
    params: LivePacketGatherParams,
}

impl LivePacketGather {
    /// Gatherer with the given settings
    pub fn new(label: impl Into<String>, params: LivePacketGatherParams) -> Self {
        Self {
            label: label.into(),
            params,
        }
    }

    /// Settings
    #[must_use]
    pub const fn params(&self) -> &LivePacketGatherParams {
        &self.params
    }

    /// IP tag the gatherer sends through
    #[must_use]
    pub fn ip_tag(&self) -> IpTag {
        let p = &self.params;
        IpTag::new(p.board_address, p.tag, p.hostname, p.port, p.strip_sdp)
            .with_traffic_identifier(TRAFFIC_IDENTIFIER)
    }

    fn config_words(&self, ctx: &GenerationContext<'_>) -> Result<[u32; 12]> {
        let p = &self.params;
        let tag = ctx
            .ip_tags
            .iter()
            .find(|t| t.traffic_identifier == TRAFFIC_IDENTIFIER && t.port == p.port)
            .ok_or_else(|| HostError::MissingNotificationTag {
                label: self.label.clone(),
            })?;
        let (use_prefix, prefix, prefix_type) = match p.key_prefix {
            Some(kp) => (1, kp.positioned(), kp.prefix_type.value()),
            None => (0, 0, 0),
        };
        Ok([
            use_prefix,
            prefix,
            prefix_type,
            p.message_type.value(),
            p.right_shift,
            u32::from(p.payload_as_time_stamps),
            u32::from(p.use_payload_prefix),
            p.payload_prefix,
            p.payload_right_shift,
            u32::from(tag.tag),
            u32::from(HOST_PORT_CPU),
            p.packets_per_time_step,
        ])
    }
}

impl GeneratesSpecification for LivePacketGather {
    fn region_table(&self) -> Vec<(u8, u32, &'static str)> {
        #[allow(clippy::cast_possible_truncation)]
        let provenance = region_bytes(N_ADDITIONAL_PROVENANCE_ITEMS) as u32;
        [
            (GatherRegion::System, SYSTEM_BYTES),
            (GatherRegion::Config, CONFIG_BYTES),
            (GatherRegion::Provenance, provenance),
        ]
        .into_iter()
        .map(|(r, size)| (r.id(), size, r.label()))
        .collect()
    }

    fn generate_data_specification(
        &self,
        ctx: &GenerationContext<'_>,
    ) -> Result<DataSpecification> {
        let mut spec = SpecificationWriter::new();
        for (id, size, label) in self.region_table() {
            spec.reserve_memory_region(id, size, label, id == GatherRegion::Provenance.id())?;
        }
        let sim = &ctx.simulation;
        let run_ticks = sim
            .last_tick
            .map_or(u32::MAX, |last| last.saturating_sub(sim.first_tick));
        spec.switch_write_focus(GatherRegion::System.id())?;
        spec.write_array(&[sim.machine_time_step_us, sim.time_scale_factor, run_ticks])?;
        spec.switch_write_focus(GatherRegion::Config.id())?;
        spec.write_array(&self.config_words(ctx)?)?;
        Ok(spec.end_specification())
    }
}

impl ProvidesProvenance for LivePacketGather {
    fn provenance_region_id(&self) -> u8 {
        GatherRegion::Provenance.id()
    }

    fn n_additional_items(&self) -> usize {
        N_ADDITIONAL_PROVENANCE_ITEMS
    }

    fn map_additional_items(&self, prefix: &[String], values: &[u32]) -> Vec<ProvenanceItem> {
        let without = values.first().copied().unwrap_or(0);
        let with = values.get(1).copied().unwrap_or(0);
        let advice = "Try increasing the machine time step or the time scale factor, \
                      or reduce the number of vertices feeding this gatherer.";
        vec![
            ProvenanceItem::new(
                prefix,
                "lost_packets_without_payload",
                without,
                Some(format!(
                    "The live packet gatherer lost {without} packets without payloads. {advice}"
                )),
            ),
            ProvenanceItem::new(
                prefix,
                "lost_packets_with_payload",
                with,
                Some(format!(
                    "The live packet gatherer lost {with} packets with payloads. {advice}"
                )),
            ),
        ]
    }
}

impl MachineVertex for LivePacketGather {
    fn label(&self) -> &str {
        &self.label
    }

    fn as_spec_generator(&self) -> Option<&dyn GeneratesSpecification> {
        Some(self)
    }

    fn as_provenance(&self) -> Option<&dyn ProvidesProvenance> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationContext;
    use crate::spec::SpecificationExecutor;

    #[test]
    fn config_region_is_twelve_words() {
        let lpg = LivePacketGather::new(
            "lpg",
            LivePacketGatherParams {
                key_prefix: Some(KeyPrefix::upper(0x12)),
                tag: 4,
                ..LivePacketGatherParams::default()
            },
        );
        let tags = [lpg.ip_tag()];
        let ctx = GenerationContext::new(SimulationContext::default()).with_ip_tags(&tags);
        let out = SpecificationExecutor::new()
            .execute(&lpg.generate_data_specification(&ctx).unwrap())
            .unwrap();
        let config = &out.image(GatherRegion::Config.id()).unwrap().data;
        assert_eq!(config.len(), CONFIG_BYTES as usize);
        assert_eq!(&config[4..8], &0x0012_0000u32.to_le_bytes());
        assert_eq!(&config[36..40], &4u32.to_le_bytes());
    }

    #[test]
    fn additional_provenance_names() {
        let lpg = LivePacketGather::new("lpg", LivePacketGatherParams::default());
        let prefix = vec!["lpg".to_string(), "0_0_3".to_string()];
        let items = lpg.map_additional_items(&prefix, &[0, 7]);
        assert_eq!(items[0].name(), "lost_packets_without_payload");
        assert!(!items[0].needs_report);
        assert_eq!(items[1].name(), "lost_packets_with_payload");
        assert_eq!(items[1].value, 7);
        assert!(items[1].needs_report);
    }

    #[test]
    fn lacks_reload_capability() {
        let mut lpg = LivePacketGather::new("lpg", LivePacketGatherParams::default());
        assert!(lpg.as_reloadable_mut().is_none());
        assert!(lpg.as_key_constraint().is_none());
        assert_eq!(lpg.ip_tag().traffic_identifier, TRAFFIC_IDENTIFIER);
    }
}
