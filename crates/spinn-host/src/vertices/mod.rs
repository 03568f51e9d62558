//! Vertex capabilities
//!
//! A vertex is one unit of work placed on one core. What the host can do
//! with it is expressed as narrow capability traits; [`MachineVertex`]
//! exposes each one through an accessor that returns `None` when the vertex
//! kind lacks it, so passes resolve capabilities once per vertex instead of
//! probing concrete types.
//!
//! | Capability | Used by |
//! |------------|---------|
//! | [`GeneratesSpecification`] | initial region load |
//! | [`RequiresRegionReload`] | [`RegionReloader`](crate::RegionReloader) |
//! | [`ProvidesProvenance`] | [`ProvenanceCollector`](crate::ProvenanceCollector) |
//! | [`ProvidesOutgoingKeyConstraint`] | key allocation during routing |

pub mod live_packet_gather;
pub mod reverse_ip_tag_source;

pub use live_packet_gather::{GatherRegion, LivePacketGather, LivePacketGatherParams};
pub use reverse_ip_tag_source::{
    ReverseIpTagMulticastSource, ReverseIpTagMulticastSourceBuilder, SourceRegion,
};

use crate::config::SimulationContext;
use crate::error::Result;
use crate::keys::BaseKeyAndMask;
use crate::provenance::ProvenanceItem;
use crate::spec::DataSpecification;
use crate::tags::IpTag;
use std::fmt::Debug;

/// Inputs a vertex needs to produce its region contents
#[derive(Debug, Clone, Copy)]
pub struct GenerationContext<'a> {
    /// Timing and execution window
    pub simulation: SimulationContext,
    /// IP tags allocated for this run
    pub ip_tags: &'a [IpTag],
    /// Key and mask assigned by routing, for vertices without a fixed key
    pub routing_key: Option<BaseKeyAndMask>,
}

impl<'a> GenerationContext<'a> {
    /// Context with no tags and no routing key
    pub fn new(simulation: SimulationContext) -> Self {
        Self {
            simulation,
            ip_tags: &[],
            routing_key: None,
        }
    }

    /// Use `ip_tags`
    #[must_use]
    pub fn with_ip_tags(mut self, ip_tags: &'a [IpTag]) -> Self {
        self.ip_tags = ip_tags;
        self
    }

    /// Use the key and mask assigned by routing
    #[must_use]
    pub fn with_routing_key(mut self, routing_key: BaseKeyAndMask) -> Self {
        self.routing_key = Some(routing_key);
        self
    }
}

/// Region ids to rewrite and the specification producing their contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRewriteRequest {
    /// Regions whose contents changed
    pub regions: Vec<u8>,
    /// Full specification; only `regions` are written from it
    pub spec: DataSpecification,
}

/// A unit of work placed on one core
pub trait MachineVertex: Debug {
    /// Unique label, used for placement lookup and provenance names
    fn label(&self) -> &str;

    /// Region contents generator
    fn as_spec_generator(&self) -> Option<&dyn GeneratesSpecification> {
        None
    }

    /// Selective reload support
    fn as_reloadable_mut(&mut self) -> Option<&mut dyn RequiresRegionReload> {
        None
    }

    /// Provenance support
    fn as_provenance(&self) -> Option<&dyn ProvidesProvenance> {
        None
    }

    /// Fixed outgoing key support
    fn as_key_constraint(&self) -> Option<&dyn ProvidesOutgoingKeyConstraint> {
        None
    }
}

/// Produces the data specification for a vertex's regions
pub trait GeneratesSpecification {
    /// `(region id, size, label)` for every region the vertex reserves
    fn region_table(&self) -> Vec<(u8, u32, &'static str)>;

    /// Build the specification
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the context lacks something the
    /// vertex needs (a key, a notification tag).
    fn generate_data_specification(&self, ctx: &GenerationContext<'_>)
        -> Result<DataSpecification>;
}

/// Regions that can change between runs without remapping
pub trait RequiresRegionReload {
    /// True while any region still needs rewriting
    fn requires_regions_to_be_reloaded(&self) -> bool;

    /// Regions to rewrite and their fresh contents
    ///
    /// # Errors
    ///
    /// Returns error if the contents cannot be generated.
    fn regions_to_rewrite(&self, ctx: &GenerationContext<'_>) -> Result<RegionRewriteRequest>;

    /// Clear `regions` from the dirty set once their writes are acknowledged
    fn mark_regions_reloaded(&mut self, regions: &[u8]);
}

/// Counters read back after a run
pub trait ProvidesProvenance {
    /// Region holding the counter block
    fn provenance_region_id(&self) -> u8;

    /// Counters following the system block
    fn n_additional_items(&self) -> usize {
        0
    }

    /// Turn the additional counters into named items
    fn map_additional_items(&self, _prefix: &[String], _values: &[u32]) -> Vec<ProvenanceItem> {
        Vec::new()
    }
}

/// Fixed key and mask for the vertex's outgoing traffic
pub trait ProvidesOutgoingKeyConstraint {
    /// The constraint, if the vertex has a fixed key
    fn outgoing_key_constraint(&self) -> Option<BaseKeyAndMask>;
}
