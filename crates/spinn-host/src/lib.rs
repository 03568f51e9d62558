//! Host control layer for a mesh of small cores.
//!
//! Everything the host does to a placed application between "the graph is
//! mapped" and "the run is over": key and mask allocation for event sources,
//! buffering and flow control of scheduled events, writing and selectively
//! rewriting per-core memory regions, batched route-table commands, tag
//! loading and reading provenance counters back.
//!
//! The transport is not part of this crate. All remote access goes through
//! the [`Transceiver`] trait; [`SoftwareTransceiver`] implements it in host
//! memory for tests and dry runs.
//!
//! # Layers
//!
//! ```text
//! vertices ─┬─► spec (writer → bytecode → executor → region images)
//!           │        └─► regions (RegionWriter) ─┐
//!           ├─► reload (RegionReloader) ──────────┤
//!           ├─► provenance (ProvenanceCollector) ─┼─► Transceiver
//!           └─► buffers → flow (streamer) ────────┤
//! tags (TagsLoader) ──────────────────────────────┤
//! process (McRoutesProcess) ──────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use spinn_host::{
//!     ChipAddress, GenerationContext, MachineVertex, PlacementMap, PointerTableLocator,
//!     RegionReloader, RegionWriter, ReloadConfig, ReverseIpTagMulticastSource, SendSchedule,
//!     SimulationContext, SoftwareTransceiver,
//! };
//! use std::net::Ipv4Addr;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let machine = SoftwareTransceiver::new();
//! let core = ChipAddress::new(0, 0, 1)?;
//! let base = 0x6000_0000;
//! let mut source = ReverseIpTagMulticastSource::builder("stimulus", 16)
//!     .virtual_key(0x0001_0000)
//!     .send_buffer_times(SendSchedule::Shared(vec![0.0, 5.0, 10.0]))
//!     .send_buffer_notification(Ipv4Addr::LOCALHOST, 17_896, Some(2))
//!     .board_address(Ipv4Addr::new(192, 168, 240, 1))
//!     .build()?;
//! let tags = vec![source.notification_ip_tag().unwrap()];
//! let ctx = GenerationContext::new(SimulationContext::default()).with_ip_tags(&tags);
//!
//! // Initial load, then change the schedule and rewrite only what changed
//! RegionWriter::new(&machine).load_regions(core, base, &source, &ctx)?;
//! source.set_send_buffer_times(SendSchedule::Shared(vec![2.0, 4.0]))?;
//!
//! let mut placements = PlacementMap::new();
//! placements.insert(source.label(), core);
//! let mut vertices: Vec<Box<dyn MachineVertex>> = vec![Box::new(source)];
//!
//! let locator = PointerTableLocator::new(&machine).with_base(core, base);
//! let config = ReloadConfig::new("app_data", "reports", "board0");
//! let summary = RegionReloader::new(&machine, &locator, config)
//!     .reload(&mut vertices, &placements, &ctx)?;
//! println!("{} regions rewritten", summary.regions_written);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod address;
pub mod backends;
pub mod buffers;
mod config;
mod error;
pub mod flow;
pub mod keys;
mod placements;
pub mod process;
pub mod provenance;
pub mod regions;
pub mod reload;
pub mod scp;
pub mod spec;
pub mod tags;
mod transceiver;
pub mod vertices;

pub use address::{ChipAddress, CoreSubset, CoreSubsets};
pub use backends::{SoftwareTransceiver, WireOp};
pub use buffers::{BufferedSendingRegion, EncodedChunk, FillStats, SendSchedule};
pub use config::{ExchangeConfig, ReloadConfig, SimulationContext};
pub use error::{HostError, ProtocolFailure, Result};
pub use flow::{SendBufferStreamer, StreamingFlowController};
pub use keys::{compute_mask, BaseKeyAndMask, KeyAllocation, KeyPrefix, PrefixType};
pub use placements::{PlacementMap, Placements};
pub use process::{McRoutesProcess, MultiConnectionProcess};
pub use provenance::{ProvenanceCollector, ProvenanceItem};
pub use regions::{
    MemoryMap, MemoryRegion, PointerTableLocator, RegionLayout, RegionLocator, RegionWriter,
    StaticRegionLocator, WriteResult,
};
pub use reload::{RegionReloader, ReloadSummary};
pub use scp::{ScpCommand, ScpRequest, ScpResponse};
pub use spec::{DataSpecification, DataWidth, SpecificationExecutor, SpecificationWriter};
pub use tags::{IpTag, ReverseIpTag, TagsLoader};
pub use transceiver::{read_exact, read_word, Transceiver};
pub use vertices::{
    GenerationContext, GeneratesSpecification, LivePacketGather, LivePacketGatherParams,
    MachineVertex, ProvidesOutgoingKeyConstraint, ProvidesProvenance, RegionRewriteRequest,
    RequiresRegionReload, ReverseIpTagMulticastSource,
};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        ChipAddress, CoreSubsets, GenerationContext, HostError, MachineVertex, PlacementMap,
        ProvenanceCollector, RegionReloader, RegionWriter, ReloadConfig, Result,
        SimulationContext, SoftwareTransceiver, TagsLoader, Transceiver,
    };
}
