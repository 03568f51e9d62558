//! Provenance retrieval
//!
//! After a run each core's provenance region holds the five system counters
//! (`spinn_chip::provenance`) followed by counters defined by the vertex
//! kind. The collector reads the whole block in one request, turns the
//! system counters into items uniformly and hands the remainder to the
//! vertex.

use crate::address::ChipAddress;
use crate::error::{HostError, Result};
use crate::placements::Placements;
use crate::regions::RegionLocator;
use crate::transceiver::{read_exact, Transceiver};
use crate::vertices::{MachineVertex, ProvidesProvenance};
use spinn_chip::provenance::{index, region_bytes, BYTES_PER_ITEM, N_SYSTEM_ITEMS};
use tracing::{debug, info};

/// One named counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceItem {
    /// `[vertex label, "x_y_p", item name]`
    pub names: Vec<String>,
    /// Counter value
    pub value: u32,
    /// Non-zero counters are flagged for the report
    pub needs_report: bool,
    /// Explanation shown when reported
    pub message: Option<String>,
}

impl ProvenanceItem {
    /// Item under `prefix`, reported when `value > 0`
    pub fn new(prefix: &[String], name: &str, value: u32, message: Option<String>) -> Self {
        let mut names = prefix.to_vec();
        names.push(name.to_string());
        Self {
            names,
            value,
            needs_report: value > 0,
            message,
        }
    }

    /// Last name component
    #[must_use]
    pub fn name(&self) -> &str {
        self.names.last().map_or("", String::as_str)
    }
}

/// Name prefix shared by every item of one vertex
#[must_use]
pub fn qualified_prefix(label: &str, core: ChipAddress) -> Vec<String> {
    vec![
        label.to_string(),
        format!("{}_{}_{}", core.x(), core.y(), core.p()),
    ]
}

/// Items for the five system counters
#[must_use]
pub fn system_items(label: &str, core: ChipAddress, words: &[u32]) -> Vec<ProvenanceItem> {
    let prefix = qualified_prefix(label, core);
    let at = |i: usize| words.get(i).copied().unwrap_or(0);
    let where_ = format!("{label} on {core}");

    let tx = at(index::TRANSMISSION_EVENT_OVERFLOW);
    let callback = at(index::CALLBACK_QUEUE_OVERLOADED);
    let dma = at(index::DMA_QUEUE_OVERLOADED);
    let overrun = at(index::TIMER_TIC_OVERRUN);
    let max_overrun = at(index::MAX_TIMER_TIC_OVERRUN);

    vec![
        ProvenanceItem::new(
            &prefix,
            "Times_the_transmission_of_spikes_overran",
            tx,
            Some(format!(
                "The transmission buffer for {where_} was blocked on {tx} occasions. \
                 The fabric is pushing back; spread the load over more cores or \
                 reduce the peak transmission rate."
            )),
        ),
        ProvenanceItem::new(
            &prefix,
            "Times_the_callback_queue_was_overloaded",
            callback,
            Some(format!(
                "The callback queue for {where_} overloaded on {callback} occasions. \
                 Reduce the work per tick or the number of incoming events."
            )),
        ),
        ProvenanceItem::new(
            &prefix,
            "Times_the_dma_queue_was_overloaded",
            dma,
            Some(format!(
                "The DMA queue for {where_} overloaded on {dma} occasions. \
                 Reduce the number of memory transfers per tick."
            )),
        ),
        ProvenanceItem::new(
            &prefix,
            "Times_the_timer_tic_over_ran",
            overrun,
            Some(format!(
                "A timer tick on {where_} overran {overrun} times. \
                 Increase the machine time step or the time scale factor."
            )),
        ),
        ProvenanceItem::new(
            &prefix,
            "max_number_of_times_timer_tic_over_ran",
            max_overrun,
            Some(format!(
                "The timer on {where_} overran {max_overrun} times in a row."
            )),
        ),
    ]
}

/// Reads provenance blocks from cores
#[derive(Debug)]
pub struct ProvenanceCollector<'a> {
    transceiver: &'a dyn Transceiver,
    locator: &'a dyn RegionLocator,
}

impl<'a> ProvenanceCollector<'a> {
    /// Collector reading through `transceiver`, finding regions with `locator`
    pub fn new(transceiver: &'a dyn Transceiver, locator: &'a dyn RegionLocator) -> Self {
        Self {
            transceiver,
            locator,
        }
    }

    /// Every provenance item `provider` left on `core`
    ///
    /// Reads the system counters plus `provider.n_additional_items()` more
    /// from the provider's region. The system counters become items here;
    /// the rest go through `provider.map_additional_items`. Items are named
    /// under `label`.
    ///
    /// # Errors
    ///
    /// Returns the locator's error or `HostError::RemoteReadFailed`.
    pub fn read_provenance(
        &self,
        core: ChipAddress,
        label: &str,
        provider: &dyn ProvidesProvenance,
    ) -> Result<Vec<ProvenanceItem>> {
        let words = self.read_words(
            core,
            provider.provenance_region_id(),
            provider.n_additional_items(),
        )?;
        let mut items = system_items(label, core, &words);
        let prefix = qualified_prefix(label, core);
        items.extend(provider.map_additional_items(&prefix, &words[N_SYSTEM_ITEMS..]));

        let flagged = items.iter().filter(|i| i.needs_report).count();
        info!("Provenance for {label} on {core}: {} items, {flagged} flagged", items.len());
        Ok(items)
    }

    /// Every provenance item of `vertex`
    ///
    /// Vertices without provenance yield no items and no traffic.
    ///
    /// # Errors
    ///
    /// Returns `HostError::VertexNotPlaced` or a read error.
    pub fn collect_from_vertex(
        &self,
        vertex: &dyn MachineVertex,
        placements: &dyn Placements,
    ) -> Result<Vec<ProvenanceItem>> {
        let Some(provider) = vertex.as_provenance() else {
            return Ok(Vec::new());
        };
        let label = vertex.label();
        let core = placements
            .placement_of(label)
            .ok_or_else(|| HostError::VertexNotPlaced {
                label: label.to_string(),
            })?;
        self.read_provenance(core, label, provider)
    }

    fn read_words(&self, core: ChipAddress, region: u8, n_additional: usize) -> Result<Vec<u32>> {
        let address = self.locator.region_address(core, region)?;
        let length = region_bytes(n_additional);
        let data = read_exact(self.transceiver, core.x(), core.y(), address, length)?;
        debug!("Core {core}: read {length} provenance bytes from 0x{address:08x}");
        Ok(data
            .chunks_exact(BYTES_PER_ITEM)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SoftwareTransceiver;
    use crate::regions::StaticRegionLocator;
    use spinn_chip::address::SDRAM_BASE_ADDRESS;

    #[test]
    fn system_items_in_order() {
        let core = ChipAddress::new(1, 2, 3).unwrap();
        let items = system_items("src", core, &[0, 4, 0, 1, 1]);
        assert_eq!(items.len(), N_SYSTEM_ITEMS);
        assert_eq!(items[0].names, vec!["src", "1_2_3", "Times_the_transmission_of_spikes_overran"]);
        assert!(!items[0].needs_report);
        assert_eq!(items[1].value, 4);
        assert!(items[1].needs_report);
        assert_eq!(items[4].name(), "max_number_of_times_timer_tic_over_ran");
    }

    struct DroppedEvents;

    impl ProvidesProvenance for DroppedEvents {
        fn provenance_region_id(&self) -> u8 {
            4
        }

        fn n_additional_items(&self) -> usize {
            1
        }

        fn map_additional_items(&self, prefix: &[String], values: &[u32]) -> Vec<ProvenanceItem> {
            vec![ProvenanceItem::new(prefix, "dropped_events", values[0], None)]
        }
    }

    #[test]
    fn read_provenance_maps_system_and_additional_counters() {
        let machine = SoftwareTransceiver::new();
        let core = ChipAddress::new(0, 0, 2).unwrap();
        let address = SDRAM_BASE_ADDRESS + 0x200;
        let mut locator = StaticRegionLocator::new();
        locator.insert(core, 4, address);

        let counters: Vec<u8> = [0u32, 0, 3, 0, 0, 11]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        machine.write_memory(0, 0, address, &counters).unwrap();

        let items = ProvenanceCollector::new(&machine, &locator)
            .read_provenance(core, "sink", &DroppedEvents)
            .unwrap();
        assert_eq!(items.len(), N_SYSTEM_ITEMS + 1);
        assert_eq!(items[2].name(), "Times_the_dma_queue_was_overloaded");
        assert!(items[2].needs_report);
        let dropped = items.last().unwrap();
        assert_eq!(dropped.names, vec!["sink", "0_0_2", "dropped_events"]);
        assert_eq!(dropped.value, 11);
        assert_eq!(items.iter().filter(|i| i.needs_report).count(), 2);
    }

    #[test]
    fn zero_items_are_kept() {
        let core = ChipAddress::new(0, 0, 1).unwrap();
        let items = system_items("v", core, &[0; 5]);
        assert!(items.iter().all(|i| !i.needs_report));
        assert_eq!(items.len(), 5);
    }
}
