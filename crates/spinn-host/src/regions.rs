//! Memory regions on remote cores
//!
//! Each core's SDRAM allocation is split into numbered regions, found via a
//! pointer table at the start of the allocation (`spinn_chip::dse`). Regions
//! are declared once per generation of the core's memory map; declaring the
//! same id again is allowed only with the identical size.

use crate::address::ChipAddress;
use crate::error::{HostError, Result};
use crate::spec::{DataSpecification, RegionImage, SpecificationExecutor};
use crate::transceiver::{read_word, Transceiver};
use crate::vertices::{GenerationContext, GeneratesSpecification};
use bytes::{BufMut, Bytes, BytesMut};
use spinn_chip::dse::{pointer_offset, MAX_REGIONS, TABLE_BYTES, TABLE_MAGIC, TABLE_VERSION};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use tracing::{debug, info};

/// One declared region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Region id (index in the pointer table)
    pub id: u8,
    /// Reserved size in bytes
    pub size: u32,
    /// Human-readable name
    pub label: String,
    /// Reserved but not written by the specification
    pub unfilled: bool,
}

impl MemoryRegion {
    /// Describe a region
    pub fn new(id: u8, size: u32, label: &str, unfilled: bool) -> Self {
        Self {
            id,
            size,
            label: label.to_string(),
            unfilled,
        }
    }
}

/// Region addresses computed for one core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionLayout {
    /// Address of the pointer table
    pub base: u32,
    /// Start address of every declared region
    pub addresses: BTreeMap<u8, u32>,
    /// Bytes from `base` to the end of the last region
    pub total_bytes: u32,
}

impl RegionLayout {
    /// Encoded pointer table
    #[must_use]
    pub fn table_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(TABLE_BYTES as usize);
        buf.put_u32_le(TABLE_MAGIC);
        buf.put_u32_le(TABLE_VERSION);
        for id in 0..MAX_REGIONS {
            buf.put_u32_le(self.addresses.get(&id).copied().unwrap_or(0));
        }
        buf.freeze()
    }
}

/// Declared regions of one core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMap {
    core: ChipAddress,
    generation: u32,
    regions: BTreeMap<u8, MemoryRegion>,
}

impl MemoryMap {
    /// Empty map, generation 0
    pub fn new(core: ChipAddress) -> Self {
        Self {
            core,
            generation: 0,
            regions: BTreeMap::new(),
        }
    }

    /// Current generation
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Forget every declaration, allowing new sizes
    pub fn new_generation(&mut self) {
        self.generation += 1;
        self.regions.clear();
        debug!("Core {} memory map generation {}", self.core, self.generation);
    }

    /// Declared region `id`
    #[must_use]
    pub fn region(&self, id: u8) -> Option<&MemoryRegion> {
        self.regions.get(&id)
    }

    /// Declared regions in id order
    pub fn regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.values()
    }

    /// Check that `region` may be declared without changing anything
    ///
    /// # Errors
    ///
    /// Returns `HostError::RegionSizeConflict` if `region.id` is already
    /// declared with another size, or a specification error for an id
    /// beyond the pointer table.
    pub fn check(&self, region: &MemoryRegion) -> Result<()> {
        if region.id >= MAX_REGIONS {
            return Err(HostError::specification(format!(
                "region {} beyond the {MAX_REGIONS}-entry table",
                region.id
            )));
        }
        match self.regions.get(&region.id) {
            Some(existing) if existing.size != region.size => Err(HostError::RegionSizeConflict {
                core: self.core,
                region: region.id,
                declared: existing.size,
                requested: region.size,
            }),
            _ => Ok(()),
        }
    }

    /// Declare `region`; a repeat with the same size is a no-op
    ///
    /// # Errors
    ///
    /// See [`MemoryMap::check`].
    pub fn declare(&mut self, region: MemoryRegion) -> Result<()> {
        self.check(&region)?;
        self.regions.entry(region.id).or_insert(region);
        Ok(())
    }

    /// Lay the declared regions out behind a pointer table at `base`
    ///
    /// Region bodies follow the table in id order, each word aligned.
    ///
    /// # Errors
    ///
    /// Returns a specification error if the layout overflows the address space.
    pub fn layout(&self, base: u32) -> Result<RegionLayout> {
        let overflow = || HostError::specification("region layout overflows the address space");
        let mut cursor = base.checked_add(TABLE_BYTES).ok_or_else(overflow)?;
        let mut addresses = BTreeMap::new();
        for region in self.regions.values() {
            addresses.insert(region.id, cursor);
            let aligned = region.size.checked_add(3).ok_or_else(overflow)? & !3;
            cursor = cursor.checked_add(aligned).ok_or_else(overflow)?;
        }
        Ok(RegionLayout {
            base,
            addresses,
            total_bytes: cursor - base,
        })
    }
}

/// Resolves the SDRAM address of a region on a core
pub trait RegionLocator: Debug {
    /// Start address of `region` on `core`
    ///
    /// # Errors
    ///
    /// Returns error if the region cannot be located.
    fn region_address(&self, core: ChipAddress, region: u8) -> Result<u32>;
}

/// Region addresses known ahead of time
#[derive(Debug, Clone, Default)]
pub struct StaticRegionLocator {
    addresses: HashMap<(ChipAddress, u8), u32>,
}

impl StaticRegionLocator {
    /// Create an empty locator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one address
    pub fn insert(&mut self, core: ChipAddress, region: u8, address: u32) {
        self.addresses.insert((core, region), address);
    }

    /// Record every address of a computed layout
    pub fn insert_layout(&mut self, core: ChipAddress, layout: &RegionLayout) {
        for (&region, &address) in &layout.addresses {
            self.insert(core, region, address);
        }
    }
}

impl RegionLocator for StaticRegionLocator {
    fn region_address(&self, core: ChipAddress, region: u8) -> Result<u32> {
        self.addresses
            .get(&(core, region))
            .copied()
            .ok_or(HostError::RegionNotReserved { core, region })
    }
}

/// Locates regions by reading the pointer table back from the core
#[derive(Debug)]
pub struct PointerTableLocator<'a> {
    transceiver: &'a dyn Transceiver,
    bases: HashMap<ChipAddress, u32>,
}

impl<'a> PointerTableLocator<'a> {
    /// Locator reading through `transceiver`
    pub fn new(transceiver: &'a dyn Transceiver) -> Self {
        Self {
            transceiver,
            bases: HashMap::new(),
        }
    }

    /// Record where `core`'s pointer table lives
    #[must_use]
    pub fn with_base(mut self, core: ChipAddress, base: u32) -> Self {
        self.bases.insert(core, base);
        self
    }
}

impl RegionLocator for PointerTableLocator<'_> {
    fn region_address(&self, core: ChipAddress, region: u8) -> Result<u32> {
        let base = *self
            .bases
            .get(&core)
            .ok_or(HostError::RegionNotReserved { core, region })?;
        if region >= MAX_REGIONS {
            return Err(HostError::RegionNotReserved { core, region });
        }
        let magic = read_word(self.transceiver, core.x(), core.y(), base)?;
        if magic != TABLE_MAGIC {
            return Err(HostError::RemoteReadFailed {
                x: core.x(),
                y: core.y(),
                address: base,
                length: 4,
                reason: format!("bad pointer table magic 0x{magic:08x}"),
            });
        }
        let address = read_word(
            self.transceiver,
            core.x(),
            core.y(),
            base + pointer_offset(region),
        )?;
        if address == 0 {
            return Err(HostError::RegionNotReserved { core, region });
        }
        Ok(address)
    }
}

/// Acknowledged region write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    /// Target core
    pub core: ChipAddress,
    /// Region written
    pub region: u8,
    /// Start address
    pub address: u32,
    /// Bytes acknowledged
    pub bytes_written: usize,
}

/// Reserves regions and writes their contents to remote cores
#[derive(Debug)]
pub struct RegionWriter<'a> {
    transceiver: &'a dyn Transceiver,
    maps: HashMap<ChipAddress, MemoryMap>,
    executor: SpecificationExecutor,
}

impl<'a> RegionWriter<'a> {
    /// Writer sending through `transceiver`
    pub fn new(transceiver: &'a dyn Transceiver) -> Self {
        Self {
            transceiver,
            maps: HashMap::new(),
            executor: SpecificationExecutor::new(),
        }
    }

    /// Memory map of `core`, if any region has been reserved there
    #[must_use]
    pub fn memory_map(&self, core: ChipAddress) -> Option<&MemoryMap> {
        self.maps.get(&core)
    }

    /// Start a new generation on `core`, forgetting its declarations
    pub fn new_generation(&mut self, core: ChipAddress) {
        self.maps
            .entry(core)
            .or_insert_with(|| MemoryMap::new(core))
            .new_generation();
    }

    /// Declare `(id, size, label)` regions on `core`
    ///
    /// Every entry is checked before any is recorded.
    ///
    /// # Errors
    ///
    /// Returns `HostError::RegionSizeConflict` for a redeclaration with a
    /// different size.
    pub fn reserve_regions(&mut self, core: ChipAddress, regions: &[(u8, u32, &str)]) -> Result<()> {
        let map = self.maps.entry(core).or_insert_with(|| MemoryMap::new(core));
        let regions: Vec<MemoryRegion> = regions
            .iter()
            .map(|&(id, size, label)| MemoryRegion::new(id, size, label, false))
            .collect();
        for region in &regions {
            map.check(region)?;
        }
        for region in regions {
            debug!("Core {core}: region {} '{}' {} bytes", region.id, region.label, region.size);
            map.declare(region)?;
        }
        Ok(())
    }

    /// Write the pointer table for `core` at `base`
    ///
    /// # Errors
    ///
    /// Returns `HostError::RemoteWriteFailed` if the table is not fully
    /// acknowledged.
    pub fn write_pointer_table(&mut self, core: ChipAddress, base: u32) -> Result<RegionLayout> {
        let layout = self
            .maps
            .entry(core)
            .or_insert_with(|| MemoryMap::new(core))
            .layout(base)?;
        self.write_bytes(core, None, base, &layout.table_bytes())?;
        info!("Core {core}: pointer table at 0x{base:08x}, {} regions", layout.addresses.len());
        Ok(layout)
    }

    /// Execute `spec` and write the image of `region` to `core`
    ///
    /// # Errors
    ///
    /// Returns `HostError::RegionNotReserved` if `region` was not reserved on
    /// `core`, `HostError::RegionSizeConflict` if the specification declares
    /// it with another size, a specification error, or
    /// `HostError::RemoteWriteFailed`.
    pub fn execute_specification(
        &mut self,
        core: ChipAddress,
        region: u8,
        spec: &DataSpecification,
        locator: &dyn RegionLocator,
    ) -> Result<WriteResult> {
        let reserved = self
            .maps
            .get(&core)
            .and_then(|m| m.region(region))
            .ok_or(HostError::RegionNotReserved { core, region })?
            .size;
        let executed = self.executor.execute(spec)?;
        let image = executed
            .image(region)
            .ok_or(HostError::RegionNotReserved { core, region })?;
        if image.region.size != reserved {
            return Err(HostError::RegionSizeConflict {
                core,
                region,
                declared: reserved,
                requested: image.region.size,
            });
        }
        self.write_image(core, image, locator)
    }

    /// Initial load of a vertex on `core`
    ///
    /// Reserves the vertex's regions, writes the pointer table at `base` and
    /// writes every filled region from its specification.
    ///
    /// # Errors
    ///
    /// Returns a configuration error from reservation or generation, or
    /// `HostError::RemoteWriteFailed`.
    pub fn load_regions(
        &mut self,
        core: ChipAddress,
        base: u32,
        generator: &dyn GeneratesSpecification,
        ctx: &GenerationContext<'_>,
    ) -> Result<(RegionLayout, Vec<WriteResult>)> {
        self.reserve_regions(core, &generator.region_table())?;
        let spec = generator.generate_data_specification(ctx)?;
        let executed = self.executor.execute(&spec)?;
        let declared: Vec<(u8, u32, &str)> = executed
            .regions()
            .map(|r| (r.id, r.size, r.label.as_str()))
            .collect();
        self.reserve_regions(core, &declared)?;

        let layout = self.write_pointer_table(core, base)?;
        let mut locator = StaticRegionLocator::new();
        locator.insert_layout(core, &layout);
        let results = executed
            .images
            .values()
            .filter(|image| !image.region.unfilled)
            .map(|image| self.write_image(core, image, &locator))
            .collect::<Result<Vec<_>>>()?;
        info!("Core {core}: loaded {} regions", results.len());
        Ok((layout, results))
    }

    /// Write one already executed image to its region
    ///
    /// # Errors
    ///
    /// Returns the locator's error or `HostError::RemoteWriteFailed`.
    pub fn write_image(
        &self,
        core: ChipAddress,
        image: &RegionImage,
        locator: &dyn RegionLocator,
    ) -> Result<WriteResult> {
        let region = image.region.id;
        let address = locator.region_address(core, region)?;
        let bytes_written = self.write_bytes(core, Some(region), address, &image.data)?;
        debug!("Core {core}: wrote {bytes_written} bytes to region {region} at 0x{address:08x}");
        Ok(WriteResult {
            core,
            region,
            address,
            bytes_written,
        })
    }

    fn write_bytes(
        &self,
        core: ChipAddress,
        region: Option<u8>,
        address: u32,
        data: &[u8],
    ) -> Result<usize> {
        let written = self
            .transceiver
            .write_memory(core.x(), core.y(), address, data)
            .map_err(|e| HostError::remote_write_failed(core, region, address, e.to_string()))?;
        if written != data.len() {
            return Err(HostError::remote_write_failed(
                core,
                region,
                address,
                format!("{written} of {} bytes acknowledged", data.len()),
            ));
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SoftwareTransceiver;
    use crate::spec::SpecificationWriter;
    use spinn_chip::address::SDRAM_BASE_ADDRESS;

    fn core() -> ChipAddress {
        ChipAddress::new(0, 0, 1).unwrap()
    }

    #[test]
    fn redeclaration_needs_identical_size() {
        let mut map = MemoryMap::new(core());
        map.declare(MemoryRegion::new(1, 40, "config", false)).unwrap();
        map.declare(MemoryRegion::new(1, 40, "config", false)).unwrap();
        let err = map.declare(MemoryRegion::new(1, 44, "config", false));
        assert!(matches!(
            err,
            Err(HostError::RegionSizeConflict { region: 1, declared: 40, requested: 44, .. })
        ));

        map.new_generation();
        assert_eq!(map.generation(), 1);
        map.declare(MemoryRegion::new(1, 44, "config", false)).unwrap();
    }

    #[test]
    fn layout_aligns_bodies_after_table() {
        let mut map = MemoryMap::new(core());
        map.declare(MemoryRegion::new(2, 8, "b", false)).unwrap();
        map.declare(MemoryRegion::new(0, 5, "a", false)).unwrap();
        let layout = map.layout(0x1000).unwrap();
        assert_eq!(layout.addresses[&0], 0x1000 + TABLE_BYTES);
        assert_eq!(layout.addresses[&2], 0x1000 + TABLE_BYTES + 8);
        assert_eq!(layout.total_bytes, TABLE_BYTES + 16);

        let table = layout.table_bytes();
        assert_eq!(table.len(), TABLE_BYTES as usize);
        assert_eq!(&table[0..4], &TABLE_MAGIC.to_le_bytes());
        assert_eq!(&table[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn pointer_table_locator_reads_back_layout() {
        let machine = SoftwareTransceiver::new();
        let mut writer = RegionWriter::new(&machine);
        writer
            .reserve_regions(core(), &[(0, 16, "system"), (1, 8, "config")])
            .unwrap();
        let layout = writer.write_pointer_table(core(), SDRAM_BASE_ADDRESS).unwrap();
        let map = writer.memory_map(core()).unwrap();
        assert_eq!(map.regions().count(), 2);
        assert_eq!(map.region(1).map(|r| r.size), Some(8));

        let locator = PointerTableLocator::new(&machine).with_base(core(), SDRAM_BASE_ADDRESS);
        assert_eq!(locator.region_address(core(), 1).unwrap(), layout.addresses[&1]);
        assert!(matches!(
            locator.region_address(core(), 5),
            Err(HostError::RegionNotReserved { region: 5, .. })
        ));
    }

    #[test]
    fn execute_specification_writes_the_region() {
        let machine = SoftwareTransceiver::new();
        let mut writer = RegionWriter::new(&machine);
        writer.reserve_regions(core(), &[(1, 8, "config")]).unwrap();
        let layout = writer.write_pointer_table(core(), SDRAM_BASE_ADDRESS).unwrap();
        let mut locator = StaticRegionLocator::new();
        locator.insert_layout(core(), &layout);

        let mut spec = SpecificationWriter::new();
        spec.reserve_memory_region(1, 8, "config", false).unwrap();
        spec.switch_write_focus(1).unwrap();
        spec.write_array(&[0x11, 0x22]).unwrap();
        let spec = spec.end_specification();

        let result = writer.execute_specification(core(), 1, &spec, &locator).unwrap();
        assert_eq!(result.bytes_written, 8);
        let back = machine.read_memory(0, 0, result.address, 8).unwrap();
        assert_eq!(back.as_ref(), &[0x11, 0, 0, 0, 0x22, 0, 0, 0]);

        // Not reserved on this core
        assert!(matches!(
            writer.execute_specification(core(), 0, &spec, &locator),
            Err(HostError::RegionNotReserved { region: 0, .. })
        ));
    }

    #[test]
    fn short_write_is_reported_with_region() {
        let machine = SoftwareTransceiver::new();
        let mut writer = RegionWriter::new(&machine);
        writer.reserve_regions(core(), &[(1, 8, "config")]).unwrap();
        let mut locator = StaticRegionLocator::new();
        locator.insert(core(), 1, SDRAM_BASE_ADDRESS + 0x100);
        machine.inject_short_write(0, 0, SDRAM_BASE_ADDRESS + 0x100);

        let mut spec = SpecificationWriter::new();
        spec.reserve_memory_region(1, 8, "config", false).unwrap();
        spec.switch_write_focus(1).unwrap();
        spec.write_array(&[1, 2]).unwrap();

        let err = writer
            .execute_specification(core(), 1, &spec.end_specification(), &locator)
            .unwrap_err();
        assert!(matches!(err, HostError::RemoteWriteFailed { region: Some(1), .. }));
    }
}
