//! Core addressing and core subsets.

use crate::error::{HostError, Result};
use spinn_chip::address::is_valid_core;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Address of one core: chip coordinates plus processor id.
///
/// Fields are used verbatim as wire-protocol fields, so construction checks
/// the core id against the hardware range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChipAddress {
    x: u8,
    y: u8,
    p: u8,
}

impl ChipAddress {
    /// Create an address, validating the core id.
    ///
    /// # Errors
    ///
    /// Returns `HostError::InvalidAddress` if `p` is not a core on the chip.
    pub fn new(x: u8, y: u8, p: u8) -> Result<Self> {
        if !is_valid_core(p) {
            return Err(HostError::InvalidAddress { x, y, p });
        }
        Ok(Self { x, y, p })
    }

    /// Chip X coordinate.
    #[must_use]
    pub const fn x(&self) -> u8 {
        self.x
    }

    /// Chip Y coordinate.
    #[must_use]
    pub const fn y(&self) -> u8 {
        self.y
    }

    /// Processor id on the chip.
    #[must_use]
    pub const fn p(&self) -> u8 {
        self.p
    }

    /// Chip coordinates only.
    #[must_use]
    pub const fn chip(&self) -> (u8, u8) {
        (self.x, self.y)
    }
}

impl fmt::Display for ChipAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.p)
    }
}

/// Set of processors on one chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSubset {
    x: u8,
    y: u8,
    processors: BTreeSet<u8>,
}

impl CoreSubset {
    /// Create a subset for chip `(x, y)`.
    ///
    /// # Errors
    ///
    /// Returns `HostError::InvalidAddress` for the first invalid core id.
    pub fn new(x: u8, y: u8, processors: impl IntoIterator<Item = u8>) -> Result<Self> {
        let processors: BTreeSet<u8> = processors.into_iter().collect();
        if let Some(&p) = processors.iter().find(|&&p| !is_valid_core(p)) {
            return Err(HostError::InvalidAddress { x, y, p });
        }
        Ok(Self { x, y, processors })
    }

    /// Chip X coordinate.
    #[must_use]
    pub const fn x(&self) -> u8 {
        self.x
    }

    /// Chip Y coordinate.
    #[must_use]
    pub const fn y(&self) -> u8 {
        self.y
    }

    /// Processor ids in ascending order.
    pub fn processor_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.processors.iter().copied()
    }

    /// Number of processors in the subset.
    #[must_use]
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// True if the subset names no processors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

/// Core subsets across several chips, kept in chip order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreSubsets {
    chips: BTreeMap<(u8, u8), CoreSubset>,
}

impl CoreSubsets {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single core, merging with an existing subset for its chip.
    pub fn add_core(&mut self, core: ChipAddress) {
        self.chips
            .entry(core.chip())
            .or_insert_with(|| CoreSubset {
                x: core.x(),
                y: core.y(),
                processors: BTreeSet::new(),
            })
            .processors
            .insert(core.p());
    }

    /// Add a whole subset, merging processors for a chip already present.
    pub fn add_subset(&mut self, subset: CoreSubset) {
        match self.chips.get_mut(&(subset.x, subset.y)) {
            Some(existing) => existing.processors.extend(subset.processors),
            None => {
                self.chips.insert((subset.x, subset.y), subset);
            }
        }
    }

    /// Subsets in chip order.
    pub fn core_subsets(&self) -> impl Iterator<Item = &CoreSubset> {
        self.chips.values()
    }

    /// Every core address, chip order then processor order.
    pub fn cores(&self) -> impl Iterator<Item = ChipAddress> + '_ {
        self.chips.values().flat_map(|subset| {
            subset.processor_ids().map(move |p| ChipAddress {
                x: subset.x,
                y: subset.y,
                p,
            })
        })
    }

    /// Total number of cores.
    #[must_use]
    pub fn n_cores(&self) -> usize {
        self.chips.values().map(CoreSubset::len).sum()
    }
}

impl FromIterator<ChipAddress> for CoreSubsets {
    fn from_iter<I: IntoIterator<Item = ChipAddress>>(iter: I) -> Self {
        let mut subsets = Self::new();
        for core in iter {
            subsets.add_core(core);
        }
        subsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_core_out_of_range() {
        assert!(ChipAddress::new(255, 255, 17).is_ok());
        assert!(matches!(
            ChipAddress::new(0, 0, 18),
            Err(HostError::InvalidAddress { p: 18, .. })
        ));
        assert!(CoreSubset::new(1, 1, [1, 2, 40]).is_err());
    }

    #[test]
    fn subsets_iterate_in_chip_then_core_order() {
        let mut subsets = CoreSubsets::new();
        subsets.add_core(ChipAddress::new(1, 0, 3).unwrap());
        subsets.add_core(ChipAddress::new(0, 0, 2).unwrap());
        subsets.add_core(ChipAddress::new(1, 0, 1).unwrap());
        subsets.add_subset(CoreSubset::new(0, 0, [1]).unwrap());

        let cores: Vec<String> = subsets.cores().map(|c| c.to_string()).collect();
        assert_eq!(cores, ["(0, 0, 1)", "(0, 0, 2)", "(1, 0, 1)", "(1, 0, 3)"]);
        assert_eq!(subsets.n_cores(), 4);
        assert_eq!(subsets.core_subsets().count(), 2);
    }
}
