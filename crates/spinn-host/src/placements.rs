//! Vertex placement lookup

use crate::address::ChipAddress;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Maps a vertex label to the core running it
pub trait Placements: Debug {
    /// Core of the vertex labelled `label`
    fn placement_of(&self, label: &str) -> Option<ChipAddress>;
}

/// In-memory placements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementMap {
    by_label: BTreeMap<String, ChipAddress>,
}

impl PlacementMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `label` on `core`, replacing any earlier placement
    pub fn insert(&mut self, label: impl Into<String>, core: ChipAddress) {
        self.by_label.insert(label.into(), core);
    }

    /// Number of placed vertices
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    /// True if nothing is placed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }

    /// `(label, core)` in label order
    pub fn iter(&self) -> impl Iterator<Item = (&str, ChipAddress)> {
        self.by_label.iter().map(|(l, &c)| (l.as_str(), c))
    }
}

impl Placements for PlacementMap {
    fn placement_of(&self, label: &str) -> Option<ChipAddress> {
        self.by_label.get(label).copied()
    }
}
