//! Named address ranges for diagnostics
//!
//! Labels never restrict access; they only explain an address. Ranges may
//! overlap (a guard label wrapping a reserved block, an allocation inside a
//! larger region). [`LabelRegistry::resolve`] picks the smallest enclosing
//! range and, among equally sized ranges, the most recently added one.

use super::Address;
use std::collections::BTreeMap;
use std::fmt;

/// Handle returned by [`LabelRegistry::add`], used to remove the label again.
/// Ids grow with every registration, so id order is registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(u64);

/// A named, non-empty address range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRange {
    pub name: String,
    pub start: Address,
    pub length: u32,
}

impl LabelRange {
    /// Create a range. Returns `None` for an empty range.
    pub fn new(name: impl Into<String>, start: Address, length: u32) -> Option<Self> {
        (length > 0).then(|| LabelRange {
            name: name.into(),
            start,
            length,
        })
    }

    /// Exclusive end address; widened so a range may end at 4 GiB
    pub fn end(&self) -> u64 {
        self.start as u64 + self.length as u64
    }

    pub fn contains(&self, address: Address) -> bool {
        address >= self.start && (address as u64) < self.end()
    }
}

impl fmt::Display for LabelRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@{:06x} +{:06x} {:06x} {}",
            self.start,
            self.length,
            self.end(),
            self.name
        )
    }
}

/// The label registry
#[derive(Debug, Clone, Default)]
pub struct LabelRegistry {
    labels: BTreeMap<LabelId, LabelRange>,
    next_id: u64,
}

impl LabelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a range. Names need not be unique.
    pub fn add(&mut self, range: LabelRange) -> LabelId {
        let id = LabelId(self.next_id);
        self.next_id += 1;
        log::debug!(target: "mem_init", "add label: {}", range);
        self.labels.insert(id, range);
        id
    }

    /// Remove a label, returning its range if it was registered
    pub fn remove(&mut self, id: LabelId) -> Option<LabelRange> {
        self.labels.remove(&id)
    }

    /// Find the most specific range containing `address`
    pub fn resolve(&self, address: Address) -> Option<&LabelRange> {
        // Later entries win ties because `min_by_key` keeps the first minimum
        // and we iterate in reverse registration order.
        self.labels
            .values()
            .rev()
            .filter(|range| range.contains(address))
            .min_by_key(|range| range.length)
    }

    pub fn get(&self, id: LabelId) -> Option<&LabelRange> {
        self.labels.get(&id)
    }

    /// All labels in registration order
    pub fn iter(&self) -> impl Iterator<Item = &LabelRange> {
        self.labels.values()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
