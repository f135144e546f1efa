//! Guest address space model
//!
//! This module provides the core memory abstractions:
//! - [`flat`]: the flat, big-endian guest memory with bounds-checked access
//! - [`alloc`]: the allocator handing out ranges of that memory
//! - [`label`]: named ranges used to explain addresses in diagnostics
//!
//! [`AddressSpace`] bundles the three so that callers can allocate a block and
//! label it in one step, and release both together.
//!
//! # Layout
//!
//! ```text
//! 0x000000  zero page (8 bytes, labeled)
//! 0x001000  allocator base
//! ...       allocations
//! ram_size  end of RAM
//! above     special ranges (unbacked, every access faults)
//! ```

pub mod alloc;
pub mod flat;
pub mod label;

use crate::emulator::attribution::classify;
use crate::emulator::errors::EmuError;
use self::alloc::{Allocation, Allocator, MIN_ALIGN};
use self::flat::Memory;
use self::label::{LabelId, LabelRange, LabelRegistry};
use rustc_hash::FxHashMap;

/// Guest address (the guest has a 32-bit address space)
pub type Address = u32;

/// Memory, allocator and labels of one emulated machine
#[derive(Debug, Clone)]
pub struct AddressSpace {
    pub mem: Memory,
    pub alloc: Allocator,
    pub labels: LabelRegistry,
    block_labels: FxHashMap<Address, LabelId>,
}

impl AddressSpace {
    /// Create an address space of `ram_size` bytes with the allocator placed
    /// over `[alloc_base, ram_size)`
    pub fn new(ram_size: u32, alloc_base: Address) -> Self {
        AddressSpace {
            mem: Memory::new(ram_size),
            alloc: Allocator::new(alloc_base, ram_size),
            labels: LabelRegistry::new(),
            block_labels: FxHashMap::default(),
        }
    }

    /// Allocate a block and register a label of the same name over it
    pub fn alloc_labeled(&mut self, name: &str, size: u32) -> Result<Allocation, EmuError> {
        let allocation = self.alloc.allocate(name, size, MIN_ALIGN)?;
        if let Some(range) = LabelRange::new(name, allocation.address(), allocation.size()) {
            let id = self.labels.add(range);
            self.block_labels.insert(allocation.address(), id);
        }
        Ok(allocation)
    }

    /// Free a block obtained from [`AddressSpace::alloc_labeled`] and drop its label
    pub fn free_labeled(&mut self, allocation: &Allocation) -> Result<(), EmuError> {
        self.alloc.free(allocation)?;
        if let Some(id) = self.block_labels.remove(&allocation.address()) {
            self.labels.remove(id);
        }
        Ok(())
    }

    /// Host-side long write, faults attributed through the labels
    pub fn w32(&mut self, address: Address, value: u32) -> Result<(), EmuError> {
        self.mem
            .w32(address, value)
            .map_err(|fault| classify(&self.labels, fault, None))
    }

    /// Host-side long read, faults attributed through the labels
    pub fn r32(&self, address: Address) -> Result<u32, EmuError> {
        self.mem
            .r32(address)
            .map_err(|fault| classify(&self.labels, fault, None))
    }

    pub fn write_bytes(&mut self, address: Address, bytes: &[u8]) -> Result<(), EmuError> {
        self.mem
            .write_bytes(address, bytes)
            .map_err(|fault| classify(&self.labels, fault, None))
    }
}
