//! Guest memory allocator
//!
//! Hands out byte ranges of the flat memory between the allocation base and
//! the end of RAM. This module provides:
//! - Best-fit allocation over a size-ordered free index (O(log n))
//! - Coalescing of neighbouring free blocks on release
//! - Serial-checked handles, so double free and stale handles are caught
//! - Orphan reporting for blocks still live at teardown
//!
//! Blocks always start on a 4-byte boundary and occupy a multiple of 4 bytes.

use super::Address;
use super::flat::align_up;
use crate::emulator::errors::EmuError;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Minimum alignment and size granularity of every block
pub const MIN_ALIGN: u32 = 4;

/// Handle for a granted range
///
/// Handles are cheap to clone so that callers can keep a copy for diagnostics,
/// but only one `free` per grant ever succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    address: Address,
    size: u32,
    serial: u64,
}

impl Allocation {
    pub fn address(&self) -> Address {
        self.address
    }

    /// Size requested by the caller (the reserved span may be rounded up)
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Exclusive end of the requested span
    pub fn end(&self) -> Address {
        self.address + self.size
    }
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:06x} +{:06x}", self.address, self.size)
    }
}

#[derive(Debug, Clone)]
struct LiveBlock {
    name: String,
    size: u32,
    reserved: u32,
    serial: u64,
}

/// The allocator
#[derive(Debug, Clone)]
pub struct Allocator {
    base: Address,
    end: Address,
    free_by_addr: BTreeMap<Address, u32>,
    free_by_size: BTreeSet<(u32, Address)>,
    live: FxHashMap<Address, LiveBlock>,
    next_serial: u64,
    live_bytes: u32,
}

impl Allocator {
    /// Create an allocator managing `[base, end)`
    pub fn new(base: Address, end: Address) -> Self {
        let base = align_up(base, MIN_ALIGN).unwrap_or(end);
        let end = end & !(MIN_ALIGN - 1);
        let mut alloc = Allocator {
            base,
            end,
            free_by_addr: BTreeMap::new(),
            free_by_size: BTreeSet::new(),
            live: FxHashMap::default(),
            next_serial: 1,
            live_bytes: 0,
        };
        if end > base {
            alloc.insert_free(base, end - base);
        }
        alloc
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn end(&self) -> Address {
        self.end
    }

    /// Allocate `size` bytes aligned to `align` (a power of two)
    ///
    /// A request whose rounded size or alignment does not fit the 32-bit
    /// address space fails with [`EmuError::OutOfMemory`] like any other
    /// request larger than the free space.
    pub fn allocate(&mut self, name: &str, size: u32, align: u32) -> Result<Allocation, EmuError> {
        let Some(align) = align.max(MIN_ALIGN).checked_next_power_of_two() else {
            return Err(self.out_of_memory(size));
        };
        let Some(reserved) = align_up(size.max(1), MIN_ALIGN) else {
            return Err(self.out_of_memory(size));
        };
        // Free blocks are already MIN_ALIGN aligned; a larger alignment may
        // cost up to `align - MIN_ALIGN` bytes of leading padding.
        let Some(search) = reserved.checked_add(align - MIN_ALIGN) else {
            return Err(self.out_of_memory(size));
        };

        let Some(&(block_size, block_addr)) = self.free_by_size.range((search, 0)..).next() else {
            return Err(self.out_of_memory(size));
        };
        // The block holds `search` bytes, so the padded start stays inside it
        let Some(start) = align_up(block_addr, align) else {
            return Err(self.out_of_memory(size));
        };
        self.remove_free(block_addr, block_size);

        let pad = start - block_addr;
        if pad > 0 {
            self.insert_free(block_addr, pad);
        }
        let tail = block_size - pad - reserved;
        if tail > 0 {
            self.insert_free(start + reserved, tail);
        }

        let serial = self.next_serial;
        self.next_serial += 1;
        self.live.insert(
            start,
            LiveBlock {
                name: name.to_string(),
                size,
                reserved,
                serial,
            },
        );
        self.live_bytes += reserved;

        let allocation = Allocation {
            address: start,
            size,
            serial,
        };
        log::debug!(target: "mem_alloc", "alloc {} '{}'", allocation, name);
        Ok(allocation)
    }

    /// Release a live allocation
    pub fn free(&mut self, allocation: &Allocation) -> Result<(), EmuError> {
        let address = allocation.address;
        match self.live.get(&address) {
            Some(block) if block.serial == allocation.serial => {}
            _ => return Err(EmuError::DoubleFreeOrInvalidHandle { address }),
        }
        let Some(block) = self.live.remove(&address) else {
            return Err(EmuError::DoubleFreeOrInvalidHandle { address });
        };
        self.live_bytes -= block.reserved;
        log::debug!(target: "mem_alloc", "free {} '{}'", allocation, block.name);

        let mut start = address;
        let mut size = block.reserved;

        // Merge with the free block directly below
        if let Some((&prev_addr, &prev_size)) = self.free_by_addr.range(..start).next_back() {
            if prev_addr + prev_size == start {
                self.remove_free(prev_addr, prev_size);
                start = prev_addr;
                size += prev_size;
            }
        }
        // Merge with the free block directly above
        if let Some(&next_size) = self.free_by_addr.get(&(start + size)) {
            self.remove_free(start + size, next_size);
            size += next_size;
        }

        self.insert_free(start, size);
        Ok(())
    }

    /// Whether `allocation` is currently live
    pub fn is_live(&self, allocation: &Allocation) -> bool {
        self.live
            .get(&allocation.address)
            .is_some_and(|block| block.serial == allocation.serial)
    }

    /// Diagnostic name of a live allocation
    pub fn name_of(&self, allocation: &Allocation) -> Option<&str> {
        self.live
            .get(&allocation.address)
            .filter(|block| block.serial == allocation.serial)
            .map(|block| block.name.as_str())
    }

    /// All live allocations with their names, sorted by address
    pub fn live_blocks(&self) -> Vec<(Allocation, &str)> {
        let mut blocks: Vec<_> = self
            .live
            .iter()
            .map(|(&address, block)| {
                (
                    Allocation {
                        address,
                        size: block.size,
                        serial: block.serial,
                    },
                    block.name.as_str(),
                )
            })
            .collect();
        blocks.sort_by_key(|(allocation, _)| allocation.address);
        blocks
    }

    /// Report every allocation still live. Nothing is freed.
    pub fn dump_orphans(&self) -> Vec<Allocation> {
        let orphans = self.live_blocks();
        for (allocation, name) in &orphans {
            log::warn!(target: "mem_alloc", "orphan: {} '{}'", allocation, name);
        }
        if !orphans.is_empty() {
            log::warn!(
                target: "mem_alloc",
                "{} orphaned allocation(s), {} bytes",
                orphans.len(),
                self.live_bytes
            );
        }
        orphans.into_iter().map(|(allocation, _)| allocation).collect()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Bytes reserved by live allocations (after rounding)
    pub fn live_bytes(&self) -> u32 {
        self.live_bytes
    }

    pub fn free_bytes(&self) -> u32 {
        self.free_by_addr.values().sum()
    }

    pub fn largest_free(&self) -> u32 {
        self.free_by_size
            .iter()
            .next_back()
            .map(|&(size, _)| size)
            .unwrap_or(0)
    }

    fn out_of_memory(&self, requested: u32) -> EmuError {
        EmuError::OutOfMemory {
            requested,
            largest_free: self.largest_free(),
        }
    }

    fn insert_free(&mut self, address: Address, size: u32) {
        self.free_by_addr.insert(address, size);
        self.free_by_size.insert((size, address));
    }

    fn remove_free(&mut self, address: Address, size: u32) {
        self.free_by_addr.remove(&address);
        self.free_by_size.remove(&(size, address));
    }
}
