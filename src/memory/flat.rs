//! Flat guest memory
//!
//! A single big-endian byte array backs the whole guest address space. Every
//! access is bounds checked; an access outside RAM (including the reserved
//! special ranges above it) yields a [`MemFault`] that the caller hands to
//! error attribution.

use super::Address;

/// Granularity of special ranges placed above RAM
pub const SPECIAL_RANGE_ALIGN: u32 = 0x1_0000;

// Highest aligned special range base; requests past it saturate here
const TOP_SPECIAL: Address = !(SPECIAL_RANGE_ALIGN - 1);

/// A raw access violation, before attribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemFault {
    pub address: Address,
    pub width: u8,
    pub write: bool,
}

/// The flat memory view
#[derive(Debug, Clone)]
pub struct Memory {
    ram: Vec<u8>,
    next_special: Address,
    special: Vec<(Address, u32)>,
}

impl Memory {
    /// Create a zero-filled memory of `ram_size` bytes
    pub fn new(ram_size: u32) -> Self {
        Memory {
            ram: vec![0; ram_size as usize],
            next_special: align_up(ram_size, SPECIAL_RANGE_ALIGN).unwrap_or(TOP_SPECIAL),
            special: Vec::new(),
        }
    }

    pub fn ram_size(&self) -> u32 {
        self.ram.len() as u32
    }

    /// Reserve an unbacked range above RAM. Any access inside it faults.
    pub fn reserve_special_range(&mut self, size: u32) -> Address {
        let base = self.next_special;
        let size = align_up(size.max(1), SPECIAL_RANGE_ALIGN).unwrap_or(TOP_SPECIAL);
        self.special.push((base, size));
        self.next_special = base.wrapping_add(size);
        base
    }

    /// Whether `address` lies in a reserved special range
    pub fn is_special(&self, address: Address) -> bool {
        self.special
            .iter()
            .any(|&(base, size)| address >= base && address - base < size)
    }

    fn check(&self, address: Address, width: u8, write: bool) -> Result<usize, MemFault> {
        let start = address as usize;
        match start.checked_add(width as usize) {
            Some(end) if end <= self.ram.len() => Ok(start),
            _ => Err(MemFault {
                address,
                width,
                write,
            }),
        }
    }

    pub fn r8(&self, address: Address) -> Result<u8, MemFault> {
        let at = self.check(address, 1, false)?;
        Ok(self.ram[at])
    }

    pub fn r16(&self, address: Address) -> Result<u16, MemFault> {
        let at = self.check(address, 2, false)?;
        Ok(u16::from_be_bytes([self.ram[at], self.ram[at + 1]]))
    }

    pub fn r32(&self, address: Address) -> Result<u32, MemFault> {
        let at = self.check(address, 4, false)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.ram[at..at + 4]);
        Ok(u32::from_be_bytes(word))
    }

    pub fn w8(&mut self, address: Address, value: u8) -> Result<(), MemFault> {
        let at = self.check(address, 1, true)?;
        self.ram[at] = value;
        Ok(())
    }

    pub fn w16(&mut self, address: Address, value: u16) -> Result<(), MemFault> {
        let at = self.check(address, 2, true)?;
        self.ram[at..at + 2].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Write a 32-bit big-endian word
    pub fn w32(&mut self, address: Address, value: u32) -> Result<(), MemFault> {
        let at = self.check(address, 4, true)?;
        self.ram[at..at + 4].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Read `size` bytes starting at `address`
    pub fn read_bytes(&self, address: Address, size: u32) -> Result<&[u8], MemFault> {
        let start = address as usize;
        match start.checked_add(size as usize) {
            Some(end) if end <= self.ram.len() => Ok(&self.ram[start..end]),
            _ => Err(MemFault {
                address,
                width: 1,
                write: false,
            }),
        }
    }

    /// Write a byte slice starting at `address`
    pub fn write_bytes(&mut self, address: Address, bytes: &[u8]) -> Result<(), MemFault> {
        let start = address as usize;
        match start.checked_add(bytes.len()) {
            Some(end) if end <= self.ram.len() => {
                self.ram[start..end].copy_from_slice(bytes);
                Ok(())
            }
            _ => Err(MemFault {
                address,
                width: 1,
                write: true,
            }),
        }
    }
}

/// Round `value` up to a multiple of `align` (a power of two); `None` if the
/// result does not fit an address
pub(crate) fn align_up(value: u32, align: u32) -> Option<u32> {
    debug_assert!(align.is_power_of_two());
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}
