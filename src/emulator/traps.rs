//! Trap table
//!
//! Trap ids are slab keys, encoded into A-line opcodes by the code that
//! installs them. Each entry names the host operation to run instead of
//! holding a callback, so the driver resolves a trap with a lookup.

use super::errors::EmuError;
use crate::cpu::asm::MAX_TRAP_ID;
use slab::Slab;

/// Host operation bound to a trap id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapAction {
    /// Guarded return of a sub-process: pop it and release its resources
    StopSubProcess,
    /// The main process returned; end the run with D0 as exit code
    ExitMain,
    /// Hand control back to the embedding host with a caller-chosen tag
    Host(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapEntry {
    pub action: TrapAction,
    /// Perform an `RTS` after the host operation completes
    pub auto_rts: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TrapTable {
    entries: Slab<TrapEntry>,
}

impl TrapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action, returning its trap id
    pub fn register(&mut self, action: TrapAction, auto_rts: bool) -> Result<u16, EmuError> {
        if self.entries.vacant_key() > MAX_TRAP_ID as usize {
            return Err(EmuError::TrapTableFull);
        }
        let id = self.entries.insert(TrapEntry { action, auto_rts }) as u16;
        log::debug!(target: "trap", "register trap 0x{:03x}: {:?}", id, action);
        Ok(id)
    }

    /// Release a trap id. Returns the entry it held.
    pub fn release(&mut self, id: u16) -> Option<TrapEntry> {
        let entry = self.entries.try_remove(id as usize);
        if entry.is_some() {
            log::debug!(target: "trap", "release trap 0x{:03x}", id);
        }
        entry
    }

    pub fn get(&self, id: u16) -> Option<&TrapEntry> {
        self.entries.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
