//! Error types for the emulator host
//!
//! This module defines [`EmuError`], covering allocator, trampoline, process
//! controller and memory-fault failures.
//!
//! Only [`EmuError::StackUnderflow`] is fatal: it means the guarded return
//! protocol was violated and the process stack can no longer be trusted.
//! Faults are fatal to the current run but not to the host. Orphaned
//! allocations are never errors; they are reported as warnings at teardown.

use crate::memory::Address;
use thiserror::Error;

/// Errors raised by the emulator core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmuError {
    /// The allocator could not satisfy a request
    #[error("out of memory: requested {requested} bytes, largest free block is {largest_free}")]
    OutOfMemory { requested: u32, largest_free: u32 },

    /// Free of a handle that is not currently live
    #[error("double free or invalid handle at 0x{address:06x}")]
    DoubleFreeOrInvalidHandle { address: Address },

    /// A trampoline did not fit the space reserved for it
    #[error("trampoline '{name}' needs {needed} bytes, only {reserved} reserved")]
    LayoutOverflow {
        name: String,
        needed: u32,
        reserved: u32,
    },

    /// A trampoline operation was used in the wrong build phase
    #[error("trampoline '{name}': {message}")]
    InvalidTrampolineState { name: String, message: String },

    /// `set_main_process` called while a main process is already set
    #[error("main process already set")]
    AlreadyInitialized,

    /// A sub-process launch was requested before a main process was set
    #[error("no main process set")]
    NoMainProcess,

    /// `stop_sub_process` called with no sub-process on the stack
    #[error("process stack underflow at depth {depth}")]
    StackUnderflow { depth: usize },

    /// A memory fault inside a labeled range
    #[error("invalid {} of {width} byte(s) at 0x{address:06x} in '{label}' ({})", access_kind(.write), origin(.pc))]
    AccessFault {
        address: Address,
        width: u8,
        write: bool,
        pc: Option<Address>,
        label: String,
    },

    /// A memory fault at an address no label explains
    #[error("invalid {} of {width} byte(s) at unclassified address 0x{address:06x} ({})", access_kind(.write), origin(.pc))]
    UnclassifiedFault {
        address: Address,
        width: u8,
        write: bool,
        pc: Option<Address>,
    },

    /// Every trap id is in use
    #[error("trap table full")]
    TrapTableFull,

    /// The CPU stopped on a trap id with no registered entry
    #[error("unknown trap 0x{id:03x} at pc=0x{pc:06x}")]
    UnknownTrap { id: u16, pc: Address },

    /// The CPU met an opcode it cannot execute
    #[error("illegal instruction 0x{opcode:04x} at pc=0x{pc:06x}")]
    IllegalInstruction { opcode: u16, pc: Address },
}

fn access_kind(write: &bool) -> &'static str {
    if *write {
        "write"
    } else {
        "read"
    }
}

/// Faults raised by host-side accesses carry no guest PC
fn origin(pc: &Option<Address>) -> String {
    match pc {
        Some(pc) => format!("pc=0x{:06x}", pc),
        None => "host access".to_string(),
    }
}

impl EmuError {
    /// Whether this error must abort the whole emulation run
    pub fn is_fatal(&self) -> bool {
        matches!(self, EmuError::StackUnderflow { .. })
    }

    /// Address associated with this error, if any
    pub fn address(&self) -> Option<Address> {
        match self {
            EmuError::DoubleFreeOrInvalidHandle { address }
            | EmuError::AccessFault { address, .. }
            | EmuError::UnclassifiedFault { address, .. } => Some(*address),
            EmuError::UnknownTrap { pc, .. } | EmuError::IllegalInstruction { pc, .. } => {
                Some(*pc)
            }
            _ => None,
        }
    }
}
