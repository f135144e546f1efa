//! CPU execution primitive
//!
//! The host never decodes guest code itself; it talks to a CPU through the
//! [`Cpu`] trait:
//! - register read/write by [`Register`]
//! - [`Cpu::run_until_trap`], which executes until an A-line trap, a fault,
//!   or the step budget runs out
//!
//! [`asm`] encodes the handful of 68000 instructions the host synthesizes, and
//! [`subset`] is a CPU that executes exactly that subset. It backs the tests
//! and the demo scenario; a full emulator core plugs in through the same trait.

pub mod asm;
pub mod subset;

use crate::memory::flat::{MemFault, Memory};
use crate::memory::Address;
use std::fmt;

/// Guest CPU registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    D0,
    D1,
    D2,
    D3,
    D4,
    D5,
    D6,
    D7,
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    Pc,
}

impl Register {
    /// The stack pointer is address register 7
    pub const SP: Register = Register::A7;

    pub const DATA: [Register; 8] = [
        Register::D0,
        Register::D1,
        Register::D2,
        Register::D3,
        Register::D4,
        Register::D5,
        Register::D6,
        Register::D7,
    ];

    pub const ADDRESS: [Register; 8] = [
        Register::A0,
        Register::A1,
        Register::A2,
        Register::A3,
        Register::A4,
        Register::A5,
        Register::A6,
        Register::A7,
    ];

    /// Index in the D0..D7, A0..A7 order used by MOVEM masks; `None` for PC
    pub fn gpr_index(self) -> Option<usize> {
        match self {
            Register::Pc => None,
            reg => Some(reg as usize),
        }
    }

    /// Register number within its bank (0..7); `None` for PC
    pub fn number(self) -> Option<u16> {
        self.gpr_index().map(|i| (i % 8) as u16)
    }

    pub fn is_data(self) -> bool {
        matches!(self.gpr_index(), Some(0..=7))
    }

    pub fn is_address(self) -> bool {
        matches!(self.gpr_index(), Some(8..=15))
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gpr_index() {
            Some(i) if i < 8 => write!(f, "d{}", i),
            Some(i) => write!(f, "a{}", i - 8),
            None => write!(f, "pc"),
        }
    }
}

/// Why [`Cpu::run_until_trap`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// An A-line trap executed. `pc` is the trap opcode's address; the PC
    /// register already points past it.
    Trap { id: u16, pc: Address },
    /// The step budget ran out
    Budget,
}

/// Execution failures reported by the CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuFault {
    Memory { fault: MemFault, pc: Address },
    Illegal { opcode: u16, pc: Address },
}

/// The CPU execution primitive consumed by the emulator host
pub trait Cpu {
    fn reg(&self, reg: Register) -> u32;

    fn set_reg(&mut self, reg: Register, value: u32);

    /// Execute until a trap fires, a fault occurs, or `max_steps` instructions ran
    fn run_until_trap(&mut self, mem: &mut Memory, max_steps: u64) -> Result<Stop, CpuFault>;

    fn pc(&self) -> Address {
        self.reg(Register::Pc)
    }

    fn set_pc(&mut self, pc: Address) {
        self.set_reg(Register::Pc, pc);
    }

    /// All general purpose registers in D0..D7, A0..A7 order
    fn gprs(&self) -> [u32; 16] {
        let mut out = [0; 16];
        for (slot, reg) in out
            .iter_mut()
            .zip(Register::DATA.iter().chain(Register::ADDRESS.iter()))
        {
            *slot = self.reg(*reg);
        }
        out
    }
}
