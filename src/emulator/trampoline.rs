//! Trampoline builder
//!
//! A trampoline is a small block of synthesized guest code plus the data cells
//! it uses, built at run time to move control between host and guest.
//!
//! # Two phases
//!
//! 1. **Build**: data cells are reserved with [`Trampoline::dc_l`] /
//!    [`Trampoline::dc_w`] and instructions are appended. Instructions that
//!    refer to a data cell or to a code label record a relocation instead
//!    of an address, because the block has not been placed yet. A label
//!    from [`Trampoline::new_label`] can be jumped to before it is bound.
//! 2. **Realize**: [`Trampoline::realize`] allocates the block (or
//!    [`Trampoline::realize_at`] uses a reserved one), lays out data followed
//!    by code, patches every relocation and writes the bytes to guest memory.
//!
//! After realization the builder is frozen. Only resolved addresses and the
//! host-side data cell accessors remain usable, and those fail with
//! [`EmuError::InvalidTrampolineState`] before it.
//!
//! # Layout
//!
//! ```text
//! base       data cells (padded to a long boundary)
//! base+data  code
//! ```

use super::errors::EmuError;
use super::traps::{TrapAction, TrapTable};
use crate::cpu::asm::{Asm, RegList};
use crate::cpu::Register;
use crate::memory::alloc::Allocation;
use crate::memory::flat::Memory;
use crate::memory::{Address, AddressSpace};

/// Offset of a data cell from the start of the data region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataOffset(u32);

/// Offset of an instruction from the start of the code region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeOffset(u32);

/// A code position that jumps may refer to before [`Trampoline::bind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeLabel(usize);

#[derive(Debug, Clone, Copy)]
enum Target {
    Data(DataOffset),
    Label(CodeLabel),
}

/// An absolute operand waiting for its final address
#[derive(Debug, Clone, Copy)]
struct Reloc {
    operand: u32,
    target: Target,
}

#[derive(Debug, Clone)]
enum State {
    Building,
    Realized {
        base: Address,
        code_base: Address,
        block: Option<Allocation>,
    },
}

/// One-shot builder for a host/guest control transfer block
#[derive(Debug, Clone)]
pub struct Trampoline {
    name: String,
    data: Vec<u8>,
    code: Asm,
    relocs: Vec<Reloc>,
    labels: Vec<Option<u32>>,
    trap: Option<u16>,
    state: State,
}

impl Trampoline {
    pub fn new(name: impl Into<String>) -> Self {
        Trampoline {
            name: name.into(),
            data: Vec::new(),
            code: Asm::new(),
            relocs: Vec::new(),
            labels: Vec::new(),
            trap: None,
            state: State::Building,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_realized(&self) -> bool {
        matches!(self.state, State::Realized { .. })
    }

    fn invalid(&self, message: &str) -> EmuError {
        EmuError::InvalidTrampolineState {
            name: self.name.clone(),
            message: message.to_string(),
        }
    }

    fn building(&self) -> Result<(), EmuError> {
        match self.state {
            State::Building => Ok(()),
            State::Realized { .. } => Err(self.invalid("already realized")),
        }
    }

    // ----- data cells -----

    fn reserve(&mut self, bytes: &[u8], align: usize) -> Result<DataOffset, EmuError> {
        self.building()?;
        while self.data.len() % align != 0 {
            self.data.push(0);
        }
        let offset = DataOffset(self.data.len() as u32);
        self.data.extend_from_slice(bytes);
        Ok(offset)
    }

    /// Reserve a long data cell with initial value `value`
    pub fn dc_l(&mut self, value: u32) -> Result<DataOffset, EmuError> {
        self.reserve(&value.to_be_bytes(), 4)
    }

    /// Reserve a word data cell with initial value `value`
    pub fn dc_w(&mut self, value: u16) -> Result<DataOffset, EmuError> {
        self.reserve(&value.to_be_bytes(), 2)
    }

    fn data_len(&self) -> u32 {
        (self.data.len() as u32 + 3) & !3
    }

    fn check_cell(&self, offset: DataOffset, width: u32) -> Result<(), EmuError> {
        if offset.0 + width > self.data.len() as u32 {
            return Err(self.invalid("data offset outside the data region"));
        }
        Ok(())
    }

    // ----- code -----

    /// Offset the next instruction will be emitted at
    pub fn code_offset(&self) -> CodeOffset {
        CodeOffset(self.code.len())
    }

    /// Create an unbound code label
    pub fn new_label(&mut self) -> Result<CodeLabel, EmuError> {
        self.building()?;
        self.labels.push(None);
        Ok(CodeLabel(self.labels.len() - 1))
    }

    /// Bind `label` to the next instruction
    pub fn bind(&mut self, label: CodeLabel) -> Result<CodeOffset, EmuError> {
        self.building()?;
        let here = self.code.len();
        match self.labels.get(label.0) {
            Some(None) => {
                self.labels[label.0] = Some(here);
                Ok(CodeOffset(here))
            }
            Some(Some(_)) => Err(self.invalid("code label bound twice")),
            None => Err(self.invalid("code label belongs to another trampoline")),
        }
    }

    /// Only D0-D7/A0-A7 can be moved to and from immediates and data cells
    fn check_gpr(&self, reg: Register) -> Result<(), EmuError> {
        match reg.number() {
            Some(_) => Ok(()),
            None => Err(self.invalid(&format!("{} is not a general purpose register", reg))),
        }
    }

    fn relocate(&mut self, operand: u32, target: Target) {
        self.relocs.push(Reloc { operand, target });
    }

    /// Push every general purpose register except D0 and the stack pointer
    pub fn save_all_but_d0(&mut self) -> Result<(), EmuError> {
        self.building()?;
        self.code.movem_save(RegList::all_but(Register::D0));
        Ok(())
    }

    /// Pop the registers pushed by [`Trampoline::save_all_but_d0`]
    pub fn restore_all_but_d0(&mut self) -> Result<(), EmuError> {
        self.building()?;
        self.code.movem_restore(RegList::all_but(Register::D0));
        Ok(())
    }

    /// Push D0-D7/A0-A6
    pub fn save_all(&mut self) -> Result<(), EmuError> {
        self.building()?;
        self.code.movem_save(RegList::ALL);
        Ok(())
    }

    pub fn restore_all(&mut self) -> Result<(), EmuError> {
        self.building()?;
        self.code.movem_restore(RegList::ALL);
        Ok(())
    }

    /// Load a constant long into `reg`
    pub fn set_reg_l(&mut self, reg: Register, value: u32) -> Result<(), EmuError> {
        self.building()?;
        self.check_gpr(reg)?;
        self.code.move_l_imm(reg, value);
        Ok(())
    }

    /// Store `reg` into the data cell at `offset`
    pub fn write_reg_l(&mut self, reg: Register, offset: DataOffset) -> Result<(), EmuError> {
        self.building()?;
        self.check_gpr(reg)?;
        self.check_cell(offset, 4)?;
        let operand = self.code.move_l_to_abs(reg, 0);
        self.relocate(operand, Target::Data(offset));
        Ok(())
    }

    /// Load `reg` from the data cell at `offset`
    pub fn read_reg_l(&mut self, reg: Register, offset: DataOffset) -> Result<(), EmuError> {
        self.building()?;
        self.check_gpr(reg)?;
        self.check_cell(offset, 4)?;
        let operand = self.code.move_l_from_abs(reg, 0);
        self.relocate(operand, Target::Data(offset));
        Ok(())
    }

    /// Unconditional jump to an absolute guest address
    pub fn jmp(&mut self, addr: Address) -> Result<(), EmuError> {
        self.building()?;
        self.code.jmp(addr);
        Ok(())
    }

    /// Jump to a label inside this trampoline, bound before or after the jump
    pub fn jmp_local(&mut self, target: CodeLabel) -> Result<(), EmuError> {
        self.building()?;
        if target.0 >= self.labels.len() {
            return Err(self.invalid("code label belongs to another trampoline"));
        }
        let operand = self.code.jmp(0);
        self.relocate(operand, Target::Label(target));
        Ok(())
    }

    pub fn jsr(&mut self, addr: Address) -> Result<(), EmuError> {
        self.building()?;
        self.code.jsr(addr);
        Ok(())
    }

    pub fn rts(&mut self) -> Result<(), EmuError> {
        self.building()?;
        self.code.rts();
        Ok(())
    }

    /// Emit a trap bound to `action` that returns with an `RTS` once the host
    /// is done. The trap id stays registered until [`Trampoline::release`].
    pub fn final_rts(&mut self, traps: &mut TrapTable, action: TrapAction) -> Result<u16, EmuError> {
        self.building()?;
        if self.trap.is_some() {
            return Err(self.invalid("final trap already emitted"));
        }
        let id = traps.register(action, true)?;
        self.code.aline(id);
        self.trap = Some(id);
        Ok(id)
    }

    pub fn trap_id(&self) -> Option<u16> {
        self.trap
    }

    // ----- realization -----

    /// Bytes needed to realize the trampoline
    pub fn size(&self) -> u32 {
        self.data_len() + self.code.len()
    }

    /// Allocate a labeled block of exactly [`Trampoline::size`] bytes and
    /// realize into it. The trampoline owns the block.
    pub fn realize(&mut self, space: &mut AddressSpace) -> Result<Address, EmuError> {
        self.building()?;
        let block = space.alloc_labeled(&self.name, self.size())?;
        let base = block.address();
        if let Err(e) = self.realize_at(&mut space.mem, base, block.size()) {
            space.free_labeled(&block)?;
            return Err(e);
        }
        if let State::Realized { block: owned, .. } = &mut self.state {
            *owned = Some(block);
        }
        Ok(base)
    }

    /// Realize into `reserved` bytes at `base`, which the caller owns
    pub fn realize_at(&mut self, mem: &mut Memory, base: Address, reserved: u32) -> Result<(), EmuError> {
        self.building()?;
        let needed = self.size();
        if needed > reserved {
            return Err(EmuError::LayoutOverflow {
                name: self.name.clone(),
                needed,
                reserved,
            });
        }

        let code_base = base + self.data_len();
        let mut patches = Vec::with_capacity(self.relocs.len());
        for reloc in &self.relocs {
            let addr = match reloc.target {
                Target::Data(DataOffset(off)) => base + off,
                Target::Label(CodeLabel(i)) => match self.labels.get(i).copied().flatten() {
                    Some(off) => code_base + off,
                    None => return Err(self.invalid("jump to an unbound code label")),
                },
            };
            patches.push((reloc.operand, addr));
        }
        for (operand, addr) in patches {
            self.code.patch_long(operand, addr);
        }

        let mut bytes = self.data.clone();
        bytes.resize(self.data_len() as usize, 0);
        bytes.extend(self.code.to_bytes());
        // Reserved space was checked above, so only a block outside RAM fails here
        mem.write_bytes(base, &bytes).map_err(|fault| {
            self.invalid(&format!("block at 0x{:06x} is not in RAM", fault.address))
        })?;

        log::debug!(
            target: "trap",
            "realized trampoline '{}' at 0x{:06x}: data={} code={}",
            self.name,
            base,
            self.data_len(),
            self.code.len()
        );
        self.state = State::Realized {
            base,
            code_base,
            block: None,
        };
        Ok(())
    }

    fn bases(&self) -> Result<(Address, Address), EmuError> {
        match self.state {
            State::Realized {
                base, code_base, ..
            } => Ok((base, code_base)),
            State::Building => Err(self.invalid("not realized yet")),
        }
    }

    /// Address of the first instruction
    pub fn entry(&self) -> Result<Address, EmuError> {
        self.bases().map(|(_, code_base)| code_base)
    }

    /// Absolute address of a code position
    pub fn code_addr(&self, offset: CodeOffset) -> Result<Address, EmuError> {
        let (_, code_base) = self.bases()?;
        if offset.0 > self.code.len() {
            return Err(self.invalid("code offset outside the code region"));
        }
        Ok(code_base + offset.0)
    }

    /// Absolute address of a data cell
    pub fn data_addr(&self, offset: DataOffset) -> Result<Address, EmuError> {
        let (base, _) = self.bases()?;
        self.check_cell(offset, 1)?;
        Ok(base + offset.0)
    }

    /// Host-side write of a long data cell
    pub fn write_data_l(&self, mem: &mut Memory, offset: DataOffset, value: u32) -> Result<(), EmuError> {
        let addr = self.data_addr(offset)?;
        self.check_cell(offset, 4)?;
        mem.w32(addr, value)
            .map_err(|_| self.invalid("data cell is not in RAM"))
    }

    /// Host-side read of a long data cell
    pub fn read_data_l(&self, mem: &Memory, offset: DataOffset) -> Result<u32, EmuError> {
        let addr = self.data_addr(offset)?;
        self.check_cell(offset, 4)?;
        mem.r32(addr).map_err(|_| self.invalid("data cell is not in RAM"))
    }

    /// The block allocated by [`Trampoline::realize`], if any
    pub fn block(&self) -> Option<&Allocation> {
        match &self.state {
            State::Realized { block, .. } => block.as_ref(),
            State::Building => None,
        }
    }

    /// Release the owned block and the final trap id
    pub fn release(&mut self, space: &mut AddressSpace, traps: &mut TrapTable) -> Result<(), EmuError> {
        if let Some(id) = self.trap.take() {
            traps.release(id);
        }
        if let State::Realized { block, .. } = &mut self.state {
            if let Some(block) = block.take() {
                space.free_labeled(&block)?;
            }
        }
        Ok(())
    }
}
