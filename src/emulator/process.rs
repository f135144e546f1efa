//! Guest processes and the process stack
//!
//! This module provides:
//! - [`Process`]: one guest execution context with its own stack and argument
//!   buffer, carved out of a single labeled allocation
//! - [`ProcessStack`]: the LIFO of active processes, main process at the bottom
//!
//! # Block layout
//!
//! ```text
//! +0               task record: stack lower, stack upper, stack size, arg ptr
//! +16              arguments, '\n', NUL (padded to a long)
//! stack lower      ...
//! initial sp       return address (written when the process is launched)
//! initial sp + 4   stack size
//! stack upper
//! ```

use super::constants::{INITIAL_FRAME_SIZE, MIN_STACK_SIZE, TASK_RECORD_SIZE};
use super::errors::EmuError;
use super::trampoline::Trampoline;
use super::traps::TrapTable;
use crate::memory::alloc::Allocation;
use crate::memory::flat::align_up;
use crate::memory::{Address, AddressSpace};
use std::fmt;

/// A guest process
#[derive(Debug, Clone)]
pub struct Process {
    pub name: String,
    pub argument_length: u32,
    pub argument_pointer: Address,
    pub stack_size: u32,
    pub initial_stack_pointer: Address,
    pub entry_point: Address,
    stack_lower: Address,
    block: Allocation,
    /// Launch trampoline of a sub-process, released together with the process
    launch: Option<Trampoline>,
}

impl Process {
    /// Allocate and initialize a process block
    pub fn new(
        space: &mut AddressSpace,
        name: &str,
        entry_point: Address,
        stack_size: u32,
        args: &[u8],
    ) -> Result<Self, EmuError> {
        let (stack_size, argument_length, arg_space, total) =
            block_layout(stack_size, args.len()).ok_or_else(|| EmuError::OutOfMemory {
                requested: u32::MAX,
                largest_free: space.alloc.largest_free(),
            })?;

        let block = space.alloc_labeled(name, total)?;
        let task = block.address();
        let argument_pointer = task + TASK_RECORD_SIZE;
        let stack_lower = argument_pointer + arg_space;
        let stack_upper = stack_lower + stack_size;
        let initial_stack_pointer = stack_upper - INITIAL_FRAME_SIZE;

        let mut arg_bytes = Vec::with_capacity(arg_space as usize);
        arg_bytes.extend_from_slice(args);
        arg_bytes.push(b'\n');
        arg_bytes.resize(arg_space as usize, 0);

        let init = (|| -> Result<(), EmuError> {
            space.w32(task, stack_lower)?;
            space.w32(task + 4, stack_upper)?;
            space.w32(task + 8, stack_size)?;
            space.w32(task + 12, argument_pointer)?;
            space.write_bytes(argument_pointer, &arg_bytes)?;
            space.w32(initial_stack_pointer, 0)?;
            space.w32(initial_stack_pointer + 4, stack_size)
        })();
        if let Err(e) = init {
            space.free_labeled(&block)?;
            return Err(e);
        }

        Ok(Process {
            name: name.to_string(),
            argument_length,
            argument_pointer,
            stack_size,
            initial_stack_pointer,
            entry_point,
            stack_lower,
            block,
            launch: None,
        })
    }

    /// Guest address of the task record, reflected as the current task
    pub fn task_addr(&self) -> Address {
        self.block.address()
    }

    pub fn stack_lower(&self) -> Address {
        self.stack_lower
    }

    pub fn stack_upper(&self) -> Address {
        self.stack_lower + self.stack_size
    }

    pub fn block(&self) -> &Allocation {
        &self.block
    }

    pub(crate) fn attach_launch(&mut self, trampoline: Trampoline) {
        self.launch = Some(trampoline);
    }

    pub fn launch(&self) -> Option<&Trampoline> {
        self.launch.as_ref()
    }

    /// Release the process block and its launch trampoline, if any
    pub fn free(mut self, space: &mut AddressSpace, traps: &mut TrapTable) -> Result<(), EmuError> {
        if let Some(mut trampoline) = self.launch.take() {
            trampoline.release(space, traps)?;
        }
        space.free_labeled(&self.block)
    }
}

/// Rounded stack size, argument length, argument space and block size, or
/// `None` when the block would not fit the address space
fn block_layout(stack_size: u32, args_len: usize) -> Option<(u32, u32, u32, u32)> {
    let stack_size = align_up(stack_size.max(MIN_STACK_SIZE), 4)?;
    // AmigaDOS hands arguments over newline terminated
    let argument_length = u32::try_from(args_len).ok()?.checked_add(1)?;
    let arg_space = align_up(argument_length.checked_add(1)?, 4)?;
    let total = TASK_RECORD_SIZE
        .checked_add(arg_space)?
        .checked_add(stack_size)?;
    Some((stack_size, argument_length, arg_space, total))
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Process('{}', entry=0x{:06x}, stack=0x{:06x}-0x{:06x}, sp=0x{:06x}, args={}@0x{:06x})",
            self.name,
            self.entry_point,
            self.stack_lower,
            self.stack_upper(),
            self.initial_stack_pointer,
            self.argument_length,
            self.argument_pointer
        )
    }
}

/// The stack of active processes
#[derive(Debug, Clone, Default)]
pub struct ProcessStack {
    entries: Vec<Process>,
}

impl ProcessStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, process: Process) {
        self.entries.push(process);
    }

    pub fn pop(&mut self) -> Option<Process> {
        self.entries.pop()
    }

    /// The running process (top of stack)
    pub fn current(&self) -> Option<&Process> {
        self.entries.last()
    }

    /// The main process (bottom of stack)
    pub fn main(&self) -> Option<&Process> {
        self.entries.first()
    }

    /// All entries, main process first
    pub fn entries(&self) -> &[Process] {
        &self.entries
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
