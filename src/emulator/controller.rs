//! Process controller
//!
//! Owns the process stack and implements the launch protocol for nested
//! sub-processes. A sub-process is entered through a trampoline that
//!
//! 1. saves every register but D0 on the caller's stack,
//! 2. loads D0 = argument length, A0 = argument pointer, D2 = stack size
//!    (also found at 4(sp), but C startup code of many programs reads D2),
//! 3. loads the old-dos guard base into A2, A5 and A6,
//! 4. stores the caller's SP in a data cell and switches to the new stack,
//! 5. jumps to the entry point.
//!
//! The address of the code following that jump is written to the new stack's
//! top long, so the sub-process's final `RTS` lands on the guarded return
//! path: restore SP from the data cell, restore the saved registers, and trap
//! into [`ProcessController::stop_sub_process`]. That trap is the only way a
//! sub-process entry leaves the stack.
//!
//! Whenever the top of the stack changes the new current task is reflected to
//! the guest before any further guest instruction runs.

use super::errors::EmuError;
use super::process::{Process, ProcessStack};
use super::trampoline::Trampoline;
use super::traps::{TrapAction, TrapTable};
use crate::cpu::{Cpu, Register};
use crate::memory::flat::Memory;
use crate::memory::{Address, AddressSpace};

/// Guest-visible "current task" state maintained by the exec emulation
pub trait TaskReflector {
    /// Publish `process` (or no process) as the running task
    fn set_this_task(&mut self, mem: &mut Memory, process: Option<&Process>) -> Result<(), EmuError>;
}

/// A single guest long holding the task record address of the current process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThisTask {
    pub cell: Address,
}

impl TaskReflector for ThisTask {
    fn set_this_task(&mut self, mem: &mut Memory, process: Option<&Process>) -> Result<(), EmuError> {
        let task = process.map(Process::task_addr).unwrap_or(0);
        mem.w32(self.cell, task)
            .map_err(|fault| EmuError::UnclassifiedFault {
                address: fault.address,
                width: fault.width,
                write: true,
                pc: None,
            })
    }
}

/// Everything the controller touches outside its own state
pub struct Host<'a> {
    pub cpu: &'a mut dyn Cpu,
    pub space: &'a mut AddressSpace,
    pub traps: &'a mut TrapTable,
    pub tasks: &'a mut dyn TaskReflector,
}

/// Result of a finished sub-process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubProcessExit {
    pub name: String,
    pub return_code: u32,
    /// Processes left on the stack afterwards
    pub depth: usize,
}

#[derive(Debug, Clone, Default)]
enum ControllerState {
    #[default]
    Idle,
    Running(ProcessStack),
}

/// The process controller
#[derive(Debug, Clone)]
pub struct ProcessController {
    state: ControllerState,
    dos_guard_base: Address,
}

impl ProcessController {
    /// `dos_guard_base` is loaded into A2/A5/A6 of every launched sub-process
    pub fn new(dos_guard_base: Address) -> Self {
        ProcessController {
            state: ControllerState::Idle,
            dos_guard_base,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, ControllerState::Idle)
    }

    pub fn dos_guard_base(&self) -> Address {
        self.dos_guard_base
    }

    /// The process stack; empty while idle
    pub fn stack(&self) -> &[Process] {
        match &self.state {
            ControllerState::Idle => &[],
            ControllerState::Running(stack) => stack.entries(),
        }
    }

    pub fn current(&self) -> Option<&Process> {
        self.stack().last()
    }

    pub fn depth(&self) -> usize {
        self.stack().len()
    }

    fn running(&mut self) -> Result<&mut ProcessStack, EmuError> {
        match &mut self.state {
            ControllerState::Idle => Err(EmuError::NoMainProcess),
            ControllerState::Running(stack) => Ok(stack),
        }
    }

    /// Install the main process. Only valid while idle; otherwise the
    /// process is freed and the current stack is left alone.
    pub fn set_main_process(&mut self, process: Process, host: &mut Host<'_>) -> Result<(), EmuError> {
        if !self.is_idle() {
            process.free(host.space, host.traps)?;
            return Err(EmuError::AlreadyInitialized);
        }
        log::info!(target: "proc", "set main process: {}", process);
        if let Err(e) = host.tasks.set_this_task(&mut host.space.mem, Some(&process)) {
            process.free(host.space, host.traps)?;
            return Err(e);
        }
        let mut stack = ProcessStack::new();
        stack.push(process);
        self.state = ControllerState::Running(stack);
        Ok(())
    }

    /// Launch `process` on top of the current one. Execution continues at the
    /// launch trampoline the next time the CPU runs; this call does not wait
    /// for the sub-process. On failure the process is freed.
    ///
    /// Returns the guarded return address placed on the new stack.
    pub fn start_sub_process(&mut self, mut process: Process, host: &mut Host<'_>) -> Result<Address, EmuError> {
        if self.is_idle() {
            process.free(host.space, host.traps)?;
            return Err(EmuError::NoMainProcess);
        }
        log::info!(target: "proc", "start sub process: {}", process);

        let mut trampoline = Trampoline::new(format!("{}_launch", process.name));
        let launched = self.build_launch(&mut trampoline, &process, host);
        let (entry, return_addr) = match launched {
            Ok(addrs) => addrs,
            Err(e) => {
                trampoline.release(host.space, host.traps)?;
                process.free(host.space, host.traps)?;
                return Err(e);
            }
        };
        log::debug!(
            target: "proc",
            "new_stack=0x{:06x} return_addr=0x{:06x}",
            process.initial_stack_pointer,
            return_addr
        );
        process.attach_launch(trampoline);

        let stack = self.running()?;
        stack.push(process);
        host.tasks.set_this_task(&mut host.space.mem, stack.current())?;
        host.cpu.set_pc(entry);
        Ok(return_addr)
    }

    fn build_launch(
        &self,
        tr: &mut Trampoline,
        process: &Process,
        host: &mut Host<'_>,
    ) -> Result<(Address, Address), EmuError> {
        let old_stack = tr.dc_l(0)?;

        tr.save_all_but_d0()?;
        tr.set_reg_l(Register::D0, process.argument_length)?;
        tr.set_reg_l(Register::A0, process.argument_pointer)?;
        tr.set_reg_l(Register::D2, process.stack_size)?;
        for reg in [Register::A2, Register::A5, Register::A6] {
            tr.set_reg_l(reg, self.dos_guard_base)?;
        }
        tr.write_reg_l(Register::SP, old_stack)?;
        tr.set_reg_l(Register::SP, process.initial_stack_pointer)?;
        tr.jmp(process.entry_point)?;

        let return_off = tr.code_offset();
        tr.read_reg_l(Register::SP, old_stack)?;
        tr.restore_all_but_d0()?;
        tr.final_rts(host.traps, TrapAction::StopSubProcess)?;

        tr.realize(host.space)?;
        let return_addr = tr.code_addr(return_off)?;
        host.space.w32(process.initial_stack_pointer, return_addr)?;
        Ok((tr.entry()?, return_addr))
    }

    /// Guarded return of the topmost sub-process: pop it, reflect the new
    /// current task and release the popped process. The popped process is
    /// released even when the reflection fails.
    pub fn stop_sub_process(&mut self, host: &mut Host<'_>) -> Result<SubProcessExit, EmuError> {
        let depth = self.depth();
        if depth <= 1 {
            return Err(EmuError::StackUnderflow { depth });
        }
        let return_code = host.cpu.reg(Register::D0);

        let stack = self.running()?;
        let Some(process) = stack.pop() else {
            return Err(EmuError::StackUnderflow { depth });
        };
        let reflected = host.tasks.set_this_task(&mut host.space.mem, stack.current());
        let depth = stack.depth();

        log::info!(
            target: "proc",
            "stop sub process: {} ret_code={}",
            process.name,
            return_code as i32
        );
        let name = process.name.clone();
        process.free(host.space, host.traps)?;
        reflected?;
        Ok(SubProcessExit {
            name,
            return_code,
            depth,
        })
    }

    /// Teardown: free the main process if it is the only entry left. With
    /// sub-processes still active nothing is popped; their blocks show up as
    /// orphans.
    pub fn release_main(&mut self, host: &mut Host<'_>) -> Result<bool, EmuError> {
        match self.depth() {
            0 => Ok(false),
            1 => {
                let stack = std::mem::take(&mut self.state);
                if let ControllerState::Running(mut stack) = stack {
                    if let Some(main) = stack.pop() {
                        log::info!(target: "proc", "release main process: {}", main.name);
                        host.tasks.set_this_task(&mut host.space.mem, None)?;
                        main.free(host.space, host.traps)?;
                    }
                }
                Ok(true)
            }
            depth => {
                log::warn!(
                    target: "proc",
                    "{} sub process(es) still active at teardown",
                    depth - 1
                );
                Ok(false)
            }
        }
    }
}
