// Run driver for the emulator host

use super::attribution::ErrorTracker;
use super::config::EmuConfig;
use super::constants::{ALLOC_BASE, DOS_GUARD_SIZE, ZERO_PAGE_SIZE};
use super::controller::{Host, ProcessController, SubProcessExit, ThisTask};
use super::errors::EmuError;
use super::process::Process;
use super::traps::{TrapAction, TrapTable};
use crate::cpu::asm::Asm;
use crate::cpu::{Cpu, CpuFault, Register, Stop};
use crate::memory::alloc::Allocation;
use crate::memory::label::LabelRange;
use crate::memory::{Address, AddressSpace};
use crate::snapshot::{LogBuffer, Snapshot, SnapshotManager};

/// How a call to [`Emulator::run`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The main process returned; D0 holds its exit code
    Exited(u32),
    /// A [`TrapAction::Host`] trap fired
    HostCall(u16),
    /// The CPU used up its step budget without reaching a trap
    BudgetExhausted,
}

/// One emulated machine: CPU, address space, traps and the process controller
pub struct Emulator<C: Cpu> {
    cpu: C,
    space: AddressSpace,
    traps: TrapTable,
    controller: ProcessController,
    this_task: ThisTask,
    tracker: ErrorTracker,
    config: EmuConfig,

    /// Code block holding the A-line trap main processes return into
    exit_stub: Allocation,
    exit_trap: u16,
    this_task_block: Allocation,

    snapshots: SnapshotManager,
    log: Option<LogBuffer>,
    exits: Vec<SubProcessExit>,
}

impl<C: Cpu> Emulator<C> {
    /// Set up memory, labels, the old-dos guard, the exit stub and the
    /// current task cell
    pub fn new(cpu: C, config: EmuConfig) -> Result<Self, EmuError> {
        let ram_size = config.ram_size();
        let mut space = AddressSpace::new(ram_size, ALLOC_BASE);
        let mut traps = TrapTable::new();
        log::info!(
            target: "mem_init",
            "ram size: {} KiB, allocator: 0x{:06x}-0x{:06x}",
            config.ram_size_kib,
            space.alloc.base(),
            space.alloc.end()
        );

        if let Some(zero_page) = LabelRange::new("zero_page", 0, ZERO_PAGE_SIZE) {
            space.labels.add(zero_page);
        }

        // Guard range for tracking invalid old DOS accesses
        let dos_guard_base = space.mem.reserve_special_range(DOS_GUARD_SIZE);
        if let Some(guard) = LabelRange::new("old_dos", dos_guard_base, DOS_GUARD_SIZE) {
            log::info!(target: "mem_init", "{}", guard);
            space.labels.add(guard);
        }

        let exit_trap = traps.register(TrapAction::ExitMain, false)?;
        let mut stub = Asm::new();
        stub.aline(exit_trap);
        let exit_stub = space.alloc_labeled("exit_stub", stub.len())?;
        space.write_bytes(exit_stub.address(), &stub.to_bytes())?;

        let this_task_block = space.alloc_labeled("this_task", 4)?;
        let this_task = ThisTask {
            cell: this_task_block.address(),
        };

        let snapshots = SnapshotManager::new(config.snapshot_limit);
        let mut emu = Emulator {
            cpu,
            space,
            traps,
            controller: ProcessController::new(dos_guard_base),
            this_task,
            tracker: ErrorTracker::new(),
            config,
            exit_stub,
            exit_trap,
            this_task_block,
            snapshots,
            log: None,
            exits: Vec::new(),
        };
        emu.snapshot("init".to_string());
        Ok(emu)
    }

    /// Record the position of `log` in every later snapshot
    pub fn attach_log(&mut self, log: LogBuffer) {
        self.log = Some(log);
    }

    fn host(&mut self) -> (&mut ProcessController, Host<'_>) {
        (
            &mut self.controller,
            Host {
                cpu: &mut self.cpu,
                space: &mut self.space,
                traps: &mut self.traps,
                tasks: &mut self.this_task,
            },
        )
    }

    fn snapshot(&mut self, event: String) {
        self.record_snapshot(event, false);
    }

    fn record_snapshot(&mut self, event: String, is_error: bool) {
        let log_end = self.log.as_ref().map(LogBuffer::len).unwrap_or(0);
        let mut snapshot = Snapshot::capture(
            event,
            &self.controller,
            &self.space,
            &self.cpu,
            &self.traps,
            log_end,
        );
        snapshot.is_error = is_error;
        if self.snapshots.push(snapshot).is_err() && self.snapshots.dropped() == 1 {
            log::warn!("snapshot limit reached, history truncated");
        }
    }

    fn error_snapshot(&mut self, error: &EmuError) {
        self.record_snapshot(format!("error: {}", error), true);
    }

    // ----- accessors -----

    pub fn cpu(&self) -> &C {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut C {
        &mut self.cpu
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn space_mut(&mut self) -> &mut AddressSpace {
        &mut self.space
    }

    pub fn traps(&self) -> &TrapTable {
        &self.traps
    }

    pub fn controller(&self) -> &ProcessController {
        &self.controller
    }

    pub fn tracker(&self) -> &ErrorTracker {
        &self.tracker
    }

    pub fn config(&self) -> &EmuConfig {
        &self.config
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    /// Hand the snapshot history to the inspector
    pub fn into_snapshots(self) -> SnapshotManager {
        self.snapshots
    }

    pub fn dos_guard_base(&self) -> Address {
        self.controller.dos_guard_base()
    }

    /// Address of the guest long holding the current task
    pub fn this_task_cell(&self) -> Address {
        self.this_task.cell
    }

    pub fn exit_stub(&self) -> Address {
        self.exit_stub.address()
    }

    /// Every sub-process that finished so far, oldest first
    pub fn exits(&self) -> &[SubProcessExit] {
        &self.exits
    }

    // ----- setup -----

    /// Copy assembled code into a fresh labeled block
    pub fn load_code(&mut self, name: &str, code: &Asm) -> Result<Allocation, EmuError> {
        let block = self.space.alloc_labeled(name, code.len())?;
        self.space.write_bytes(block.address(), &code.to_bytes())?;
        Ok(block)
    }

    /// Register a trap that hands control back to the caller of [`Emulator::run`]
    pub fn register_host_trap(&mut self, tag: u16, auto_rts: bool) -> Result<u16, EmuError> {
        self.traps.register(TrapAction::Host(tag), auto_rts)
    }

    /// Create a process; `stack_size` falls back to the configured default
    pub fn create_process(
        &mut self,
        name: &str,
        entry_point: Address,
        stack_size: Option<u32>,
        args: &[u8],
    ) -> Result<Process, EmuError> {
        let stack_size = stack_size.unwrap_or(self.config.stack_size);
        Process::new(&mut self.space, name, entry_point, stack_size, args)
    }

    // ----- process control -----

    /// Make `process` the main process and point the CPU at its entry. The
    /// main process returns into the exit stub.
    pub fn launch_main(&mut self, process: Process) -> Result<(), EmuError> {
        let sp = process.initial_stack_pointer;
        let entry = process.entry_point;
        let regs = [
            (Register::D0, process.argument_length),
            (Register::A0, process.argument_pointer),
            (Register::D2, process.stack_size),
        ];
        let name = process.name.clone();

        let (controller, mut host) = self.host();
        controller.set_main_process(process, &mut host)?;

        let exit = self.exit_stub.address();
        self.space.w32(sp, exit)?;
        let guard = self.controller.dos_guard_base();
        for (reg, value) in regs {
            self.cpu.set_reg(reg, value);
        }
        for reg in [Register::A2, Register::A5, Register::A6] {
            self.cpu.set_reg(reg, guard);
        }
        self.cpu.set_reg(Register::SP, sp);
        self.cpu.set_pc(entry);
        self.snapshot(format!("launch main '{}'", name));
        Ok(())
    }

    /// Launch a sub-process on top of the current one. Typically called while
    /// handling a [`RunOutcome::HostCall`] from a trap registered without
    /// auto-rts, so the guest's return address stays on its stack.
    pub fn start_sub_process(&mut self, process: Process) -> Result<Address, EmuError> {
        let name = process.name.clone();
        let (controller, mut host) = self.host();
        let return_addr = controller.start_sub_process(process, &mut host)?;
        self.snapshot(format!("start sub process '{}'", name));
        Ok(return_addr)
    }

    /// Finish a host call without redirecting the guest: pop the return
    /// address and continue after the calling `JSR`
    pub fn return_from_host_call(&mut self) -> Result<(), EmuError> {
        self.rts()
    }

    fn rts(&mut self) -> Result<(), EmuError> {
        let sp = self.cpu.reg(Register::SP);
        let ret = self.space.r32(sp)?;
        self.cpu.set_reg(Register::SP, sp.wrapping_add(4));
        self.cpu.set_pc(ret);
        Ok(())
    }

    // ----- execution -----

    /// Run the guest until it exits, calls the host, or a fault ends the run
    pub fn run(&mut self) -> Result<RunOutcome, EmuError> {
        loop {
            let stop = self
                .cpu
                .run_until_trap(&mut self.space.mem, self.config.max_steps);
            let (id, pc) = match stop {
                Ok(Stop::Trap { id, pc }) => (id, pc),
                Ok(Stop::Budget) => {
                    log::warn!(
                        "step budget of {} exhausted at pc=0x{:06x}",
                        self.config.max_steps,
                        self.cpu.pc()
                    );
                    return Ok(RunOutcome::BudgetExhausted);
                }
                Err(CpuFault::Memory { fault, pc }) => {
                    let error = self.tracker.attribute(&self.space.labels, fault, pc);
                    self.error_snapshot(&error);
                    return Err(error);
                }
                Err(CpuFault::Illegal { opcode, pc }) => {
                    return Err(self.fail(EmuError::IllegalInstruction { opcode, pc }));
                }
            };

            let Some(&entry) = self.traps.get(id) else {
                return Err(self.fail(EmuError::UnknownTrap { id, pc }));
            };
            log::trace!(target: "trap", "trap 0x{:03x} at pc=0x{:06x}: {:?}", id, pc, entry.action);

            match entry.action {
                TrapAction::StopSubProcess => {
                    let (controller, mut host) = self.host();
                    match controller.stop_sub_process(&mut host) {
                        Ok(exit) => {
                            self.snapshot(format!(
                                "stop sub process '{}' -> {}",
                                exit.name, exit.return_code as i32
                            ));
                            self.exits.push(exit);
                        }
                        Err(e) => return Err(self.fail(e)),
                    }
                }
                TrapAction::ExitMain => {
                    let code = self.cpu.reg(Register::D0);
                    log::info!(target: "proc", "main process exited: ret_code={}", code as i32);
                    self.snapshot(format!("main exit -> {}", code as i32));
                    return Ok(RunOutcome::Exited(code));
                }
                TrapAction::Host(tag) => {
                    if entry.auto_rts {
                        self.rts()?;
                    }
                    return Ok(RunOutcome::HostCall(tag));
                }
            }

            if entry.auto_rts {
                if let Err(e) = self.rts() {
                    return Err(self.fail(e));
                }
            }
        }
    }

    fn fail(&mut self, error: EmuError) -> EmuError {
        if error.is_fatal() {
            log::error!(target: "proc", "fatal: {}", error);
        }
        self.tracker.record(error.clone());
        self.error_snapshot(&error);
        error
    }

    // ----- teardown -----

    /// Release the main process and the setup blocks, then report orphans
    pub fn cleanup(&mut self) -> Result<Vec<Allocation>, EmuError> {
        let (controller, mut host) = self.host();
        controller.release_main(&mut host)?;

        if self.space.alloc.is_live(&self.exit_stub) {
            self.space.free_labeled(&self.exit_stub)?;
            self.traps.release(self.exit_trap);
        }
        if self.space.alloc.is_live(&self.this_task_block) {
            self.space.free_labeled(&self.this_task_block)?;
        }

        let orphans = self.space.alloc.dump_orphans();
        self.snapshot(format!("cleanup: {} orphan(s)", orphans.len()));
        Ok(orphans)
    }
}
