// End-to-end tests running guest code through the emulator

use amiexec::cpu::asm::Asm;
use amiexec::cpu::subset::SubsetCpu;
use amiexec::cpu::{Cpu, Register};
use amiexec::emulator::errors::EmuError;
use amiexec::emulator::{EmuConfig, Emulator, RunOutcome};

const SPAWN: u16 = 1;
const PROBE: u16 = 2;
const CHECK: u16 = 3;

fn emulator() -> Emulator<SubsetCpu> {
    let config = EmuConfig {
        ram_size_kib: 256,
        max_steps: 10_000,
        ..EmuConfig::default()
    };
    Emulator::new(SubsetCpu::new(), config).expect("setup")
}

/// Load a one-instruction stub raising the host trap `tag`
fn stub(emu: &mut Emulator<SubsetCpu>, name: &str, tag: u16) -> u32 {
    let id = emu.register_host_trap(tag, false).expect("free id");
    let mut asm = Asm::new();
    asm.aline(id);
    emu.load_code(name, &asm).expect("fits").address()
}

#[test]
fn test_setup_labels_and_cells() {
    let emu = emulator();
    let labels = &emu.space().labels;
    assert_eq!(labels.resolve(4).map(|r| r.name.as_str()), Some("zero_page"));
    assert_eq!(
        labels.resolve(emu.dos_guard_base() + 0x100).map(|r| r.name.as_str()),
        Some("old_dos")
    );
    assert_eq!(
        labels.resolve(emu.exit_stub()).map(|r| r.name.as_str()),
        Some("exit_stub")
    );
    assert!(emu.dos_guard_base() >= 256 * 1024);
    assert_eq!(emu.space().r32(emu.this_task_cell()), Ok(0));
    assert_eq!(emu.snapshots().len(), 1);
}

#[test]
fn test_main_process_exit_code() {
    let mut emu = emulator();
    let mut code = Asm::new();
    code.moveq(Register::D0, 42);
    code.rts();
    let block = emu.load_code("main_code", &code).expect("fits");

    let main = emu.create_process("main", block.address(), None, b"hello").expect("fits");
    let (arg_len, arg_ptr) = (main.argument_length, main.argument_pointer);
    emu.launch_main(main).expect("idle");
    assert_eq!(emu.cpu().reg(Register::D0), arg_len);
    assert_eq!(emu.cpu().reg(Register::A0), arg_ptr);
    assert_eq!(emu.cpu().reg(Register::A6), emu.dos_guard_base());

    assert_eq!(emu.run(), Ok(RunOutcome::Exited(42)));

    emu.space_mut().free_labeled(&block).expect("live");
    let orphans = emu.cleanup().expect("clean");
    assert!(orphans.is_empty());
    assert!(emu.controller().is_idle());
    assert_eq!(emu.space().alloc.live_count(), 0);
}

#[test]
fn test_sub_process_round_trip() {
    let mut emu = emulator();
    let spawn = stub(&mut emu, "spawn_stub", SPAWN);
    let check = stub(&mut emu, "check_stub", CHECK);

    let mut main_code = Asm::new();
    main_code.move_l_imm(Register::D3, 0x1111_2222);
    main_code.move_l_imm(Register::A4, 0x3333);
    main_code.jsr(spawn);
    main_code.jsr(check);
    main_code.moveq(Register::D0, 0);
    main_code.rts();
    let main_block = emu.load_code("main_code", &main_code).expect("fits");

    let probe_id = emu.register_host_trap(PROBE, false).expect("free id");
    let mut child_code = Asm::new();
    child_code.aline(probe_id);
    child_code.move_l_imm(Register::D3, 0xFFFF);
    child_code.move_l_imm(Register::A4, 0);
    child_code.moveq(Register::D0, 5);
    child_code.rts();
    let child_block = emu.load_code("child_code", &child_code).expect("fits");

    let main = emu.create_process("main", main_block.address(), None, b"").expect("fits");
    let (main_sp, main_task) = (main.initial_stack_pointer, main.task_addr());
    emu.launch_main(main).expect("idle");

    assert_eq!(emu.run(), Ok(RunOutcome::HostCall(SPAWN)));
    let live_before = emu.space().alloc.live_count();
    let traps_before = emu.traps().len();
    let child = emu
        .create_process("child", child_block.address(), Some(4096), b"arg")
        .expect("fits");
    let (sp, arg_len, arg_ptr, task) = (
        child.initial_stack_pointer,
        child.argument_length,
        child.argument_pointer,
        child.task_addr(),
    );
    let ret = emu.start_sub_process(child).expect("main is running");

    // Stopped on the first child instruction
    assert_eq!(emu.run(), Ok(RunOutcome::HostCall(PROBE)));
    let cpu = emu.cpu();
    assert_eq!(cpu.reg(Register::SP), sp);
    assert_eq!(cpu.reg(Register::D0), arg_len);
    assert_eq!(cpu.reg(Register::A0), arg_ptr);
    assert_eq!(cpu.reg(Register::D2), 4096);
    for reg in [Register::A2, Register::A5, Register::A6] {
        assert_eq!(cpu.reg(reg), emu.dos_guard_base());
    }
    assert_eq!(emu.space().r32(sp), Ok(ret));
    assert_eq!(emu.space().r32(emu.this_task_cell()), Ok(task));
    assert_eq!(emu.controller().depth(), 2);

    // The child returns through the guarded path back into main
    assert_eq!(emu.run(), Ok(RunOutcome::HostCall(CHECK)));
    let cpu = emu.cpu();
    assert_eq!(cpu.reg(Register::D0), 5);
    assert_eq!(cpu.reg(Register::D3), 0x1111_2222);
    assert_eq!(cpu.reg(Register::A4), 0x3333);
    // Return address of the check call is still on the stack
    assert_eq!(cpu.reg(Register::SP), main_sp - 4);
    assert_eq!(emu.controller().depth(), 1);
    assert_eq!(emu.space().r32(emu.this_task_cell()), Ok(main_task));
    assert_eq!(emu.exits().len(), 1);
    assert_eq!(emu.exits()[0].return_code, 5);
    assert_eq!(emu.space().alloc.live_count(), live_before);
    assert_eq!(emu.traps().len(), traps_before);

    emu.return_from_host_call().expect("stack in ram");
    assert_eq!(emu.run(), Ok(RunOutcome::Exited(0)));
    assert!(!emu.tracker().has_errors());
}

#[test]
fn test_repeated_launches_do_not_leak() {
    let mut emu = emulator();
    let spawn = stub(&mut emu, "spawn_stub", SPAWN);

    let mut main_code = Asm::new();
    for _ in 0..50 {
        main_code.jsr(spawn);
    }
    main_code.rts();
    let main_block = emu.load_code("main_code", &main_code).expect("fits");
    let mut leaf = Asm::new();
    leaf.moveq(Register::D0, 1);
    leaf.rts();
    let leaf_block = emu.load_code("leaf_code", &leaf).expect("fits");

    let main = emu.create_process("main", main_block.address(), None, b"").expect("fits");
    emu.launch_main(main).expect("idle");
    let live = emu.space().alloc.live_count();
    let traps = emu.traps().len();

    let mut launched = 0;
    loop {
        match emu.run().expect("no faults") {
            RunOutcome::HostCall(SPAWN) => {
                let child = emu
                    .create_process("leaf", leaf_block.address(), None, b"")
                    .expect("fits");
                emu.start_sub_process(child).expect("running");
                launched += 1;
            }
            RunOutcome::Exited(_) => break,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(launched, 50);
    assert_eq!(emu.exits().len(), 50);
    assert_eq!(emu.space().alloc.live_count(), live);
    assert_eq!(emu.traps().len(), traps);
}

#[test]
fn test_old_dos_access_is_attributed() {
    let mut emu = emulator();
    let spawn = stub(&mut emu, "spawn_stub", SPAWN);
    let mut main_code = Asm::new();
    main_code.jsr(spawn);
    main_code.rts();
    let main_block = emu.load_code("main_code", &main_code).expect("fits");

    let bad = emu.dos_guard_base() + 0x24;
    let mut child_code = Asm::new();
    child_code.move_l_to_abs(Register::D0, bad);
    child_code.rts();
    let child_block = emu.load_code("child_code", &child_code).expect("fits");

    let main = emu.create_process("main", main_block.address(), None, b"").expect("fits");
    emu.launch_main(main).expect("idle");
    assert_eq!(emu.run(), Ok(RunOutcome::HostCall(SPAWN)));
    let child = emu.create_process("child", child_block.address(), None, b"").expect("fits");
    emu.start_sub_process(child).expect("running");

    match emu.run() {
        Err(EmuError::AccessFault {
            address,
            width,
            write,
            pc,
            label,
        }) => {
            assert_eq!(address, bad);
            assert_eq!(width, 4);
            assert!(write);
            assert_eq!(pc, Some(child_block.address()));
            assert_eq!(label, "old_dos");
        }
        other => panic!("expected AccessFault, got {:?}", other),
    }
    assert_eq!(emu.tracker().errors().len(), 1);
    assert!(emu.snapshots().last().is_some_and(|s| s.is_error));

    // The child never returned: its block and trampoline are orphans
    let orphans = emu.cleanup().expect("teardown");
    assert_eq!(emu.controller().depth(), 2);
    assert!(orphans.iter().any(|a| emu.space().alloc.name_of(a) == Some("child")));
}

#[test]
fn test_unlabeled_fault_is_unclassified() {
    let mut emu = emulator();
    let mut code = Asm::new();
    code.move_l_from_abs(Register::D1, 0x00F0_0000);
    code.rts();
    let block = emu.load_code("main_code", &code).expect("fits");
    let main = emu.create_process("main", block.address(), None, b"").expect("fits");
    emu.launch_main(main).expect("idle");

    match emu.run() {
        Err(EmuError::UnclassifiedFault { address, write, .. }) => {
            assert_eq!(address, 0x00F0_0000);
            assert!(!write);
        }
        other => panic!("expected UnclassifiedFault, got {:?}", other),
    }
}

#[test]
fn test_unknown_trap_and_budget() {
    let mut emu = emulator();
    let mut code = Asm::new();
    code.aline(0x123);
    let block = emu.load_code("main_code", &code).expect("fits");
    let main = emu.create_process("main", block.address(), None, b"").expect("fits");
    emu.launch_main(main).expect("idle");
    assert_eq!(
        emu.run(),
        Err(EmuError::UnknownTrap {
            id: 0x123,
            pc: block.address()
        })
    );

    let mut spin = Asm::new();
    spin.nop();
    spin.jmp(0);
    let at = emu.load_code("spin", &spin).expect("fits").address();
    emu.space_mut().w32(at + 4, at).expect("in ram");
    emu.cpu_mut().set_pc(at);
    assert_eq!(emu.run(), Ok(RunOutcome::BudgetExhausted));
}

#[test]
fn test_second_main_is_rejected() {
    let mut emu = emulator();
    let first = emu.create_process("first", 0x2000, None, b"").expect("fits");
    emu.launch_main(first).expect("idle");
    let second = emu.create_process("second", 0x2000, None, b"").expect("fits");
    assert_eq!(emu.launch_main(second), Err(EmuError::AlreadyInitialized));
    assert_eq!(emu.controller().depth(), 1);
}
