// Integration tests for the trampoline builder

use amiexec::cpu::subset::SubsetCpu;
use amiexec::cpu::{Cpu, Register, Stop};
use amiexec::emulator::errors::EmuError;
use amiexec::emulator::trampoline::Trampoline;
use amiexec::emulator::traps::{TrapAction, TrapTable};
use amiexec::memory::AddressSpace;

fn space() -> AddressSpace {
    AddressSpace::new(0x10000, 0x1000)
}

#[test]
fn test_data_cells_resolve_after_realize() {
    let mut space = space();
    let mut tr = Trampoline::new("cells");
    let slot = tr.dc_l(0xDEAD_BEEF).expect("building");
    let flag = tr.dc_w(7).expect("building");
    tr.rts().expect("building");

    assert!(matches!(
        tr.data_addr(slot),
        Err(EmuError::InvalidTrampolineState { .. })
    ));
    assert!(matches!(tr.entry(), Err(EmuError::InvalidTrampolineState { .. })));

    let base = tr.realize(&mut space).expect("fits");
    assert!(tr.is_realized());
    assert_eq!(tr.data_addr(slot).expect("realized"), base);
    assert_eq!(tr.data_addr(flag).expect("realized"), base + 4);
    // 6 bytes of data padded to 8, code follows
    assert_eq!(tr.entry().expect("realized"), base + 8);
    assert_eq!(tr.size(), 10);

    assert_eq!(tr.read_data_l(&space.mem, slot).expect("in ram"), 0xDEAD_BEEF);
    tr.write_data_l(&mut space.mem, slot, 0x1234_5678).expect("in ram");
    assert_eq!(space.mem.r32(base).expect("in ram"), 0x1234_5678);
    assert_eq!(space.mem.r16(base + 4).expect("in ram"), 7);
}

#[test]
fn test_realized_trampoline_is_frozen() {
    let mut space = space();
    let mut tr = Trampoline::new("frozen");
    tr.rts().expect("building");
    tr.realize(&mut space).expect("fits");

    assert!(matches!(
        tr.realize(&mut space),
        Err(EmuError::InvalidTrampolineState { .. })
    ));
    assert!(tr.rts().is_err());
    assert!(tr.dc_l(0).is_err());
    assert_eq!(space.alloc.live_count(), 1);
}

#[test]
fn test_realize_at_checks_reserved_space() {
    let mut space = space();
    let mut tr = Trampoline::new("tight");
    tr.dc_l(0).expect("building");
    tr.set_reg_l(Register::D0, 1).expect("building");
    tr.rts().expect("building");

    assert_eq!(
        tr.realize_at(&mut space.mem, 0x2000, 8),
        Err(EmuError::LayoutOverflow {
            name: "tight".to_string(),
            needed: 4 + 6 + 2,
            reserved: 8,
        })
    );
    assert!(!tr.is_realized());
    tr.realize_at(&mut space.mem, 0x2000, 0x100).expect("fits");
    assert_eq!(tr.entry().expect("realized"), 0x2004);
    assert!(tr.block().is_none());
}

#[test]
fn test_relocated_cells_and_forward_jumps_execute() {
    let mut space = space();
    let mut traps = TrapTable::new();
    let mut tr = Trampoline::new("reloc");
    let slot = tr.dc_l(0).expect("building");
    let skip = tr.new_label().expect("building");

    tr.set_reg_l(Register::D3, 0x0BAD_F00D).expect("building");
    tr.write_reg_l(Register::D3, slot).expect("building");
    tr.jmp_local(skip).expect("building");
    // Skipped: would clobber the cell
    tr.set_reg_l(Register::D4, 0).expect("building");
    tr.write_reg_l(Register::D4, slot).expect("building");
    let target = tr.bind(skip).expect("first bind");
    assert!(tr.bind(skip).is_err());
    tr.read_reg_l(Register::A1, slot).expect("building");
    let id = tr.final_rts(&mut traps, TrapAction::StopSubProcess).expect("free id");
    assert!(tr.final_rts(&mut traps, TrapAction::StopSubProcess).is_err());
    tr.realize(&mut space).expect("fits");

    let jmp_operand = tr.entry().expect("realized") + 6 + 6 + 2;
    assert_eq!(
        space.mem.r32(jmp_operand).expect("in ram"),
        tr.code_addr(target).expect("realized")
    );

    let mut cpu = SubsetCpu::new();
    cpu.set_reg(Register::SP, 0x8000);
    cpu.set_pc(tr.entry().expect("realized"));
    let stop = cpu.run_until_trap(&mut space.mem, 100).expect("runs");
    assert!(matches!(stop, Stop::Trap { id: trap, .. } if trap == id));
    assert_eq!(cpu.reg(Register::A1), 0x0BAD_F00D);
    assert_eq!(tr.read_data_l(&space.mem, slot).expect("in ram"), 0x0BAD_F00D);
    assert!(traps.get(id).is_some_and(|entry| entry.auto_rts));
}

#[test]
fn test_jump_to_unbound_label_fails_realize() {
    let mut space = space();
    let mut tr = Trampoline::new("dangling");
    let nowhere = tr.new_label().expect("building");
    tr.jmp_local(nowhere).expect("building");

    assert!(matches!(
        tr.realize(&mut space),
        Err(EmuError::InvalidTrampolineState { .. })
    ));
    assert!(!tr.is_realized());
    assert_eq!(space.alloc.live_count(), 0);

    let mut other = Trampoline::new("other");
    assert!(other.jmp_local(nowhere).is_err());
}

#[test]
fn test_pc_is_not_a_trampoline_register() {
    let mut tr = Trampoline::new("regs");
    let slot = tr.dc_l(0).expect("building");
    assert!(matches!(
        tr.set_reg_l(Register::Pc, 0x1000),
        Err(EmuError::InvalidTrampolineState { .. })
    ));
    assert!(tr.write_reg_l(Register::Pc, slot).is_err());
    assert!(tr.read_reg_l(Register::Pc, slot).is_err());
    assert_eq!(tr.size(), 4);
}

#[test]
fn test_release_returns_block_and_trap() {
    let mut space = space();
    let mut traps = TrapTable::new();
    let mut tr = Trampoline::new("owned");
    tr.dc_l(0).expect("building");
    let id = tr.final_rts(&mut traps, TrapAction::StopSubProcess).expect("free id");
    tr.realize(&mut space).expect("fits");
    assert_eq!(space.alloc.live_count(), 1);
    assert_eq!(
        space.labels.resolve(tr.entry().expect("realized")).map(|r| r.name.as_str()),
        Some("owned")
    );

    tr.release(&mut space, &mut traps).expect("live");
    assert_eq!(space.alloc.live_count(), 0);
    assert!(traps.get(id).is_none());
    // Releasing twice is a no-op
    tr.release(&mut space, &mut traps).expect("nothing left");
}
