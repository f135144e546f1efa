//! A CPU executing the instruction subset produced by [`Asm`](super::asm::Asm)
//!
//! Supported: `MOVEQ`, `MOVE.L`/`MOVEA.L` with immediate and absolute-long
//! operands, `MOVEM.L` to `-(A7)` and from `(A7)+`, `JMP`/`JSR` absolute long,
//! `RTS`, `NOP` and A-line traps. Anything else stops with
//! [`CpuFault::Illegal`]. Condition codes are not modeled.

use super::asm::*;
use super::{Cpu, CpuFault, Register, Stop};
use crate::memory::flat::Memory;
use crate::memory::Address;

#[derive(Debug, Clone, Default)]
pub struct SubsetCpu {
    regs: [u32; 16],
    pc: Address,
    steps: u64,
}

impl SubsetCpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total instructions executed so far
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn fetch16(&mut self, mem: &Memory) -> Result<u16, CpuFault> {
        let pc = self.pc;
        let word = mem.r16(pc).map_err(|fault| CpuFault::Memory { fault, pc })?;
        self.pc = pc.wrapping_add(2);
        Ok(word)
    }

    fn fetch32(&mut self, mem: &Memory) -> Result<u32, CpuFault> {
        let hi = self.fetch16(mem)? as u32;
        let lo = self.fetch16(mem)? as u32;
        Ok((hi << 16) | lo)
    }

    fn push32(&mut self, mem: &mut Memory, value: u32, pc: Address) -> Result<(), CpuFault> {
        let sp = self.regs[15].wrapping_sub(4);
        mem.w32(sp, value)
            .map_err(|fault| CpuFault::Memory { fault, pc })?;
        self.regs[15] = sp;
        Ok(())
    }

    fn pop32(&mut self, mem: &Memory, pc: Address) -> Result<u32, CpuFault> {
        let sp = self.regs[15];
        let value = mem.r32(sp).map_err(|fault| CpuFault::Memory { fault, pc })?;
        self.regs[15] = sp.wrapping_add(4);
        Ok(value)
    }

    /// Execute one instruction. Returns the trap id if an A-line trap ran.
    fn step(&mut self, mem: &mut Memory) -> Result<Option<u16>, CpuFault> {
        let pc = self.pc;
        let op = self.fetch16(mem)?;
        let fault = |fault| CpuFault::Memory { fault, pc };
        let dst = ((op >> 9) & 7) as usize;
        let src = (op & 7) as usize;

        match op {
            _ if op & 0xF100 == OP_MOVEQ => {
                self.regs[dst] = op as u8 as i8 as i32 as u32;
            }
            _ if op & 0xF1FF == OP_MOVE_L_IMM_D => {
                self.regs[dst] = self.fetch32(mem)?;
            }
            _ if op & 0xF1FF == OP_MOVEA_L_IMM => {
                self.regs[8 + dst] = self.fetch32(mem)?;
            }
            _ if op & 0xFFF8 == OP_MOVE_L_D_ABS => {
                let addr = self.fetch32(mem)?;
                mem.w32(addr, self.regs[src]).map_err(fault)?;
            }
            _ if op & 0xFFF8 == OP_MOVE_L_A_ABS => {
                let addr = self.fetch32(mem)?;
                mem.w32(addr, self.regs[8 + src]).map_err(fault)?;
            }
            _ if op & 0xF1FF == OP_MOVE_L_ABS_D => {
                let addr = self.fetch32(mem)?;
                self.regs[dst] = mem.r32(addr).map_err(fault)?;
            }
            _ if op & 0xF1FF == OP_MOVEA_L_ABS => {
                let addr = self.fetch32(mem)?;
                self.regs[8 + dst] = mem.r32(addr).map_err(fault)?;
            }
            OP_MOVEM_L_PREDEC_SP => {
                let list = RegList(self.fetch16(mem)?.reverse_bits());
                let count = list.len();
                let base = self.regs[15].wrapping_sub(4 * count);
                // Lowest numbered register ends up at the lowest address
                let mut addr = base;
                for i in (0..16).filter(|i| list.0 & (1 << i) != 0) {
                    mem.w32(addr, self.regs[i]).map_err(fault)?;
                    addr = addr.wrapping_add(4);
                }
                self.regs[15] = base;
            }
            OP_MOVEM_L_POSTINC_SP => {
                let list = RegList(self.fetch16(mem)?);
                let mut addr = self.regs[15];
                for i in (0..16).filter(|i| list.0 & (1 << i) != 0) {
                    let value = mem.r32(addr).map_err(fault)?;
                    addr = addr.wrapping_add(4);
                    if i != 15 {
                        self.regs[i] = value;
                    }
                }
                self.regs[15] = addr;
            }
            OP_JMP_ABS => {
                self.pc = self.fetch32(mem)?;
            }
            OP_JSR_ABS => {
                let target = self.fetch32(mem)?;
                let ret = self.pc;
                self.push32(mem, ret, pc)?;
                self.pc = target;
            }
            OP_RTS => {
                self.pc = self.pop32(mem, pc)?;
            }
            OP_NOP => {}
            _ if op & 0xF000 == OP_ALINE => {
                return Ok(Some(op & MAX_TRAP_ID));
            }
            _ => return Err(CpuFault::Illegal { opcode: op, pc }),
        }
        Ok(None)
    }
}

impl Cpu for SubsetCpu {
    fn reg(&self, reg: Register) -> u32 {
        match reg.gpr_index() {
            Some(i) => self.regs[i],
            None => self.pc,
        }
    }

    fn set_reg(&mut self, reg: Register, value: u32) {
        match reg.gpr_index() {
            Some(i) => self.regs[i] = value,
            None => self.pc = value,
        }
    }

    fn run_until_trap(&mut self, mem: &mut Memory, max_steps: u64) -> Result<Stop, CpuFault> {
        for _ in 0..max_steps {
            let pc = self.pc;
            let trap = self.step(mem)?;
            self.steps += 1;
            if let Some(id) = trap {
                return Ok(Stop::Trap { id, pc });
            }
        }
        Ok(Stop::Budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(mem: &mut Memory, at: Address, asm: &Asm) {
        mem.write_bytes(at, &asm.to_bytes()).expect("code fits");
    }

    #[test]
    fn test_movem_round_trip_preserves_registers() {
        let mut mem = Memory::new(0x1000);
        let mut cpu = SubsetCpu::new();
        for (i, reg) in Register::DATA.iter().chain(&Register::ADDRESS[..7]).enumerate() {
            cpu.set_reg(*reg, 0x100 + i as u32);
        }
        cpu.set_reg(Register::SP, 0x800);

        let list = RegList::all_but(Register::D0);
        let mut asm = Asm::new();
        asm.movem_save(list);
        asm.moveq(Register::D1, 0);
        asm.move_l_imm(Register::A3, 0);
        asm.movem_restore(list);
        asm.aline(1);
        load(&mut mem, 0x100, &asm);
        cpu.set_pc(0x100);

        let stop = cpu.run_until_trap(&mut mem, 100).expect("runs");
        assert!(matches!(stop, Stop::Trap { id: 1, .. }));
        assert_eq!(cpu.reg(Register::SP), 0x800);
        assert_eq!(cpu.reg(Register::D1), 0x101);
        assert_eq!(cpu.reg(Register::A3), 0x10B);
        // d1 was stored at the lowest address
        assert_eq!(mem.r32(0x800 - 14 * 4).expect("in ram"), 0x101);
    }

    #[test]
    fn test_jsr_and_rts() {
        let mut mem = Memory::new(0x1000);
        let mut cpu = SubsetCpu::new();
        cpu.set_reg(Register::SP, 0x800);

        let mut main = Asm::new();
        main.jsr(0x200);
        main.aline(7);
        load(&mut mem, 0x100, &main);

        let mut sub = Asm::new();
        sub.moveq(Register::D0, 42);
        sub.rts();
        load(&mut mem, 0x200, &sub);

        cpu.set_pc(0x100);
        let stop = cpu.run_until_trap(&mut mem, 100).expect("runs");
        assert_eq!(stop, Stop::Trap { id: 7, pc: 0x106 });
        assert_eq!(cpu.reg(Register::D0), 42);
        assert_eq!(cpu.reg(Register::SP), 0x800);
        assert_eq!(cpu.pc(), 0x108);
    }

    #[test]
    fn test_fault_and_illegal_and_budget() {
        let mut mem = Memory::new(0x1000);
        let mut cpu = SubsetCpu::new();

        let mut asm = Asm::new();
        asm.move_l_to_abs(Register::D0, 0x0010_0000);
        load(&mut mem, 0x100, &asm);
        cpu.set_pc(0x100);
        match cpu.run_until_trap(&mut mem, 10) {
            Err(CpuFault::Memory { fault, pc }) => {
                assert_eq!(fault.address, 0x0010_0000);
                assert!(fault.write);
                assert_eq!(pc, 0x100);
            }
            other => panic!("expected memory fault, got {:?}", other),
        }

        mem.w16(0x200, 0x4AFC).expect("in ram"); // ILLEGAL
        cpu.set_pc(0x200);
        assert_eq!(
            cpu.run_until_trap(&mut mem, 10),
            Err(CpuFault::Illegal {
                opcode: 0x4AFC,
                pc: 0x200
            })
        );

        let mut spin = Asm::new();
        spin.jmp(0x300);
        load(&mut mem, 0x300, &spin);
        cpu.set_pc(0x300);
        assert_eq!(cpu.run_until_trap(&mut mem, 5), Ok(Stop::Budget));
    }
}
