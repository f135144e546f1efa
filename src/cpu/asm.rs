//! 68000 instruction encoder for host-synthesized code
//!
//! Only the forms the host needs are provided. Every method appends big-endian
//! words; methods with an absolute operand return the byte offset of that
//! operand so a caller can patch it once the final address is known.
//!
//! Register operands must be D0-D7 or A0-A7. The encoder panics on
//! [`Register::Pc`]; callers taking registers from outside check
//! [`Register::number`] first.

use super::Register;
use crate::memory::Address;

pub const OP_MOVEQ: u16 = 0x7000;
pub const OP_MOVE_L_IMM_D: u16 = 0x203C;
pub const OP_MOVEA_L_IMM: u16 = 0x207C;
pub const OP_MOVE_L_D_ABS: u16 = 0x23C0;
pub const OP_MOVE_L_A_ABS: u16 = 0x23C8;
pub const OP_MOVE_L_ABS_D: u16 = 0x2039;
pub const OP_MOVEA_L_ABS: u16 = 0x2079;
pub const OP_MOVEM_L_PREDEC_SP: u16 = 0x48E7;
pub const OP_MOVEM_L_POSTINC_SP: u16 = 0x4CDF;
pub const OP_JMP_ABS: u16 = 0x4EF9;
pub const OP_JSR_ABS: u16 = 0x4EB9;
pub const OP_RTS: u16 = 0x4E75;
pub const OP_NOP: u16 = 0x4E71;
pub const OP_ALINE: u16 = 0xA000;

/// Largest trap id an A-line opcode can carry
pub const MAX_TRAP_ID: u16 = 0x0FFF;

/// A set of general purpose registers, bit `i` = D0..D7, A0..A7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegList(pub u16);

impl RegList {
    /// D0-D7/A0-A6 (the stack pointer is never part of a save set)
    pub const ALL: RegList = RegList(0x7FFF);

    /// Every saveable register except `reg`
    pub fn all_but(reg: Register) -> Self {
        match reg.gpr_index() {
            Some(i) => RegList(Self::ALL.0 & !(1 << i)),
            None => Self::ALL,
        }
    }

    pub fn contains(self, reg: Register) -> bool {
        reg.gpr_index().is_some_and(|i| self.0 & (1 << i) != 0)
    }

    pub fn len(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Mask word for `MOVEM <list>,-(An)`, which numbers bits from A7 down
    pub fn predec_mask(self) -> u16 {
        self.0.reverse_bits()
    }
}

/// Instruction stream builder
#[derive(Debug, Clone, Default)]
pub struct Asm {
    words: Vec<u16>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current size in bytes
    pub fn len(&self) -> u32 {
        self.words.len() as u32 * 2
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    /// Overwrite the 32-bit operand at byte offset `at`
    pub fn patch_long(&mut self, at: u32, value: u32) {
        let i = (at / 2) as usize;
        self.words[i] = (value >> 16) as u16;
        self.words[i + 1] = value as u16;
    }

    fn push_long(&mut self, value: u32) -> u32 {
        let at = self.len();
        self.words.push((value >> 16) as u16);
        self.words.push(value as u16);
        at
    }

    fn bank_number(reg: Register) -> u16 {
        match reg.number() {
            Some(n) => n,
            None => panic!("pc is not a general purpose register"),
        }
    }

    /// `MOVEQ #value,Dn`
    pub fn moveq(&mut self, reg: Register, value: i8) {
        debug_assert!(reg.is_data());
        let n = Self::bank_number(reg);
        self.words.push(OP_MOVEQ | (n << 9) | (value as u8 as u16));
    }

    /// `MOVE.L #value,Dn` or `MOVEA.L #value,An`
    pub fn move_l_imm(&mut self, reg: Register, value: u32) {
        let n = Self::bank_number(reg);
        let op = if reg.is_data() {
            OP_MOVE_L_IMM_D
        } else {
            OP_MOVEA_L_IMM
        };
        self.words.push(op | (n << 9));
        self.push_long(value);
    }

    /// `MOVE.L Rn,(addr).L`, returns the operand offset
    pub fn move_l_to_abs(&mut self, reg: Register, addr: Address) -> u32 {
        let n = Self::bank_number(reg);
        let op = if reg.is_data() {
            OP_MOVE_L_D_ABS
        } else {
            OP_MOVE_L_A_ABS
        };
        self.words.push(op | n);
        self.push_long(addr)
    }

    /// `MOVE.L (addr).L,Dn` or `MOVEA.L (addr).L,An`, returns the operand offset
    pub fn move_l_from_abs(&mut self, reg: Register, addr: Address) -> u32 {
        let n = Self::bank_number(reg);
        let op = if reg.is_data() {
            OP_MOVE_L_ABS_D
        } else {
            OP_MOVEA_L_ABS
        };
        self.words.push(op | (n << 9));
        self.push_long(addr)
    }

    /// `MOVEM.L <list>,-(A7)`
    pub fn movem_save(&mut self, list: RegList) {
        self.words.push(OP_MOVEM_L_PREDEC_SP);
        self.words.push(list.predec_mask());
    }

    /// `MOVEM.L (A7)+,<list>`
    pub fn movem_restore(&mut self, list: RegList) {
        self.words.push(OP_MOVEM_L_POSTINC_SP);
        self.words.push(list.0);
    }

    /// `JMP (addr).L`, returns the operand offset
    pub fn jmp(&mut self, addr: Address) -> u32 {
        self.words.push(OP_JMP_ABS);
        self.push_long(addr)
    }

    /// `JSR (addr).L`, returns the operand offset
    pub fn jsr(&mut self, addr: Address) -> u32 {
        self.words.push(OP_JSR_ABS);
        self.push_long(addr)
    }

    pub fn rts(&mut self) {
        self.words.push(OP_RTS);
    }

    pub fn nop(&mut self) {
        self.words.push(OP_NOP);
    }

    /// A-line opcode carrying trap `id`
    pub fn aline(&mut self, id: u16) {
        debug_assert!(id <= MAX_TRAP_ID);
        self.words.push(OP_ALINE | (id & MAX_TRAP_ID));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodings_match_reference_opcodes() {
        let mut asm = Asm::new();
        asm.moveq(Register::D3, -1);
        asm.move_l_imm(Register::D0, 0x1234_5678);
        asm.move_l_imm(Register::A2, 0x00AB_CDEF);
        asm.move_l_to_abs(Register::A7, 0x0000_2000);
        asm.move_l_from_abs(Register::A7, 0x0000_2000);
        asm.jmp(0x0001_0000);
        asm.rts();
        asm.aline(0x123);

        assert_eq!(
            asm.words(),
            &[
                0x76FF, // moveq #-1,d3
                0x203C, 0x1234, 0x5678, // move.l #$12345678,d0
                0x247C, 0x00AB, 0xCDEF, // movea.l #$abcdef,a2
                0x23CF, 0x0000, 0x2000, // move.l a7,$2000
                0x2E79, 0x0000, 0x2000, // movea.l $2000,a7
                0x4EF9, 0x0001, 0x0000, // jmp $10000
                0x4E75, // rts
                0xA123,
            ]
        );
    }

    #[test]
    fn test_movem_masks_for_all_but_d0() {
        let list = RegList::all_but(Register::D0);
        assert!(!list.contains(Register::D0));
        assert!(!list.contains(Register::A7));
        assert!(list.contains(Register::A6));
        assert_eq!(list.len(), 14);

        let mut asm = Asm::new();
        asm.movem_save(list);
        asm.movem_restore(list);
        // d1-d7/a0-a6 is symmetric under bit reversal
        assert_eq!(asm.words(), &[0x48E7, 0x7FFE, 0x4CDF, 0x7FFE]);
    }

    #[test]
    fn test_patch_long_rewrites_operand() {
        let mut asm = Asm::new();
        asm.nop();
        let at = asm.move_l_to_abs(Register::D1, 0);
        assert_eq!(at, 4);
        asm.patch_long(at, 0xDEAD_BEEF);
        assert_eq!(asm.to_bytes(), vec![0x4E, 0x71, 0x23, 0xC1, 0xDE, 0xAD, 0xBE, 0xEF]);
    }
}
