/*----------------------------------------------------------------------
  Lua 5.1 Instruction Encoding (lopcodes.h)

  All instructions are unsigned 32-bit integers. The first 6 bits hold
  the opcode; the remaining fields depend on the instruction format.

        3 3 2 2 2 2 2 2 2 2 2 2 1 1 1 1 1 1 1 1 1 1 0 0 0 0 0 0 0 0 0 0
        1 0 9 8 7 6 5 4 3 2 1 0 9 8 7 6 5 4 3 2 1 0 9 8 7 6 5 4 3 2 1 0
  iABC        B(9)      |      C(9)         |     A(8)      |   Op(6)   |
  iABx                Bx(18)                |     A(8)      |   Op(6)   |
  iAsBx              sBx(18)                |     A(8)      |   Op(6)   |

  sBx is stored in excess-K form: sBx = Bx - MAXARG_sBx.
  An RK operand (B or C) names constant (x & !BITRK) when bit 8 is set,
  otherwise register x.
----------------------------------------------------------------------*/

use super::OpCode;

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction(u32);

impl Instruction {
    pub const SIZE_OP: u32 = 6;
    pub const SIZE_A: u32 = 8;
    pub const SIZE_B: u32 = 9;
    pub const SIZE_C: u32 = 9;
    pub const SIZE_BX: u32 = Self::SIZE_C + Self::SIZE_B;

    pub const POS_OP: u32 = 0;
    pub const POS_A: u32 = Self::POS_OP + Self::SIZE_OP;
    pub const POS_C: u32 = Self::POS_A + Self::SIZE_A;
    pub const POS_B: u32 = Self::POS_C + Self::SIZE_C;
    pub const POS_BX: u32 = Self::POS_C;

    pub const MAXARG_A: u32 = (1 << Self::SIZE_A) - 1;
    pub const MAXARG_B: u32 = (1 << Self::SIZE_B) - 1;
    pub const MAXARG_C: u32 = (1 << Self::SIZE_C) - 1;
    pub const MAXARG_BX: u32 = (1 << Self::SIZE_BX) - 1;
    pub const MAXARG_SBX: i32 = (Self::MAXARG_BX >> 1) as i32;

    /// Bit that marks an RK operand as a constant index
    pub const BITRK: u32 = 1 << (Self::SIZE_B - 1);
    /// Largest constant index an RK operand can address
    pub const MAXINDEXRK: u32 = Self::BITRK - 1;

    #[inline(always)]
    pub const fn from_u32(raw: u32) -> Self {
        Instruction(raw)
    }

    #[inline(always)]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline(always)]
    pub const fn opcode_raw(self) -> u8 {
        (self.0 & ((1 << Self::SIZE_OP) - 1)) as u8
    }

    #[inline(always)]
    pub fn opcode(self) -> Option<OpCode> {
        OpCode::from_u8(self.opcode_raw())
    }

    #[inline(always)]
    pub const fn a(self) -> u32 {
        (self.0 >> Self::POS_A) & Self::MAXARG_A
    }

    #[inline(always)]
    pub const fn b(self) -> u32 {
        (self.0 >> Self::POS_B) & Self::MAXARG_B
    }

    #[inline(always)]
    pub const fn c(self) -> u32 {
        (self.0 >> Self::POS_C) & Self::MAXARG_C
    }

    #[inline(always)]
    pub const fn bx(self) -> u32 {
        (self.0 >> Self::POS_BX) & Self::MAXARG_BX
    }

    #[inline(always)]
    pub const fn sbx(self) -> i32 {
        self.bx() as i32 - Self::MAXARG_SBX
    }

    pub const fn abc(op: OpCode, a: u32, b: u32, c: u32) -> Self {
        Instruction(
            (op as u32) << Self::POS_OP
                | (a & Self::MAXARG_A) << Self::POS_A
                | (b & Self::MAXARG_B) << Self::POS_B
                | (c & Self::MAXARG_C) << Self::POS_C,
        )
    }

    pub const fn abx(op: OpCode, a: u32, bx: u32) -> Self {
        Instruction(
            (op as u32) << Self::POS_OP
                | (a & Self::MAXARG_A) << Self::POS_A
                | (bx & Self::MAXARG_BX) << Self::POS_BX,
        )
    }

    pub const fn asbx(op: OpCode, a: u32, sbx: i32) -> Self {
        Self::abx(op, a, (sbx + Self::MAXARG_SBX) as u32)
    }

    /// Raw operand word (SETLIST chunk index following a `C == 0` SETLIST).
    pub const fn raw(value: u32) -> Self {
        Instruction(value)
    }

    #[inline(always)]
    pub const fn is_k(x: u32) -> bool {
        x & Self::BITRK != 0
    }

    #[inline(always)]
    pub const fn index_k(x: u32) -> u32 {
        x & !Self::BITRK
    }

    #[inline(always)]
    pub const fn rk_as_k(k: u32) -> u32 {
        k | Self::BITRK
    }
}

/// Decode a "floating point byte" (eeeeexxx) used by NEWTABLE sizes.
pub const fn fb2int(x: u32) -> usize {
    let e = (x >> 3) & 0x1f;
    if e == 0 {
        x as usize
    } else {
        (((x & 7) + 8) as usize) << (e - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_layout_matches_lua51() {
        let i = Instruction::abc(OpCode::Add, 1, 2, Instruction::rk_as_k(3));
        assert_eq!(i.opcode_raw(), 12);
        assert_eq!(i.a(), 1);
        assert_eq!(i.b(), 2);
        assert!(Instruction::is_k(i.c()));
        assert_eq!(Instruction::index_k(i.c()), 3);
        // B occupies the top 9 bits
        assert_eq!(i.as_u32() >> 23, 2);

        let j = Instruction::asbx(OpCode::Jmp, 0, -5);
        assert_eq!(j.sbx(), -5);
        assert_eq!(j.bx(), 131071 - 5);
    }

    #[test]
    fn floating_point_byte() {
        assert_eq!(fb2int(0), 0);
        assert_eq!(fb2int(7), 7);
        assert_eq!(fb2int(8), 8);
        assert_eq!(fb2int(0x10), 16);
    }
}
