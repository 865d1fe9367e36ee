// Prototype assembler
// Builds prototypes instruction by instruction for front-ends, tools and
// tests. Line info is recorded per emitted word.

use std::sync::Arc;

use super::{Constant, LocVar, LuaString, Prototype, VARARG_ISVARARG};
use crate::lua_vm::{Instruction, OpCode};

pub struct ProtoBuilder {
    proto: Prototype,
    line: u32,
}

impl ProtoBuilder {
    /// Function prototype (not a main chunk).
    pub fn new(source: impl Into<LuaString>) -> Self {
        let mut proto = Prototype::new(source);
        proto.line_defined = 1;
        proto.last_line_defined = 1;
        ProtoBuilder { proto, line: 1 }
    }

    /// Main chunk: defined at line 0 and variadic.
    pub fn main(source: impl Into<LuaString>) -> Self {
        let mut proto = Prototype::new(source);
        proto.vararg = VARARG_ISVARARG;
        ProtoBuilder { proto, line: 1 }
    }

    pub fn params(&mut self, n: u8) -> &mut Self {
        self.proto.num_params = n;
        if self.proto.max_stack_size < n {
            self.proto.max_stack_size = n;
        }
        self
    }

    pub fn vararg(&mut self, flags: u8) -> &mut Self {
        self.proto.vararg = flags;
        self
    }

    pub fn max_stack(&mut self, n: u8) -> &mut Self {
        self.proto.max_stack_size = n;
        self
    }

    pub fn upvalues(&mut self, n: u8) -> &mut Self {
        self.proto.num_upvalues = n;
        self
    }

    pub fn lines(&mut self, defined: u32, last: u32) -> &mut Self {
        self.proto.line_defined = defined;
        self.proto.last_line_defined = last;
        self
    }

    /// Source line attached to the following instructions.
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    pub fn local(&mut self, name: &str, start_pc: u32, end_pc: u32) -> &mut Self {
        self.proto.loc_vars.push(LocVar {
            name: LuaString::new(name),
            start_pc,
            end_pc,
        });
        self
    }

    /// Constant index, reusing an equal constant already in the pool.
    pub fn constant(&mut self, value: impl Into<Constant>) -> u32 {
        let value = value.into();
        let existing = self.proto.constants.iter().position(|k| match (k, &value) {
            // 0 and -0 are distinct constants
            (Constant::Number(x), Constant::Number(y)) => x.to_bits() == y.to_bits(),
            (x, y) => x == y,
        });
        match existing {
            Some(i) => i as u32,
            None => {
                self.proto.constants.push(value);
                (self.proto.constants.len() - 1) as u32
            }
        }
    }

    /// RK operand naming constant `value`.
    pub fn rk(&mut self, value: impl Into<Constant>) -> u32 {
        let k = self.constant(value);
        Instruction::rk_as_k(k)
    }

    /// Add a nested prototype and return its index for CLOSURE.
    pub fn child(&mut self, proto: Arc<Prototype>) -> u32 {
        self.proto.protos.push(proto);
        (self.proto.protos.len() - 1) as u32
    }

    /// Append a raw code word; returns its pc.
    pub fn emit(&mut self, instr: Instruction) -> usize {
        self.proto.code.push(instr.as_u32());
        self.proto.line_info.push(self.line);
        self.proto.code.len() - 1
    }

    pub fn abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> usize {
        self.emit(Instruction::abc(op, a, b, c))
    }

    pub fn abx(&mut self, op: OpCode, a: u32, bx: u32) -> usize {
        self.emit(Instruction::abx(op, a, bx))
    }

    pub fn asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> usize {
        self.emit(Instruction::asbx(op, a, sbx))
    }

    /// Emit a JMP to be patched later.
    pub fn jump(&mut self) -> usize {
        self.asbx(OpCode::Jmp, 0, 0)
    }

    /// Point the jump-like instruction at `pc` (sBx format) to `target`.
    pub fn patch_jump(&mut self, pc: usize, target: usize) {
        let instr = Instruction::from_u32(self.proto.code[pc]);
        let sbx = target as i32 - (pc as i32 + 1);
        if let Some(op) = instr.opcode() {
            self.proto.code[pc] = Instruction::asbx(op, instr.a(), sbx).as_u32();
        }
    }

    /// Pc of the next emitted instruction.
    pub fn pc(&self) -> usize {
        self.proto.code.len()
    }

    pub fn build(self) -> Arc<Prototype> {
        Arc::new(self.proto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_deduplicated() {
        let mut b = ProtoBuilder::main("=t");
        let k1 = b.constant("x");
        let k2 = b.constant(1.0);
        assert_eq!(b.constant("x"), k1);
        assert_eq!(b.constant(1.0), k2);
        assert_ne!(b.constant(-0.0), b.constant(0.0));
        assert_eq!(b.rk("x"), Instruction::BITRK | k1);
    }

    #[test]
    fn jumps_are_patched_relative_to_next_pc() {
        let mut b = ProtoBuilder::main("=t");
        let j = b.jump();
        b.abc(OpCode::LoadNil, 0, 0, 0);
        let target = b.pc();
        b.abc(OpCode::Return, 0, 1, 0);
        b.patch_jump(j, target);
        let proto = b.build();
        assert_eq!(Instruction::from_u32(proto.code[0]).sbx(), 1);
        assert_eq!(proto.line_info.len(), proto.code.len());
    }
}
