/// Closure creation and vararg access
use std::rc::Rc;

use super::Frame;
use crate::lua_value::{LuaClosure, LuaValue, UpvalueRef};
use crate::lua_vm::lua_limits::EXTRA_STACK;
use crate::lua_vm::{Instruction, LuaResult, LuaVM, OpCode};

/// How a new closure obtains one upvalue, read from the pseudo-instruction
/// that follows CLOSURE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// MOVE 0 B: the enclosing frame's register B
    Local(u32),
    /// GETUPVAL 0 B: the enclosing closure's upvalue B
    Upvalue(u32),
}

impl Capture {
    pub fn decode(word: u32) -> Capture {
        let instr = Instruction::from_u32(word);
        match instr.opcode() {
            Some(OpCode::Move) => Capture::Local(instr.b()),
            _ => Capture::Upvalue(instr.b()),
        }
    }
}

/// CLOSURE A Bx
/// R(A) := closure(KPROTO[Bx], R(A), ... ,R(A+n))
pub(crate) fn op_closure(
    vm: &mut LuaVM,
    fr: &Frame,
    a: u32,
    bx: u32,
    captures: impl Iterator<Item = Capture>,
) {
    let proto = fr.closure.proto.protos[bx as usize].clone();
    let upvalues: Box<[UpvalueRef]> = captures
        .map(|capture| match capture {
            Capture::Local(r) => vm.state.find_upvalue(fr.reg(r)),
            Capture::Upvalue(i) => fr.closure.upvalues[i as usize].clone(),
        })
        .collect();
    let closure = LuaClosure::new(proto, upvalues, fr.closure.env.clone());
    vm.state.stack[fr.reg(a)] = LuaValue::from(Rc::new(closure));
}

/// VARARG A B
/// R(A), R(A+1), ..., R(A+B-2) = vararg
pub(crate) fn op_vararg(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32) -> LuaResult<()> {
    let nvarargs = vm.state.frames.last().map_or(0, |ci| ci.nvarargs);
    let src = fr.base - nvarargs;
    let dest = fr.reg(a);
    let wanted = if b == 0 {
        vm.ensure_stack(dest + nvarargs + EXTRA_STACK)?;
        nvarargs
    } else {
        b as usize - 1
    };
    let stack = &mut vm.state.stack;
    for i in 0..wanted {
        stack[dest + i] = if i < nvarargs {
            stack[src + i].clone()
        } else {
            LuaValue::Nil
        };
    }
    if b == 0 {
        vm.state.top = dest + nvarargs;
    }
    Ok(())
}
