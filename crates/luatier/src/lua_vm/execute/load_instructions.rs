/// Load and Move instructions
///
/// These instructions load constants and move values between registers.
use super::Frame;
use crate::lua_value::LuaValue;
use crate::lua_vm::LuaVM;

/// MOVE A B
/// R(A) := R(B)
#[inline(always)]
pub(crate) fn op_move(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32) {
    let value = vm.state.stack[fr.reg(b)].clone();
    vm.state.stack[fr.reg(a)] = value;
}

/// LOADK A Bx
/// R(A) := Kst(Bx)
#[inline(always)]
pub(crate) fn op_loadk(vm: &mut LuaVM, fr: &Frame, a: u32, bx: u32) {
    vm.state.stack[fr.reg(a)] = fr.constant(bx);
}

/// LOADBOOL A B C
/// R(A) := (Bool)B; if (C) pc++ (the skip is applied by the engine)
#[inline(always)]
pub(crate) fn op_loadbool(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32) {
    vm.state.stack[fr.reg(a)] = LuaValue::Boolean(b != 0);
}

/// LOADNIL A B
/// R(A) := ... := R(B) := nil
#[inline(always)]
pub(crate) fn op_loadnil(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32) {
    for slot in &mut vm.state.stack[fr.reg(a)..=fr.reg(b)] {
        *slot = LuaValue::Nil;
    }
}

/// NOT A B
/// R(A) := not R(B)
#[inline(always)]
pub(crate) fn op_not(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32) {
    let falsy = vm.state.stack[fr.reg(b)].is_falsy();
    vm.state.stack[fr.reg(a)] = LuaValue::Boolean(falsy);
}
