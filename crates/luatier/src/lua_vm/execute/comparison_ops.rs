/// Comparison and test instructions
///
/// Each returns whether the following instruction (the jump) is skipped.
use std::rc::Rc;

use super::Frame;
use super::TmKind;
use super::metamethod::{call_tm, get_comp_metaop};
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaError, LuaResult, LuaVM};

fn compare_error(vm: &LuaVM, lhs: &LuaValue, rhs: &LuaValue) -> LuaError {
    let (t1, t2) = (lhs.type_name(), rhs.type_name());
    if t1 == t2 {
        vm.error(format!("attempt to compare two {} values", t1))
    } else {
        vm.error(format!("attempt to compare {} with {}", t1, t2))
    }
}

/// `lhs == rhs` with `__eq` for distinct tables.
pub fn equals(vm: &mut LuaVM, lhs: &LuaValue, rhs: &LuaValue) -> LuaResult<bool> {
    match (lhs, rhs) {
        (LuaValue::Table(x), LuaValue::Table(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            match get_comp_metaop(vm, lhs, rhs, TmKind::Eq) {
                Some(handler) => Ok(call_tm(vm, handler, &[lhs.clone(), rhs.clone()])?.is_truthy()),
                None => Ok(false),
            }
        }
        _ => Ok(lhs.raw_equals(rhs)),
    }
}

/// `lhs < rhs`
pub fn less_than(vm: &mut LuaVM, lhs: &LuaValue, rhs: &LuaValue) -> LuaResult<bool> {
    match (lhs, rhs) {
        (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x < y),
        (LuaValue::String(x), LuaValue::String(y)) => Ok(x.as_bytes() < y.as_bytes()),
        _ if lhs.type_name() != rhs.type_name() => Err(compare_error(vm, lhs, rhs)),
        _ => match get_comp_metaop(vm, lhs, rhs, TmKind::Lt) {
            Some(handler) => Ok(call_tm(vm, handler, &[lhs.clone(), rhs.clone()])?.is_truthy()),
            None => Err(compare_error(vm, lhs, rhs)),
        },
    }
}

/// `lhs <= rhs`, falling back to `not (rhs < lhs)` through `__lt`.
pub fn less_equal(vm: &mut LuaVM, lhs: &LuaValue, rhs: &LuaValue) -> LuaResult<bool> {
    match (lhs, rhs) {
        (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x <= y),
        (LuaValue::String(x), LuaValue::String(y)) => Ok(x.as_bytes() <= y.as_bytes()),
        _ if lhs.type_name() != rhs.type_name() => Err(compare_error(vm, lhs, rhs)),
        _ => {
            if let Some(handler) = get_comp_metaop(vm, lhs, rhs, TmKind::Le) {
                return Ok(call_tm(vm, handler, &[lhs.clone(), rhs.clone()])?.is_truthy());
            }
            match get_comp_metaop(vm, rhs, lhs, TmKind::Lt) {
                Some(handler) => Ok(!call_tm(vm, handler, &[rhs.clone(), lhs.clone()])?.is_truthy()),
                None => Err(compare_error(vm, lhs, rhs)),
            }
        }
    }
}

/// EQ A B C
/// if ((RK(B) == RK(C)) ~= A) then pc++
pub(crate) fn op_eq(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32, c: u32) -> LuaResult<bool> {
    let lhs = fr.rk(vm, b);
    let rhs = fr.rk(vm, c);
    Ok(equals(vm, &lhs, &rhs)? != (a != 0))
}

/// LT A B C
/// if ((RK(B) <  RK(C)) ~= A) then pc++
pub(crate) fn op_lt(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32, c: u32) -> LuaResult<bool> {
    let lhs = fr.rk(vm, b);
    let rhs = fr.rk(vm, c);
    Ok(less_than(vm, &lhs, &rhs)? != (a != 0))
}

/// LE A B C
/// if ((RK(B) <= RK(C)) ~= A) then pc++
pub(crate) fn op_le(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32, c: u32) -> LuaResult<bool> {
    let lhs = fr.rk(vm, b);
    let rhs = fr.rk(vm, c);
    Ok(less_equal(vm, &lhs, &rhs)? != (a != 0))
}

/// TEST A C
/// if not (R(A) <=> C) then pc++
#[inline]
pub(crate) fn op_test(vm: &LuaVM, fr: &Frame, a: u32, c: u32) -> bool {
    vm.state.stack[fr.reg(a)].is_truthy() != (c != 0)
}

/// TESTSET A B C
/// if (R(B) <=> C) then R(A) := R(B) else pc++
#[inline]
pub(crate) fn op_testset(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32, c: u32) -> bool {
    let rb = &vm.state.stack[fr.reg(b)];
    if rb.is_truthy() == (c != 0) {
        let value = rb.clone();
        vm.state.stack[fr.reg(a)] = value;
        false
    } else {
        true
    }
}
