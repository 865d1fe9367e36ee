/// Loop instructions
///
/// Numeric for loops keep index, limit and step in R(A)..R(A+2) and expose
/// the loop variable in R(A+3). Generic for loops call the iterator in
/// R(A) with state R(A+1) and control R(A+2), results from R(A+3).
use super::Frame;
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaResult, LuaVM};

fn for_number(vm: &mut LuaVM, slot: usize, what: &str) -> LuaResult<f64> {
    match vm.state.stack[slot].to_number() {
        Some(n) => {
            vm.state.stack[slot] = LuaValue::Number(n);
            Ok(n)
        }
        None => Err(vm.error(format!("'for' {} must be a number", what))),
    }
}

/// FORPREP A sBx
/// R(A) -= R(A+2); pc += sBx
pub(crate) fn op_forprep(vm: &mut LuaVM, fr: &Frame, a: u32) -> LuaResult<()> {
    let ra = fr.reg(a);
    let init = for_number(vm, ra, "initial value")?;
    for_number(vm, ra + 1, "limit")?;
    let step = for_number(vm, ra + 2, "step")?;
    vm.state.stack[ra] = LuaValue::Number(init - step);
    Ok(())
}

/// FORLOOP A sBx
/// R(A) += R(A+2); if R(A) <?= R(A+1) then { pc += sBx; R(A+3) = R(A) }
///
/// Returns whether the loop continues. On exit R(A+3) is cleared.
pub(crate) fn op_forloop(vm: &mut LuaVM, fr: &Frame, a: u32) -> LuaResult<bool> {
    let ra = fr.reg(a);
    let stack = &vm.state.stack;
    let (Some(idx), Some(limit), Some(step)) = (
        stack[ra].as_number(),
        stack[ra + 1].as_number(),
        stack[ra + 2].as_number(),
    ) else {
        return Err(vm.error("'for' loop state is not numeric"));
    };
    let idx = idx + step;
    let continues = if step > 0.0 { idx <= limit } else { limit <= idx };
    let stack = &mut vm.state.stack;
    if continues {
        stack[ra] = LuaValue::Number(idx);
        stack[ra + 3] = LuaValue::Number(idx);
    } else {
        stack[ra + 3] = LuaValue::Nil;
    }
    Ok(continues)
}

/// TFORLOOP A C
/// R(A+3), ... ,R(A+2+C) := R(A)(R(A+1), R(A+2));
/// if R(A+3) ~= nil then R(A+2) = R(A+3) else pc++
///
/// Returns whether the following jump is skipped (iteration finished).
pub(crate) fn op_tforloop(vm: &mut LuaVM, fr: &Frame, a: u32, c: u32) -> LuaResult<bool> {
    let ra = fr.reg(a);
    let cb = ra + 3;
    vm.ensure_stack(cb + 3 + c as usize)?;
    for i in 0..3 {
        let value = vm.state.stack[ra + i].clone();
        vm.state.stack[cb + i] = value;
    }
    vm.state.top = cb + 3;
    vm.call_at(cb, 2, c as i32)?;
    if let Some(ci) = vm.state.frames.last() {
        vm.state.top = ci.top;
    }
    let first = vm.state.stack[cb].clone();
    if first.is_nil() {
        Ok(true)
    } else {
        vm.state.stack[cb - 1] = first;
        Ok(false)
    }
}
