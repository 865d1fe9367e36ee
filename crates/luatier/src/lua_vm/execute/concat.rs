// String concatenation (lvm.c luaV_concat)
// Works right to left over the operand registers: runs of strings and
// numbers are joined in one step, anything else goes through `__concat`
// one pair at a time.

use super::Frame;
use super::TmKind;
use super::metamethod::{call_tm, get_bin_metaop};
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaResult, LuaVM};

#[inline]
fn is_concatable(v: &LuaValue) -> bool {
    matches!(v, LuaValue::String(_) | LuaValue::Number(_))
}

/// Concatenate the `total` registers ending at stack index `last`, leaving
/// the result in the first of them.
pub(crate) fn concat_range(vm: &mut LuaVM, total: usize, last: usize) -> LuaResult<()> {
    let mut total = total;
    let mut last = last;
    while total > 1 {
        let top = vm.state.stack[last].clone();
        let prev = vm.state.stack[last - 1].clone();
        let joined = if !is_concatable(&prev) || !is_concatable(&top) {
            let Some(handler) = get_bin_metaop(vm, &prev, &top, TmKind::Concat) else {
                let culprit = if is_concatable(&prev) { &top } else { &prev };
                return Err(vm.type_error(culprit, "concatenate"));
            };
            let result = call_tm(vm, handler, &[prev, top])?;
            vm.state.stack[last - 1] = result;
            2
        } else {
            let mut n = 2;
            while n < total && is_concatable(&vm.state.stack[last - n]) {
                n += 1;
            }
            let mut s = String::new();
            for v in &vm.state.stack[last + 1 - n..=last] {
                if let Some(part) = v.to_lua_string() {
                    s.push_str(part.as_str());
                }
            }
            vm.state.stack[last + 1 - n] = LuaValue::from(s);
            n
        };
        total -= joined - 1;
        last -= joined - 1;
    }
    Ok(())
}

/// CONCAT A B C
/// R(A) := R(B).. ... ..R(C)
pub(crate) fn op_concat(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32, c: u32) -> LuaResult<()> {
    concat_range(vm, (c - b + 1) as usize, fr.reg(c))?;
    let value = vm.state.stack[fr.reg(b)].clone();
    vm.state.stack[fr.reg(a)] = value;
    Ok(())
}
