use super::Frame;
use crate::lua_vm::{LuaResult, LuaVM};

/// RETURN A B
/// return R(A), ... ,R(A+B-2)
///
/// B == 0 returns everything up to the current top.
pub(crate) fn op_return(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32) -> LuaResult<()> {
    let first = fr.reg(a);
    let n = if b != 0 {
        b as usize - 1
    } else {
        vm.state.top.saturating_sub(first)
    };
    vm.state.close_upvalues(fr.base);
    vm.postcall(first, n)
}
