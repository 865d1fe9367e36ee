/// Upvalue instructions
///
/// An open upvalue names a slot of the coroutine that created it. That
/// coroutine's stack is either the running state, a parked resumer, or the
/// suspended state stored in its thread object.
use super::Frame;
use crate::lua_value::{LuaUpvalue, LuaValue, ThreadId, UpvalueState};
use crate::lua_vm::LuaVM;

impl LuaVM {
    fn parked_stack(&self, thread: ThreadId) -> Option<&Vec<LuaValue>> {
        if self.state.id == thread {
            return Some(&self.state.stack);
        }
        self.parked.iter().find(|s| s.id == thread).map(|s| &s.stack)
    }

    fn parked_stack_mut(&mut self, thread: ThreadId) -> Option<&mut Vec<LuaValue>> {
        if self.state.id == thread {
            return Some(&mut self.state.stack);
        }
        self.parked
            .iter_mut()
            .find(|s| s.id == thread)
            .map(|s| &mut s.stack)
    }

    /// Current value of an upvalue cell.
    pub(crate) fn get_upvalue(&self, uv: &LuaUpvalue) -> LuaValue {
        match &*uv.state.borrow() {
            UpvalueState::Closed(v) => v.clone(),
            UpvalueState::Open { thread, slot, home } => {
                if let Some(stack) = self.parked_stack(*thread) {
                    return stack.get(*slot).cloned().unwrap_or_default();
                }
                match home.upgrade() {
                    Some(t) => t.state.borrow().stack.get(*slot).cloned().unwrap_or_default(),
                    None => LuaValue::Nil,
                }
            }
        }
    }

    pub(crate) fn set_upvalue(&mut self, uv: &LuaUpvalue, value: LuaValue) {
        let mut state = uv.state.borrow_mut();
        match &mut *state {
            UpvalueState::Closed(v) => *v = value,
            UpvalueState::Open { thread, slot, home } => {
                let slot = *slot;
                if let Some(stack) = self.parked_stack_mut(*thread) {
                    if let Some(dst) = stack.get_mut(slot) {
                        *dst = value;
                    }
                } else if let Some(t) = home.upgrade()
                    && let Some(dst) = t.state.borrow_mut().stack.get_mut(slot)
                {
                    *dst = value;
                }
            }
        }
    }
}

/// GETUPVAL A B
/// R(A) := UpValue[B]
pub(crate) fn op_getupval(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32) {
    let value = vm.get_upvalue(&fr.closure.upvalues[b as usize]);
    vm.state.stack[fr.reg(a)] = value;
}

/// SETUPVAL A B
/// UpValue[B] := R(A)
pub(crate) fn op_setupval(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32) {
    let value = vm.state.stack[fr.reg(a)].clone();
    vm.set_upvalue(&fr.closure.upvalues[b as usize], value);
}

/// CLOSE A
/// close all upvalues >= R(A)
pub(crate) fn op_close(vm: &mut LuaVM, fr: &Frame, a: u32) {
    vm.state.close_upvalues(fr.reg(a));
}
