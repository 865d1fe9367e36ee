// Per-coroutine execution state
// Owns the register stack, the frame stack and the list of open upvalues
// pointing into that stack.

use std::rc::Weak;

use super::call_info::CallInfo;
use super::lua_limits::BASIC_STACK_SIZE;
use crate::lua_value::{LuaThread, LuaUpvalue, LuaValue, ThreadId, UpvalueRef};

pub struct LuaState {
    pub(crate) id: ThreadId,
    /// Coroutine object owning this state (empty for the main thread)
    pub(crate) home: Weak<LuaThread>,
    pub(crate) stack: Vec<LuaValue>,
    /// First free slot; meaningful for open results and host frames
    pub(crate) top: usize,
    pub(crate) frames: Vec<CallInfo>,
    pub(crate) open_upvalues: Vec<UpvalueRef>,
    /// Active non-yieldable native boundaries (metamethods, pcall, iterators)
    pub(crate) nny: usize,
}

impl Default for LuaState {
    /// Placeholder left in a coroutine object while its state runs in the VM.
    fn default() -> Self {
        LuaState {
            id: ThreadId::NONE,
            home: Weak::new(),
            stack: Vec::new(),
            top: 0,
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            nny: 0,
        }
    }
}

impl LuaState {
    pub(crate) fn new(home: Weak<LuaThread>) -> Self {
        LuaState {
            id: ThreadId::next(),
            home,
            stack: vec![LuaValue::Nil; BASIC_STACK_SIZE],
            top: 0,
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            nny: 0,
        }
    }

    #[inline]
    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn top(&self) -> usize {
        self.top
    }

    pub fn current_frame(&self) -> Option<&CallInfo> {
        self.frames.last()
    }

    /// Grow the stack to at least `needed` slots without passing `limit`.
    pub(crate) fn grow_stack(&mut self, needed: usize, limit: usize) -> bool {
        if needed <= self.stack.len() {
            return true;
        }
        if needed > limit {
            return false;
        }
        let new_len = needed.saturating_mul(2).clamp(needed, limit);
        self.stack.resize(new_len, LuaValue::Nil);
        true
    }

    /// Open upvalue for `slot`, reusing the existing cell if one is open.
    pub(crate) fn find_upvalue(&mut self, slot: usize) -> UpvalueRef {
        if let Some(uv) = self
            .open_upvalues
            .iter()
            .find(|uv| uv.open_slot() == Some(slot))
        {
            return uv.clone();
        }
        let uv = LuaUpvalue::open(self.id, slot, self.home.clone());
        self.open_upvalues.push(uv.clone());
        uv
    }

    /// Close every open upvalue whose slot is at or above `level`.
    pub(crate) fn close_upvalues(&mut self, level: usize) {
        if self.open_upvalues.is_empty() {
            return;
        }
        let stack = &self.stack;
        self.open_upvalues.retain(|uv| match uv.open_slot() {
            Some(slot) if slot >= level => {
                uv.close(stack.get(slot).cloned().unwrap_or_default());
                false
            }
            Some(_) => true,
            None => false,
        });
    }

    /// Drop all frames and values, closing upvalues first.
    pub(crate) fn reset(&mut self) {
        self.close_upvalues(0);
        self.frames.clear();
        self.top = 0;
        self.nny = 0;
    }
}

impl Drop for LuaState {
    fn drop(&mut self) {
        self.close_upvalues(0);
    }
}
