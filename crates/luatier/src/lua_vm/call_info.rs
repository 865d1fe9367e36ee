// CallInfo - one activation on a coroutine's frame stack
// Equivalent to CallInfo in lstate.h, with stack indices instead of pointers

use std::rc::Rc;
use std::sync::Arc;

use crate::jit::CompiledUnit;
use crate::lua_value::{LuaClosure, LuaFunction};

/// Call status flags (equivalent to Lua's CIST_* flags)
pub mod call_status {
    /// Lua function (has bytecode)
    pub const CIST_LUA: u32 = 1 << 0;
    /// Host function
    pub const CIST_C: u32 = 1 << 1;
    /// Frame was entered through a tail call
    pub const CIST_TAIL: u32 = 1 << 2;
}

#[derive(Clone)]
pub struct CallInfo {
    /// The function being run
    pub func: LuaFunction,

    /// Executable unit when the prototype was compiled
    pub unit: Option<Arc<CompiledUnit>>,

    /// Stack index of the called value; results are copied here
    pub func_idx: usize,

    /// First register of the frame
    pub base: usize,

    /// End of the register window (base + max stack size for Lua frames)
    pub top: usize,

    /// Next instruction to execute (Lua frames only)
    pub pc: usize,

    /// Number of results the caller expects, -1 for all
    pub nresults: i32,

    /// Number of arguments passed
    pub nargs: usize,

    /// Extra arguments kept below `base` for VARARG
    pub nvarargs: usize,

    /// CIST_* flags
    pub call_status: u32,
}

impl CallInfo {
    #[inline]
    pub fn is_lua(&self) -> bool {
        self.call_status & call_status::CIST_LUA != 0
    }

    #[inline]
    pub fn is_tail(&self) -> bool {
        self.call_status & call_status::CIST_TAIL != 0
    }

    pub fn closure(&self) -> Option<&Rc<LuaClosure>> {
        match &self.func {
            LuaFunction::Lua(cl) => Some(cl),
            _ => None,
        }
    }

    /// Source line of the instruction being executed.
    pub fn current_line(&self) -> Option<u32> {
        let cl = self.closure()?;
        cl.proto.line_at(self.pc.saturating_sub(1))
    }
}
