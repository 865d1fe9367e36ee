// Lua Virtual Machine
// Global state shared by every coroutine: globals, code cache and limits.
// The running coroutine's LuaState lives in `state`; resumers wait in
// `parked` until the coroutine they resumed yields or finishes.

pub mod call_info;
mod coroutine;
mod debug_info;
pub mod execute;
mod lua_error;
pub mod lua_limits;
mod lua_state;
pub mod opcode;
mod safe_option;

use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

pub use call_info::CallInfo;
pub use debug_info::chunk_id;
pub use execute::TmKind;
pub use lua_error::{LuaError, LuaResult, RuntimeError};
pub use lua_state::LuaState;
pub use opcode::{Instruction, OpCode, OpMode};
pub use safe_option::{JitMode, SafeOption};

use crate::jit::{CodeCache, JitStats};
use crate::lua_value::{
    CFunction, HostClosure, LuaClosure, LuaFunction, LuaTable, LuaTableRef, LuaThread,
    LuaUpvalue, LuaValue, Prototype, chunk_loader,
};
use crate::stdlib::{self, Stdlib};
use lua_limits::LUA_MINSTACK;

pub struct LuaVM {
    /// State of the running coroutine (the main thread when none runs)
    pub(crate) state: LuaState,
    /// Resumers of the running coroutine, innermost last
    pub(crate) parked: Vec<LuaState>,
    pub(crate) current_thread: Option<Rc<LuaThread>>,
    pub(crate) globals: LuaTableRef,
    pub(crate) string_metatable: Option<LuaTableRef>,
    pub(crate) code_cache: Arc<CodeCache>,
    pub(crate) option: SafeOption,
    /// Values handed from `yield` to the pending `resume`
    pub(crate) yield_values: Vec<LuaValue>,
    /// Nested native re-entries across all coroutines
    pub(crate) n_ccalls: usize,
}

impl LuaVM {
    pub fn new(option: SafeOption) -> Self {
        Self::with_code_cache(option, Arc::new(CodeCache::new()))
    }

    /// Create a VM that shares compiled units with other VMs.
    pub fn with_code_cache(option: SafeOption, code_cache: Arc<CodeCache>) -> Self {
        debug!(
            jit = ?option.jit,
            max_stack = option.max_stack_size,
            max_calls = option.max_call_depth,
            "creating vm"
        );
        LuaVM {
            state: LuaState::new(std::rc::Weak::new()),
            parked: Vec::new(),
            current_thread: None,
            globals: Rc::new(std::cell::RefCell::new(LuaTable::new())),
            string_metatable: None,
            code_cache,
            option,
            yield_values: Vec::new(),
            n_ccalls: 0,
        }
    }

    pub fn option(&self) -> &SafeOption {
        &self.option
    }

    pub fn set_jit_mode(&mut self, mode: crate::lua_vm::JitMode) {
        self.option.jit = mode;
    }

    pub fn code_cache(&self) -> &Arc<CodeCache> {
        &self.code_cache
    }

    pub fn jit_stats(&self) -> JitStats {
        self.code_cache.stats()
    }

    pub fn open_stdlib(&mut self, lib: Stdlib) -> LuaResult<()> {
        stdlib::open_lib(self, lib)
    }

    // ============ Globals and values ============

    pub fn globals(&self) -> LuaTableRef {
        self.globals.clone()
    }

    pub fn get_global(&self, name: &str) -> LuaValue {
        self.globals.borrow().raw_get_str(name)
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        // string keys are never nil or NaN
        let _ = self.globals.borrow_mut().raw_set(LuaValue::from(name), value);
    }

    pub fn register_function(&mut self, name: &str, func: CFunction) {
        self.set_global(name, LuaValue::cfunction(func));
    }

    pub fn create_table(&self, narray: usize, nhash: usize) -> LuaValue {
        LuaValue::table(LuaTable::with_capacity(narray, nhash))
    }

    pub fn create_host_closure(&self, func: CFunction, upvalues: Vec<LuaValue>) -> LuaValue {
        LuaValue::Function(LuaFunction::HostClosure(Rc::new(HostClosure { func, upvalues })))
    }

    /// Metatable shared by all strings (consulted for `__index` and friends).
    pub fn set_string_metatable(&mut self, metatable: Option<LuaTableRef>) {
        self.string_metatable = metatable;
    }

    // ============ Loading ============

    /// Check a prototype and wrap it in a closure over the globals table.
    pub fn load(&mut self, proto: Arc<Prototype>) -> LuaResult<LuaValue> {
        opcode::verify_prototype(&proto).map_err(LuaError::MalformedBytecode)?;
        let upvalues = (0..proto.num_upvalues)
            .map(|_| LuaUpvalue::closed(LuaValue::Nil))
            .collect();
        let closure = LuaClosure::new(proto, upvalues, self.globals.clone());
        Ok(LuaValue::from(Rc::new(closure)))
    }

    /// Load a precompiled Lua 5.1 binary chunk.
    pub fn load_binary(&mut self, bytes: &[u8]) -> LuaResult<LuaValue> {
        let proto = chunk_loader::load_binary(bytes)?;
        self.load(proto)
    }

    /// Load and run a prototype as a main chunk.
    pub fn execute(&mut self, proto: Arc<Prototype>) -> LuaResult<Vec<LuaValue>> {
        let main = self.load(proto)?;
        self.call(main, Vec::new())
    }

    // ============ Calling ============

    /// Call a value. On failure the error carries a traceback and the VM is
    /// left as it was before the call.
    pub fn call(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        let depth = self.state.frames.len();
        let boundary = self.call_base();
        match self.call_value(func, args) {
            Ok(results) => Ok(results),
            Err(mut err) => {
                if let LuaError::Runtime(e) = &mut err
                    && e.traceback.is_none()
                {
                    e.traceback = Some(self.traceback());
                }
                debug!(error = %err, "call failed");
                self.unwind(depth, boundary);
                Err(err)
            }
        }
    }

    /// Protected call: errors become `(false, error_value)`.
    pub fn pcall(&mut self, func: LuaValue, args: Vec<LuaValue>) -> (bool, Vec<LuaValue>) {
        let depth = self.state.frames.len();
        let boundary = self.call_base();
        match self.call_value(func, args) {
            Ok(results) => (true, results),
            Err(err) => {
                self.unwind(depth, boundary);
                (false, vec![err.into_value()])
            }
        }
    }

    /// Drop frames above `depth` after an error, closing their upvalues.
    pub(crate) fn unwind(&mut self, depth: usize, boundary: usize) {
        self.state.close_upvalues(boundary);
        self.state.frames.truncate(depth);
        self.state.top = boundary;
    }

    // ============ Host function API ============

    /// Number of arguments passed to the running host function.
    pub fn arg_count(&self) -> usize {
        self.state.frames.last().map_or(0, |ci| ci.nargs)
    }

    /// Argument `i` (1-based) of the running host function, nil if absent.
    pub fn get_arg(&self, i: usize) -> LuaValue {
        match self.state.frames.last() {
            Some(ci) if i >= 1 && i <= ci.nargs => self.state.stack[ci.base + i - 1].clone(),
            _ => LuaValue::Nil,
        }
    }

    pub fn args(&self) -> Vec<LuaValue> {
        match self.state.frames.last() {
            Some(ci) => self.state.stack[ci.base..ci.base + ci.nargs].to_vec(),
            None => Vec::new(),
        }
    }

    /// Push a result of the running host function.
    pub fn push_value(&mut self, value: LuaValue) -> LuaResult<()> {
        let top = self.state.top;
        self.ensure_stack(top + 1 + LUA_MINSTACK)?;
        self.state.stack[top] = value;
        self.state.top = top + 1;
        Ok(())
    }

    /// Push several results and return how many were pushed.
    pub fn push_values(&mut self, values: Vec<LuaValue>) -> LuaResult<usize> {
        let n = values.len();
        for v in values {
            self.push_value(v)?;
        }
        Ok(n)
    }

    /// Captured value `i` (0-based) of the running host closure.
    pub fn host_upvalue(&self, i: usize) -> LuaValue {
        match self.state.frames.last().map(|ci| &ci.func) {
            Some(LuaFunction::HostClosure(hc)) => hc.upvalues.get(i).cloned().unwrap_or_default(),
            _ => LuaValue::Nil,
        }
    }

    /// Grow the running stack to `needed` slots or fail with a stack overflow.
    pub(crate) fn ensure_stack(&mut self, needed: usize) -> LuaResult<()> {
        if self.state.grow_stack(needed, self.option.max_stack_size) {
            Ok(())
        } else {
            Err(LuaError::StackOverflow(format!("{}stack overflow", self.where_())))
        }
    }

    /// First free slot a nested call may use without clobbering live registers.
    pub(crate) fn call_base(&self) -> usize {
        match self.state.frames.last() {
            Some(ci) if ci.is_lua() => self.state.top.max(ci.top),
            _ => self.state.top,
        }
    }
}
