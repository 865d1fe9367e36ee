// Call machinery (ldo.c)
// Resolves callables into call targets, sets up Lua and host frames, copies
// results back to the caller and runs nested calls for native code.

use std::mem;
use std::rc::Rc;
use std::sync::Arc;

use super::metamethod::get_metaop;
use super::{Frame, TmKind, lua_execute};
use crate::jit::CompiledUnit;
use crate::lua_value::{
    LuaClosure, LuaFunction, LuaTable, LuaValue, VARARG_NEEDSARG,
};
use crate::lua_vm::call_info::call_status::{CIST_C, CIST_LUA, CIST_TAIL};
use crate::lua_vm::lua_limits::{EXTRA_STACK, LUA_MINSTACK, MAXTAGLOOP};
use crate::lua_vm::{CallInfo, LuaError, LuaResult, LuaVM};

/// What a call site invokes, resolved once per call.
pub(crate) enum CallTarget {
    Host(LuaFunction),
    Interpreted(Rc<LuaClosure>),
    Compiled(Rc<LuaClosure>, Arc<CompiledUnit>),
    /// Value with a `__call` handler
    Meta(LuaValue),
}

/// Result of starting a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallOutcome {
    /// Host function ran to completion; results are in place
    Done,
    /// A Lua frame was pushed; the driver runs it next
    Pushed,
}

impl LuaVM {
    pub(crate) fn call_target(&self, func: &LuaValue) -> LuaResult<CallTarget> {
        match func {
            LuaValue::Function(LuaFunction::Lua(cl)) => Ok(match self.tier_up(cl)? {
                Some(unit) => CallTarget::Compiled(cl.clone(), unit),
                None => CallTarget::Interpreted(cl.clone()),
            }),
            LuaValue::Function(f) => Ok(CallTarget::Host(f.clone())),
            other => match get_metaop(self, other, TmKind::Call) {
                Some(handler) => Ok(CallTarget::Meta(handler)),
                None => Err(self.type_error(other, "call")),
            },
        }
    }

    /// Resolve the value at `func_idx`. A `__call` object is replaced by its
    /// handler and becomes the first argument.
    fn resolve_callable(&mut self, func_idx: usize, nargs: &mut usize) -> LuaResult<CallTarget> {
        for _ in 0..MAXTAGLOOP {
            let func = self.state.stack[func_idx].clone();
            match self.call_target(&func)? {
                CallTarget::Meta(handler) => {
                    self.ensure_stack(func_idx + *nargs + 2 + EXTRA_STACK)?;
                    for i in (func_idx..=func_idx + *nargs).rev() {
                        self.state.stack[i + 1] = mem::take(&mut self.state.stack[i]);
                    }
                    self.state.stack[func_idx] = handler;
                    *nargs += 1;
                    self.state.top = func_idx + 1 + *nargs;
                }
                target => return Ok(target),
            }
        }
        Err(self.error("'__call' chain too long"))
    }

    /// Start a call of the value at `func_idx` with `nargs` arguments above it.
    pub(crate) fn precall(
        &mut self,
        func_idx: usize,
        nargs: usize,
        nresults: i32,
    ) -> LuaResult<CallOutcome> {
        let mut nargs = nargs;
        match self.resolve_callable(func_idx, &mut nargs)? {
            CallTarget::Host(f) => {
                self.call_host(f, func_idx, nargs, nresults)?;
                Ok(CallOutcome::Done)
            }
            CallTarget::Interpreted(cl) => {
                self.push_lua_frame(cl, None, func_idx, nargs, nresults, 0)?;
                Ok(CallOutcome::Pushed)
            }
            CallTarget::Compiled(cl, unit) => {
                self.push_lua_frame(cl, Some(unit), func_idx, nargs, nresults, 0)?;
                Ok(CallOutcome::Pushed)
            }
            CallTarget::Meta(handler) => Err(self.type_error(&handler, "call")),
        }
    }

    fn call_depth_overflow(&self) -> LuaError {
        LuaError::StackOverflow(format!("{}stack overflow", self.where_()))
    }

    /// Establish a Lua frame: parameters start at `func_idx + 1`; variadic
    /// prototypes move their fixed parameters above the actual arguments.
    pub(crate) fn push_lua_frame(
        &mut self,
        cl: Rc<LuaClosure>,
        unit: Option<Arc<CompiledUnit>>,
        func_idx: usize,
        nargs: usize,
        nresults: i32,
        extra_status: u32,
    ) -> LuaResult<()> {
        if self.state.frames.len() >= self.option.max_call_depth {
            return Err(self.call_depth_overflow());
        }
        let proto = cl.proto.clone();
        let nfix = proto.num_params as usize;
        let max_stack = proto.max_stack_size as usize;
        let mut base = func_idx + 1;
        self.ensure_stack(base + nargs.max(nfix) + nfix + max_stack + 1 + EXTRA_STACK)?;

        let stack = &mut self.state.stack;
        for slot in &mut stack[base + nargs.min(nfix)..base + nfix] {
            *slot = LuaValue::Nil;
        }

        let mut nvarargs = 0;
        let mut live = nfix;
        if proto.is_vararg() {
            let actual = nargs.max(nfix);
            nvarargs = actual - nfix;
            let arg_table = if proto.vararg & VARARG_NEEDSARG != 0 {
                let mut t = LuaTable::with_capacity(nvarargs, 1);
                for i in 0..nvarargs {
                    t.raw_seti(i as i64 + 1, stack[base + nfix + i].clone());
                }
                // string key
                let _ = t.raw_set(LuaValue::from("n"), LuaValue::from(nvarargs));
                Some(t)
            } else {
                None
            };
            let new_base = base + actual;
            for i in 0..nfix {
                stack[new_base + i] = mem::take(&mut stack[base + i]);
            }
            if let Some(t) = arg_table {
                stack[new_base + nfix] = LuaValue::table(t);
                live += 1;
            }
            base = new_base;
        }

        let top = base + max_stack.max(live);
        for slot in &mut stack[base + live..top] {
            *slot = LuaValue::Nil;
        }
        self.state.top = top;
        self.state.frames.push(CallInfo {
            func: LuaFunction::Lua(cl),
            unit,
            func_idx,
            base,
            top,
            pc: 0,
            nresults,
            nargs,
            nvarargs,
            call_status: CIST_LUA | extra_status,
        });
        Ok(())
    }

    /// Run a host function in its own frame and move its results into place.
    pub(crate) fn call_host(
        &mut self,
        func: LuaFunction,
        func_idx: usize,
        nargs: usize,
        nresults: i32,
    ) -> LuaResult<()> {
        if self.state.frames.len() >= self.option.max_call_depth {
            return Err(self.call_depth_overflow());
        }
        let base = func_idx + 1;
        self.ensure_stack(base + nargs + LUA_MINSTACK)?;
        self.state.top = base + nargs;
        self.state.frames.push(CallInfo {
            func: func.clone(),
            unit: None,
            func_idx,
            base,
            top: base + nargs + LUA_MINSTACK,
            pc: 0,
            nresults,
            nargs,
            nvarargs: 0,
            call_status: CIST_C,
        });

        let n = match &func {
            LuaFunction::Host(f) => f(self)?,
            LuaFunction::HostClosure(hc) => (hc.func)(self)?,
            LuaFunction::Lua(_) => {
                return Err(LuaError::MalformedBytecode(
                    "Lua closure dispatched as a host function".to_string(),
                ));
            }
        };
        let n = n.min(self.state.top.saturating_sub(base));
        let first = self.state.top - n;
        self.postcall(first, n)
    }

    /// Finish the top frame: copy `n` results starting at `first` to the
    /// frame's function slot, adjusted to the number the caller wants.
    pub(crate) fn postcall(&mut self, first: usize, n: usize) -> LuaResult<()> {
        let Some(ci) = self.state.frames.pop() else {
            return Ok(());
        };
        let res = ci.func_idx;
        let wanted = if ci.nresults < 0 {
            n
        } else {
            ci.nresults as usize
        };
        self.ensure_stack(res + wanted + EXTRA_STACK)?;
        let stack = &mut self.state.stack;
        for i in 0..wanted {
            stack[res + i] = if i < n {
                mem::take(&mut stack[first + i])
            } else {
                LuaValue::Nil
            };
        }

        self.state.top = if ci.nresults < 0 {
            res + n
        } else {
            match self.state.frames.last() {
                Some(caller) if caller.is_lua() => caller.top,
                _ => res + wanted,
            }
        };
        Ok(())
    }

    /// Call the value at `func_idx` from native code and run it to completion.
    /// Nothing inside may yield across this boundary.
    pub(crate) fn call_at(&mut self, func_idx: usize, nargs: usize, nresults: i32) -> LuaResult<()> {
        if self.n_ccalls >= self.option.max_c_calls {
            return Err(LuaError::StackOverflow(format!(
                "{}C stack overflow",
                self.where_()
            )));
        }
        self.n_ccalls += 1;
        self.state.nny += 1;
        let depth = self.state.frames.len();
        let result = match self.precall(func_idx, nargs, nresults) {
            Ok(CallOutcome::Pushed) => lua_execute(self, depth),
            Ok(CallOutcome::Done) => Ok(()),
            Err(e) => Err(e),
        };
        self.state.nny -= 1;
        self.n_ccalls -= 1;
        result
    }

    /// Call any value with arguments and collect all of its results.
    pub fn call_value(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        let func_idx = self.call_base();
        let nargs = args.len();
        self.ensure_stack(func_idx + nargs + 1 + EXTRA_STACK)?;
        self.state.stack[func_idx] = func;
        for (i, arg) in args.into_iter().enumerate() {
            self.state.stack[func_idx + 1 + i] = arg;
        }
        self.state.top = func_idx + 1 + nargs;
        self.call_at(func_idx, nargs, -1)?;
        let top = self.state.top;
        let results = self.state.stack[func_idx..top]
            .iter_mut()
            .map(mem::take)
            .collect();
        self.state.top = func_idx;
        Ok(results)
    }

    /// Replace the running Lua frame by a call of `cl` (proper tail call).
    fn replace_frame(
        &mut self,
        cl: Rc<LuaClosure>,
        unit: Option<Arc<CompiledUnit>>,
        func_idx: usize,
        nargs: usize,
    ) -> LuaResult<CallOutcome> {
        let Some(ci) = self.state.frames.pop() else {
            return Err(LuaError::MalformedBytecode(
                "tail call without a running frame".to_string(),
            ));
        };
        self.state.close_upvalues(ci.base);
        let dest = ci.func_idx;
        let stack = &mut self.state.stack;
        for i in 0..=nargs {
            stack[dest + i] = mem::take(&mut stack[func_idx + i]);
        }
        self.state.top = dest + 1 + nargs;
        self.push_lua_frame(cl, unit, dest, nargs, ci.nresults, CIST_TAIL)?;
        Ok(CallOutcome::Pushed)
    }
}

// ============ Instructions ============

/// CALL A B C: R(A), ... ,R(A+C-2) := R(A)(R(A+1), ... ,R(A+B-1))
pub(crate) fn op_call(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32, c: u32) -> LuaResult<CallOutcome> {
    let func_idx = fr.reg(a);
    let nargs = if b != 0 {
        vm.state.top = func_idx + b as usize;
        b as usize - 1
    } else {
        vm.state.top - func_idx - 1
    };
    vm.precall(func_idx, nargs, c as i32 - 1)
}

/// TAILCALL A B: return R(A)(R(A+1), ... ,R(A+B-1))
///
/// A host callee runs in place and its results are returned by the RETURN
/// that follows.
pub(crate) fn op_tailcall(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32) -> LuaResult<CallOutcome> {
    let func_idx = fr.reg(a);
    let mut nargs = if b != 0 {
        vm.state.top = func_idx + b as usize;
        b as usize - 1
    } else {
        vm.state.top - func_idx - 1
    };
    match vm.resolve_callable(func_idx, &mut nargs)? {
        CallTarget::Host(f) => {
            vm.call_host(f, func_idx, nargs, -1)?;
            Ok(CallOutcome::Done)
        }
        CallTarget::Interpreted(cl) => vm.replace_frame(cl, None, func_idx, nargs),
        CallTarget::Compiled(cl, unit) => vm.replace_frame(cl, Some(unit), func_idx, nargs),
        CallTarget::Meta(handler) => Err(vm.type_error(&handler, "call")),
    }
}
