// Coroutines
// Resuming swaps the coroutine's state into the VM and parks the resumer's
// state; yielding unwinds the native stack back to `resume` with
// `LuaError::Yield` while the coroutine's frames stay on its own frame
// stack. The yielding host frame is completed by the next resume.

use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::Rc;

use tracing::trace;

use super::execute::{CallOutcome, lua_execute};
use super::lua_limits::EXTRA_STACK;
use super::{LuaError, LuaResult, LuaState, LuaVM};
use crate::lua_value::{CoroutineStatus, LuaThread, LuaValue};

impl LuaVM {
    /// Create a suspended coroutine with `func` as its body.
    pub fn create_thread(&mut self, func: LuaValue) -> LuaResult<Rc<LuaThread>> {
        if func.as_closure().is_none() {
            return Err(self.error("Lua function expected"));
        }
        let thread = Rc::new_cyclic(|weak| {
            let mut state = LuaState::new(weak.clone());
            state.stack[0] = func;
            state.top = 1;
            LuaThread {
                id: state.id,
                state: RefCell::new(state),
                status: Cell::new(CoroutineStatus::Suspended),
                parent: RefCell::new(None),
            }
        });
        trace!(thread = ?thread.id, "coroutine created");
        Ok(thread)
    }

    /// The running coroutine, `None` on the main thread.
    pub fn running_thread(&self) -> Option<Rc<LuaThread>> {
        self.current_thread.clone()
    }

    /// Whether `coroutine.yield` is allowed at this point.
    pub fn is_yieldable(&self) -> bool {
        self.current_thread.is_some() && self.state.nny == 0
    }

    /// Resume a coroutine. Returns `(true, values)` with the values it yielded
    /// or returned, or `(false, [error])` when it failed or cannot be resumed.
    pub fn resume(
        &mut self,
        thread: &Rc<LuaThread>,
        args: Vec<LuaValue>,
    ) -> LuaResult<(bool, Vec<LuaValue>)> {
        match thread.status() {
            CoroutineStatus::Suspended => {}
            CoroutineStatus::Dead => {
                return Ok((false, vec![LuaValue::from("cannot resume dead coroutine")]));
            }
            _ => {
                return Ok((
                    false,
                    vec![LuaValue::from("cannot resume non-suspended coroutine")],
                ));
            }
        }
        if self.n_ccalls >= self.option.max_c_calls {
            return Ok((false, vec![LuaValue::from("C stack overflow")]));
        }

        let coroutine_state = mem::take(&mut *thread.state.borrow_mut());
        let resumer_state = mem::replace(&mut self.state, coroutine_state);
        self.parked.push(resumer_state);
        let resumer = self.current_thread.replace(thread.clone());
        if let Some(prev) = &resumer {
            prev.status.set(CoroutineStatus::Normal);
        }
        *thread.parent.borrow_mut() = resumer.as_ref().map(Rc::downgrade);
        thread.status.set(CoroutineStatus::Running);
        trace!(thread = ?thread.id, nargs = args.len(), "resume");

        self.n_ccalls += 1;
        let outcome = self.run_coroutine(args);
        self.n_ccalls -= 1;

        let resumer_state = self.parked.pop().unwrap_or_default();
        let coroutine_state = mem::replace(&mut self.state, resumer_state);
        *thread.state.borrow_mut() = coroutine_state;
        self.current_thread = resumer;
        if let Some(prev) = &self.current_thread {
            prev.status.set(CoroutineStatus::Running);
        }

        match outcome {
            Ok(values) => {
                thread.status.set(CoroutineStatus::Dead);
                trace!(thread = ?thread.id, "coroutine finished");
                Ok((true, values))
            }
            Err(LuaError::Yield) => {
                thread.status.set(CoroutineStatus::Suspended);
                Ok((true, mem::take(&mut self.yield_values)))
            }
            Err(err) => {
                thread.status.set(CoroutineStatus::Dead);
                thread.state.borrow_mut().reset();
                trace!(thread = ?thread.id, error = %err, "coroutine failed");
                Ok((false, vec![err.into_value()]))
            }
        }
    }

    /// Run the swapped-in coroutine until it returns or yields.
    fn run_coroutine(&mut self, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        let nargs = args.len();
        if self.state.frames.is_empty() {
            // first resume: the body sits in slot 0
            self.ensure_stack(1 + nargs + EXTRA_STACK)?;
            for (i, arg) in args.into_iter().enumerate() {
                self.state.stack[1 + i] = arg;
            }
            self.state.top = 1 + nargs;
            if self.precall(0, nargs, -1)? == CallOutcome::Pushed {
                lua_execute(self, 0)?;
            }
        } else {
            // the host frame that yielded returns the resume arguments
            let first = self.state.top;
            self.ensure_stack(first + nargs + EXTRA_STACK)?;
            for (i, arg) in args.into_iter().enumerate() {
                self.state.stack[first + i] = arg;
            }
            self.state.top = first + nargs;
            self.postcall(first, nargs)?;
            lua_execute(self, 0)?;
        }
        let top = self.state.top;
        let results = self.state.stack[..top].iter_mut().map(mem::take).collect();
        self.state.top = 0;
        Ok(results)
    }

    /// Suspend the running coroutine, handing `values` to its resumer.
    /// The returned error must be propagated by the calling host function.
    pub fn yield_with(&mut self, values: Vec<LuaValue>) -> LuaError {
        if self.current_thread.is_none() {
            return self.error("attempt to yield from outside a coroutine");
        }
        if self.state.nny > 0 {
            return self.error("attempt to yield across metamethod/C-call boundary");
        }
        self.yield_values = values;
        LuaError::Yield
    }
}
