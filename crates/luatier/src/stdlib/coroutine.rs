// Coroutine library
// Implements: create, resume, yield, status, running, wrap, isyieldable

use std::rc::Rc;

use crate::lib_registry::{LibraryModule, require_arg};
use crate::lua_value::{LuaThread, LuaValue};
use crate::lua_vm::{LuaError, LuaResult, LuaVM};

pub fn create_coroutine_lib() -> LibraryModule {
    crate::lib_module!("coroutine", {
        "create" => coroutine_create,
        "resume" => coroutine_resume,
        "yield" => coroutine_yield,
        "status" => coroutine_status,
        "running" => coroutine_running,
        "wrap" => coroutine_wrap,
        "isyieldable" => coroutine_isyieldable,
    })
}

fn require_thread(vm: &LuaVM, index: usize, func_name: &str) -> LuaResult<Rc<LuaThread>> {
    match vm.get_arg(index).as_thread() {
        Some(th) => Ok(th.clone()),
        None => Err(vm.arg_error(index, func_name, "coroutine expected")),
    }
}

fn new_thread(vm: &mut LuaVM, func_name: &str) -> LuaResult<Rc<LuaThread>> {
    let func = require_arg(vm, 1, func_name)?;
    if func.as_closure().is_none() {
        return Err(vm.arg_error(1, func_name, "Lua function expected"));
    }
    vm.create_thread(func)
}

fn coroutine_create(vm: &mut LuaVM) -> LuaResult<usize> {
    let th = new_thread(vm, "create")?;
    vm.push_value(LuaValue::from(th))?;
    Ok(1)
}

fn coroutine_resume(vm: &mut LuaVM) -> LuaResult<usize> {
    let th = require_thread(vm, 1, "resume")?;
    let args = vm.args().split_off(1);
    let (ok, results) = vm.resume(&th, args)?;
    vm.push_value(LuaValue::from(ok))?;
    Ok(1 + vm.push_values(results)?)
}

fn coroutine_yield(vm: &mut LuaVM) -> LuaResult<usize> {
    let values = vm.args();
    Err(vm.yield_with(values))
}

fn coroutine_status(vm: &mut LuaVM) -> LuaResult<usize> {
    let th = require_thread(vm, 1, "status")?;
    vm.push_value(LuaValue::from(th.status().as_str()))?;
    Ok(1)
}

/// The running coroutine, or nil on the main thread.
fn coroutine_running(vm: &mut LuaVM) -> LuaResult<usize> {
    let value = vm.running_thread().map_or(LuaValue::Nil, LuaValue::from);
    vm.push_value(value)?;
    Ok(1)
}

fn coroutine_wrap(vm: &mut LuaVM) -> LuaResult<usize> {
    let th = new_thread(vm, "wrap")?;
    let wrapper = vm.create_host_closure(wrap_aux, vec![LuaValue::from(th)]);
    vm.push_value(wrapper)?;
    Ok(1)
}

/// Body of a `coroutine.wrap` function: resume and raise errors in the caller.
fn wrap_aux(vm: &mut LuaVM) -> LuaResult<usize> {
    let Some(th) = vm.host_upvalue(0).as_thread().cloned() else {
        return Err(vm.error("wrapped coroutine is missing"));
    };
    let args = vm.args();
    let (ok, results) = vm.resume(&th, args)?;
    if !ok {
        let err = results.into_iter().next().unwrap_or_default();
        return Err(LuaError::runtime(err));
    }
    vm.push_values(results)
}

fn coroutine_isyieldable(vm: &mut LuaVM) -> LuaResult<usize> {
    let yieldable = vm.is_yieldable();
    vm.push_value(LuaValue::from(yieldable))?;
    Ok(1)
}
