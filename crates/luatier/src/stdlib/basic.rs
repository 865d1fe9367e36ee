// Basic library (_G global functions)
// Implements: assert, error, pcall, select, type, tostring, tonumber,
// rawequal, rawget, rawset, setmetatable, getmetatable, next, pairs,
// ipairs, unpack, print

use crate::lib_registry::{LibraryModule, opt_number, require_arg, require_number, require_table};
use crate::lua_value::LuaValue;
use crate::lua_vm::execute::get_metatable;
use crate::lua_vm::{LuaError, LuaResult, LuaVM, RuntimeError};

pub fn create_basic_lib() -> LibraryModule {
    crate::lib_module!("_G", {
        "assert" => lua_assert,
        "error" => lua_error,
        "pcall" => lua_pcall,
        "select" => lua_select,
        "type" => lua_type,
        "tostring" => lua_tostring,
        "tonumber" => lua_tonumber,
        "rawequal" => lua_rawequal,
        "rawget" => lua_rawget,
        "rawset" => lua_rawset,
        "setmetatable" => lua_setmetatable,
        "getmetatable" => lua_getmetatable,
        "next" => lua_next,
        "pairs" => lua_pairs,
        "ipairs" => lua_ipairs,
        "unpack" => lua_unpack,
        "print" => lua_print,
    })
    .with_value("_VERSION", |_| LuaValue::from("Lua 5.1"))
}

/// `tostring` conversion, honouring `__tostring`.
pub fn tostring(vm: &mut LuaVM, value: &LuaValue) -> LuaResult<LuaValue> {
    if let Some(mt) = get_metatable(vm, value) {
        let handler = mt.borrow().raw_get_str("__tostring");
        if !handler.is_nil() {
            let results = vm.call_value(handler, vec![value.clone()])?;
            return Ok(results.into_iter().next().unwrap_or_default());
        }
    }
    Ok(match value {
        LuaValue::String(_) => value.clone(),
        other => LuaValue::from(other.to_string()),
    })
}

fn lua_assert(vm: &mut LuaVM) -> LuaResult<usize> {
    let condition = require_arg(vm, 1, "assert")?;
    if condition.is_falsy() {
        let message = vm.get_arg(2);
        if message.is_nil() {
            return Err(LuaError::runtime("assertion failed!"));
        }
        return Err(LuaError::runtime(message));
    }
    let args = vm.args();
    vm.push_values(args)
}

/// error(message [, level])
fn lua_error(vm: &mut LuaVM) -> LuaResult<usize> {
    let value = vm.get_arg(1);
    let level = opt_number(vm, 2, "error", 1.0)? as usize;
    match &value {
        LuaValue::String(s) if level > 0 => Err(LuaError::runtime(format!(
            "{}{}",
            vm.where_at_level(level),
            s.as_str()
        ))),
        _ => Err(LuaError::Runtime(RuntimeError::new(value))),
    }
}

/// pcall(f, ...) - the call runs behind a non-yieldable boundary
fn lua_pcall(vm: &mut LuaVM) -> LuaResult<usize> {
    let func = require_arg(vm, 1, "pcall")?;
    let args = vm.args().split_off(1);
    let (ok, results) = vm.pcall(func, args);
    vm.push_value(LuaValue::from(ok))?;
    Ok(1 + vm.push_values(results)?)
}

/// select(n, ...) / select('#', ...)
fn lua_select(vm: &mut LuaVM) -> LuaResult<usize> {
    let n = vm.arg_count() as i64;
    if vm.get_arg(1).as_str() == Some("#") {
        vm.push_value(LuaValue::from(n - 1))?;
        return Ok(1);
    }
    let mut i = require_number(vm, 1, "select")? as i64;
    if i < 0 {
        i += n;
    } else if i > n {
        i = n;
    }
    if i < 1 {
        return Err(vm.arg_error(1, "select", "index out of range"));
    }
    let rest = vm.args().split_off(i as usize);
    vm.push_values(rest)
}

fn lua_type(vm: &mut LuaVM) -> LuaResult<usize> {
    let value = require_arg(vm, 1, "type")?;
    vm.push_value(LuaValue::from(value.type_name()))?;
    Ok(1)
}

fn lua_tostring(vm: &mut LuaVM) -> LuaResult<usize> {
    let value = require_arg(vm, 1, "tostring")?;
    let s = tostring(vm, &value)?;
    vm.push_value(s)?;
    Ok(1)
}

/// tonumber(e [, base])
fn lua_tonumber(vm: &mut LuaVM) -> LuaResult<usize> {
    let base = opt_number(vm, 2, "tonumber", 10.0)? as u32;
    let value = vm.get_arg(1);
    let result = if base == 10 {
        value.to_number()
    } else {
        if !(2..=36).contains(&base) {
            return Err(vm.arg_error(2, "tonumber", "base out of range"));
        }
        let Some(s) = value.to_lua_string() else {
            return Err(vm.arg_error(
                1,
                "tonumber",
                format!("string expected, got {}", value.type_name()),
            ));
        };
        i64::from_str_radix(s.as_str().trim(), base)
            .ok()
            .map(|n| n as f64)
    };
    vm.push_value(result.map_or(LuaValue::Nil, LuaValue::Number))?;
    Ok(1)
}

fn lua_rawequal(vm: &mut LuaVM) -> LuaResult<usize> {
    let a = require_arg(vm, 1, "rawequal")?;
    let b = require_arg(vm, 2, "rawequal")?;
    vm.push_value(LuaValue::from(a.raw_equals(&b)))?;
    Ok(1)
}

fn lua_rawget(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = require_table(vm, 1, "rawget")?;
    let key = require_arg(vm, 2, "rawget")?;
    let value = t.borrow().raw_get(&key);
    vm.push_value(value)?;
    Ok(1)
}

fn lua_rawset(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = require_table(vm, 1, "rawset")?;
    let key = require_arg(vm, 2, "rawset")?;
    let value = require_arg(vm, 3, "rawset")?;
    t.borrow_mut()
        .raw_set(key, value)
        .map_err(|e| vm.error(e.to_string()))?;
    vm.push_value(LuaValue::Table(t))?;
    Ok(1)
}

fn lua_setmetatable(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = require_table(vm, 1, "setmetatable")?;
    let mt = match vm.get_arg(2) {
        LuaValue::Nil => None,
        LuaValue::Table(mt) => Some(mt),
        _ => return Err(vm.arg_error(2, "setmetatable", "nil or table expected")),
    };
    let protected = t
        .borrow()
        .metatable()
        .is_some_and(|old| !old.borrow().raw_get_str("__metatable").is_nil());
    if protected {
        return Err(vm.error("cannot change a protected metatable"));
    }
    t.borrow_mut().set_metatable(mt);
    vm.push_value(LuaValue::Table(t))?;
    Ok(1)
}

fn lua_getmetatable(vm: &mut LuaVM) -> LuaResult<usize> {
    let value = require_arg(vm, 1, "getmetatable")?;
    let result = match get_metatable(vm, &value) {
        Some(mt) => {
            let guard = mt.borrow().raw_get_str("__metatable");
            if guard.is_nil() {
                LuaValue::Table(mt)
            } else {
                guard
            }
        }
        None => LuaValue::Nil,
    };
    vm.push_value(result)?;
    Ok(1)
}

fn lua_next(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = require_table(vm, 1, "next")?;
    let key = vm.get_arg(2);
    let entry = t.borrow().next(&key);
    match entry {
        Ok(Some((k, v))) => {
            vm.push_value(k)?;
            vm.push_value(v)?;
            Ok(2)
        }
        Ok(None) => {
            vm.push_value(LuaValue::Nil)?;
            Ok(1)
        }
        Err(()) => Err(vm.error("invalid key to 'next'")),
    }
}

fn lua_pairs(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = require_table(vm, 1, "pairs")?;
    vm.push_value(LuaValue::cfunction(lua_next))?;
    vm.push_value(LuaValue::Table(t))?;
    vm.push_value(LuaValue::Nil)?;
    Ok(3)
}

fn ipairs_aux(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = require_table(vm, 1, "ipairs")?;
    let i = require_number(vm, 2, "ipairs")? as i64 + 1;
    let value = t.borrow().raw_geti(i);
    if value.is_nil() {
        return Ok(0);
    }
    vm.push_value(LuaValue::from(i))?;
    vm.push_value(value)?;
    Ok(2)
}

fn lua_ipairs(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = require_table(vm, 1, "ipairs")?;
    vm.push_value(LuaValue::cfunction(ipairs_aux))?;
    vm.push_value(LuaValue::Table(t))?;
    vm.push_value(LuaValue::from(0))?;
    Ok(3)
}

/// unpack(t [, i [, j]])
fn lua_unpack(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = require_table(vm, 1, "unpack")?;
    let i = opt_number(vm, 2, "unpack", 1.0)? as i64;
    let j = if vm.get_arg(3).is_nil() {
        t.borrow().len() as i64
    } else {
        require_number(vm, 3, "unpack")? as i64
    };
    if i > j {
        return Ok(0);
    }
    if j - i >= vm.option().max_stack_size as i64 {
        return Err(vm.error("too many results to unpack"));
    }
    let values: Vec<LuaValue> = {
        let t = t.borrow();
        (i..=j).map(|k| t.raw_geti(k)).collect()
    };
    vm.push_values(values)
}

fn lua_print(vm: &mut LuaVM) -> LuaResult<usize> {
    let args = vm.args();
    let mut parts = Vec::with_capacity(args.len());
    for arg in &args {
        let s = tostring(vm, arg)?;
        match s {
            LuaValue::String(s) => parts.push(s.as_str().to_string()),
            _ => return Err(vm.error("'tostring' must return a string to 'print'")),
        }
    }
    println!("{}", parts.join("\t"));
    Ok(0)
}
