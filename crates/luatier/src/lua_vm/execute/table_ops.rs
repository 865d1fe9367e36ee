/*----------------------------------------------------------------------
  Indexing with metamethods (lvm.c luaV_gettable / luaV_settable)

  A table hit never consults the metatable. A miss (or a non-table
  operand) follows `__index` / `__newindex`: functions are called, any
  other value is indexed in turn, up to MAXTAGLOOP steps.
----------------------------------------------------------------------*/

use super::metamethod::{call_tm, get_metaop, is_function, metatable_event};
use super::TmKind;
use crate::lua_value::LuaValue;
use crate::lua_vm::lua_limits::MAXTAGLOOP;
use crate::lua_vm::{LuaResult, LuaVM};

/// `obj[key]` with `__index` resolution.
pub fn get_table(vm: &mut LuaVM, obj: &LuaValue, key: &LuaValue) -> LuaResult<LuaValue> {
    let mut current = obj.clone();
    for _ in 0..MAXTAGLOOP {
        let handler = match &current {
            LuaValue::Table(t) => {
                let t = t.borrow();
                let value = t.raw_get(key);
                if !value.is_nil() {
                    return Ok(value);
                }
                let Some(mt) = t.metatable() else {
                    return Ok(LuaValue::Nil);
                };
                match metatable_event(&mt, TmKind::Index) {
                    Some(h) => h,
                    None => return Ok(LuaValue::Nil),
                }
            }
            other => match get_metaop(vm, other, TmKind::Index) {
                Some(h) => h,
                None => return Err(vm.type_error(other, "index")),
            },
        };
        if is_function(&handler) {
            return call_tm(vm, handler, &[current, key.clone()]);
        }
        current = handler;
    }
    Err(vm.error("loop in gettable"))
}

/// `obj[key] = value` with `__newindex` resolution.
pub fn set_table(vm: &mut LuaVM, obj: &LuaValue, key: &LuaValue, value: LuaValue) -> LuaResult<()> {
    let mut current = obj.clone();
    for _ in 0..MAXTAGLOOP {
        let handler = match &current {
            LuaValue::Table(t) => {
                let handler = {
                    let tb = t.borrow();
                    match tb.metatable() {
                        Some(mt) if tb.raw_get(key).is_nil() => {
                            metatable_event(&mt, TmKind::NewIndex)
                        }
                        _ => None,
                    }
                };
                match handler {
                    Some(h) => h,
                    None => {
                        let result = t.borrow_mut().raw_set(key.clone(), value);
                        return result.map_err(|e| vm.error(e.to_string()));
                    }
                }
            }
            other => match get_metaop(vm, other, TmKind::NewIndex) {
                Some(h) => h,
                None => return Err(vm.type_error(other, "index")),
            },
        };
        if is_function(&handler) {
            call_tm(vm, handler, &[current, key.clone(), value])?;
            return Ok(());
        }
        current = handler;
    }
    Err(vm.error("loop in settable"))
}

/// Tables give their border and strings their byte length; `__len` is only
/// consulted for values with per-type metatables, which only tables and
/// strings have, so every other operand is an error.
pub fn obj_len(vm: &mut LuaVM, value: &LuaValue) -> LuaResult<LuaValue> {
    match value {
        LuaValue::Table(t) => Ok(LuaValue::from(t.borrow().len())),
        LuaValue::String(s) => Ok(LuaValue::from(s.len())),
        other => Err(vm.type_error(other, "get length of")),
    }
}
