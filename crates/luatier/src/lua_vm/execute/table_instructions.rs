/// Table and global access instructions
use super::Frame;
use super::table_ops::{get_table, obj_len, set_table};
use crate::lua_value::{LuaTable, LuaValue};
use crate::lua_vm::lua_limits::LFIELDS_PER_FLUSH;
use crate::lua_vm::opcode::fb2int;
use crate::lua_vm::{LuaResult, LuaVM};

/// GETGLOBAL A Bx
/// R(A) := Gbl[Kst(Bx)]
pub(crate) fn op_getglobal(vm: &mut LuaVM, fr: &Frame, a: u32, bx: u32) -> LuaResult<()> {
    let env = LuaValue::Table(fr.closure.env.clone());
    let key = fr.constant(bx);
    let value = get_table(vm, &env, &key)?;
    vm.state.stack[fr.reg(a)] = value;
    Ok(())
}

/// SETGLOBAL A Bx
/// Gbl[Kst(Bx)] := R(A)
pub(crate) fn op_setglobal(vm: &mut LuaVM, fr: &Frame, a: u32, bx: u32) -> LuaResult<()> {
    let env = LuaValue::Table(fr.closure.env.clone());
    let key = fr.constant(bx);
    let value = vm.state.stack[fr.reg(a)].clone();
    set_table(vm, &env, &key, value)
}

/// GETTABLE A B C
/// R(A) := R(B)[RK(C)]
pub(crate) fn op_gettable(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32, c: u32) -> LuaResult<()> {
    let obj = vm.state.stack[fr.reg(b)].clone();
    let key = fr.rk(vm, c);
    // fast path: plain table hit
    if let LuaValue::Table(t) = &obj {
        let value = t.borrow().raw_get(&key);
        if !value.is_nil() {
            vm.state.stack[fr.reg(a)] = value;
            return Ok(());
        }
    }
    let value = get_table(vm, &obj, &key)?;
    vm.state.stack[fr.reg(a)] = value;
    Ok(())
}

/// SETTABLE A B C
/// R(A)[RK(B)] := RK(C)
pub(crate) fn op_settable(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32, c: u32) -> LuaResult<()> {
    let obj = vm.state.stack[fr.reg(a)].clone();
    let key = fr.rk(vm, b);
    let value = fr.rk(vm, c);
    set_table(vm, &obj, &key, value)
}

/// NEWTABLE A B C
/// R(A) := {} (size = B,C)
pub(crate) fn op_newtable(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32, c: u32) {
    let table = LuaTable::with_capacity(fb2int(b), fb2int(c));
    vm.state.stack[fr.reg(a)] = LuaValue::table(table);
}

/// SELF A B C
/// R(A+1) := R(B); R(A) := R(B)[RK(C)]
pub(crate) fn op_self(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32, c: u32) -> LuaResult<()> {
    let obj = vm.state.stack[fr.reg(b)].clone();
    let key = fr.rk(vm, c);
    vm.state.stack[fr.reg(a) + 1] = obj.clone();
    let method = get_table(vm, &obj, &key)?;
    vm.state.stack[fr.reg(a)] = method;
    Ok(())
}

/// SETLIST A B C
/// R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B
///
/// `batch` is C, or the following code word when C is 0.
pub(crate) fn op_setlist(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32, batch: u32) -> LuaResult<()> {
    let ra = fr.reg(a);
    let n = if b == 0 {
        vm.state.top - ra - 1
    } else {
        b as usize
    };
    let LuaValue::Table(t) = &vm.state.stack[ra] else {
        return Err(vm.error("SETLIST target is not a table"));
    };
    let t = t.clone();
    let offset = (batch as usize).saturating_sub(1) * LFIELDS_PER_FLUSH;
    {
        let mut table = t.borrow_mut();
        for i in 1..=n {
            let value = vm.state.stack[ra + i].clone();
            table.raw_seti((offset + i) as i64, value);
        }
    }
    if b == 0
        && let Some(ci) = vm.state.frames.last()
    {
        vm.state.top = ci.top;
    }
    Ok(())
}

/// LEN A B
/// R(A) := length of R(B)
pub(crate) fn op_len(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32) -> LuaResult<()> {
    let value = vm.state.stack[fr.reg(b)].clone();
    let len = obj_len(vm, &value)?;
    vm.state.stack[fr.reg(a)] = len;
    Ok(())
}
