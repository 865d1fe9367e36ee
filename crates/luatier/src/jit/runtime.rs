// Runtime helpers called from native code
// Every helper has the signature `(ctx, pc, a, b, c) -> i64`, runs one op
// with the shared op semantics and reports how control continues:
//   -1  error, stored in the context
//    0  fall through
//    1  test skipped the next instruction / loop jump taken
//    2  the frame changed (call pushed, tail call, return)
// Panics never cross the native frames: they are caught and reported as
// errors.

use std::panic::{AssertUnwindSafe, catch_unwind};

use super::CompiledUnit;
use super::lower::LoweredOp;
use crate::lua_vm::execute::arithmetic_instructions::{op_arith, op_unm};
use crate::lua_vm::execute::call::{op_call, op_tailcall};
use crate::lua_vm::execute::closure_handler::{op_closure, op_vararg};
use crate::lua_vm::execute::comparison_ops::{op_eq, op_le, op_lt, op_test, op_testset};
use crate::lua_vm::execute::concat::op_concat;
use crate::lua_vm::execute::load_instructions::{
    op_loadbool, op_loadk, op_loadnil, op_move, op_not,
};
use crate::lua_vm::execute::loop_instructions::{op_forloop, op_forprep, op_tforloop};
use crate::lua_vm::execute::return_handler::op_return;
use crate::lua_vm::execute::table_instructions::{
    op_getglobal, op_gettable, op_len, op_newtable, op_self, op_setglobal, op_setlist, op_settable,
};
use crate::lua_vm::execute::upvalue_instructions::{op_close, op_getupval, op_setupval};
use crate::lua_vm::execute::{ArithOp, CallOutcome, Frame};
use crate::lua_vm::{LuaError, LuaResult, LuaVM};

pub(crate) const STATUS_ERROR: i64 = -1;
pub(crate) const STATUS_NEXT: i64 = 0;
pub(crate) const STATUS_TAKEN: i64 = 1;
pub(crate) const STATUS_FRAME: i64 = 2;
/// Entry pc is not a re-entry point of the unit
pub(crate) const STATUS_BAD_ENTRY: i64 = 3;

/// State shared between `native::run` and the helpers for one activation.
#[repr(C)]
pub(crate) struct NativeContext {
    pub(crate) vm: *mut LuaVM,
    pub(crate) frame: *const Frame,
    pub(crate) unit: *const CompiledUnit,
    pub(crate) error: Option<LuaError>,
}

pub(crate) type HelperFn = extern "C" fn(*mut NativeContext, i64, i64, i64, i64) -> i64;

fn step(
    ctx: *mut NativeContext,
    pc: i64,
    f: impl FnOnce(&mut LuaVM, &Frame, &CompiledUnit) -> LuaResult<i64>,
) -> i64 {
    // SAFETY: `native::run` passes a context that outlives the native call;
    // its pointers are live and not aliased while a helper runs.
    let ctx = unsafe { &mut *ctx };
    let (vm, frame, unit) = unsafe { (&mut *ctx.vm, &*ctx.frame, &*ctx.unit) };
    vm.save_pc(pc as usize + 1);
    match catch_unwind(AssertUnwindSafe(|| f(vm, frame, unit))) {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => {
            ctx.error = Some(err);
            STATUS_ERROR
        }
        Err(_) => {
            ctx.error = Some(LuaError::MalformedBytecode(format!(
                "panic in compiled code at pc {}",
                pc
            )));
            STATUS_ERROR
        }
    }
}

#[inline]
fn flag(b: bool) -> i64 {
    if b { STATUS_TAKEN } else { STATUS_NEXT }
}

#[inline]
fn outcome(o: CallOutcome) -> i64 {
    match o {
        CallOutcome::Done => STATUS_NEXT,
        CallOutcome::Pushed => STATUS_FRAME,
    }
}

macro_rules! helper {
    ($name:ident, |$vm:ident, $fr:ident, $unit:ident, $pc:ident, $a:ident, $b:ident, $c:ident| $body:expr) => {
        #[allow(unused_variables)]
        pub(crate) extern "C" fn $name(ctx: *mut NativeContext, $pc: i64, $a: i64, $b: i64, $c: i64) -> i64 {
            step(ctx, $pc, |$vm, $fr, $unit| {
                let ($a, $b, $c) = ($a as u32, $b as u32, $c as u32);
                $body
            })
        }
    };
}

helper!(rt_move, |vm, fr, unit, pc, a, b, c| {
    op_move(vm, fr, a, b);
    Ok(STATUS_NEXT)
});
helper!(rt_loadk, |vm, fr, unit, pc, a, b, c| {
    op_loadk(vm, fr, a, b);
    Ok(STATUS_NEXT)
});
helper!(rt_loadbool, |vm, fr, unit, pc, a, b, c| {
    op_loadbool(vm, fr, a, b);
    Ok(STATUS_NEXT)
});
helper!(rt_loadnil, |vm, fr, unit, pc, a, b, c| {
    op_loadnil(vm, fr, a, b);
    Ok(STATUS_NEXT)
});
helper!(rt_getupval, |vm, fr, unit, pc, a, b, c| {
    op_getupval(vm, fr, a, b);
    Ok(STATUS_NEXT)
});
helper!(rt_getglobal, |vm, fr, unit, pc, a, b, c| {
    op_getglobal(vm, fr, a, b)?;
    Ok(STATUS_NEXT)
});
helper!(rt_gettable, |vm, fr, unit, pc, a, b, c| {
    op_gettable(vm, fr, a, b, c)?;
    Ok(STATUS_NEXT)
});
helper!(rt_setglobal, |vm, fr, unit, pc, a, b, c| {
    op_setglobal(vm, fr, a, b)?;
    Ok(STATUS_NEXT)
});
helper!(rt_setupval, |vm, fr, unit, pc, a, b, c| {
    op_setupval(vm, fr, a, b);
    Ok(STATUS_NEXT)
});
helper!(rt_settable, |vm, fr, unit, pc, a, b, c| {
    op_settable(vm, fr, a, b, c)?;
    Ok(STATUS_NEXT)
});
helper!(rt_newtable, |vm, fr, unit, pc, a, b, c| {
    op_newtable(vm, fr, a, b, c);
    Ok(STATUS_NEXT)
});
helper!(rt_self, |vm, fr, unit, pc, a, b, c| {
    op_self(vm, fr, a, b, c)?;
    Ok(STATUS_NEXT)
});
helper!(rt_add, |vm, fr, unit, pc, a, b, c| {
    op_arith(vm, fr, ArithOp::Add, a, b, c)?;
    Ok(STATUS_NEXT)
});
helper!(rt_sub, |vm, fr, unit, pc, a, b, c| {
    op_arith(vm, fr, ArithOp::Sub, a, b, c)?;
    Ok(STATUS_NEXT)
});
helper!(rt_mul, |vm, fr, unit, pc, a, b, c| {
    op_arith(vm, fr, ArithOp::Mul, a, b, c)?;
    Ok(STATUS_NEXT)
});
helper!(rt_div, |vm, fr, unit, pc, a, b, c| {
    op_arith(vm, fr, ArithOp::Div, a, b, c)?;
    Ok(STATUS_NEXT)
});
helper!(rt_mod, |vm, fr, unit, pc, a, b, c| {
    op_arith(vm, fr, ArithOp::Mod, a, b, c)?;
    Ok(STATUS_NEXT)
});
helper!(rt_pow, |vm, fr, unit, pc, a, b, c| {
    op_arith(vm, fr, ArithOp::Pow, a, b, c)?;
    Ok(STATUS_NEXT)
});
helper!(rt_unm, |vm, fr, unit, pc, a, b, c| {
    op_unm(vm, fr, a, b)?;
    Ok(STATUS_NEXT)
});
helper!(rt_not, |vm, fr, unit, pc, a, b, c| {
    op_not(vm, fr, a, b);
    Ok(STATUS_NEXT)
});
helper!(rt_len, |vm, fr, unit, pc, a, b, c| {
    op_len(vm, fr, a, b)?;
    Ok(STATUS_NEXT)
});
helper!(rt_concat, |vm, fr, unit, pc, a, b, c| {
    op_concat(vm, fr, a, b, c)?;
    Ok(STATUS_NEXT)
});
helper!(rt_eq, |vm, fr, unit, pc, a, b, c| Ok(flag(op_eq(vm, fr, a, b, c)?)));
helper!(rt_lt, |vm, fr, unit, pc, a, b, c| Ok(flag(op_lt(vm, fr, a, b, c)?)));
helper!(rt_le, |vm, fr, unit, pc, a, b, c| Ok(flag(op_le(vm, fr, a, b, c)?)));
helper!(rt_test, |vm, fr, unit, pc, a, b, c| Ok(flag(op_test(vm, fr, a, c))));
helper!(rt_testset, |vm, fr, unit, pc, a, b, c| Ok(flag(op_testset(vm, fr, a, b, c))));
helper!(rt_call, |vm, fr, unit, pc, a, b, c| Ok(outcome(op_call(vm, fr, a, b, c)?)));
helper!(rt_tailcall, |vm, fr, unit, pc, a, b, c| Ok(outcome(op_tailcall(vm, fr, a, b)?)));
helper!(rt_return, |vm, fr, unit, pc, a, b, c| {
    op_return(vm, fr, a, b)?;
    Ok(STATUS_FRAME)
});
helper!(rt_forloop, |vm, fr, unit, pc, a, b, c| Ok(flag(op_forloop(vm, fr, a)?)));
helper!(rt_forprep, |vm, fr, unit, pc, a, b, c| {
    op_forprep(vm, fr, a)?;
    Ok(STATUS_TAKEN)
});
helper!(rt_tforloop, |vm, fr, unit, pc, a, b, c| Ok(flag(op_tforloop(vm, fr, a, c)?)));
helper!(rt_setlist, |vm, fr, unit, pc, a, b, c| {
    op_setlist(vm, fr, a, b, c)?;
    Ok(STATUS_NEXT)
});
helper!(rt_close, |vm, fr, unit, pc, a, b, c| {
    op_close(vm, fr, a);
    Ok(STATUS_NEXT)
});
helper!(rt_closure, |vm, fr, unit, pc, a, b, c| {
    match unit.lowered.ops.get(pc as usize) {
        Some(LoweredOp::Closure { captures, .. }) => {
            op_closure(vm, fr, a, b, captures.iter().copied());
            Ok(STATUS_NEXT)
        }
        _ => Err(LuaError::MalformedBytecode(format!(
            "no closure at pc {}",
            pc
        ))),
    }
});
helper!(rt_vararg, |vm, fr, unit, pc, a, b, c| {
    op_vararg(vm, fr, a, b)?;
    Ok(STATUS_NEXT)
});

/// Symbol table registered with the JIT module.
pub(crate) const HELPERS: &[(&str, HelperFn)] = &[
    ("luatier_rt_move", rt_move),
    ("luatier_rt_loadk", rt_loadk),
    ("luatier_rt_loadbool", rt_loadbool),
    ("luatier_rt_loadnil", rt_loadnil),
    ("luatier_rt_getupval", rt_getupval),
    ("luatier_rt_getglobal", rt_getglobal),
    ("luatier_rt_gettable", rt_gettable),
    ("luatier_rt_setglobal", rt_setglobal),
    ("luatier_rt_setupval", rt_setupval),
    ("luatier_rt_settable", rt_settable),
    ("luatier_rt_newtable", rt_newtable),
    ("luatier_rt_self", rt_self),
    ("luatier_rt_add", rt_add),
    ("luatier_rt_sub", rt_sub),
    ("luatier_rt_mul", rt_mul),
    ("luatier_rt_div", rt_div),
    ("luatier_rt_mod", rt_mod),
    ("luatier_rt_pow", rt_pow),
    ("luatier_rt_unm", rt_unm),
    ("luatier_rt_not", rt_not),
    ("luatier_rt_len", rt_len),
    ("luatier_rt_concat", rt_concat),
    ("luatier_rt_eq", rt_eq),
    ("luatier_rt_lt", rt_lt),
    ("luatier_rt_le", rt_le),
    ("luatier_rt_test", rt_test),
    ("luatier_rt_testset", rt_testset),
    ("luatier_rt_call", rt_call),
    ("luatier_rt_tailcall", rt_tailcall),
    ("luatier_rt_return", rt_return),
    ("luatier_rt_forloop", rt_forloop),
    ("luatier_rt_forprep", rt_forprep),
    ("luatier_rt_tforloop", rt_tforloop),
    ("luatier_rt_setlist", rt_setlist),
    ("luatier_rt_close", rt_close),
    ("luatier_rt_closure", rt_closure),
    ("luatier_rt_vararg", rt_vararg),
];

/// Helper symbol and immediate operands for a lowered op. `None` for ops
/// compiled to plain branches.
pub(crate) fn helper_call(op: &LoweredOp) -> Option<(&'static str, [u32; 3])> {
    Some(match *op {
        LoweredOp::Move { a, b } => ("luatier_rt_move", [a, b, 0]),
        LoweredOp::LoadK { a, bx } => ("luatier_rt_loadk", [a, bx, 0]),
        LoweredOp::LoadBool { a, b, .. } => ("luatier_rt_loadbool", [a, b, 0]),
        LoweredOp::LoadNil { a, b } => ("luatier_rt_loadnil", [a, b, 0]),
        LoweredOp::GetUpval { a, b } => ("luatier_rt_getupval", [a, b, 0]),
        LoweredOp::GetGlobal { a, bx } => ("luatier_rt_getglobal", [a, bx, 0]),
        LoweredOp::GetTable { a, b, c } => ("luatier_rt_gettable", [a, b, c]),
        LoweredOp::SetGlobal { a, bx } => ("luatier_rt_setglobal", [a, bx, 0]),
        LoweredOp::SetUpval { a, b } => ("luatier_rt_setupval", [a, b, 0]),
        LoweredOp::SetTable { a, b, c } => ("luatier_rt_settable", [a, b, c]),
        LoweredOp::NewTable { a, b, c } => ("luatier_rt_newtable", [a, b, c]),
        LoweredOp::SelfOp { a, b, c } => ("luatier_rt_self", [a, b, c]),
        LoweredOp::Arith { op, a, b, c } => {
            let name = match op {
                ArithOp::Add => "luatier_rt_add",
                ArithOp::Sub => "luatier_rt_sub",
                ArithOp::Mul => "luatier_rt_mul",
                ArithOp::Div => "luatier_rt_div",
                ArithOp::Mod => "luatier_rt_mod",
                ArithOp::Pow => "luatier_rt_pow",
            };
            (name, [a, b, c])
        }
        LoweredOp::Unm { a, b } => ("luatier_rt_unm", [a, b, 0]),
        LoweredOp::Not { a, b } => ("luatier_rt_not", [a, b, 0]),
        LoweredOp::Len { a, b } => ("luatier_rt_len", [a, b, 0]),
        LoweredOp::Concat { a, b, c } => ("luatier_rt_concat", [a, b, c]),
        LoweredOp::Eq { a, b, c } => ("luatier_rt_eq", [a, b, c]),
        LoweredOp::Lt { a, b, c } => ("luatier_rt_lt", [a, b, c]),
        LoweredOp::Le { a, b, c } => ("luatier_rt_le", [a, b, c]),
        LoweredOp::Test { a, c } => ("luatier_rt_test", [a, 0, c]),
        LoweredOp::TestSet { a, b, c } => ("luatier_rt_testset", [a, b, c]),
        LoweredOp::Call { a, b, c } => ("luatier_rt_call", [a, b, c]),
        LoweredOp::TailCall { a, b } => ("luatier_rt_tailcall", [a, b, 0]),
        LoweredOp::Return { a, b } => ("luatier_rt_return", [a, b, 0]),
        LoweredOp::ForLoop { a, .. } => ("luatier_rt_forloop", [a, 0, 0]),
        LoweredOp::ForPrep { a, .. } => ("luatier_rt_forprep", [a, 0, 0]),
        LoweredOp::TForLoop { a, c } => ("luatier_rt_tforloop", [a, 0, c]),
        LoweredOp::SetList { a, b, batch } => ("luatier_rt_setlist", [a, b, batch]),
        LoweredOp::Close { a } => ("luatier_rt_close", [a, 0, 0]),
        LoweredOp::Closure { a, bx, .. } => ("luatier_rt_closure", [a, bx, 0]),
        LoweredOp::VarArg { a, b } => ("luatier_rt_vararg", [a, b, 0]),
        LoweredOp::Jmp { .. } | LoweredOp::Data => return None,
    })
}
