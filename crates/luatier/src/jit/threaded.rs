// Threaded backend
// Runs a lowered prototype: operands are pre-decoded and every jump already
// names its target pc, so the loop only dispatches on `LoweredOp`.

use super::CompiledUnit;
use super::lower::LoweredOp;
use crate::lua_vm::execute::arithmetic_instructions::op_arith;
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
use crate::lua_vm::execute::{CallOutcome, Frame, arithmetic_instructions::op_unm};
use crate::lua_vm::{LuaError, LuaResult, LuaVM};

/// Run the top frame with a threaded unit until the frame changes.
pub(crate) fn run(vm: &mut LuaVM, unit: &CompiledUnit) -> LuaResult<()> {
    let (fr, mut pc) = Frame::top(vm)?;
    let lowered = &unit.lowered;
    if !lowered.is_entry(pc) {
        return Err(LuaError::MalformedBytecode(format!(
            "{} entered at pc {}",
            unit.proto_id, pc
        )));
    }
    let ops = &lowered.ops[..];

    loop {
        let Some(op) = ops.get(pc) else {
            return Err(LuaError::MalformedBytecode(format!("pc {} out of range", pc)));
        };
        let next = pc + 1;
        vm.save_pc(next);
        pc = next;
        match op {
            LoweredOp::Move { a, b } => op_move(vm, &fr, *a, *b),
            LoweredOp::LoadK { a, bx } => op_loadk(vm, &fr, *a, *bx),
            LoweredOp::LoadBool { a, b, skip } => {
                op_loadbool(vm, &fr, *a, *b);
                if *skip {
                    pc += 1;
                }
            }
            LoweredOp::LoadNil { a, b } => op_loadnil(vm, &fr, *a, *b),
            LoweredOp::GetUpval { a, b } => op_getupval(vm, &fr, *a, *b),
            LoweredOp::GetGlobal { a, bx } => op_getglobal(vm, &fr, *a, *bx)?,
            LoweredOp::GetTable { a, b, c } => op_gettable(vm, &fr, *a, *b, *c)?,
            LoweredOp::SetGlobal { a, bx } => op_setglobal(vm, &fr, *a, *bx)?,
            LoweredOp::SetUpval { a, b } => op_setupval(vm, &fr, *a, *b),
            LoweredOp::SetTable { a, b, c } => op_settable(vm, &fr, *a, *b, *c)?,
            LoweredOp::NewTable { a, b, c } => op_newtable(vm, &fr, *a, *b, *c),
            LoweredOp::SelfOp { a, b, c } => op_self(vm, &fr, *a, *b, *c)?,
            LoweredOp::Arith { op, a, b, c } => op_arith(vm, &fr, *op, *a, *b, *c)?,
            LoweredOp::Unm { a, b } => op_unm(vm, &fr, *a, *b)?,
            LoweredOp::Not { a, b } => op_not(vm, &fr, *a, *b),
            LoweredOp::Len { a, b } => op_len(vm, &fr, *a, *b)?,
            LoweredOp::Concat { a, b, c } => op_concat(vm, &fr, *a, *b, *c)?,
            LoweredOp::Jmp { target } => pc = *target,
            LoweredOp::Eq { a, b, c } => {
                if op_eq(vm, &fr, *a, *b, *c)? {
                    pc += 1;
                }
            }
            LoweredOp::Lt { a, b, c } => {
                if op_lt(vm, &fr, *a, *b, *c)? {
                    pc += 1;
                }
            }
            LoweredOp::Le { a, b, c } => {
                if op_le(vm, &fr, *a, *b, *c)? {
                    pc += 1;
                }
            }
            LoweredOp::Test { a, c } => {
                if op_test(vm, &fr, *a, *c) {
                    pc += 1;
                }
            }
            LoweredOp::TestSet { a, b, c } => {
                if op_testset(vm, &fr, *a, *b, *c) {
                    pc += 1;
                }
            }
            LoweredOp::Call { a, b, c } => {
                if op_call(vm, &fr, *a, *b, *c)? == CallOutcome::Pushed {
                    return Ok(());
                }
            }
            LoweredOp::TailCall { a, b } => {
                if op_tailcall(vm, &fr, *a, *b)? == CallOutcome::Pushed {
                    return Ok(());
                }
            }
            LoweredOp::Return { a, b } => return op_return(vm, &fr, *a, *b),
            LoweredOp::ForLoop { a, target } => {
                if op_forloop(vm, &fr, *a)? {
                    pc = *target;
                }
            }
            LoweredOp::ForPrep { a, target } => {
                op_forprep(vm, &fr, *a)?;
                pc = *target;
            }
            LoweredOp::TForLoop { a, c } => {
                if op_tforloop(vm, &fr, *a, *c)? {
                    pc += 1;
                }
            }
            LoweredOp::SetList { a, b, batch } => {
                op_setlist(vm, &fr, *a, *b, *batch)?;
                if let Some(after) = lowered.fallthrough(pc - 1) {
                    pc = after;
                }
            }
            LoweredOp::Close { a } => op_close(vm, &fr, *a),
            LoweredOp::Closure { a, bx, captures } => {
                op_closure(vm, &fr, *a, *bx, captures.iter().copied());
                pc += captures.len();
            }
            LoweredOp::VarArg { a, b } => op_vararg(vm, &fr, *a, *b)?,
            LoweredOp::Data => {
                return Err(LuaError::MalformedBytecode(format!(
                    "operand word executed at pc {}",
                    pc - 1
                )));
            }
        }
    }
}
