/*----------------------------------------------------------------------
  Lua 5.1 Execution Engine

  Every engine (the interpreter below, the threaded units and native
  units in `crate::jit`) runs the top Lua frame until the frame changes:
  a call pushes a frame, a return or tail call pops or replaces it, or an
  error unwinds. `lua_execute` then picks the engine for the new top
  frame. Instruction semantics live in the op modules and are shared by
  all engines, so tiers agree on results, errors and side effects.

  Invariants:
  - `ci.pc` of a Lua frame is saved after each fetch, before any
    operation that may call out, error or yield
  - registers are addressed as `base + r`; indices stay valid across
    stack growth, references do not
----------------------------------------------------------------------*/

pub(crate) mod arithmetic_instructions;
pub(crate) mod call;
pub(crate) mod closure_handler;
pub(crate) mod comparison_ops;
pub(crate) mod concat;
pub(crate) mod load_instructions;
pub(crate) mod loop_instructions;
pub(crate) mod metamethod;
pub(crate) mod return_handler;
pub(crate) mod table_instructions;
pub(crate) mod table_ops;
pub(crate) mod upvalue_instructions;

use std::rc::Rc;

pub use arithmetic_instructions::{ArithOp, arith};
pub(crate) use call::CallOutcome;
pub use closure_handler::Capture;
pub use comparison_ops::{equals, less_equal, less_than};
pub use metamethod::{TmKind, call_tm, get_bin_metaop, get_comp_metaop, get_metaop, get_metatable};
pub use table_ops::{get_table, obj_len, set_table};

use arithmetic_instructions::{op_arith, op_unm};
use call::{op_call, op_tailcall};
use closure_handler::{op_closure, op_vararg};
use comparison_ops::{op_eq, op_le, op_lt, op_test, op_testset};
use concat::op_concat;
use load_instructions::{op_loadbool, op_loadk, op_loadnil, op_move, op_not};
use loop_instructions::{op_forloop, op_forprep, op_tforloop};
use return_handler::op_return;
use table_instructions::{
    op_getglobal, op_gettable, op_len, op_newtable, op_self, op_setglobal, op_setlist, op_settable,
};
use upvalue_instructions::{op_close, op_getupval, op_setupval};

use crate::jit;
use crate::lua_value::{LuaClosure, LuaValue};
use crate::lua_vm::{Instruction, LuaError, LuaResult, LuaVM, OpCode};

/// Register window of the running Lua frame, as the op functions see it.
pub(crate) struct Frame {
    pub(crate) closure: Rc<LuaClosure>,
    pub(crate) base: usize,
}

impl Frame {
    /// The top frame of the running state, if it is a Lua frame.
    pub(crate) fn top(vm: &LuaVM) -> LuaResult<(Frame, usize)> {
        match vm.state.frames.last() {
            Some(ci) => match ci.closure() {
                Some(cl) => Ok((
                    Frame {
                        closure: cl.clone(),
                        base: ci.base,
                    },
                    ci.pc,
                )),
                None => Err(LuaError::MalformedBytecode(
                    "host frame on top of the execution loop".to_string(),
                )),
            },
            None => Err(LuaError::MalformedBytecode(
                "no frame to execute".to_string(),
            )),
        }
    }

    #[inline(always)]
    pub(crate) fn reg(&self, r: u32) -> usize {
        self.base + r as usize
    }

    #[inline(always)]
    pub(crate) fn constant(&self, k: u32) -> LuaValue {
        LuaValue::from(&self.closure.proto.constants[k as usize])
    }

    /// RK(x): a constant when the RK bit is set, otherwise a register.
    #[inline(always)]
    pub(crate) fn rk(&self, vm: &LuaVM, x: u32) -> LuaValue {
        if Instruction::is_k(x) {
            self.constant(Instruction::index_k(x))
        } else {
            vm.state.stack[self.reg(x)].clone()
        }
    }
}

impl LuaVM {
    #[inline(always)]
    pub(crate) fn save_pc(&mut self, pc: usize) {
        if let Some(ci) = self.state.frames.last_mut() {
            ci.pc = pc;
        }
    }
}

/// Target of a jump whose offset is relative to the next instruction.
#[inline(always)]
pub(crate) fn jump_target(pc: usize, sbx: i32) -> usize {
    (pc as i64 + sbx as i64) as usize
}

/// Run Lua frames until the frame stack is back to `target_depth`.
pub fn lua_execute(vm: &mut LuaVM, target_depth: usize) -> LuaResult<()> {
    while vm.state.frames.len() > target_depth {
        let unit = match vm.state.frames.last() {
            Some(ci) if ci.is_lua() => ci.unit.clone(),
            _ => {
                return Err(LuaError::MalformedBytecode(
                    "host frame on top of the execution loop".to_string(),
                ));
            }
        };
        match unit {
            Some(unit) => jit::run_unit(vm, &unit)?,
            None => execute_frame(vm)?,
        }
    }
    Ok(())
}

/// Reference interpreter: decode and run the top frame's bytecode from its
/// saved pc until the frame changes.
pub(crate) fn execute_frame(vm: &mut LuaVM) -> LuaResult<()> {
    let (fr, mut pc) = Frame::top(vm)?;
    let proto = fr.closure.proto.clone();
    let code = &proto.code[..];

    loop {
        let Some(&word) = code.get(pc) else {
            return Err(LuaError::MalformedBytecode(format!(
                "pc {} out of range",
                pc
            )));
        };
        let instr = Instruction::from_u32(word);
        pc += 1;
        vm.save_pc(pc);
        let (a, b, c) = (instr.a(), instr.b(), instr.c());
        let Some(op) = instr.opcode() else {
            return Err(LuaError::MalformedBytecode(format!(
                "invalid opcode {} at pc {}",
                instr.opcode_raw(),
                pc - 1
            )));
        };

        match op {
            OpCode::Move => op_move(vm, &fr, a, b),
            OpCode::LoadK => op_loadk(vm, &fr, a, instr.bx()),
            OpCode::LoadBool => {
                op_loadbool(vm, &fr, a, b);
                if c != 0 {
                    pc += 1;
                }
            }
            OpCode::LoadNil => op_loadnil(vm, &fr, a, b),
            OpCode::GetUpval => op_getupval(vm, &fr, a, b),
            OpCode::GetGlobal => op_getglobal(vm, &fr, a, instr.bx())?,
            OpCode::GetTable => op_gettable(vm, &fr, a, b, c)?,
            OpCode::SetGlobal => op_setglobal(vm, &fr, a, instr.bx())?,
            OpCode::SetUpval => op_setupval(vm, &fr, a, b),
            OpCode::SetTable => op_settable(vm, &fr, a, b, c)?,
            OpCode::NewTable => op_newtable(vm, &fr, a, b, c),
            OpCode::Self_ => op_self(vm, &fr, a, b, c)?,
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Pow => {
                if let Some(arith_op) = ArithOp::from_opcode(op) {
                    op_arith(vm, &fr, arith_op, a, b, c)?;
                }
            }
            OpCode::Unm => op_unm(vm, &fr, a, b)?,
            OpCode::Not => op_not(vm, &fr, a, b),
            OpCode::Len => op_len(vm, &fr, a, b)?,
            OpCode::Concat => op_concat(vm, &fr, a, b, c)?,
            OpCode::Jmp => pc = jump_target(pc, instr.sbx()),
            OpCode::Eq => {
                if op_eq(vm, &fr, a, b, c)? {
                    pc += 1;
                }
            }
            OpCode::Lt => {
                if op_lt(vm, &fr, a, b, c)? {
                    pc += 1;
                }
            }
            OpCode::Le => {
                if op_le(vm, &fr, a, b, c)? {
                    pc += 1;
                }
            }
            OpCode::Test => {
                if op_test(vm, &fr, a, c) {
                    pc += 1;
                }
            }
            OpCode::TestSet => {
                if op_testset(vm, &fr, a, b, c) {
                    pc += 1;
                }
            }
            OpCode::Call => {
                if op_call(vm, &fr, a, b, c)? == CallOutcome::Pushed {
                    return Ok(());
                }
            }
            OpCode::TailCall => {
                if op_tailcall(vm, &fr, a, b)? == CallOutcome::Pushed {
                    return Ok(());
                }
            }
            OpCode::Return => return op_return(vm, &fr, a, b),
            OpCode::ForLoop => {
                if op_forloop(vm, &fr, a)? {
                    pc = jump_target(pc, instr.sbx());
                }
            }
            OpCode::ForPrep => {
                op_forprep(vm, &fr, a)?;
                pc = jump_target(pc, instr.sbx());
            }
            OpCode::TForLoop => {
                if op_tforloop(vm, &fr, a, c)? {
                    pc += 1;
                }
            }
            OpCode::SetList => {
                let batch = if c == 0 {
                    let word = code.get(pc).copied().unwrap_or(0);
                    pc += 1;
                    word
                } else {
                    c
                };
                op_setlist(vm, &fr, a, b, batch)?;
            }
            OpCode::Close => op_close(vm, &fr, a),
            OpCode::Closure => {
                let bx = instr.bx();
                let Some(child) = proto.protos.get(bx as usize) else {
                    return Err(LuaError::MalformedBytecode(format!(
                        "prototype {} out of range at pc {}",
                        bx,
                        pc - 1
                    )));
                };
                let n = child.num_upvalues as usize;
                let Some(words) = code.get(pc..pc + n) else {
                    return Err(LuaError::MalformedBytecode(format!(
                        "CLOSURE missing capture words at pc {}",
                        pc - 1
                    )));
                };
                op_closure(vm, &fr, a, bx, words.iter().map(|&w| Capture::decode(w)));
                pc += n;
            }
            OpCode::VarArg => op_vararg(vm, &fr, a, b)?,
        }
    }
}
