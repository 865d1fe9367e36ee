// Static prototype checks run before code is executed.
// After a prototype passes, every register, constant, upvalue and jump the
// engines touch through fixed operands is in range.

use super::{Instruction, OpCode};
use crate::lua_value::{Prototype, VARARG_NEEDSARG};

struct Checker<'a> {
    proto: &'a Prototype,
    max: usize,
    pc: usize,
}

impl Checker<'_> {
    fn fail<T>(&self, what: impl std::fmt::Display) -> Result<T, String> {
        Err(format!("{} at pc {}: {}", self.proto.source, self.pc, what))
    }

    fn reg(&self, r: u32) -> Result<(), String> {
        if (r as usize) < self.max {
            Ok(())
        } else {
            self.fail(format_args!("register {} out of range", r))
        }
    }

    /// Registers `first .. first + count` exist.
    fn range(&self, first: u32, count: u32) -> Result<(), String> {
        if first as usize + count as usize <= self.max {
            Ok(())
        } else {
            self.fail(format_args!("register range {}+{} out of range", first, count))
        }
    }

    fn constant(&self, k: u32) -> Result<(), String> {
        if (k as usize) < self.proto.constants.len() {
            Ok(())
        } else {
            self.fail(format_args!("constant {} out of range", k))
        }
    }

    fn rk(&self, x: u32) -> Result<(), String> {
        if Instruction::is_k(x) {
            self.constant(Instruction::index_k(x))
        } else {
            self.reg(x)
        }
    }

    fn upvalue(&self, idx: u32) -> Result<(), String> {
        if idx < self.proto.num_upvalues as u32 {
            Ok(())
        } else {
            self.fail(format_args!("upvalue {} out of range", idx))
        }
    }

    fn target(&self, target: i64) -> Result<usize, String> {
        if target >= 0 && (target as usize) < self.proto.code.len() {
            Ok(target as usize)
        } else {
            self.fail(format_args!("jump target {} out of range", target))
        }
    }
}

/// Check a prototype and all nested prototypes.
pub fn verify_prototype(proto: &Prototype) -> Result<(), String> {
    let code = &proto.code;
    let n = code.len();
    let mut ck = Checker {
        proto,
        max: proto.max_stack_size as usize,
        pc: 0,
    };

    if n == 0 {
        return ck.fail("empty function");
    }
    if !proto.line_info.is_empty() && proto.line_info.len() != n {
        return ck.fail("line info does not match code size");
    }
    let needs_arg = (proto.vararg & VARARG_NEEDSARG != 0) as usize;
    if ck.max < proto.num_params as usize + needs_arg {
        return ck.fail("stack too small for parameters");
    }
    if Instruction::from_u32(code[n - 1]).opcode() != Some(OpCode::Return) {
        ck.pc = n - 1;
        return ck.fail("function does not end with RETURN");
    }

    // operand words consumed by the preceding instruction
    let mut data = vec![false; n];
    let mut jumps = Vec::new();

    let mut pc = 0;
    while pc < n {
        ck.pc = pc;
        let i = Instruction::from_u32(code[pc]);
        let Some(op) = i.opcode() else {
            return ck.fail(format_args!("invalid opcode {}", i.opcode_raw()));
        };
        let (a, b, c) = (i.a(), i.b(), i.c());
        match op {
            OpCode::Move | OpCode::Unm | OpCode::Not | OpCode::Len => {
                ck.reg(a)?;
                ck.reg(b)?;
            }
            OpCode::LoadK | OpCode::GetGlobal | OpCode::SetGlobal => {
                ck.reg(a)?;
                ck.constant(i.bx())?;
            }
            OpCode::LoadBool => {
                ck.reg(a)?;
                if c != 0 {
                    jumps.push(ck.target(pc as i64 + 2)?);
                }
            }
            OpCode::LoadNil => {
                if b < a {
                    return ck.fail("LOADNIL with B < A");
                }
                ck.reg(b)?;
            }
            OpCode::GetUpval | OpCode::SetUpval => {
                ck.reg(a)?;
                ck.upvalue(b)?;
            }
            OpCode::GetTable => {
                ck.reg(a)?;
                ck.reg(b)?;
                ck.rk(c)?;
            }
            OpCode::SetTable
            | OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Pow => {
                ck.reg(a)?;
                ck.rk(b)?;
                ck.rk(c)?;
            }
            OpCode::NewTable => ck.reg(a)?,
            OpCode::Self_ => {
                ck.range(a, 2)?;
                ck.reg(b)?;
                ck.rk(c)?;
            }
            OpCode::Concat => {
                ck.reg(a)?;
                if b >= c {
                    return ck.fail("CONCAT needs at least two operands");
                }
                ck.reg(c)?;
            }
            OpCode::Jmp => {
                jumps.push(ck.target(pc as i64 + 1 + i.sbx() as i64)?);
            }
            OpCode::Eq | OpCode::Lt | OpCode::Le => {
                ck.rk(b)?;
                ck.rk(c)?;
                jumps.push(ck.target(pc as i64 + 2)?);
            }
            OpCode::Test => {
                ck.reg(a)?;
                jumps.push(ck.target(pc as i64 + 2)?);
            }
            OpCode::TestSet => {
                ck.reg(a)?;
                ck.reg(b)?;
                jumps.push(ck.target(pc as i64 + 2)?);
            }
            OpCode::Call | OpCode::TailCall => {
                ck.reg(a)?;
                if b > 0 {
                    ck.range(a, b)?;
                }
                if op == OpCode::Call && c > 1 {
                    ck.range(a, c - 1)?;
                }
            }
            OpCode::Return => {
                if b > 1 {
                    ck.range(a, b - 1)?;
                }
            }
            OpCode::ForLoop | OpCode::ForPrep => {
                ck.range(a, 4)?;
                jumps.push(ck.target(pc as i64 + 1 + i.sbx() as i64)?);
            }
            OpCode::TForLoop => {
                if c == 0 {
                    return ck.fail("TFORLOOP without loop variables");
                }
                ck.range(a, 3 + c)?;
                jumps.push(ck.target(pc as i64 + 2)?);
            }
            OpCode::SetList => {
                ck.reg(a)?;
                if b > 0 {
                    ck.range(a, b + 1)?;
                }
                if c == 0 {
                    if pc + 1 >= n {
                        return ck.fail("SETLIST missing its batch word");
                    }
                    if code[pc + 1] == 0 {
                        return ck.fail("SETLIST batch 0");
                    }
                    data[pc + 1] = true;
                    pc += 1;
                }
            }
            OpCode::Close => {}
            OpCode::Closure => {
                ck.reg(a)?;
                let Some(child) = proto.protos.get(i.bx() as usize) else {
                    return ck.fail(format_args!("prototype {} out of range", i.bx()));
                };
                let nup = child.num_upvalues as usize;
                if pc + nup >= n {
                    return ck.fail("CLOSURE missing capture instructions");
                }
                for j in 1..=nup {
                    let cap = Instruction::from_u32(code[pc + j]);
                    match cap.opcode() {
                        Some(OpCode::Move) => ck.reg(cap.b())?,
                        Some(OpCode::GetUpval) => ck.upvalue(cap.b())?,
                        _ => return ck.fail("bad capture instruction after CLOSURE"),
                    }
                    data[pc + j] = true;
                }
                pc += nup;
            }
            OpCode::VarArg => {
                if !proto.is_vararg() {
                    return ck.fail("VARARG in a non-vararg function");
                }
                ck.reg(a)?;
                if b > 1 {
                    ck.range(a, b - 1)?;
                }
            }
        }
        pc += 1;
    }

    for target in jumps {
        if data[target] {
            ck.pc = target;
            return ck.fail("jump into an operand word");
        }
    }

    for child in &proto.protos {
        verify_prototype(child)?;
    }
    Ok(())
}
