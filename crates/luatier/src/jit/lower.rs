// Pre-scan and lowering
// The pre-scan decodes every instruction, marks the words consumed as
// operands (SETLIST batch, CLOSURE captures) and labels every jump, skip and
// re-entry target. Lowering then turns each pc into a `LoweredOp` with its
// operands decoded and its targets resolved. Ops stay indexed by the original
// pc so saved pcs and line info agree with the interpreter.

use super::JitError;
use crate::lua_value::Prototype;
use crate::lua_vm::execute::{ArithOp, Capture};
use crate::lua_vm::{Instruction, OpCode};

#[derive(Debug, Clone, PartialEq)]
pub enum LoweredOp {
    Move { a: u32, b: u32 },
    LoadK { a: u32, bx: u32 },
    LoadBool { a: u32, b: u32, skip: bool },
    LoadNil { a: u32, b: u32 },
    GetUpval { a: u32, b: u32 },
    GetGlobal { a: u32, bx: u32 },
    GetTable { a: u32, b: u32, c: u32 },
    SetGlobal { a: u32, bx: u32 },
    SetUpval { a: u32, b: u32 },
    SetTable { a: u32, b: u32, c: u32 },
    NewTable { a: u32, b: u32, c: u32 },
    SelfOp { a: u32, b: u32, c: u32 },
    Arith { op: ArithOp, a: u32, b: u32, c: u32 },
    Unm { a: u32, b: u32 },
    Not { a: u32, b: u32 },
    Len { a: u32, b: u32 },
    Concat { a: u32, b: u32, c: u32 },
    Jmp { target: usize },
    Eq { a: u32, b: u32, c: u32 },
    Lt { a: u32, b: u32, c: u32 },
    Le { a: u32, b: u32, c: u32 },
    Test { a: u32, c: u32 },
    TestSet { a: u32, b: u32, c: u32 },
    Call { a: u32, b: u32, c: u32 },
    TailCall { a: u32, b: u32 },
    Return { a: u32, b: u32 },
    ForLoop { a: u32, target: usize },
    ForPrep { a: u32, target: usize },
    TForLoop { a: u32, c: u32 },
    SetList { a: u32, b: u32, batch: u32 },
    Close { a: u32 },
    Closure { a: u32, bx: u32, captures: Box<[Capture]> },
    VarArg { a: u32, b: u32 },
    /// Operand word of the preceding instruction; never executed
    Data,
}

impl LoweredOp {
    /// Whether the op conditionally skips the next instruction.
    pub fn is_test(&self) -> bool {
        matches!(
            self,
            LoweredOp::Eq { .. }
                | LoweredOp::Lt { .. }
                | LoweredOp::Le { .. }
                | LoweredOp::Test { .. }
                | LoweredOp::TestSet { .. }
                | LoweredOp::TForLoop { .. }
        )
    }
}

/// A prototype's code after the pre-scan and lowering passes.
#[derive(Debug, Clone)]
pub struct LoweredProto {
    pub ops: Box<[LoweredOp]>,
    /// `labels[pc]`: some jump, skip or re-entry lands on `pc`
    pub labels: Box<[bool]>,
    /// Pcs a frame may (re)start at: 0 and every pc following a CALL
    pub entries: Box<[usize]>,
}

impl LoweredProto {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// First executable pc after `pc`, skipping operand words.
    pub fn fallthrough(&self, pc: usize) -> Option<usize> {
        (pc + 1..self.ops.len()).find(|&p| self.ops[p] != LoweredOp::Data)
    }

    pub fn is_entry(&self, pc: usize) -> bool {
        self.entries.binary_search(&pc).is_ok()
    }
}

struct Scan {
    data: Vec<bool>,
    targets: Vec<(usize, usize)>,
    entries: Vec<usize>,
}

fn target(pc: usize, offset: i64, len: usize) -> Result<usize, JitError> {
    let t = pc as i64 + offset;
    if t < 0 || t as usize >= len {
        return Err(JitError::Malformed {
            pc,
            reason: format!("target {} out of range", t),
        });
    }
    Ok(t as usize)
}

fn prescan(proto: &Prototype) -> Result<Scan, JitError> {
    let code = &proto.code;
    let n = code.len();
    if n == 0 {
        return Err(JitError::Malformed {
            pc: 0,
            reason: "empty code".to_string(),
        });
    }
    let mut scan = Scan {
        data: vec![false; n],
        targets: Vec::new(),
        entries: vec![0],
    };
    let mut pc = 0;
    while pc < n {
        let instr = Instruction::from_u32(code[pc]);
        let Some(op) = instr.opcode() else {
            return Err(JitError::Malformed {
                pc,
                reason: format!("invalid opcode {}", instr.opcode_raw()),
            });
        };
        match op {
            OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep => {
                let t = target(pc, 1 + instr.sbx() as i64, n)?;
                scan.targets.push((pc, t));
            }
            OpCode::LoadBool if instr.c() != 0 => {
                scan.targets.push((pc, target(pc, 2, n)?));
            }
            _ if op.is_test() => {
                scan.targets.push((pc, target(pc, 2, n)?));
            }
            OpCode::Call => {
                if pc + 1 < n {
                    scan.entries.push(pc + 1);
                }
            }
            OpCode::SetList if instr.c() == 0 => {
                if pc + 1 >= n {
                    return Err(JitError::Malformed {
                        pc,
                        reason: "SETLIST missing its batch word".to_string(),
                    });
                }
                scan.data[pc + 1] = true;
                pc += 1;
            }
            OpCode::Closure => {
                let Some(child) = proto.protos.get(instr.bx() as usize) else {
                    return Err(JitError::Malformed {
                        pc,
                        reason: format!("prototype {} out of range", instr.bx()),
                    });
                };
                let nup = child.num_upvalues as usize;
                if pc + nup >= n {
                    return Err(JitError::Malformed {
                        pc,
                        reason: "CLOSURE missing capture words".to_string(),
                    });
                }
                for word in &mut scan.data[pc + 1..=pc + nup] {
                    *word = true;
                }
                pc += nup;
            }
            _ => {}
        }
        pc += 1;
    }
    for &(from, to) in &scan.targets {
        if scan.data[to] {
            return Err(JitError::Malformed {
                pc: from,
                reason: format!("target {} is an operand word", to),
            });
        }
    }
    Ok(scan)
}

/// Run the pre-scan and lower every instruction of `proto`.
pub fn lower(proto: &Prototype) -> Result<LoweredProto, JitError> {
    let scan = prescan(proto)?;
    let code = &proto.code;
    let n = code.len();
    let mut ops = Vec::with_capacity(n);
    let mut pc = 0;
    while pc < n {
        if scan.data[pc] {
            ops.push(LoweredOp::Data);
            pc += 1;
            continue;
        }
        let instr = Instruction::from_u32(code[pc]);
        let (a, b, c, bx) = (instr.a(), instr.b(), instr.c(), instr.bx());
        let jump = || (pc as i64 + 1 + instr.sbx() as i64) as usize;
        let Some(op) = instr.opcode() else {
            return Err(JitError::Malformed {
                pc,
                reason: format!("invalid opcode {}", instr.opcode_raw()),
            });
        };
        let lowered = match op {
            OpCode::Move => LoweredOp::Move { a, b },
            OpCode::LoadK => LoweredOp::LoadK { a, bx },
            OpCode::LoadBool => LoweredOp::LoadBool { a, b, skip: c != 0 },
            OpCode::LoadNil => LoweredOp::LoadNil { a, b },
            OpCode::GetUpval => LoweredOp::GetUpval { a, b },
            OpCode::GetGlobal => LoweredOp::GetGlobal { a, bx },
            OpCode::GetTable => LoweredOp::GetTable { a, b, c },
            OpCode::SetGlobal => LoweredOp::SetGlobal { a, bx },
            OpCode::SetUpval => LoweredOp::SetUpval { a, b },
            OpCode::SetTable => LoweredOp::SetTable { a, b, c },
            OpCode::NewTable => LoweredOp::NewTable { a, b, c },
            OpCode::Self_ => LoweredOp::SelfOp { a, b, c },
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Pow => match ArithOp::from_opcode(op) {
                Some(arith) => LoweredOp::Arith { op: arith, a, b, c },
                None => {
                    return Err(JitError::Unsupported {
                        pc,
                        op: op.name().to_string(),
                    });
                }
            },
            OpCode::Unm => LoweredOp::Unm { a, b },
            OpCode::Not => LoweredOp::Not { a, b },
            OpCode::Len => LoweredOp::Len { a, b },
            OpCode::Concat => LoweredOp::Concat { a, b, c },
            OpCode::Jmp => LoweredOp::Jmp { target: jump() },
            OpCode::Eq => LoweredOp::Eq { a, b, c },
            OpCode::Lt => LoweredOp::Lt { a, b, c },
            OpCode::Le => LoweredOp::Le { a, b, c },
            OpCode::Test => LoweredOp::Test { a, c },
            OpCode::TestSet => LoweredOp::TestSet { a, b, c },
            OpCode::Call => LoweredOp::Call { a, b, c },
            OpCode::TailCall => LoweredOp::TailCall { a, b },
            OpCode::Return => LoweredOp::Return { a, b },
            OpCode::ForLoop => LoweredOp::ForLoop { a, target: jump() },
            OpCode::ForPrep => LoweredOp::ForPrep { a, target: jump() },
            OpCode::TForLoop => LoweredOp::TForLoop { a, c },
            OpCode::SetList => {
                let batch = if c == 0 { code[pc + 1] } else { c };
                LoweredOp::SetList { a, b, batch }
            }
            OpCode::Close => LoweredOp::Close { a },
            OpCode::Closure => {
                let nup = proto.protos[bx as usize].num_upvalues as usize;
                let captures = code[pc + 1..=pc + nup]
                    .iter()
                    .map(|&w| Capture::decode(w))
                    .collect();
                LoweredOp::Closure { a, bx, captures }
            }
            OpCode::VarArg => LoweredOp::VarArg { a, b },
        };
        ops.push(lowered);
        pc += 1;
    }

    let mut labels = vec![false; n];
    for &(_, t) in &scan.targets {
        labels[t] = true;
    }
    for &e in &scan.entries {
        labels[e] = true;
    }
    let mut entries = scan.entries;
    entries.sort_unstable();
    entries.dedup();

    Ok(LoweredProto {
        ops: ops.into_boxed_slice(),
        labels: labels.into_boxed_slice(),
        entries: entries.into_boxed_slice(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_value::ProtoBuilder;

    #[test]
    fn lowering_resolves_targets_and_entries() {
        // local s = 0; for i = 1, 3 do s = s + i end; print(s); return s
        let mut b = ProtoBuilder::main("=lower");
        b.max_stack(6);
        let k0 = b.constant(0.0);
        let k1 = b.constant(1.0);
        let k3 = b.constant(3.0);
        let kprint = b.constant("print");
        b.abx(OpCode::LoadK, 0, k0);
        b.abx(OpCode::LoadK, 1, k1);
        b.abx(OpCode::LoadK, 2, k3);
        b.abx(OpCode::LoadK, 3, k1);
        b.asbx(OpCode::ForPrep, 1, 1);
        b.abc(OpCode::Add, 0, 0, 4);
        b.asbx(OpCode::ForLoop, 1, -2);
        b.abx(OpCode::GetGlobal, 1, kprint);
        b.abc(OpCode::Move, 2, 0, 0);
        b.abc(OpCode::Call, 1, 2, 1);
        b.abc(OpCode::Return, 0, 2, 0);
        let proto = b.build();

        let lowered = lower(&proto).unwrap();
        assert_eq!(lowered.len(), 11);
        assert_eq!(lowered.ops[4], LoweredOp::ForPrep { a: 1, target: 6 });
        assert_eq!(lowered.ops[6], LoweredOp::ForLoop { a: 1, target: 5 });
        assert!(lowered.labels[5] && lowered.labels[6]);
        assert_eq!(&*lowered.entries, &[0, 10]);
        assert!(lowered.is_entry(10));
        assert!(!lowered.is_entry(5));
    }

    #[test]
    fn closure_captures_become_operand_words() {
        let mut child = ProtoBuilder::new("=lower");
        child.upvalues(2);
        child.abc(OpCode::Return, 0, 1, 0);

        let mut b = ProtoBuilder::main("=lower");
        b.max_stack(2);
        let idx = b.child(child.build());
        b.abx(OpCode::Closure, 1, idx);
        b.abc(OpCode::Move, 0, 0, 0);
        b.abc(OpCode::GetUpval, 0, 0, 0);
        b.abc(OpCode::Return, 1, 2, 0);
        b.upvalues(1);
        let proto = b.build();

        let lowered = lower(&proto).unwrap();
        assert_eq!(
            lowered.ops[0],
            LoweredOp::Closure {
                a: 1,
                bx: 0,
                captures: vec![Capture::Local(0), Capture::Upvalue(0)].into_boxed_slice(),
            }
        );
        assert_eq!(lowered.ops[1], LoweredOp::Data);
        assert_eq!(lowered.ops[2], LoweredOp::Data);
        assert_eq!(lowered.fallthrough(0), Some(3));
    }

    #[test]
    fn jump_into_operand_word_is_malformed() {
        let mut b = ProtoBuilder::main("=lower");
        b.max_stack(3);
        b.abc(OpCode::NewTable, 0, 0, 0);
        b.asbx(OpCode::Jmp, 0, 1);
        b.abc(OpCode::SetList, 0, 1, 0);
        b.emit(Instruction::raw(1));
        b.abc(OpCode::Return, 0, 1, 0);
        let proto = b.build();

        let err = lower(&proto).unwrap_err();
        assert!(matches!(err, JitError::Malformed { pc: 1, .. }));
    }
}
