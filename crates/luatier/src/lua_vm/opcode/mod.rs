mod instruction;
mod verify;

pub use instruction::{Instruction, fb2int};
pub use verify::verify_prototype;

/// Instruction format modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
}

/// Lua 5.1 opcode set (38 opcodes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,  // R(A) := R(B)
    LoadK,     // R(A) := Kst(Bx)
    LoadBool,  // R(A) := (Bool)B; if (C) pc++
    LoadNil,   // R(A) := ... := R(B) := nil
    GetUpval,  // R(A) := UpValue[B]
    GetGlobal, // R(A) := Gbl[Kst(Bx)]
    GetTable,  // R(A) := R(B)[RK(C)]
    SetGlobal, // Gbl[Kst(Bx)] := R(A)
    SetUpval,  // UpValue[B] := R(A)
    SetTable,  // R(A)[RK(B)] := RK(C)
    NewTable,  // R(A) := {} (size = B,C)
    Self_,     // R(A+1) := R(B); R(A) := R(B)[RK(C)]
    Add,       // R(A) := RK(B) + RK(C)
    Sub,       // R(A) := RK(B) - RK(C)
    Mul,       // R(A) := RK(B) * RK(C)
    Div,       // R(A) := RK(B) / RK(C)
    Mod,       // R(A) := RK(B) % RK(C)
    Pow,       // R(A) := RK(B) ^ RK(C)
    Unm,       // R(A) := -R(B)
    Not,       // R(A) := not R(B)
    Len,       // R(A) := length of R(B)
    Concat,    // R(A) := R(B).. ... ..R(C)
    Jmp,       // pc+=sBx
    Eq,        // if ((RK(B) == RK(C)) ~= A) then pc++
    Lt,        // if ((RK(B) <  RK(C)) ~= A) then pc++
    Le,        // if ((RK(B) <= RK(C)) ~= A) then pc++
    Test,      // if not (R(A) <=> C) then pc++
    TestSet,   // if (R(B) <=> C) then R(A) := R(B) else pc++
    Call,      // R(A), ... ,R(A+C-2) := R(A)(R(A+1), ... ,R(A+B-1))
    TailCall,  // return R(A)(R(A+1), ... ,R(A+B-1))
    Return,    // return R(A), ... ,R(A+B-2)
    ForLoop,   // R(A)+=R(A+2); if R(A) <?= R(A+1) then { pc+=sBx; R(A+3)=R(A) }
    ForPrep,   // R(A)-=R(A+2); pc+=sBx
    TForLoop,  // R(A+3), ... ,R(A+2+C) := R(A)(R(A+1), R(A+2)); if R(A+3) ~= nil then R(A+2)=R(A+3) else pc++
    SetList,   // R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B
    Close,     // close all variables in the stack up to (>=) R(A)
    Closure,   // R(A) := closure(KPROTO[Bx], R(A), ... ,R(A+n))
    VarArg,    // R(A), R(A+1), ..., R(A+B-1) = vararg
}

impl OpCode {
    pub const COUNT: u8 = 38;

    const ALL: [OpCode; Self::COUNT as usize] = [
        OpCode::Move,
        OpCode::LoadK,
        OpCode::LoadBool,
        OpCode::LoadNil,
        OpCode::GetUpval,
        OpCode::GetGlobal,
        OpCode::GetTable,
        OpCode::SetGlobal,
        OpCode::SetUpval,
        OpCode::SetTable,
        OpCode::NewTable,
        OpCode::Self_,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::Mod,
        OpCode::Pow,
        OpCode::Unm,
        OpCode::Not,
        OpCode::Len,
        OpCode::Concat,
        OpCode::Jmp,
        OpCode::Eq,
        OpCode::Lt,
        OpCode::Le,
        OpCode::Test,
        OpCode::TestSet,
        OpCode::Call,
        OpCode::TailCall,
        OpCode::Return,
        OpCode::ForLoop,
        OpCode::ForPrep,
        OpCode::TForLoop,
        OpCode::SetList,
        OpCode::Close,
        OpCode::Closure,
        OpCode::VarArg,
    ];

    #[inline(always)]
    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }

    pub fn get_mode(self) -> OpMode {
        match self {
            OpCode::LoadK | OpCode::GetGlobal | OpCode::SetGlobal | OpCode::Closure => OpMode::IABx,
            OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep => OpMode::IAsBx,
            _ => OpMode::IABC,
        }
    }

    /// Upper-case name as printed by `luac -l`.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Move => "MOVE",
            OpCode::LoadK => "LOADK",
            OpCode::LoadBool => "LOADBOOL",
            OpCode::LoadNil => "LOADNIL",
            OpCode::GetUpval => "GETUPVAL",
            OpCode::GetGlobal => "GETGLOBAL",
            OpCode::GetTable => "GETTABLE",
            OpCode::SetGlobal => "SETGLOBAL",
            OpCode::SetUpval => "SETUPVAL",
            OpCode::SetTable => "SETTABLE",
            OpCode::NewTable => "NEWTABLE",
            OpCode::Self_ => "SELF",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Mod => "MOD",
            OpCode::Pow => "POW",
            OpCode::Unm => "UNM",
            OpCode::Not => "NOT",
            OpCode::Len => "LEN",
            OpCode::Concat => "CONCAT",
            OpCode::Jmp => "JMP",
            OpCode::Eq => "EQ",
            OpCode::Lt => "LT",
            OpCode::Le => "LE",
            OpCode::Test => "TEST",
            OpCode::TestSet => "TESTSET",
            OpCode::Call => "CALL",
            OpCode::TailCall => "TAILCALL",
            OpCode::Return => "RETURN",
            OpCode::ForLoop => "FORLOOP",
            OpCode::ForPrep => "FORPREP",
            OpCode::TForLoop => "TFORLOOP",
            OpCode::SetList => "SETLIST",
            OpCode::Close => "CLOSE",
            OpCode::Closure => "CLOSURE",
            OpCode::VarArg => "VARARG",
        }
    }

    /// Ops that conditionally skip the following instruction.
    pub fn is_test(self) -> bool {
        matches!(
            self,
            OpCode::Eq | OpCode::Lt | OpCode::Le | OpCode::Test | OpCode::TestSet | OpCode::TForLoop
        )
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_numbers() {
        assert_eq!(OpCode::Move as u8, 0);
        assert_eq!(OpCode::Add as u8, 12);
        assert_eq!(OpCode::Jmp as u8, 22);
        assert_eq!(OpCode::Call as u8, 28);
        assert_eq!(OpCode::VarArg as u8, 37);
        for byte in 0..OpCode::COUNT {
            assert_eq!(OpCode::from_u8(byte).map(|op| op as u8), Some(byte));
        }
        assert_eq!(OpCode::from_u8(38), None);
    }
}
