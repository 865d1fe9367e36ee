/// Arithmetic instructions
///
/// Operands are coerced to numbers (numeric strings included); when either
/// operand does not convert, the operation is resolved through the binary
/// metamethod of the left operand, then the right one.
use super::Frame;
use super::TmKind;
use super::metamethod::{call_tm, get_bin_metaop, get_metaop};
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaResult, LuaVM, OpCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl ArithOp {
    pub fn from_opcode(op: OpCode) -> Option<ArithOp> {
        Some(match op {
            OpCode::Add => ArithOp::Add,
            OpCode::Sub => ArithOp::Sub,
            OpCode::Mul => ArithOp::Mul,
            OpCode::Div => ArithOp::Div,
            OpCode::Mod => ArithOp::Mod,
            OpCode::Pow => ArithOp::Pow,
            _ => return None,
        })
    }

    pub fn tm(self) -> TmKind {
        match self {
            ArithOp::Add => TmKind::Add,
            ArithOp::Sub => TmKind::Sub,
            ArithOp::Mul => TmKind::Mul,
            ArithOp::Div => TmKind::Div,
            ArithOp::Mod => TmKind::Mod,
            ArithOp::Pow => TmKind::Pow,
        }
    }

    /// Number arithmetic as Lua 5.1 defines it (`luai_num*`).
    #[inline]
    pub fn apply(self, x: f64, y: f64) -> f64 {
        match self {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => x / y,
            ArithOp::Mod => x - (x / y).floor() * y,
            ArithOp::Pow => x.powf(y),
        }
    }
}

/// Full arithmetic on two values, including coercion and metamethods.
pub fn arith(vm: &mut LuaVM, op: ArithOp, lhs: &LuaValue, rhs: &LuaValue) -> LuaResult<LuaValue> {
    if let (Some(x), Some(y)) = (lhs.to_number(), rhs.to_number()) {
        return Ok(LuaValue::Number(op.apply(x, y)));
    }
    match get_bin_metaop(vm, lhs, rhs, op.tm()) {
        Some(handler) => call_tm(vm, handler, &[lhs.clone(), rhs.clone()]),
        None => {
            let culprit = if lhs.to_number().is_none() { lhs } else { rhs };
            Err(vm.type_error(culprit, "perform arithmetic on"))
        }
    }
}

/// ADD/SUB/MUL/DIV/MOD/POW A B C
/// R(A) := RK(B) op RK(C)
#[inline]
pub(crate) fn op_arith(vm: &mut LuaVM, fr: &Frame, op: ArithOp, a: u32, b: u32, c: u32) -> LuaResult<()> {
    let lhs = fr.rk(vm, b);
    let rhs = fr.rk(vm, c);
    let result = match (&lhs, &rhs) {
        (LuaValue::Number(x), LuaValue::Number(y)) => LuaValue::Number(op.apply(*x, *y)),
        _ => arith(vm, op, &lhs, &rhs)?,
    };
    vm.state.stack[fr.reg(a)] = result;
    Ok(())
}

/// UNM A B
/// R(A) := -R(B)
pub(crate) fn op_unm(vm: &mut LuaVM, fr: &Frame, a: u32, b: u32) -> LuaResult<()> {
    let operand = vm.state.stack[fr.reg(b)].clone();
    let result = match operand.to_number() {
        Some(n) => LuaValue::Number(-n),
        None => match get_metaop(vm, &operand, TmKind::Unm) {
            Some(handler) => call_tm(vm, handler, &[operand.clone(), operand])?,
            None => return Err(vm.type_error(&operand, "perform arithmetic on")),
        },
    };
    vm.state.stack[fr.reg(a)] = result;
    Ok(())
}
