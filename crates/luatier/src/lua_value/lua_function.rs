// Function prototypes and closures

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{LuaString, LuaTableRef, LuaValue, UpvalueRef};
use crate::jit::{CompiledUnit, JitError};
use crate::lua_vm::{LuaResult, LuaVM};

/// Host function: reads its arguments from the active frame, pushes its
/// results and returns how many it pushed.
pub type CFunction = fn(&mut LuaVM) -> LuaResult<usize>;

/// Vararg flags of a prototype (Lua 5.1 `is_vararg` byte)
pub const VARARG_HASARG: u8 = 1;
pub const VARARG_ISVARARG: u8 = 2;
/// Function uses the compatibility `arg` table
pub const VARARG_NEEDSARG: u8 = 4;

static NEXT_PROTO_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a prototype, used as the compiled-unit cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtoId(u64);

impl ProtoId {
    pub fn next() -> Self {
        ProtoId(NEXT_PROTO_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProtoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proto#{}", self.0)
    }
}

/// Constant pool entry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Constant {
    Nil,
    Boolean(bool),
    Number(f64),
    String(LuaString),
}

impl From<bool> for Constant {
    fn from(b: bool) -> Self {
        Constant::Boolean(b)
    }
}

impl From<f64> for Constant {
    fn from(n: f64) -> Self {
        Constant::Number(n)
    }
}

impl From<i32> for Constant {
    fn from(n: i32) -> Self {
        Constant::Number(n as f64)
    }
}

impl From<&str> for Constant {
    fn from(s: &str) -> Self {
        Constant::String(LuaString::new(s))
    }
}

impl From<String> for Constant {
    fn from(s: String) -> Self {
        Constant::String(LuaString::from(s))
    }
}

impl From<LuaString> for Constant {
    fn from(s: LuaString) -> Self {
        Constant::String(s)
    }
}

/// Local variable debug record.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocVar {
    pub name: LuaString,
    pub start_pc: u32,
    pub end_pc: u32,
}

/// Immutable compiled function.
///
/// Shared by `Arc` between every closure instantiated from it and between
/// threads holding a shared code cache. The identity is assigned on
/// construction and never reused.
#[derive(Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Prototype {
    #[cfg_attr(feature = "serde", serde(skip, default = "ProtoId::next"))]
    id: ProtoId,
    pub source: LuaString,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub num_upvalues: u8,
    pub num_params: u8,
    /// `VARARG_*` flags
    pub vararg: u8,
    pub max_stack_size: u8,
    pub code: Vec<u32>,
    pub constants: Vec<Constant>,
    pub protos: Vec<Arc<Prototype>>,
    /// Source line per instruction (may be empty when stripped)
    pub line_info: Vec<u32>,
    pub loc_vars: Vec<LocVar>,
    pub upvalue_names: Vec<LuaString>,
}

impl Prototype {
    pub fn new(source: impl Into<LuaString>) -> Self {
        Prototype {
            id: ProtoId::next(),
            source: source.into(),
            line_defined: 0,
            last_line_defined: 0,
            num_upvalues: 0,
            num_params: 0,
            vararg: 0,
            max_stack_size: 2,
            code: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            line_info: Vec::new(),
            loc_vars: Vec::new(),
            upvalue_names: Vec::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> ProtoId {
        self.id
    }

    #[inline]
    pub fn is_vararg(&self) -> bool {
        self.vararg & VARARG_ISVARARG != 0
    }

    /// Line of the instruction at `pc`, if line info was kept.
    pub fn line_at(&self, pc: usize) -> Option<u32> {
        self.line_info.get(pc).copied()
    }
}

/// Lua closure: a prototype bound to upvalue cells and an environment.
pub struct LuaClosure {
    pub proto: Arc<Prototype>,
    pub upvalues: Box<[UpvalueRef]>,
    pub env: LuaTableRef,
    /// Tiering decision for this closure, resolved on first call
    pub(crate) unit: OnceCell<Result<Arc<CompiledUnit>, JitError>>,
}

impl LuaClosure {
    pub fn new(proto: Arc<Prototype>, upvalues: Box<[UpvalueRef]>, env: LuaTableRef) -> Self {
        LuaClosure {
            proto,
            upvalues,
            env,
            unit: OnceCell::new(),
        }
    }
}

/// Host function carrying captured values (e.g. `coroutine.wrap`).
pub struct HostClosure {
    pub func: CFunction,
    pub upvalues: Vec<LuaValue>,
}

#[derive(Clone)]
pub enum LuaFunction {
    Lua(Rc<LuaClosure>),
    Host(CFunction),
    HostClosure(Rc<HostClosure>),
}

impl LuaFunction {
    pub fn identity(&self) -> usize {
        match self {
            LuaFunction::Lua(cl) => Rc::as_ptr(cl) as *const () as usize,
            LuaFunction::Host(f) => *f as usize,
            LuaFunction::HostClosure(hc) => Rc::as_ptr(hc) as *const () as usize,
        }
    }

    pub fn is_lua(&self) -> bool {
        matches!(self, LuaFunction::Lua(_))
    }
}
