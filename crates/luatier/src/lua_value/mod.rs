// Lua value representation
// Every Lua 5.1 type as one tagged enum; reference types are shared through Rc

pub mod chunk_loader;
mod lua_convert;
mod lua_function;
mod lua_table;
mod lua_thread;
mod lua_upvalue;
mod proto_builder;

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use smol_str::SmolStr;

pub use lua_convert::{format_number, str_to_number};
pub use lua_function::{
    CFunction, Constant, HostClosure, LocVar, LuaClosure, LuaFunction, ProtoId, Prototype,
    VARARG_HASARG, VARARG_ISVARARG, VARARG_NEEDSARG,
};
pub use lua_table::{LuaTable, TableKeyError};
pub use lua_thread::{CoroutineStatus, LuaThread, ThreadId};
pub use lua_upvalue::{LuaUpvalue, UpvalueRef};
pub(crate) use lua_upvalue::UpvalueState;
pub use proto_builder::ProtoBuilder;

pub type LuaTableRef = Rc<RefCell<LuaTable>>;

/// Immutable Lua string.
///
/// Strings loaded from binary chunks are decoded lossily into UTF-8; the
/// byte length reported by `#` is the length of the stored text.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LuaString(SmolStr);

impl LuaString {
    pub fn new(s: impl AsRef<str>) -> Self {
        LuaString(SmolStr::new(s))
    }

    /// Build a string from a compile-time literal without allocating.
    pub const fn from_static(s: &'static str) -> Self {
        LuaString(SmolStr::new_static(s))
    }

    pub fn from_bytes_lossy(bytes: &[u8]) -> Self {
        LuaString(SmolStr::new(String::from_utf8_lossy(bytes)))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for LuaString {
    fn from(s: &str) -> Self {
        LuaString::new(s)
    }
}

impl From<String> for LuaString {
    fn from(s: String) -> Self {
        LuaString(SmolStr::from(s))
    }
}

impl fmt::Display for LuaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for LuaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// A Lua value.
#[derive(Clone, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    Number(f64),
    String(LuaString),
    Table(LuaTableRef),
    Function(LuaFunction),
    Thread(Rc<LuaThread>),
}

impl LuaValue {
    pub fn string(s: impl Into<LuaString>) -> Self {
        LuaValue::String(s.into())
    }

    pub fn table(table: LuaTable) -> Self {
        LuaValue::Table(Rc::new(RefCell::new(table)))
    }

    pub fn new_table() -> Self {
        Self::table(LuaTable::new())
    }

    pub fn cfunction(f: CFunction) -> Self {
        LuaValue::Function(LuaFunction::Host(f))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            LuaValue::Nil => "nil",
            LuaValue::Boolean(_) => "boolean",
            LuaValue::Number(_) => "number",
            LuaValue::String(_) => "string",
            LuaValue::Table(_) => "table",
            LuaValue::Function(_) => "function",
            LuaValue::Thread(_) => "thread",
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    /// `nil` and `false` are the only false values.
    #[inline]
    pub fn is_falsy(&self) -> bool {
        matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    #[inline]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            LuaValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric coercion: numbers as-is, strings through the numeral grammar.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            LuaValue::Number(n) => Some(*n),
            LuaValue::String(s) => str_to_number(s.as_str()),
            _ => None,
        }
    }

    /// String coercion used by concatenation: strings as-is, numbers formatted.
    pub fn to_lua_string(&self) -> Option<LuaString> {
        match self {
            LuaValue::String(s) => Some(s.clone()),
            LuaValue::Number(n) => Some(LuaString::from(format_number(*n))),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LuaValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&LuaTableRef> {
        match self {
            LuaValue::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&LuaFunction> {
        match self {
            LuaValue::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&Rc<LuaClosure>> {
        match self {
            LuaValue::Function(LuaFunction::Lua(cl)) => Some(cl),
            _ => None,
        }
    }

    pub fn as_thread(&self) -> Option<&Rc<LuaThread>> {
        match self {
            LuaValue::Thread(t) => Some(t),
            _ => None,
        }
    }

    /// Primitive equality: no metamethods, references compare by identity.
    pub fn raw_equals(&self, other: &LuaValue) -> bool {
        match (self, other) {
            (LuaValue::Nil, LuaValue::Nil) => true,
            (LuaValue::Boolean(a), LuaValue::Boolean(b)) => a == b,
            (LuaValue::Number(a), LuaValue::Number(b)) => a == b,
            (LuaValue::String(a), LuaValue::String(b)) => a == b,
            (LuaValue::Table(a), LuaValue::Table(b)) => Rc::ptr_eq(a, b),
            (LuaValue::Function(a), LuaValue::Function(b)) => a.identity() == b.identity(),
            (LuaValue::Thread(a), LuaValue::Thread(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Address used by `tostring` for reference types, 0 otherwise.
    pub fn identity(&self) -> usize {
        match self {
            LuaValue::Table(t) => Rc::as_ptr(t) as *const () as usize,
            LuaValue::Function(f) => f.identity(),
            LuaValue::Thread(t) => Rc::as_ptr(t) as *const () as usize,
            _ => 0,
        }
    }
}

impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        self.raw_equals(other)
    }
}

// NaN never reaches a hash index: tables reject it as a key.
impl Eq for LuaValue {}

impl Hash for LuaValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            LuaValue::Nil => 0u8.hash(state),
            LuaValue::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            LuaValue::Number(n) => {
                2u8.hash(state);
                // -0 and 0 are the same key
                let n = if *n == 0.0 { 0.0f64 } else { *n };
                n.to_bits().hash(state);
            }
            LuaValue::String(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            LuaValue::Table(_) | LuaValue::Function(_) | LuaValue::Thread(_) => {
                4u8.hash(state);
                self.identity().hash(state);
            }
        }
    }
}

impl fmt::Display for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaValue::Nil => f.write_str("nil"),
            LuaValue::Boolean(b) => write!(f, "{}", b),
            LuaValue::Number(n) => f.write_str(&format_number(*n)),
            LuaValue::String(s) => f.write_str(s.as_str()),
            LuaValue::Table(_) => write!(f, "table: {:#x}", self.identity()),
            LuaValue::Function(LuaFunction::Lua(_)) | LuaValue::Function(LuaFunction::HostClosure(_)) => {
                write!(f, "function: {:#x}", self.identity())
            }
            LuaValue::Function(LuaFunction::Host(_)) => {
                write!(f, "function: builtin: {:#x}", self.identity())
            }
            LuaValue::Thread(_) => write!(f, "thread: {:#x}", self.identity()),
        }
    }
}

impl fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaValue::String(s) => write!(f, "{:?}", s),
            other => fmt::Display::fmt(other, f),
        }
    }
}

impl From<bool> for LuaValue {
    fn from(b: bool) -> Self {
        LuaValue::Boolean(b)
    }
}

impl From<f64> for LuaValue {
    fn from(n: f64) -> Self {
        LuaValue::Number(n)
    }
}

impl From<i32> for LuaValue {
    fn from(n: i32) -> Self {
        LuaValue::Number(n as f64)
    }
}

impl From<i64> for LuaValue {
    fn from(n: i64) -> Self {
        LuaValue::Number(n as f64)
    }
}

impl From<usize> for LuaValue {
    fn from(n: usize) -> Self {
        LuaValue::Number(n as f64)
    }
}

impl From<&str> for LuaValue {
    fn from(s: &str) -> Self {
        LuaValue::String(LuaString::new(s))
    }
}

impl From<String> for LuaValue {
    fn from(s: String) -> Self {
        LuaValue::String(LuaString::from(s))
    }
}

impl From<LuaString> for LuaValue {
    fn from(s: LuaString) -> Self {
        LuaValue::String(s)
    }
}

impl From<LuaTableRef> for LuaValue {
    fn from(t: LuaTableRef) -> Self {
        LuaValue::Table(t)
    }
}

impl From<LuaFunction> for LuaValue {
    fn from(f: LuaFunction) -> Self {
        LuaValue::Function(f)
    }
}

impl From<Rc<LuaClosure>> for LuaValue {
    fn from(cl: Rc<LuaClosure>) -> Self {
        LuaValue::Function(LuaFunction::Lua(cl))
    }
}

impl From<Rc<LuaThread>> for LuaValue {
    fn from(t: Rc<LuaThread>) -> Self {
        LuaValue::Thread(t)
    }
}

impl From<&Constant> for LuaValue {
    fn from(k: &Constant) -> Self {
        match k {
            Constant::Nil => LuaValue::Nil,
            Constant::Boolean(b) => LuaValue::Boolean(*b),
            Constant::Number(n) => LuaValue::Number(*n),
            Constant::String(s) => LuaValue::String(s.clone()),
        }
    }
}
