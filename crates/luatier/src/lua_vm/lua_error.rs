use std::fmt;

use crate::jit::JitError;
use crate::lua_value::LuaValue;

/// Error raised by Lua code (`error`, failed operations) or by a host
/// function. Carries the error value itself, which can be any Lua value.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub value: LuaValue,
    /// `stack traceback:` text, attached when the error leaves the VM
    pub traceback: Option<String>,
}

impl RuntimeError {
    pub fn new(value: LuaValue) -> Self {
        RuntimeError {
            value,
            traceback: None,
        }
    }

    pub fn message(&self) -> String {
        match &self.value {
            LuaValue::String(s) => s.to_string(),
            LuaValue::Number(_) => self.value.to_string(),
            LuaValue::Nil => "nil".to_string(),
            other => format!("(error object is a {} value)", other.type_name()),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LuaError {
    /// Language-level error with its error value
    #[error("{0}")]
    Runtime(RuntimeError),
    /// Register stack or call depth limit exceeded
    #[error("{0}")]
    StackOverflow(String),
    /// Invalid prototype or binary chunk
    #[error("malformed bytecode: {0}")]
    MalformedBytecode(String),
    /// Compilation failed under `JitMode::Strict`
    #[error("compilation failed: {0}")]
    Compile(#[from] JitError),
    /// Coroutine suspension in flight; values are held by the VM
    #[error("attempt to yield from outside a coroutine")]
    Yield,
}

pub type LuaResult<T> = Result<T, LuaError>;

impl LuaError {
    pub fn runtime(value: impl Into<LuaValue>) -> Self {
        LuaError::Runtime(RuntimeError::new(value.into()))
    }

    /// The value a protected call hands back for this error.
    pub fn into_value(self) -> LuaValue {
        match self {
            LuaError::Runtime(e) => e.value,
            other => LuaValue::from(other.to_string()),
        }
    }

    pub fn traceback(&self) -> Option<&str> {
        match self {
            LuaError::Runtime(e) => e.traceback.as_deref(),
            _ => None,
        }
    }
}
