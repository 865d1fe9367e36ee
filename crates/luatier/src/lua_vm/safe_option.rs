use super::lua_limits::{LUAI_MAXCALLS, LUAI_MAXCCALLS, LUAI_MAXSTACK};

/// When prototypes are compiled into executable units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JitMode {
    /// Always interpret
    Off,
    /// Compile on first call; fall back to the interpreter if compilation fails
    #[default]
    Auto,
    /// Compile on first call; a failed compilation is an error
    Strict,
}

impl std::str::FromStr for JitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "0" | "false" => Ok(JitMode::Off),
            "auto" | "on" | "1" | "true" => Ok(JitMode::Auto),
            "strict" => Ok(JitMode::Strict),
            other => Err(format!("unknown jit mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafeOption {
    /// Hard limit on register stack slots per coroutine
    pub max_stack_size: usize,
    /// Maximum number of active frames per coroutine
    pub max_call_depth: usize,
    /// Maximum nesting of native re-entries (metamethods, pcall, resume)
    pub max_c_calls: usize,
    pub jit: JitMode,
}

impl Default for SafeOption {
    fn default() -> Self {
        Self {
            max_stack_size: LUAI_MAXSTACK,
            max_call_depth: LUAI_MAXCALLS,
            max_c_calls: LUAI_MAXCCALLS,
            jit: JitMode::Auto,
        }
    }
}

impl SafeOption {
    pub fn with_jit(mut self, jit: JitMode) -> Self {
        self.jit = jit;
        self
    }
}
