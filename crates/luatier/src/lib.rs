// Tiered Lua 5.1 execution core
// Register VM with closures, upvalues and coroutines; a reference
// interpreter; per-prototype compilation into shared executable units.

#[cfg(test)]
mod test;

pub mod jit;
pub mod lib_registry;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;

pub use jit::{Backend, CodeCache, CompiledUnit, JitError, JitStats};
pub use lib_registry::LibraryRegistry;
pub use lua_value::{
    Constant, LuaClosure, LuaFunction, LuaString, LuaTable, LuaThread, LuaValue, ProtoBuilder,
    Prototype,
};
pub use lua_vm::{
    Instruction, JitMode, LuaError, LuaResult, LuaVM, OpCode, RuntimeError, SafeOption,
};
pub use stdlib::Stdlib;
