// Host libraries
// The base functions and the coroutine library: enough host code to drive
// every boundary of the execution core (protected calls, iteration,
// metatables, resume and yield).

pub mod basic;
pub mod coroutine;

use crate::lib_registry::create_standard_registry;
use crate::lua_vm::{LuaResult, LuaVM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stdlib {
    Basic,
    Coroutine,

    All,
}

pub fn open_lib(vm: &mut LuaVM, lib: Stdlib) -> LuaResult<()> {
    let registry = create_standard_registry();
    let name = match lib {
        Stdlib::All => return registry.load_all(vm),
        Stdlib::Basic => "_G",
        Stdlib::Coroutine => "coroutine",
    };
    match registry.get_module(name) {
        Some(module) => registry.load_module(vm, module),
        None => Ok(()),
    }
}
