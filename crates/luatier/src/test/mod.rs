pub mod test_interpreter;
pub mod test_jit;
pub mod test_metamethods;
#[cfg(feature = "serde")]
pub mod test_serde;

use std::sync::Arc;

use crate::lua_value::{LuaValue, Prototype};
use crate::lua_vm::{JitMode, LuaResult, LuaVM, SafeOption};
use crate::stdlib::Stdlib;

pub(crate) fn new_vm(jit: JitMode) -> LuaVM {
    let mut vm = LuaVM::new(SafeOption::default().with_jit(jit));
    vm.open_stdlib(Stdlib::All).unwrap();
    vm
}

pub(crate) fn run_with(
    jit: JitMode,
    proto: &Arc<Prototype>,
    setup: &dyn Fn(&mut LuaVM),
) -> LuaResult<Vec<LuaValue>> {
    let mut vm = new_vm(jit);
    setup(&mut vm);
    vm.execute(proto.clone())
}

/// Run `proto` interpreted and compiled; both must produce the same values.
pub(crate) fn run_tiers_with(proto: &Arc<Prototype>, setup: &dyn Fn(&mut LuaVM)) -> Vec<LuaValue> {
    let interpreted = run_with(JitMode::Off, proto, setup).unwrap();
    let compiled = run_with(JitMode::Strict, proto, setup).unwrap();
    assert_eq!(interpreted, compiled, "interpreter and compiled code disagree");
    interpreted
}

pub(crate) fn run_tiers(proto: &Arc<Prototype>) -> Vec<LuaValue> {
    run_tiers_with(proto, &|_| {})
}

/// Run `proto` on both tiers expecting the same error; returns its message.
pub(crate) fn error_tiers_with(proto: &Arc<Prototype>, setup: &dyn Fn(&mut LuaVM)) -> String {
    let interpreted = run_with(JitMode::Off, proto, setup).unwrap_err();
    let compiled = run_with(JitMode::Strict, proto, setup).unwrap_err();
    assert_eq!(interpreted.to_string(), compiled.to_string());
    interpreted.to_string()
}

pub(crate) fn error_tiers(proto: &Arc<Prototype>) -> String {
    error_tiers_with(proto, &|_| {})
}

pub(crate) fn num(n: f64) -> LuaValue {
    LuaValue::Number(n)
}

pub(crate) fn s(text: &str) -> LuaValue {
    LuaValue::from(text)
}
