// Tiering and the shared code cache
use std::rc::Rc;
use std::sync::Arc;

use super::{new_vm, num, s};
use crate::jit::{Backend, CodeCache, JitError};
use crate::lua_value::chunk_loader::{dump_binary, load_binary};
use crate::lua_value::{LuaClosure, LuaValue, ProtoBuilder, Prototype};
use crate::lua_vm::{JitMode, LuaError, LuaVM, OpCode, SafeOption};
use crate::stdlib::Stdlib;

/// Main chunk calling one nested function: `return (function(x) return x * 2 end)(21)`
fn with_child() -> Arc<Prototype> {
    let mut f = ProtoBuilder::new("=test");
    f.params(1).max_stack(2).lines(1, 1);
    let k2 = f.rk(2);
    f.abc(OpCode::Mul, 1, 0, k2);
    f.abc(OpCode::Return, 1, 2, 0);
    f.abc(OpCode::Return, 0, 1, 0);

    let mut b = ProtoBuilder::main("=test");
    b.max_stack(2);
    let child = b.child(f.build());
    let k21 = b.constant(21);
    b.abx(OpCode::Closure, 0, child);
    b.abx(OpCode::LoadK, 1, k21);
    b.abc(OpCode::Call, 0, 2, 2);
    b.abc(OpCode::Return, 0, 2, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    b.build()
}

/// Passes the verifier's checks only because it is never loaded: the jump
/// after the first return leaves the code.
fn unreachable_bad_jump() -> Arc<Prototype> {
    let mut b = ProtoBuilder::new("=bad");
    b.max_stack(1);
    let k = b.constant("interpreted");
    b.abx(OpCode::LoadK, 0, k);
    b.abc(OpCode::Return, 0, 2, 0);
    b.asbx(OpCode::Jmp, 0, 40);
    b.abc(OpCode::Return, 0, 1, 0);
    b.build()
}

fn raw_closure(vm: &LuaVM, proto: Arc<Prototype>) -> LuaValue {
    LuaValue::from(Rc::new(LuaClosure::new(proto, Box::new([]), vm.globals())))
}

#[test]
fn test_strict_compiles_every_prototype() {
    let mut vm = new_vm(JitMode::Strict);
    assert_eq!(vm.execute(with_child()).unwrap(), vec![num(42.0)]);
    let stats = vm.jit_stats();
    assert_eq!(stats.compiled, 2);
    assert_eq!(stats.failed, 0);
    #[cfg(feature = "jit")]
    assert_eq!(stats.native_units, 2);
    #[cfg(not(feature = "jit"))]
    assert_eq!(stats.native_units, 0);
}

#[test]
fn test_off_never_compiles() {
    let mut vm = new_vm(JitMode::Off);
    assert_eq!(vm.execute(with_child()).unwrap(), vec![num(42.0)]);
    assert_eq!(vm.jit_stats().compiled, 0);
    assert!(vm.code_cache().is_empty());
}

#[test]
fn test_backend_selection() {
    let cache = CodeCache::new();
    let unit = cache.get_or_compile(&with_child()).unwrap();
    #[cfg(feature = "jit")]
    assert_eq!(unit.backend(), Backend::Native);
    #[cfg(not(feature = "jit"))]
    assert_eq!(unit.backend(), Backend::Threaded);
}

#[test]
fn test_vms_share_a_cache() {
    let cache = Arc::new(CodeCache::new());
    let proto = with_child();
    for _ in 0..2 {
        let option = SafeOption::default().with_jit(JitMode::Strict);
        let mut vm = LuaVM::with_code_cache(option, cache.clone());
        vm.open_stdlib(Stdlib::Basic).unwrap();
        assert_eq!(vm.execute(proto.clone()).unwrap(), vec![num(42.0)]);
    }
    let stats = cache.stats();
    assert_eq!(stats.compiled, 2);
    // the second VM finds the main chunk compiled; the child was compiled
    // along with it and its closure asks again in each VM
    assert_eq!(stats.cache_hits, 3);
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_auto_falls_back_to_the_interpreter() {
    let mut vm = new_vm(JitMode::Auto);
    let f = raw_closure(&vm, unreachable_bad_jump());
    assert_eq!(vm.call(f.clone(), vec![]).unwrap(), vec![s("interpreted")]);
    assert_eq!(vm.jit_stats().failed, 1);
    // the failure is remembered by the closure and by the cache
    assert_eq!(vm.call(f, vec![]).unwrap(), vec![s("interpreted")]);
    assert_eq!(vm.jit_stats().failed, 1);
}

#[test]
fn test_strict_reports_compile_errors() {
    let mut vm = new_vm(JitMode::Strict);
    let f = raw_closure(&vm, unreachable_bad_jump());
    let err = vm.call(f, vec![]).unwrap_err();
    assert!(
        matches!(err, LuaError::Compile(JitError::Malformed { pc: 2, .. })),
        "{:?}",
        err
    );
}

#[test]
fn test_compiled_code_calls_interpreted_code() {
    // return bad()
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(1);
    let name = b.constant("bad");
    b.abx(OpCode::GetGlobal, 0, name);
    b.abc(OpCode::Call, 0, 1, 2);
    b.abc(OpCode::Return, 0, 2, 0);
    b.abc(OpCode::Return, 0, 1, 0);

    let mut vm = new_vm(JitMode::Auto);
    let bad = raw_closure(&vm, unreachable_bad_jump());
    vm.set_global("bad", bad);
    assert_eq!(vm.execute(b.build()).unwrap(), vec![s("interpreted")]);
    let stats = vm.jit_stats();
    assert_eq!((stats.compiled, stats.failed), (1, 1));
}

#[test]
fn test_binary_chunk_round_trip_executes() {
    let bytes = dump_binary(&with_child(), false);
    assert!(crate::lua_value::chunk_loader::is_binary_chunk(&bytes));
    for jit in [JitMode::Off, JitMode::Strict] {
        let mut vm = new_vm(jit);
        let f = vm.load_binary(&bytes).unwrap();
        assert_eq!(vm.call(f, vec![]).unwrap(), vec![num(42.0)]);
    }
    // a reloaded prototype is a new identity
    let reloaded = load_binary(&bytes).unwrap();
    let cache = CodeCache::new();
    cache.get_or_compile(&with_child()).unwrap();
    assert!(cache.lookup(reloaded.id()).is_none());
}

#[test]
fn test_jit_mode_parsing() {
    assert_eq!("off".parse::<JitMode>(), Ok(JitMode::Off));
    assert_eq!("ON".parse::<JitMode>(), Ok(JitMode::Auto));
    assert_eq!("strict".parse::<JitMode>(), Ok(JitMode::Strict));
    assert!("fast".parse::<JitMode>().is_err());
    assert_eq!(SafeOption::default().jit, JitMode::Auto);
}
