// Instruction semantics, checked on the interpreter and on compiled units
use std::sync::Arc;

use super::{error_tiers, num, run_tiers, run_tiers_with, s};
use crate::lua_value::{Constant, LuaTable, LuaValue, ProtoBuilder, Prototype, VARARG_ISVARARG};
use crate::lua_vm::{Instruction, JitMode, LuaResult, LuaVM, OpCode};

#[test]
fn test_numeric_for_sum() {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(5);
    let zero = b.constant(0);
    let one = b.constant(1);
    let ten = b.constant(10);
    b.abx(OpCode::LoadK, 0, zero);
    b.abx(OpCode::LoadK, 1, one);
    b.abx(OpCode::LoadK, 2, ten);
    b.abx(OpCode::LoadK, 3, one);
    b.asbx(OpCode::ForPrep, 1, 1);
    b.abc(OpCode::Add, 0, 0, 4);
    b.asbx(OpCode::ForLoop, 1, -2);
    b.abc(OpCode::Return, 0, 2, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    assert_eq!(run_tiers(&b.build()), vec![num(55.0)]);
}

/// Counts iterations of `for i = init, limit, step` and returns
/// count, last i, the four loop registers.
fn counting_loop(init: Constant, limit: Constant, step: Constant) -> Arc<Prototype> {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(6);
    let zero = b.constant(0);
    let one = b.rk(1);
    let init = b.constant(init);
    let limit = b.constant(limit);
    let step = b.constant(step);
    b.abx(OpCode::LoadK, 0, zero);
    b.abx(OpCode::LoadK, 2, init);
    b.abx(OpCode::LoadK, 3, limit);
    b.abx(OpCode::LoadK, 4, step);
    b.asbx(OpCode::ForPrep, 2, 2);
    b.abc(OpCode::Add, 0, 0, one);
    b.abc(OpCode::Move, 1, 5, 0);
    b.asbx(OpCode::ForLoop, 2, -3);
    b.abc(OpCode::Return, 0, 7, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    b.build()
}

#[test]
fn test_for_loop_boundaries() {
    let cases: [(f64, f64, f64, f64, LuaValue); 7] = [
        (1.0, 3.0, 1.0, 3.0, num(3.0)),
        (3.0, 1.0, -1.0, 3.0, num(1.0)),
        (1.0, 1.0, 1.0, 1.0, num(1.0)),
        (10.0, 1.0, -3.0, 4.0, num(1.0)),
        (1.0, 2.0, 0.5, 3.0, num(2.0)),
        (1.0, 0.0, 1.0, 0.0, LuaValue::Nil),
        (5.0, 5.0, 1.0, 1.0, num(5.0)),
    ];
    for (init, limit, step, count, last) in cases {
        let results = run_tiers(&counting_loop(init.into(), limit.into(), step.into()));
        assert_eq!(results[0], num(count), "for {} , {}, {}", init, limit, step);
        assert_eq!(results[1], last);
        // the visible loop variable is cleared when the loop exits
        assert_eq!(results[5], LuaValue::Nil);
    }
}

#[test]
fn test_for_loop_accepts_numeric_strings() {
    let results = run_tiers(&counting_loop("1".into(), " 4 ".into(), "0x1".into()));
    assert_eq!(results[0], num(4.0));
}

#[test]
fn test_for_loop_rejects_non_numbers() {
    let msg = error_tiers(&counting_loop("a".into(), 1.into(), 1.into()));
    assert_eq!(msg, "test:1: 'for' initial value must be a number");
    let msg = error_tiers(&counting_loop(1.into(), true.into(), 1.into()));
    assert_eq!(msg, "test:1: 'for' limit must be a number");
    let msg = error_tiers(&counting_loop(1.into(), 2.into(), Constant::Nil));
    assert_eq!(msg, "test:1: 'for' step must be a number");
}

fn compare(op: OpCode, lhs: impl Into<Constant>, rhs: impl Into<Constant>) -> Arc<Prototype> {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(1);
    let l = b.rk(lhs);
    let r = b.rk(rhs);
    b.abc(op, 1, l, r);
    b.asbx(OpCode::Jmp, 0, 1);
    b.abc(OpCode::LoadBool, 0, 0, 1);
    b.abc(OpCode::LoadBool, 0, 1, 0);
    b.abc(OpCode::Return, 0, 2, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    b.build()
}

#[test]
fn test_comparisons() {
    let t = LuaValue::from(true);
    let f = LuaValue::from(false);
    assert_eq!(run_tiers(&compare(OpCode::Lt, 1, 2)), vec![t.clone()]);
    assert_eq!(run_tiers(&compare(OpCode::Lt, 2, 1)), vec![f.clone()]);
    assert_eq!(run_tiers(&compare(OpCode::Le, 2, 2)), vec![t.clone()]);
    assert_eq!(run_tiers(&compare(OpCode::Lt, "a", "b")), vec![t.clone()]);
    assert_eq!(run_tiers(&compare(OpCode::Le, "b", "a")), vec![f.clone()]);
    assert_eq!(run_tiers(&compare(OpCode::Eq, 1, 1.0)), vec![t]);
    // no coercion in equality
    assert_eq!(run_tiers(&compare(OpCode::Eq, "1", 1)), vec![f]);
}

#[test]
fn test_compare_errors() {
    let msg = error_tiers(&compare(OpCode::Lt, 1, "x"));
    assert_eq!(msg, "test:1: attempt to compare number with string");
    let msg = error_tiers(&compare(OpCode::Le, true, false));
    assert_eq!(msg, "test:1: attempt to compare two boolean values");
}

#[test]
fn test_concat_batches_operands() {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(4);
    for (r, k) in [(0, Constant::from("a")), (1, 1.into()), (2, "b".into()), (3, 2.into())] {
        let k = b.constant(k);
        b.abx(OpCode::LoadK, r, k);
    }
    b.abc(OpCode::Concat, 0, 0, 3);
    b.abc(OpCode::Return, 0, 2, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    assert_eq!(run_tiers(&b.build()), vec![s("a1b2")]);
}

#[test]
fn test_concat_formats_numbers_and_rejects_nil() {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(2);
    let k = b.constant(2.5);
    b.abx(OpCode::LoadK, 0, k);
    let k = b.constant(-0.0);
    b.abx(OpCode::LoadK, 1, k);
    b.abc(OpCode::Concat, 0, 0, 1);
    b.abc(OpCode::Return, 0, 2, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    assert_eq!(run_tiers(&b.build()), vec![s("2.5-0")]);

    let mut b = ProtoBuilder::main("=test");
    b.max_stack(2);
    let k = b.constant("a");
    b.abx(OpCode::LoadK, 0, k);
    b.abc(OpCode::LoadNil, 1, 1, 0);
    b.abc(OpCode::Concat, 0, 0, 1);
    b.abc(OpCode::Return, 0, 2, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    assert_eq!(
        error_tiers(&b.build()),
        "test:1: attempt to concatenate a nil value"
    );
}

#[test]
fn test_arithmetic() {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(6);
    let (k7, k3, km7) = (b.rk(7), b.rk(3), b.rk(-7));
    b.abc(OpCode::Mod, 0, k7, k3);
    b.abc(OpCode::Mod, 1, km7, k3);
    let (k2, k10) = (b.rk(2), b.rk(10));
    b.abc(OpCode::Pow, 2, k2, k10);
    let (ks10, k1) = (b.rk("10"), b.rk(1));
    b.abc(OpCode::Add, 3, ks10, k1);
    b.abc(OpCode::Div, 4, k7, k2);
    b.abx(OpCode::LoadK, 5, Instruction::index_k(k3));
    b.abc(OpCode::Unm, 5, 5, 0);
    b.abc(OpCode::Return, 0, 7, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    assert_eq!(
        run_tiers(&b.build()),
        vec![num(1.0), num(2.0), num(1024.0), num(11.0), num(3.5), num(-3.0)]
    );
}

#[test]
fn test_arithmetic_on_nil_fails() {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(2).line(7);
    let k1 = b.rk(1);
    b.abc(OpCode::LoadNil, 1, 1, 0);
    b.abc(OpCode::Add, 0, k1, 1);
    b.abc(OpCode::Return, 0, 1, 0);
    assert_eq!(
        error_tiers(&b.build()),
        "test:7: attempt to perform arithmetic on a nil value"
    );
}

#[test]
fn test_logic_ops() {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(5);
    b.abc(OpCode::LoadNil, 0, 0, 0);
    let k5 = b.constant(5);
    b.abx(OpCode::LoadK, 1, k5);
    b.abc(OpCode::TestSet, 2, 0, 1);
    b.asbx(OpCode::Jmp, 0, 1);
    b.abc(OpCode::Move, 2, 1, 0);
    b.abc(OpCode::LoadBool, 3, 0, 0);
    b.abc(OpCode::Test, 3, 0, 0);
    b.asbx(OpCode::Jmp, 0, 1);
    let k1 = b.constant(1);
    b.abx(OpCode::LoadK, 3, k1);
    b.abc(OpCode::Not, 4, 0, 0);
    b.abc(OpCode::Return, 2, 4, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    assert_eq!(
        run_tiers(&b.build()),
        vec![num(5.0), LuaValue::from(false), LuaValue::from(true)]
    );
}

fn table_constructor(batch_word: bool) -> Arc<Prototype> {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(4);
    b.abc(OpCode::NewTable, 0, 3, 0);
    for (r, v) in [(1, 10), (2, 20), (3, 30)] {
        let k = b.constant(v);
        b.abx(OpCode::LoadK, r, k);
    }
    if batch_word {
        b.abc(OpCode::SetList, 0, 3, 0);
        b.emit(Instruction::from_u32(1));
    } else {
        b.abc(OpCode::SetList, 0, 3, 1);
    }
    b.abc(OpCode::Len, 1, 0, 0);
    let k2 = b.rk(2);
    b.abc(OpCode::GetTable, 2, 0, k2);
    b.abc(OpCode::Return, 1, 3, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    b.build()
}

#[test]
fn test_setlist_fills_array() {
    assert_eq!(run_tiers(&table_constructor(false)), vec![num(3.0), num(20.0)]);
    assert_eq!(run_tiers(&table_constructor(true)), vec![num(3.0), num(20.0)]);
}

#[test]
fn test_index_nil_fails() {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(2);
    let kx = b.rk("x");
    b.abc(OpCode::GetTable, 1, 0, kx);
    b.abc(OpCode::Return, 0, 1, 0);
    assert_eq!(error_tiers(&b.build()), "test:1: attempt to index a nil value");
}

/// Returns `select('#', ...)` followed by all varargs.
fn vararg_echo() -> Arc<Prototype> {
    let mut b = ProtoBuilder::new("=echo");
    b.vararg(VARARG_ISVARARG).max_stack(4);
    let select = b.constant("select");
    let hash = b.constant("#");
    b.abx(OpCode::GetGlobal, 0, select);
    b.abx(OpCode::LoadK, 1, hash);
    b.abc(OpCode::VarArg, 2, 0, 0);
    b.abc(OpCode::Call, 0, 0, 2);
    b.abc(OpCode::VarArg, 1, 0, 0);
    b.abc(OpCode::Return, 0, 0, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    b.build()
}

#[test]
fn test_varargs_pass_through() {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(4);
    let echo = b.child(vararg_echo());
    b.abx(OpCode::Closure, 0, echo);
    let k7 = b.constant(7);
    b.abx(OpCode::LoadK, 1, k7);
    b.abc(OpCode::LoadNil, 2, 2, 0);
    let kx = b.constant("x");
    b.abx(OpCode::LoadK, 3, kx);
    b.abc(OpCode::Call, 0, 4, 0);
    b.abc(OpCode::Return, 0, 0, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    assert_eq!(
        run_tiers(&b.build()),
        vec![num(3.0), num(7.0), LuaValue::Nil, s("x")]
    );
}

#[test]
fn test_fixed_params_are_adjusted() {
    // function(a, b) return b, a end called with one argument
    let mut f = ProtoBuilder::new("=swap");
    f.params(2).max_stack(4);
    f.abc(OpCode::Move, 2, 1, 0);
    f.abc(OpCode::Move, 3, 0, 0);
    f.abc(OpCode::Return, 2, 3, 0);
    f.abc(OpCode::Return, 0, 1, 0);

    let mut b = ProtoBuilder::main("=test");
    b.max_stack(3);
    let p = b.child(f.build());
    b.abx(OpCode::Closure, 0, p);
    let k = b.constant("only");
    b.abx(OpCode::LoadK, 1, k);
    b.abc(OpCode::Call, 0, 2, 3);
    b.abc(OpCode::Return, 0, 3, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    assert_eq!(run_tiers(&b.build()), vec![LuaValue::Nil, s("only")]);
}

/// `function(n) if n == 0 then return "done" end return f(n - 1) end`,
/// recursing as a tail call or as a plain call.
fn countdown(tail: bool) -> Arc<Prototype> {
    let mut f = ProtoBuilder::new("=countdown");
    f.params(1).max_stack(3);
    let k0 = f.rk(0);
    let done = f.constant("done");
    let name = f.constant("countdown");
    let k1 = f.rk(1);
    f.abc(OpCode::Eq, 0, 0, k0);
    f.asbx(OpCode::Jmp, 0, 2);
    f.abx(OpCode::LoadK, 1, done);
    f.abc(OpCode::Return, 1, 2, 0);
    f.abx(OpCode::GetGlobal, 1, name);
    f.abc(OpCode::Sub, 2, 0, k1);
    if tail {
        f.abc(OpCode::TailCall, 1, 2, 0);
        f.abc(OpCode::Return, 1, 0, 0);
    } else {
        f.abc(OpCode::Call, 1, 2, 2);
        f.abc(OpCode::Return, 1, 2, 0);
    }
    f.abc(OpCode::Return, 0, 1, 0);

    let mut b = ProtoBuilder::main("=test");
    b.max_stack(2);
    let p = b.child(f.build());
    let name = b.constant("countdown");
    let n = b.constant(100_000);
    b.abx(OpCode::Closure, 0, p);
    b.abx(OpCode::SetGlobal, 0, name);
    b.abx(OpCode::LoadK, 1, n);
    b.abc(OpCode::Call, 0, 2, 2);
    b.abc(OpCode::Return, 0, 2, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    b.build()
}

#[test]
fn test_tail_calls_do_not_grow_the_frame_stack() {
    assert_eq!(run_tiers(&countdown(true)), vec![s("done")]);
}

#[test]
fn test_deep_recursion_overflows() {
    let msg = error_tiers(&countdown(false));
    assert!(msg.ends_with("stack overflow"), "{}", msg);
}

fn inc_field(vm: &mut LuaVM) -> LuaResult<usize> {
    let n = match vm.get_arg(1).as_table() {
        Some(t) => t.borrow().raw_get_str("n").as_number().unwrap_or(0.0),
        None => return Err(vm.arg_error(1, "inc", "table expected")),
    };
    vm.push_value(LuaValue::from(n + 1.0))?;
    Ok(1)
}

#[test]
fn test_self_passes_receiver() {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(3);
    let t = b.constant("t");
    let inc = b.rk("inc");
    b.abx(OpCode::GetGlobal, 1, t);
    b.abc(OpCode::Self_, 1, 1, inc);
    b.abc(OpCode::Call, 1, 2, 2);
    b.abc(OpCode::Return, 1, 2, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    let results = run_tiers_with(&b.build(), &|vm| {
        let mut t = LuaTable::new();
        t.raw_set(LuaValue::from("n"), num(41.0)).unwrap();
        t.raw_set(LuaValue::from("inc"), LuaValue::cfunction(inc_field))
            .unwrap();
        vm.set_global("t", LuaValue::table(t));
    });
    assert_eq!(results, vec![num(42.0)]);
}

#[test]
fn test_vm_is_usable_after_an_error() {
    let mut vm = super::new_vm(JitMode::Auto);
    assert!(vm.execute(countdown(false)).is_err());
    assert_eq!(vm.state.frames.len(), 0);
    assert_eq!(vm.execute(countdown(true)).unwrap(), vec![s("done")]);
}

#[test]
fn test_runtime_errors_carry_a_traceback() {
    let mut vm = super::new_vm(JitMode::Off);
    let err = vm.execute(compare(OpCode::Lt, 1, "x")).unwrap_err();
    let traceback = err.traceback().unwrap();
    assert!(traceback.starts_with("stack traceback:"));
    assert!(traceback.contains("test:1: in main chunk"), "{}", traceback);
}

#[test]
fn test_verifier_rejects_bad_code() {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(1);
    b.abc(OpCode::Move, 0, 5, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    let mut vm = super::new_vm(JitMode::Off);
    let err = vm.execute(b.build()).unwrap_err();
    assert!(matches!(err, crate::LuaError::MalformedBytecode(_)));
    assert!(err.to_string().contains("register 5 out of range"));
}

/// Closures built directly are not verified; the interpreter still rejects
/// a bad CLOSURE instead of indexing past the code.
#[test]
fn test_interpreter_rejects_bad_closure_operands() {
    let mut child = ProtoBuilder::new("=child");
    child.upvalues(1).max_stack(1);
    child.abc(OpCode::Return, 0, 1, 0);
    let child = child.build();

    let mut missing_words = ProtoBuilder::main("=test");
    missing_words.max_stack(1);
    let idx = missing_words.child(child);
    missing_words.abx(OpCode::Closure, 0, idx);

    let mut bad_index = ProtoBuilder::main("=test");
    bad_index.max_stack(1);
    bad_index.abx(OpCode::Closure, 0, 3);
    bad_index.abc(OpCode::Return, 0, 1, 0);

    for (proto, expected) in [
        (missing_words.build(), "CLOSURE missing capture words at pc 0"),
        (bad_index.build(), "prototype 3 out of range at pc 0"),
    ] {
        let mut vm = super::new_vm(JitMode::Off);
        let closure = crate::lua_value::LuaClosure::new(proto, Box::new([]), vm.globals());
        let err = vm
            .call(LuaValue::from(std::rc::Rc::new(closure)), vec![])
            .unwrap_err();
        assert!(matches!(err, crate::LuaError::MalformedBytecode(_)), "{:?}", err);
        assert!(err.to_string().contains(expected), "{}", err);
    }
}

/// `local s = 0 for _, v in <iter>({10, 20, 30}) do s = s + v end return s`
fn generic_for_sum(iter: &str) -> Arc<Prototype> {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(8);
    b.abc(OpCode::NewTable, 0, 3, 0);
    for (r, v) in [(1, 10), (2, 20), (3, 30)] {
        let k = b.constant(v);
        b.abx(OpCode::LoadK, r, k);
    }
    b.abc(OpCode::SetList, 0, 3, 1);
    let zero = b.constant(0);
    b.abx(OpCode::LoadK, 1, zero);
    let iter = b.constant(iter);
    b.abx(OpCode::GetGlobal, 2, iter);
    b.abc(OpCode::Move, 3, 0, 0);
    b.abc(OpCode::Call, 2, 2, 4);
    let enter = b.jump();
    let body = b.abc(OpCode::Add, 1, 1, 6);
    let tfor = b.abc(OpCode::TForLoop, 2, 0, 2);
    b.patch_jump(enter, tfor);
    b.asbx(OpCode::Jmp, 0, body as i32 - (tfor as i32 + 2));
    b.abc(OpCode::Return, 1, 2, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    b.build()
}

#[test]
fn test_generic_for_over_ipairs_and_pairs() {
    assert_eq!(run_tiers(&generic_for_sum("ipairs")), vec![num(60.0)]);
    assert_eq!(run_tiers(&generic_for_sum("pairs")), vec![num(60.0)]);
}

#[test]
fn test_calling_a_non_function_fails() {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(1).line(3);
    let k = b.constant(5);
    b.abx(OpCode::LoadK, 0, k);
    b.abc(OpCode::Call, 0, 1, 1);
    b.abc(OpCode::Return, 0, 1, 0);
    assert_eq!(error_tiers(&b.build()), "test:3: attempt to call a number value");
}
