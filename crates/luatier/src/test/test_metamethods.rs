// Metamethod dispatch from instructions
use std::sync::Arc;

use super::{error_tiers_with, num, run_tiers_with, s};
use crate::lua_value::{LuaTable, LuaValue, ProtoBuilder, Prototype};
use crate::lua_vm::{LuaResult, LuaVM, OpCode};

fn table_with_meta(fields: &[(&str, LuaValue)], meta: &[(&str, LuaValue)]) -> LuaValue {
    let mut mt = LuaTable::new();
    for (k, v) in meta {
        mt.raw_set(LuaValue::from(*k), v.clone()).unwrap();
    }
    let mut t = LuaTable::new();
    for (k, v) in fields {
        t.raw_set(LuaValue::from(*k), v.clone()).unwrap();
    }
    t.set_metatable(LuaValue::table(mt).as_table().cloned());
    LuaValue::table(t)
}

/// Fetches globals `names` into R0.. and returns them; `body` emits the rest
/// and places its results from register `names.len()`.
fn program(names: &[&str], body: impl FnOnce(&mut ProtoBuilder) -> u32) -> Arc<Prototype> {
    let mut b = ProtoBuilder::main("=test");
    b.max_stack(10);
    for (r, name) in names.iter().enumerate() {
        let k = b.constant(*name);
        b.abx(OpCode::GetGlobal, r as u32, k);
    }
    let nresults = body(&mut b);
    b.abc(OpCode::Return, names.len() as u32, nresults + 1, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    b.build()
}

fn bang_key(vm: &mut LuaVM) -> LuaResult<usize> {
    let key = vm.get_arg(2);
    let key = key.as_str().unwrap_or("?").to_string();
    vm.push_value(LuaValue::from(format!("{}!", key)))?;
    Ok(1)
}

#[test]
fn test_index_chain() {
    let proto = program(&["t"], |b| {
        let (ka, kb) = (b.rk("a"), b.rk("b"));
        b.abc(OpCode::GetTable, 1, 0, ka);
        b.abc(OpCode::GetTable, 2, 0, kb);
        2
    });
    let results = run_tiers_with(&proto, &|vm| {
        let proxy = table_with_meta(
            &[("a", num(1.0))],
            &[("__index", LuaValue::cfunction(bang_key))],
        );
        vm.set_global("t", table_with_meta(&[], &[("__index", proxy)]));
    });
    assert_eq!(results, vec![num(1.0), s("b!")]);
}

#[test]
fn test_index_loop_is_detected() {
    let proto = program(&["t"], |b| {
        let k = b.rk("missing");
        b.abc(OpCode::GetTable, 1, 0, k);
        1
    });
    let msg = error_tiers_with(&proto, &|vm| {
        let t = table_with_meta(&[], &[]);
        let mt = t.as_table().unwrap().borrow().metatable().unwrap();
        mt.borrow_mut()
            .raw_set(LuaValue::from("__index"), t.clone())
            .unwrap();
        vm.set_global("t", t);
    });
    assert_eq!(msg, "test:1: loop in gettable");
}

#[test]
fn test_newindex_redirects_assignment() {
    let proto = program(&["t", "sink", "rawget"], |b| {
        let (kx, k5) = (b.rk("x"), b.rk(5));
        b.abc(OpCode::SetTable, 0, kx, k5);
        b.abc(OpCode::Move, 3, 2, 0);
        b.abc(OpCode::Move, 4, 0, 0);
        let x = b.constant("x");
        b.abx(OpCode::LoadK, 5, x);
        b.abc(OpCode::Call, 3, 3, 2);
        b.abc(OpCode::GetTable, 4, 1, kx);
        2
    });
    let results = run_tiers_with(&proto, &|vm| {
        let sink = LuaValue::new_table();
        vm.set_global("t", table_with_meta(&[], &[("__newindex", sink.clone())]));
        vm.set_global("sink", sink);
    });
    assert_eq!(results, vec![LuaValue::Nil, num(5.0)]);
}

fn count_args(vm: &mut LuaVM) -> LuaResult<usize> {
    let n = vm.arg_count();
    vm.push_value(LuaValue::from(n))?;
    Ok(1)
}

#[test]
fn test_call_handler_receives_the_object() {
    let proto = program(&["t"], |b| {
        b.abc(OpCode::Move, 1, 0, 0);
        let (k1, k2) = (b.constant(1), b.constant(2));
        b.abx(OpCode::LoadK, 2, k1);
        b.abx(OpCode::LoadK, 3, k2);
        b.abc(OpCode::Call, 1, 3, 2);
        1
    });
    let results = run_tiers_with(&proto, &|vm| {
        vm.set_global(
            "t",
            table_with_meta(&[], &[("__call", LuaValue::cfunction(count_args))]),
        );
    });
    assert_eq!(results, vec![num(3.0)]);
}

fn describe_operands(vm: &mut LuaVM) -> LuaResult<usize> {
    let text = format!("{}+{}", vm.get_arg(1).type_name(), vm.get_arg(2).type_name());
    vm.push_value(LuaValue::from(text))?;
    Ok(1)
}

fn negative_one(vm: &mut LuaVM) -> LuaResult<usize> {
    vm.push_value(num(-1.0))?;
    Ok(1)
}

fn forty_two(vm: &mut LuaVM) -> LuaResult<usize> {
    vm.push_value(num(42.0))?;
    Ok(1)
}

fn cat(vm: &mut LuaVM) -> LuaResult<usize> {
    vm.push_value(s("cat"))?;
    Ok(1)
}

fn operator_object(vm: &mut LuaVM) {
    let meta = [
        ("__add", LuaValue::cfunction(describe_operands)),
        ("__unm", LuaValue::cfunction(negative_one)),
        ("__len", LuaValue::cfunction(forty_two)),
        ("__concat", LuaValue::cfunction(cat)),
    ];
    vm.set_global("t", table_with_meta(&[], &meta));
}

#[test]
fn test_arith_handlers_keep_operand_order() {
    let proto = program(&["t"], |b| {
        let k1 = b.rk(1);
        b.abc(OpCode::Add, 1, 0, k1);
        b.abc(OpCode::Add, 2, k1, 0);
        b.abc(OpCode::Unm, 3, 0, 0);
        3
    });
    assert_eq!(
        run_tiers_with(&proto, &operator_object),
        vec![s("table+number"), s("number+table"), num(-1.0)]
    );
}

#[test]
fn test_table_length_ignores_len_handler() {
    let proto = program(&["t"], |b| {
        b.abc(OpCode::Len, 1, 0, 0);
        let kx = b.constant("x");
        b.abx(OpCode::LoadK, 2, kx);
        b.abc(OpCode::Move, 3, 0, 0);
        b.abc(OpCode::Concat, 2, 2, 3);
        2
    });
    assert_eq!(
        run_tiers_with(&proto, &operator_object),
        vec![num(0.0), s("cat")]
    );
}

#[test]
fn test_length_of_non_sequence_values_fails() {
    for (value, type_name) in [(num(3.0), "number"), (LuaValue::from(true), "boolean")] {
        let proto = program(&["v"], |b| {
            b.abc(OpCode::Len, 1, 0, 0);
            1
        });
        let msg = error_tiers_with(&proto, &|vm| vm.set_global("v", value.clone()));
        assert_eq!(
            msg,
            format!("test:1: attempt to get length of a {} value", type_name)
        );
    }
}

#[test]
fn test_missing_handler_reports_the_operand() {
    let proto = program(&["t"], |b| {
        let k1 = b.rk(1);
        b.abc(OpCode::Sub, 1, 0, k1);
        1
    });
    let msg = error_tiers_with(&proto, &operator_object);
    assert_eq!(msg, "test:1: attempt to perform arithmetic on a table value");
}

fn always_true(vm: &mut LuaVM) -> LuaResult<usize> {
    vm.push_value(LuaValue::from(true))?;
    Ok(1)
}

/// `return a == b, rawequal(a, b)`
fn equality_program() -> Arc<Prototype> {
    program(&["a", "b", "rawequal"], |b| {
        b.abc(OpCode::Eq, 1, 0, 1);
        b.asbx(OpCode::Jmp, 0, 1);
        b.abc(OpCode::LoadBool, 3, 0, 1);
        b.abc(OpCode::LoadBool, 3, 1, 0);
        b.abc(OpCode::Move, 4, 2, 0);
        b.abc(OpCode::Move, 5, 0, 0);
        b.abc(OpCode::Move, 6, 1, 0);
        b.abc(OpCode::Call, 4, 3, 2);
        2
    })
}

#[test]
fn test_eq_handler_for_distinct_tables() {
    let results = run_tiers_with(&equality_program(), &|vm| {
        let meta = [("__eq", LuaValue::cfunction(always_true))];
        vm.set_global("a", table_with_meta(&[], &meta));
        vm.set_global("b", table_with_meta(&[], &meta));
    });
    assert_eq!(results, vec![LuaValue::from(true), LuaValue::from(false)]);
}

#[test]
fn test_eq_handler_is_not_used_across_types() {
    let results = run_tiers_with(&equality_program(), &|vm| {
        let meta = [("__eq", LuaValue::cfunction(always_true))];
        vm.set_global("a", table_with_meta(&[], &meta));
        vm.set_global("b", num(1.0));
    });
    assert_eq!(results, vec![LuaValue::from(false), LuaValue::from(false)]);
}

fn field_less_than(vm: &mut LuaVM) -> LuaResult<usize> {
    let field = |v: LuaValue| {
        v.as_table()
            .map(|t| t.borrow().raw_get_str("v"))
            .and_then(|v| v.as_number())
            .unwrap_or(0.0)
    };
    let less = field(vm.get_arg(1)) < field(vm.get_arg(2));
    vm.push_value(LuaValue::from(less))?;
    Ok(1)
}

/// `return a <= b`
fn less_equal_program() -> Arc<Prototype> {
    program(&["a", "b"], |b| {
        b.abc(OpCode::Le, 1, 0, 1);
        b.asbx(OpCode::Jmp, 0, 1);
        b.abc(OpCode::LoadBool, 2, 0, 1);
        b.abc(OpCode::LoadBool, 2, 1, 0);
        1
    })
}

#[test]
fn test_le_falls_back_to_lt() {
    for (av, bv, expected) in [(1.0, 2.0, true), (3.0, 2.0, false), (2.0, 2.0, true)] {
        let results = run_tiers_with(&less_equal_program(), &|vm| {
            let meta = [("__lt", LuaValue::cfunction(field_less_than))];
            vm.set_global("a", table_with_meta(&[("v", num(av))], &meta));
            vm.set_global("b", table_with_meta(&[("v", num(bv))], &meta));
        });
        assert_eq!(results, vec![LuaValue::from(expected)], "{} <= {}", av, bv);
    }
}

#[test]
fn test_compare_without_handler_fails() {
    let msg = error_tiers_with(&less_equal_program(), &|vm| {
        vm.set_global("a", LuaValue::new_table());
        vm.set_global("b", LuaValue::new_table());
    });
    assert_eq!(msg, "test:1: attempt to compare two table values");
}

#[test]
fn test_string_metatable_serves_index() {
    let proto = program(&["str"], |b| {
        let k = b.rk("len");
        b.abc(OpCode::GetTable, 1, 0, k);
        1
    });
    let results = run_tiers_with(&proto, &|vm| {
        vm.set_global("str", s("abc"));
        let methods = LuaValue::new_table();
        methods
            .as_table()
            .unwrap()
            .borrow_mut()
            .raw_set(s("len"), num(3.0))
            .unwrap();
        let meta = table_with_meta(&[("__index", methods)], &[]);
        vm.set_string_metatable(meta.as_table().cloned());
    });
    assert_eq!(results, vec![num(3.0)]);
}
