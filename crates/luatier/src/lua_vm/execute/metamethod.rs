// Metamethod resolution (ltm.c)
// Lookups never modify their operands; `None` means the caller applies
// its default policy.

use crate::lua_value::{LuaFunction, LuaString, LuaTableRef, LuaValue};
use crate::lua_vm::{LuaResult, LuaVM};

/// Metamethod events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TmKind {
    Index,
    NewIndex,
    Eq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Len,
    Lt,
    Le,
    Concat,
    Call,
}

impl TmKind {
    pub const fn name(self) -> &'static str {
        match self {
            TmKind::Index => "__index",
            TmKind::NewIndex => "__newindex",
            TmKind::Eq => "__eq",
            TmKind::Add => "__add",
            TmKind::Sub => "__sub",
            TmKind::Mul => "__mul",
            TmKind::Div => "__div",
            TmKind::Mod => "__mod",
            TmKind::Pow => "__pow",
            TmKind::Unm => "__unm",
            TmKind::Len => "__len",
            TmKind::Lt => "__lt",
            TmKind::Le => "__le",
            TmKind::Concat => "__concat",
            TmKind::Call => "__call",
        }
    }

    fn key(self) -> LuaValue {
        LuaValue::String(LuaString::from_static(self.name()))
    }
}

/// Metatable of any value: tables carry their own, strings share the VM's.
pub fn get_metatable(vm: &LuaVM, value: &LuaValue) -> Option<LuaTableRef> {
    match value {
        LuaValue::Table(t) => t.borrow().metatable(),
        LuaValue::String(_) => vm.string_metatable.clone(),
        _ => None,
    }
}

/// Event handler from a metatable, if it is set to a non-nil value.
pub(crate) fn metatable_event(mt: &LuaTableRef, tm: TmKind) -> Option<LuaValue> {
    let handler = mt.borrow().raw_get(&tm.key());
    if handler.is_nil() { None } else { Some(handler) }
}

/// Handler for `tm` on a single operand.
pub fn get_metaop(vm: &LuaVM, value: &LuaValue, tm: TmKind) -> Option<LuaValue> {
    let mt = get_metatable(vm, value)?;
    metatable_event(&mt, tm)
}

/// Handler for a binary event: the left operand's, then the right's.
pub fn get_bin_metaop(vm: &LuaVM, lhs: &LuaValue, rhs: &LuaValue, tm: TmKind) -> Option<LuaValue> {
    get_metaop(vm, lhs, tm).or_else(|| get_metaop(vm, rhs, tm))
}

/// Handler for `__eq`, `__lt` and `__le`, resolved like a binary event.
pub fn get_comp_metaop(vm: &LuaVM, lhs: &LuaValue, rhs: &LuaValue, tm: TmKind) -> Option<LuaValue> {
    debug_assert!(matches!(tm, TmKind::Eq | TmKind::Lt | TmKind::Le));
    get_bin_metaop(vm, lhs, rhs, tm)
}

/// Call a metamethod handler and return its first result.
pub fn call_tm(vm: &mut LuaVM, handler: LuaValue, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let func_idx = vm.call_base();
    vm.ensure_stack(func_idx + args.len() + 1 + crate::lua_vm::lua_limits::EXTRA_STACK)?;
    vm.state.stack[func_idx] = handler;
    for (i, arg) in args.iter().enumerate() {
        vm.state.stack[func_idx + 1 + i] = arg.clone();
    }
    vm.state.top = func_idx + 1 + args.len();
    vm.call_at(func_idx, args.len(), 1)?;
    let result = std::mem::take(&mut vm.state.stack[func_idx]);
    vm.state.top = func_idx;
    Ok(result)
}

/// Whether a handler is directly callable (functions are; anything else is
/// followed as the next table in an `__index`/`__newindex` chain).
#[inline]
pub(crate) fn is_function(handler: &LuaValue) -> bool {
    matches!(
        handler,
        LuaValue::Function(LuaFunction::Lua(_) | LuaFunction::Host(_) | LuaFunction::HostClosure(_))
    )
}
