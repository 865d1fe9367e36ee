//! Centralized VM limits and configuration constants.
//!
//! Mirrors Lua 5.1's `luaconf.h` / `llimits.h`.

// ===== Stack =====

/// Extra stack slots above a frame's register window.
/// Matches Lua 5.1's EXTRA_STACK.
pub const EXTRA_STACK: usize = 5;

/// Minimum guaranteed stack slots available to host functions.
/// Matches Lua 5.1's LUA_MINSTACK.
pub const LUA_MINSTACK: usize = 20;

/// Initial stack size of a new state.
pub const BASIC_STACK_SIZE: usize = 2 * LUA_MINSTACK;

/// Default hard limit on register stack slots.
pub const LUAI_MAXSTACK: usize = 1_000_000;

/// Default limit on nested Lua calls (LUAI_MAXCALLS).
pub const LUAI_MAXCALLS: usize = 20_000;

/// Default limit on nested native re-entries: metamethods, pcall, resume
/// (LUAI_MAXCCALLS).
pub const LUAI_MAXCCALLS: usize = 200;

// ===== Metamethods =====

/// Limit for `__index`/`__newindex` chains and `__call` redirections.
pub const MAXTAGLOOP: usize = 100;

// ===== Tables =====

/// Number of list items flushed per SETLIST.
/// Matches Lua 5.1's LFIELDS_PER_FLUSH.
pub const LFIELDS_PER_FLUSH: usize = 50;

// ===== Debug =====

/// Maximum size of a chunk id in messages (LUA_IDSIZE).
pub const LUA_IDSIZE: usize = 60;
