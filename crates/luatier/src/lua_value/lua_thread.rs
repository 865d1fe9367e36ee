// Coroutine handle
// The coroutine's register stack and frames live in `state` while it is not
// running; the running coroutine's state is swapped into the VM.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::lua_vm::LuaState;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Placeholder id of a state that has been swapped out.
    pub(crate) const NONE: ThreadId = ThreadId(0);

    pub(crate) fn next() -> Self {
        ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    Suspended,
    Running,
    /// Active but not running: it resumed another coroutine
    Normal,
    Dead,
}

impl CoroutineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CoroutineStatus::Suspended => "suspended",
            CoroutineStatus::Running => "running",
            CoroutineStatus::Normal => "normal",
            CoroutineStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for CoroutineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct LuaThread {
    pub(crate) id: ThreadId,
    pub(crate) state: RefCell<LuaState>,
    pub(crate) status: Cell<CoroutineStatus>,
    /// Coroutine that resumed this one most recently (none for the main thread)
    pub(crate) parent: RefCell<Option<Weak<LuaThread>>>,
}

impl LuaThread {
    pub fn status(&self) -> CoroutineStatus {
        self.status.get()
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }
}
