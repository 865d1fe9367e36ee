// Upvalue cells
// An open cell names a register slot of one coroutine's stack; a closed cell
// owns its value. Reads and writes of open cells go through the VM, which
// knows where each coroutine's stack currently lives.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::{LuaThread, LuaValue, ThreadId};

pub type UpvalueRef = Rc<LuaUpvalue>;

pub(crate) enum UpvalueState {
    Open {
        thread: ThreadId,
        slot: usize,
        /// Owning coroutine, empty for the main thread
        home: Weak<LuaThread>,
    },
    Closed(LuaValue),
}

pub struct LuaUpvalue {
    pub(crate) state: RefCell<UpvalueState>,
}

impl LuaUpvalue {
    pub(crate) fn open(thread: ThreadId, slot: usize, home: Weak<LuaThread>) -> UpvalueRef {
        Rc::new(LuaUpvalue {
            state: RefCell::new(UpvalueState::Open { thread, slot, home }),
        })
    }

    pub fn closed(value: LuaValue) -> UpvalueRef {
        Rc::new(LuaUpvalue {
            state: RefCell::new(UpvalueState::Closed(value)),
        })
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.borrow(), UpvalueState::Open { .. })
    }

    /// Stack slot of an open cell.
    pub(crate) fn open_slot(&self) -> Option<usize> {
        match *self.state.borrow() {
            UpvalueState::Open { slot, .. } => Some(slot),
            UpvalueState::Closed(_) => None,
        }
    }

    /// Move the value into the cell. Closing a closed cell does nothing.
    pub(crate) fn close(&self, value: LuaValue) {
        let mut state = self.state.borrow_mut();
        if matches!(*state, UpvalueState::Open { .. }) {
            *state = UpvalueState::Closed(value);
        }
    }
}
