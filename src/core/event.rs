//! Cross-core events. An event is a deferred function call that is queued on
//! a reactor and executed the next time that reactor drains its queue.
//!
//! Unlike a future, an event carries no waker: it fires exactly once, in FIFO
//! order relative to the other events on the same reactor.

use std::os::raw::c_void;

/// A type-erased `(fn, arg1, arg2)` triple, the reactor's basic unit of
/// cross-core work. `arg1`/`arg2` are opaque to the reactor; the sender and
/// the callee agree on their real type out of band.
pub struct Event {
    func: Box<dyn FnOnce(*mut c_void, *mut c_void) + Send>,
    arg1: usize,
    arg2: usize,
}

impl Event {
    /// Build an event that calls `func(arg1, arg2)` when run.
    pub fn new<F>(func: F, arg1: *mut c_void, arg2: *mut c_void) -> Self
    where
        F: FnOnce(*mut c_void, *mut c_void) + Send + 'static,
    {
        Self {
            func: Box::new(func),
            arg1: arg1 as usize,
            arg2: arg2 as usize,
        }
    }

    /// Run the event's function, consuming it. An event is only ever run
    /// once.
    pub fn run(self) {
        (self.func)(self.arg1 as *mut c_void, self.arg2 as *mut c_void);
    }
}

// Events cross reactor (thread) boundaries by construction; callers are
// responsible for the soundness of the raw pointers they close over.
unsafe impl Send for Event {}
