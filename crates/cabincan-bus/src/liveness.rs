//! Retirement guard for user hooks that run outside the table lock.
//!
//! Dispatch and the scheduler snapshot entries under their table lock and
//! invoke the hooks afterwards. Removing an entry from the table alone
//! would leave a window where a snapshot taken just before still calls
//! into it; [`Liveness::retire`] closes that window.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

#[derive(Default)]
struct LiveState {
    retired: bool,
    /// Threads currently inside [`Liveness::run`].
    running: Vec<ThreadId>,
}

#[derive(Default)]
pub(crate) struct Liveness {
    state: Mutex<LiveState>,
    idle: Condvar,
}

struct Running<'a> {
    liveness: &'a Liveness,
    thread: ThreadId,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        let mut state = self.liveness.lock();
        if let Some(pos) = state.running.iter().position(|t| *t == self.thread) {
            state.running.swap_remove(pos);
        }
        self.liveness.idle.notify_all();
    }
}

impl Liveness {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` unless the entry has been retired.
    pub(crate) fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let thread = thread::current().id();
        {
            let mut state = self.lock();
            if state.retired {
                return None;
            }
            state.running.push(thread);
        }
        let _running = Running {
            liveness: self,
            thread,
        };
        Some(f())
    }

    /// Refuse further runs and wait for the ones in progress on other
    /// threads. A hook retiring its own entry does not wait for itself.
    pub(crate) fn retire(&self) {
        let me = thread::current().id();
        let mut state = self.lock();
        state.retired = true;
        while state.running.iter().any(|t| *t != me) {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_retired(&self) -> bool {
        self.lock().retired
    }
}
