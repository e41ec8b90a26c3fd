use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{CanError, Result};

#[derive(Default)]
struct Signal {
    cancelled: bool,
    nudged: bool,
}

#[derive(Default)]
struct TokenInner {
    signal: Mutex<Signal>,
    wake: Condvar,
}

/// Cooperative stop signal shared between a worker and its owner.
///
/// Besides cancellation it carries a "nudge" so an owner can cut a
/// worker's sleep short without stopping it.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.lock().cancelled = true;
        self.inner.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Wake a sleeping worker early.
    pub fn nudge(&self) {
        self.lock().nudged = true;
        self.inner.wake.notify_all();
    }

    /// Sleep up to `timeout`, returning early on cancel or nudge.
    ///
    /// Returns `true` if the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (mut guard, _) = self
            .inner
            .wake
            .wait_timeout_while(guard, timeout, |s| !s.cancelled && !s.nudged)
            .unwrap_or_else(PoisonError::into_inner);
        guard.nudged = false;
        guard.cancelled
    }

    fn lock(&self) -> MutexGuard<'_, Signal> {
        self.inner
            .signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Owned handle to a background thread.
///
/// Dropping the guard cancels the token and blocks until the thread has
/// exited, so the guard cannot go away while its worker still runs.
pub struct WorkerGuard {
    name: String,
    token: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl WorkerGuard {
    /// Spawn a named worker that receives its own clone of the token.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let name = name.into();
        let token = CancelToken::new();
        let worker_token = token.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(worker_token))
            .map_err(|err| CanError::from_io("spawn worker", err))?;
        debug!(worker = %name, "worker started");
        Ok(Self {
            name,
            token,
            handle: Some(handle),
        })
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        self.handle.as_ref().map(|h| h.thread().id())
    }

    /// Cancel and join. Equivalent to dropping the guard.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.token.cancel();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // Joining ourselves would deadlock; the body exits on the token.
            warn!(worker = %self.name, "worker stopped from its own thread; not joining");
            return;
        }
        if handle.join().is_err() {
            warn!(worker = %self.name, "worker panicked");
        }
        debug!(worker = %self.name, "worker joined");
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}
