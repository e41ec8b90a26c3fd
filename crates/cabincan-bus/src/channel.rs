use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use cabincan_frame::{Filter, Frame};
use cabincan_transport::{Backend, BusState, ChannelConfig, Handle, RxCallback, Timeout};
use tracing::{debug, trace};

use crate::config::SchedulerConfig;
use crate::error::{CanError, Result};
use crate::jobs::{JobId, JobTable, PrepareFn};
use crate::scheduler::{lock_jobs, JobSink, Scheduler, SharedJobs};
use crate::subscription::{FrameCallback, SubscriptionId, SubscriptionTable};

/// Counts dispatches in progress so `close` can wait for them to drain.
struct DispatchGate {
    state: Mutex<GateState>,
    idle: Condvar,
}

struct GateState {
    open: bool,
    active: usize,
}

struct GatePass<'a> {
    gate: &'a DispatchGate,
}

impl DispatchGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                open: true,
                active: 0,
            }),
            idle: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) -> Option<GatePass<'_>> {
        let mut state = self.lock();
        if !state.open {
            return None;
        }
        state.active += 1;
        Some(GatePass { gate: self })
    }

    /// Refuse new dispatches and block until running ones finish.
    fn shut(&self) {
        let mut state = self.lock();
        state.open = false;
        while state.active > 0 {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.lock();
        state.active -= 1;
        if state.active == 0 {
            self.gate.idle.notify_all();
        }
    }
}

/// State reachable from the backend's receive path.
struct Inbound {
    channel: String,
    subscriptions: Mutex<SubscriptionTable>,
    gate: DispatchGate,
}

impl Inbound {
    fn subscriptions(&self) -> MutexGuard<'_, SubscriptionTable> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, frame: Frame) {
        let Some(_pass) = self.gate.enter() else {
            trace!(channel = %self.channel, %frame, "frame arrived after close; dropped");
            return;
        };
        let targets = self.subscriptions().matching(frame.id);
        for sub in targets {
            if catch_unwind(AssertUnwindSafe(|| sub.deliver(&frame))).is_err() {
                debug!(channel = %self.channel, subscription = sub.id, "subscriber panicked");
            }
        }
    }
}

/// One opened bus link with its subscriptions and periodic jobs.
///
/// Inbound frames are fanned out in subscription order on the backend's
/// receive path. Periodic jobs run on a scheduler thread that is started
/// with the first job.
pub struct Channel {
    name: String,
    backend: Arc<dyn Backend>,
    handle: Handle,
    inbound: Arc<Inbound>,
    jobs: SharedJobs,
    scheduler: Mutex<Option<Scheduler>>,
    scheduler_config: SchedulerConfig,
    closed: AtomicBool,
}

impl Channel {
    /// Open `name` on `backend` and install the dispatching receive callback.
    pub fn open(
        name: &str,
        backend: Arc<dyn Backend>,
        config: &ChannelConfig,
        scheduler_config: SchedulerConfig,
    ) -> Result<Self> {
        let handle = backend.open(name, config)?;
        let inbound = Arc::new(Inbound {
            channel: name.to_string(),
            subscriptions: Mutex::new(SubscriptionTable::new()),
            gate: DispatchGate::new(),
        });

        let target = inbound.clone();
        let on_rx: RxCallback = Arc::new(move |frame| target.dispatch(frame));
        if let Err(err) = backend.set_callback(handle, Some(on_rx)) {
            backend.close(handle);
            return Err(err);
        }

        debug!(channel = name, backend = backend.name(), "channel opened");
        Ok(Self {
            name: name.to_string(),
            backend,
            handle,
            inbound,
            jobs: Arc::new(Mutex::new(JobTable::new())),
            scheduler: Mutex::new(None),
            scheduler_config,
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CanError::state(format!("channel {} is closed", self.name)));
        }
        Ok(())
    }

    fn scheduler_slot(&self) -> MutexGuard<'_, Option<Scheduler>> {
        self.scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback for frames accepted by `filter` (`None` accepts
    /// every frame).
    pub fn subscribe(
        &self,
        filter: Option<Filter>,
        callback: FrameCallback,
    ) -> Result<SubscriptionId> {
        self.ensure_open()?;
        let id = self.inbound.subscriptions().insert(filter, callback);
        debug!(channel = %self.name, subscription = id, "subscribed");
        Ok(id)
    }

    /// Remove one subscription. An unknown id is `Invalid`.
    ///
    /// Once this returns the callback is not running on any other thread
    /// and will not be called again.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let removed = self.inbound.subscriptions().remove(id);
        let Some(sub) = removed else {
            return Err(CanError::invalid(format!(
                "no subscription {id} on {}",
                self.name
            )));
        };
        sub.retire();
        debug!(channel = %self.name, subscription = id, "unsubscribed");
        Ok(())
    }

    pub fn send(&self, frame: &Frame, timeout: Timeout) -> Result<()> {
        self.ensure_open()?;
        frame.validate()?;
        self.backend.write(self.handle, frame, timeout)
    }

    pub fn recv(&self, timeout: Timeout) -> Result<Frame> {
        self.ensure_open()?;
        self.backend.read(self.handle, timeout)
    }

    /// Transmit `frame` every `period`, first one period from now.
    pub fn register_job(&self, frame: Frame, period: Duration) -> Result<JobId> {
        self.add_job(frame, period, None)
    }

    /// Like [`Channel::register_job`], running `prepare` on the frame right
    /// before every transmission.
    pub fn register_job_ex(
        &self,
        frame: Frame,
        period: Duration,
        prepare: PrepareFn,
    ) -> Result<JobId> {
        self.add_job(frame, period, Some(prepare))
    }

    fn add_job(&self, frame: Frame, period: Duration, prepare: Option<PrepareFn>) -> Result<JobId> {
        frame.validate()?;
        let mut slot = self.scheduler_slot();
        self.ensure_open()?;

        let id = lock_jobs(&self.jobs).insert(frame, period, prepare, Instant::now())?;
        match slot.as_ref() {
            Some(scheduler) => scheduler.wake(),
            None => {
                let sink = JobSink {
                    channel: self.name.clone(),
                    backend: self.backend.clone(),
                    handle: self.handle,
                };
                match Scheduler::start(self.jobs.clone(), sink, self.scheduler_config) {
                    Ok(scheduler) => *slot = Some(scheduler),
                    Err(err) => {
                        lock_jobs(&self.jobs).remove(id);
                        return Err(err);
                    }
                }
            }
        }
        debug!(channel = %self.name, job = id, period_ms = period.as_millis() as u64, "job registered");
        Ok(id)
    }

    /// Stop a periodic job. An unknown id is `Invalid`.
    ///
    /// Waits for a transmission of this job already in progress; its
    /// prepare hook is not called after this returns.
    pub fn cancel_job(&self, id: JobId) -> Result<()> {
        let removed = lock_jobs(&self.jobs).remove(id);
        let Some(liveness) = removed else {
            return Err(CanError::invalid(format!("no job {id} on {}", self.name)));
        };
        liveness.retire();
        if let Some(scheduler) = self.scheduler_slot().as_ref() {
            scheduler.wake();
        }
        debug!(channel = %self.name, job = id, "job cancelled");
        Ok(())
    }

    pub fn status(&self) -> Result<BusState> {
        self.ensure_open()?;
        self.backend.status(self.handle)
    }

    pub fn recover(&self) -> Result<()> {
        self.ensure_open()?;
        self.backend.recover(self.handle)
    }

    pub fn subscription_count(&self) -> usize {
        self.inbound.subscriptions().len()
    }

    pub fn job_count(&self) -> usize {
        lock_jobs(&self.jobs).len()
    }

    /// Tear the channel down. Safe to call more than once.
    ///
    /// Order: stop dispatch and wait for running callbacks, close the
    /// backend handle (joining its receive path), stop the scheduler, then
    /// drop subscriptions and jobs. No subscriber runs after this returns.
    /// Must not be called from one of this channel's own callbacks.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inbound.gate.shut();
        self.backend.close(self.handle);

        let scheduler = self.scheduler_slot().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop();
        }

        drop(self.inbound.subscriptions().clear());
        lock_jobs(&self.jobs).clear();
        debug!(channel = %self.name, "channel closed");
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}
