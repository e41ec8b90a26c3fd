//! Periodic transmission worker, one per channel.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use cabincan_frame::Frame;
use cabincan_transport::{Backend, CancelToken, Handle, Timeout, WorkerGuard};
use tracing::{debug, trace};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::jobs::{DueJob, JobId, JobTable, SharedPrepare};

pub(crate) type SharedJobs = Arc<Mutex<JobTable>>;

pub(crate) fn lock_jobs(jobs: &Mutex<JobTable>) -> MutexGuard<'_, JobTable> {
    jobs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the scheduler thread transmits through.
#[derive(Clone)]
pub(crate) struct JobSink {
    pub(crate) channel: String,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) handle: Handle,
}

/// Handle to a running scheduler thread. Dropping it stops and joins.
pub(crate) struct Scheduler {
    worker: WorkerGuard,
}

impl Scheduler {
    pub(crate) fn start(jobs: SharedJobs, sink: JobSink, config: SchedulerConfig) -> Result<Self> {
        let name = format!("cabincan-jobs-{}", sink.channel);
        let worker = WorkerGuard::spawn(name, move |token| run(&jobs, &sink, config, &token))?;
        Ok(Self { worker })
    }

    /// Re-evaluate deadlines now, after a register or cancel.
    pub(crate) fn wake(&self) {
        self.worker.token().nudge();
    }

    pub(crate) fn stop(self) {
        self.worker.stop();
    }
}

fn run(jobs: &Mutex<JobTable>, sink: &JobSink, config: SchedulerConfig, token: &CancelToken) {
    loop {
        run_due(jobs, sink, Instant::now());
        let until_due = lock_jobs(jobs).until_next_due(Instant::now());
        if token.wait_timeout(config.sleep_for(until_due)) {
            break;
        }
    }
    debug!(channel = %sink.channel, "job scheduler stopped");
}

/// One scheduler pass: snapshot due jobs, prepare and send each.
///
/// The job lock is only held for the snapshot and the template update.
pub(crate) fn run_due(jobs: &Mutex<JobTable>, sink: &JobSink, now: Instant) -> usize {
    let due = lock_jobs(jobs).collect_due(now);
    let mut sent = 0;
    for job in due {
        if fire(jobs, sink, job) {
            sent += 1;
        }
    }
    sent
}

/// Prepare and transmit one job. Runs inside the job's liveness guard, so
/// a job cancelled after the snapshot is skipped and `cancel_job` waits for
/// a transmission already under way.
fn fire(jobs: &Mutex<JobTable>, sink: &JobSink, job: DueJob) -> bool {
    let DueJob {
        id,
        frame,
        prepare,
        liveness,
    } = job;
    liveness
        .run(|| prepare_and_send(jobs, sink, id, frame, prepare))
        .unwrap_or_else(|| {
            trace!(channel = %sink.channel, job = id, "job cancelled before its turn");
            false
        })
}

fn prepare_and_send(
    jobs: &Mutex<JobTable>,
    sink: &JobSink,
    id: JobId,
    mut frame: Frame,
    prepare: Option<SharedPrepare>,
) -> bool {
    if let Some(prepare) = prepare {
        let mut hook = prepare.lock().unwrap_or_else(PoisonError::into_inner);
        if catch_unwind(AssertUnwindSafe(|| (*hook)(&mut frame))).is_err() {
            debug!(channel = %sink.channel, job = id, "prepare hook panicked; skipping send");
            return false;
        }
        drop(hook);
        if !lock_jobs(jobs).update_frame(id, frame) {
            return false;
        }
    }

    match sink.backend.write(sink.handle, &frame, Timeout::NonBlocking) {
        Ok(()) => {
            trace!(channel = %sink.channel, job = id, %frame, "periodic frame sent");
            true
        }
        Err(err) => {
            debug!(channel = %sink.channel, job = id, error = %err, "periodic send failed");
            false
        }
    }
}
