use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cabincan_frame::Frame;

use crate::error::{CanError, Result};
use crate::liveness::Liveness;

/// Per-channel periodic job id. Starts at 1 and is never reused.
pub type JobId = u32;

/// Hook run on the scheduler thread right before a job's frame is sent.
///
/// Changes it makes to the frame are kept as the job's template for the
/// next period.
pub type PrepareFn = Box<dyn FnMut(&mut Frame) + Send>;

pub(crate) type SharedPrepare = Arc<Mutex<PrepareFn>>;

/// Longest accepted period, the range of the millisecond C surface.
pub const MAX_PERIOD: Duration = Duration::from_millis(u32::MAX as u64);

struct Job {
    id: JobId,
    frame: Frame,
    period: Duration,
    next_due: Instant,
    prepare: Option<SharedPrepare>,
    liveness: Arc<Liveness>,
}

/// Copy of a due job, taken so the table lock is not held while the
/// prepare hook and the transmit run.
pub(crate) struct DueJob {
    pub(crate) id: JobId,
    pub(crate) frame: Frame,
    pub(crate) prepare: Option<SharedPrepare>,
    pub(crate) liveness: Arc<Liveness>,
}

pub(crate) struct JobTable {
    jobs: Vec<Job>,
    last_id: JobId,
}

impl JobTable {
    pub(crate) fn new() -> Self {
        Self {
            jobs: Vec::new(),
            last_id: 0,
        }
    }

    /// Add a job first due one `period` after `now`.
    pub(crate) fn insert(
        &mut self,
        frame: Frame,
        period: Duration,
        prepare: Option<PrepareFn>,
        now: Instant,
    ) -> Result<JobId> {
        if period.is_zero() {
            return Err(CanError::invalid("job period must be greater than zero"));
        }
        let next_due = now
            .checked_add(period)
            .filter(|_| period <= MAX_PERIOD)
            .ok_or_else(|| {
                CanError::invalid(format!(
                    "job period {period:?} exceeds {} ms",
                    MAX_PERIOD.as_millis()
                ))
            })?;
        self.last_id += 1;
        let id = self.last_id;
        self.jobs.push(Job {
            id,
            frame,
            period,
            next_due,
            prepare: prepare.map(|p| Arc::new(Mutex::new(p))),
            liveness: Arc::new(Liveness::new()),
        });
        Ok(id)
    }

    /// Unlink a job. The caller retires the returned guard after dropping
    /// the table lock so an in-flight transmission can finish.
    pub(crate) fn remove(&mut self, id: JobId) -> Option<Arc<Liveness>> {
        let pos = self.jobs.iter().position(|j| j.id == id)?;
        Some(self.jobs.remove(pos).liveness)
    }

    /// Snapshot every job due at `now` and move its deadline past `now`.
    ///
    /// A job fires at most once per call however far behind it is.
    pub(crate) fn collect_due(&mut self, now: Instant) -> Vec<DueJob> {
        let mut due = Vec::new();
        for job in &mut self.jobs {
            if now < job.next_due {
                continue;
            }
            job.next_due = catch_up(job.next_due, job.period, now);
            due.push(DueJob {
                id: job.id,
                frame: job.frame,
                prepare: job.prepare.clone(),
                liveness: job.liveness.clone(),
            });
        }
        due
    }

    /// Store a prepared frame as the job's template. Returns `false` if the
    /// job was cancelled meanwhile.
    pub(crate) fn update_frame(&mut self, id: JobId, frame: Frame) -> bool {
        match self.jobs.iter_mut().find(|j| j.id == id) {
            Some(job) => {
                job.frame = frame;
                true
            }
            None => false,
        }
    }

    /// Time until the earliest deadline, zero if one is already due.
    pub(crate) fn until_next_due(&self, now: Instant) -> Option<Duration> {
        self.jobs
            .iter()
            .map(|j| j.next_due.saturating_duration_since(now))
            .min()
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn clear(&mut self) {
        self.jobs.clear();
    }
}

/// Advance `next_due` by whole periods to the first deadline after `now`.
pub(crate) fn catch_up(next_due: Instant, period: Duration, now: Instant) -> Instant {
    if now < next_due {
        return next_due;
    }
    let behind = now.duration_since(next_due).as_nanos();
    let periods = behind / period.as_nanos().max(1) + 1;
    let step = period
        .as_nanos()
        .checked_mul(periods)
        .and_then(|nanos| u64::try_from(nanos).ok())
        .map(Duration::from_nanos);
    step.and_then(|step| next_due.checked_add(step))
        .or_else(|| now.checked_add(period))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    fn frame() -> Frame {
        Frame::new(0x321, &[0, 0, 0]).unwrap()
    }

    #[test]
    fn zero_period_is_invalid() {
        let mut table = JobTable::new();
        let err = table
            .insert(frame(), Duration::ZERO, None, Instant::now())
            .unwrap_err();
        assert!(matches!(err, CanError::Invalid(_)));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn oversized_period_is_invalid_not_a_panic() {
        let mut table = JobTable::new();
        let now = Instant::now();
        for period in [Duration::MAX, MAX_PERIOD + MS] {
            let err = table.insert(frame(), period, None, now).unwrap_err();
            assert!(matches!(err, CanError::Invalid(_)), "{period:?}");
        }
        assert_eq!(table.len(), 0);
        table.insert(frame(), MAX_PERIOD, None, now).unwrap();
    }

    #[test]
    fn catch_up_never_overflows() {
        let t0 = Instant::now();
        let next = catch_up(t0, MAX_PERIOD, t0 + 10 * MS);
        assert_eq!(next, t0 + MAX_PERIOD);
    }

    #[test]
    fn first_fire_is_one_period_out() {
        let t0 = Instant::now();
        let mut table = JobTable::new();
        table.insert(frame(), 100 * MS, None, t0).unwrap();

        assert!(table.collect_due(t0 + 99 * MS).is_empty());
        assert_eq!(table.collect_due(t0 + 100 * MS).len(), 1);
        assert_eq!(table.until_next_due(t0 + 100 * MS), Some(100 * MS));
    }

    #[test]
    fn stalled_job_fires_once_and_catches_up() {
        let t0 = Instant::now();
        let mut table = JobTable::new();
        table.insert(frame(), 100 * MS, None, t0).unwrap();

        // Wake delayed 750 ms past the first deadline.
        let late = t0 + 850 * MS;
        assert_eq!(table.collect_due(late).len(), 1);
        assert!(table.collect_due(late).is_empty());

        let wait = table.until_next_due(late).unwrap();
        assert!(wait > Duration::ZERO && wait <= 100 * MS);
        assert_eq!(wait, 50 * MS);
    }

    #[test]
    fn catch_up_on_exact_deadline_moves_one_period() {
        let t0 = Instant::now();
        assert_eq!(catch_up(t0, 100 * MS, t0), t0 + 100 * MS);
        assert_eq!(catch_up(t0, 100 * MS, t0 + 300 * MS), t0 + 400 * MS);
        assert_eq!(catch_up(t0 + 50 * MS, 100 * MS, t0), t0 + 50 * MS);
    }

    #[test]
    fn ids_are_not_reused_after_cancel() {
        let now = Instant::now();
        let mut table = JobTable::new();
        let a = table.insert(frame(), MS, None, now).unwrap();
        assert!(table.remove(a).is_some());
        assert!(table.remove(a).is_none());
        let b = table.insert(frame(), MS, None, now).unwrap();
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn prepared_frame_becomes_template() {
        let t0 = Instant::now();
        let mut table = JobTable::new();
        let id = table
            .insert(frame(), 10 * MS, Some(Box::new(|f: &mut Frame| f.data[2] += 1)), t0)
            .unwrap();

        let due = table.collect_due(t0 + 10 * MS).pop().unwrap();
        let mut sent = due.frame;
        let prepare = due.prepare.unwrap();
        let mut hook = prepare.lock().unwrap();
        (*hook)(&mut sent);
        drop(hook);
        assert!(table.update_frame(id, sent));

        let next = table.collect_due(t0 + 20 * MS).pop().unwrap();
        assert_eq!(next.frame.data[2], 1);

        table.remove(id);
        assert!(!table.update_frame(id, sent));
    }
}
