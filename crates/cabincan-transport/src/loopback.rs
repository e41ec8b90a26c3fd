use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use cabincan_frame::Frame;
use tracing::{debug, trace};

use crate::config::ChannelConfig;
use crate::error::{CanError, Result};
use crate::traits::{Backend, BusState, Handle, RxCallback, Timeout};

/// Frames retained for the synchronous `read` path.
const READ_QUEUE_CAPACITY: usize = 256;

struct LinkState {
    open: bool,
    on_rx: Option<RxCallback>,
    queue: VecDeque<Frame>,
    delivering: usize,
}

struct LoopbackLink {
    name: String,
    state: Mutex<LinkState>,
    changed: Condvar,
}

impl LoopbackLink {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory backend for deterministic tests.
///
/// Every frame written on a handle is delivered to that handle's callback
/// on the writer's thread before `write` returns; there is no receive
/// thread. Written frames are also queued (up to 256, oldest dropped) for
/// the `read` poll path.
///
/// A receive callback must not close its own handle: `close` waits for
/// in-flight deliveries to finish.
pub struct LoopbackBackend {
    links: Mutex<HashMap<Handle, Arc<LoopbackLink>>>,
    next_handle: AtomicU32,
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
        }
    }

    /// Number of open handles.
    pub fn open_count(&self) -> usize {
        self.lock_links().len()
    }

    fn lock_links(&self) -> MutexGuard<'_, HashMap<Handle, Arc<LoopbackLink>>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link(&self, handle: Handle) -> Result<Arc<LoopbackLink>> {
        self.lock_links()
            .get(&handle)
            .cloned()
            .ok_or_else(|| CanError::state(format!("loopback handle {} is not open", handle.raw())))
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for LoopbackBackend {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn open(&self, name: &str, config: &ChannelConfig) -> Result<Handle> {
        if name.is_empty() {
            return Err(CanError::invalid("link name must not be empty"));
        }
        config.validate()?;

        let handle = Handle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let link = Arc::new(LoopbackLink {
            name: name.to_string(),
            state: Mutex::new(LinkState {
                open: true,
                on_rx: None,
                queue: VecDeque::with_capacity(READ_QUEUE_CAPACITY),
                delivering: 0,
            }),
            changed: Condvar::new(),
        });
        self.lock_links().insert(handle, link);
        debug!(link = name, handle = handle.raw(), mode = ?config.mode, "loopback link opened");
        Ok(handle)
    }

    fn set_callback(&self, handle: Handle, on_rx: Option<RxCallback>) -> Result<()> {
        let link = self.link(handle)?;
        link.lock().on_rx = on_rx;
        Ok(())
    }

    fn write(&self, handle: Handle, frame: &Frame, _timeout: Timeout) -> Result<()> {
        let link = self.link(handle)?;
        let callback = {
            let mut state = link.lock();
            if !state.open {
                return Err(CanError::state(format!("{} is closed", link.name)));
            }
            if state.queue.len() == READ_QUEUE_CAPACITY {
                state.queue.pop_front();
                trace!(link = %link.name, "loopback read queue full; dropped oldest frame");
            }
            state.queue.push_back(*frame);
            link.changed.notify_all();

            let callback = state.on_rx.clone();
            if callback.is_some() {
                state.delivering += 1;
            }
            callback
        };

        if let Some(callback) = callback {
            // The link lock is released while caller code runs.
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(*frame)));
            let mut state = link.lock();
            state.delivering -= 1;
            link.changed.notify_all();
            drop(state);
            if let Err(panic) = outcome {
                std::panic::resume_unwind(panic);
            }
        }
        Ok(())
    }

    fn read(&self, handle: Handle, timeout: Timeout) -> Result<Frame> {
        let link = self.link(handle)?;
        let deadline = timeout.deadline();

        let mut state = link.lock();
        loop {
            if let Some(frame) = state.queue.pop_front() {
                return Ok(frame);
            }
            if !state.open {
                return Err(CanError::state(format!("{} is closed", link.name)));
            }
            state = match (timeout, deadline) {
                (Timeout::NonBlocking, _) => return Err(CanError::WouldBlock),
                (Timeout::After(_), Some(deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(CanError::Timeout);
                    }
                    link.changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                _ => link
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn status(&self, handle: Handle) -> Result<BusState> {
        self.link(handle)?;
        Ok(BusState::ErrorActive)
    }

    fn recover(&self, handle: Handle) -> Result<()> {
        // An in-memory link never goes bus-off.
        self.link(handle).map(|_| ())
    }

    fn close(&self, handle: Handle) {
        let Some(link) = self.lock_links().remove(&handle) else {
            return;
        };
        let mut state = link.lock();
        state.open = false;
        state.on_rx = None;
        link.changed.notify_all();
        while state.delivering > 0 {
            state = link
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.queue.clear();
        debug!(link = %link.name, handle = handle.raw(), "loopback link closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn frame(id: u32) -> Frame {
        Frame::new(id, &[id as u8]).unwrap()
    }

    #[test]
    fn write_delivers_before_returning() {
        let backend = LoopbackBackend::new();
        let h = backend.open("lo0", &ChannelConfig::default()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        backend
            .set_callback(h, Some(Arc::new(move |f| sink.lock().unwrap().push(f))))
            .unwrap();

        backend.write(h, &frame(0x123), Timeout::NonBlocking).unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &[frame(0x123)]);
    }

    #[test]
    fn read_sees_written_frames_in_order() {
        let backend = LoopbackBackend::new();
        let h = backend.open("lo0", &ChannelConfig::default()).unwrap();
        backend.write(h, &frame(1), Timeout::NonBlocking).unwrap();
        backend.write(h, &frame(2), Timeout::NonBlocking).unwrap();

        assert_eq!(backend.read(h, Timeout::NonBlocking).unwrap().id, 1);
        assert_eq!(backend.read(h, Timeout::NonBlocking).unwrap().id, 2);
        assert!(matches!(
            backend.read(h, Timeout::NonBlocking),
            Err(CanError::WouldBlock)
        ));
    }

    #[test]
    fn read_times_out_when_empty() {
        let backend = LoopbackBackend::new();
        let h = backend.open("lo0", &ChannelConfig::default()).unwrap();
        let start = Instant::now();
        let err = backend
            .read(h, Timeout::After(Duration::from_millis(30)))
            .unwrap_err();
        assert!(matches!(err, CanError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn read_wakes_on_write_from_other_thread() {
        let backend = Arc::new(LoopbackBackend::new());
        let h = backend.open("lo0", &ChannelConfig::default()).unwrap();
        let writer = backend.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.write(h, &frame(0x42), Timeout::NonBlocking).unwrap();
        });
        let got = backend.read(h, Timeout::Infinite).unwrap();
        assert_eq!(got.id, 0x42);
        t.join().unwrap();
    }

    #[test]
    fn read_queue_drops_oldest_when_full() {
        let backend = LoopbackBackend::new();
        let h = backend.open("lo0", &ChannelConfig::default()).unwrap();
        for i in 0..(READ_QUEUE_CAPACITY as u32 + 4) {
            backend.write(h, &frame(i & 0x7FF), Timeout::NonBlocking).unwrap();
        }
        assert_eq!(backend.read(h, Timeout::NonBlocking).unwrap().id, 4);
    }

    #[test]
    fn closed_handle_rejects_io_and_close_is_idempotent() {
        let backend = LoopbackBackend::new();
        let h = backend.open("lo0", &ChannelConfig::default()).unwrap();
        backend.close(h);
        backend.close(h);
        assert_eq!(backend.open_count(), 0);
        assert!(matches!(
            backend.write(h, &frame(1), Timeout::NonBlocking),
            Err(CanError::State(_))
        ));
        assert!(matches!(
            backend.read(h, Timeout::NonBlocking),
            Err(CanError::State(_))
        ));
    }

    #[test]
    fn no_callback_after_close() {
        let backend = LoopbackBackend::new();
        let h = backend.open("lo0", &ChannelConfig::default()).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        backend
            .set_callback(
                h,
                Some(Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        backend.write(h, &frame(1), Timeout::NonBlocking).unwrap();
        backend.close(h);
        let _ = backend.write(h, &frame(2), Timeout::NonBlocking);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn open_rejects_empty_name_and_bad_config() {
        let backend = LoopbackBackend::new();
        assert!(matches!(
            backend.open("", &ChannelConfig::default()),
            Err(CanError::Invalid(_))
        ));
        assert!(matches!(
            backend.open("lo0", &ChannelConfig::with_bitrate(0)),
            Err(CanError::Invalid(_))
        ));
    }
}
