use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use cabincan_bus::{BackendKind, CanError, ChannelConfig, Frame, Registry, Timeout};
use cabincan_transport::{Backend, BusState, Handle, RxCallback, WorkerGuard};

type SharedCallback = Arc<Mutex<Option<RxCallback>>>;

/// Backend whose links deliver frames from their own receive thread, the
/// way a kernel-socket backend does.
#[derive(Default)]
struct StreamingBackend {
    next: AtomicU32,
    links: Mutex<HashMap<Handle, (SharedCallback, WorkerGuard)>>,
}

impl Backend for StreamingBackend {
    fn name(&self) -> &'static str {
        "streaming"
    }

    fn probe(&self) -> cabincan_transport::Result<()> {
        Ok(())
    }

    fn open(&self, name: &str, _config: &ChannelConfig) -> cabincan_transport::Result<Handle> {
        let handle = Handle::from_raw(self.next.fetch_add(1, Ordering::SeqCst) + 1);
        let on_rx: SharedCallback = Arc::new(Mutex::new(None));
        let worker = {
            let on_rx = on_rx.clone();
            WorkerGuard::spawn(format!("stream-rx-{name}"), move |token| {
                let frame = Frame::new(0x2A0, &[0xA5; 4]).expect("valid frame");
                while !token.is_cancelled() {
                    let callback = on_rx.lock().unwrap().clone();
                    if let Some(callback) = callback {
                        callback(frame.clone());
                    }
                    thread::yield_now();
                }
            })?
        };
        self.links.lock().unwrap().insert(handle, (on_rx, worker));
        Ok(handle)
    }

    fn set_callback(&self, handle: Handle, on_rx: Option<RxCallback>) -> cabincan_transport::Result<()> {
        let links = self.links.lock().unwrap();
        let (slot, _) = links
            .get(&handle)
            .ok_or_else(|| CanError::invalid("unknown handle"))?;
        *slot.lock().unwrap() = on_rx;
        Ok(())
    }

    fn write(&self, _handle: Handle, _frame: &Frame, _timeout: Timeout) -> cabincan_transport::Result<()> {
        Ok(())
    }

    fn read(&self, _handle: Handle, _timeout: Timeout) -> cabincan_transport::Result<Frame> {
        Err(CanError::WouldBlock)
    }

    fn status(&self, _handle: Handle) -> cabincan_transport::Result<BusState> {
        Ok(BusState::ErrorActive)
    }

    fn recover(&self, _handle: Handle) -> cabincan_transport::Result<()> {
        Ok(())
    }

    fn close(&self, handle: Handle) {
        let entry = self.links.lock().unwrap().remove(&handle);
        if let Some((slot, worker)) = entry {
            *slot.lock().unwrap() = None;
            worker.stop();
        }
    }
}

#[test]
fn close_against_receive_thread_never_calls_back_afterwards() {
    for round in 0..20u64 {
        let registry = Registry::new();
        registry
            .init_with_backend(Box::new(StreamingBackend::default()))
            .unwrap();
        registry.open("rx", &ChannelConfig::default()).unwrap();

        let closed = Arc::new(AtomicBool::new(false));
        let delivered = Arc::new(AtomicUsize::new(0));
        let late_calls = Arc::new(AtomicUsize::new(0));
        {
            let (closed, delivered, late_calls) =
                (closed.clone(), delivered.clone(), late_calls.clone());
            registry
                .subscribe("rx", None, move |_: &Frame| {
                    delivered.fetch_add(1, Ordering::SeqCst);
                    if closed.load(Ordering::SeqCst) {
                        late_calls.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .unwrap();
        }

        while delivered.load(Ordering::SeqCst) == 0 {
            thread::yield_now();
        }
        thread::sleep(Duration::from_micros(30 * (round % 5)));
        registry.close("rx").unwrap();
        closed.store(true, Ordering::SeqCst);

        thread::sleep(Duration::from_millis(5));
        assert_eq!(late_calls.load(Ordering::SeqCst), 0, "round {round}");
        registry.dispose();
    }
}

#[test]
fn close_during_sends_never_calls_back_afterwards() {
    for round in 0..20u64 {
        let registry = Arc::new(Registry::new());
        registry.init(BackendKind::Loopback).unwrap();
        registry.open("race", &ChannelConfig::default()).unwrap();

        let closed = Arc::new(AtomicBool::new(false));
        let late_calls = Arc::new(AtomicUsize::new(0));
        {
            let closed = closed.clone();
            let late_calls = late_calls.clone();
            registry
                .subscribe("race", None, move |_: &Frame| {
                    if closed.load(Ordering::SeqCst) {
                        late_calls.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .unwrap();
        }

        let start = Arc::new(Barrier::new(2));
        let sender = {
            let registry = registry.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                let frame = Frame::new(0x555, &[0x55; 8]).unwrap();
                for _ in 0..1000 {
                    match registry.send("race", &frame, Timeout::NonBlocking) {
                        Ok(()) | Err(CanError::Invalid(_)) | Err(CanError::State(_)) => {}
                        Err(other) => panic!("unexpected send error: {other}"),
                    }
                }
            })
        };

        start.wait();
        thread::sleep(Duration::from_micros(50 * (round % 7)));
        registry.close("race").unwrap();
        closed.store(true, Ordering::SeqCst);

        sender.join().unwrap();
        assert_eq!(late_calls.load(Ordering::SeqCst), 0, "round {round}");

        registry.open("race", &ChannelConfig::default()).unwrap();
        registry.close("race").unwrap();
    }
}

#[test]
fn dispose_with_running_jobs_joins_cleanly() {
    let registry = Registry::new();
    registry.init(BackendKind::Loopback).unwrap();
    for name in ["a", "b", "c"] {
        registry.open(name, &ChannelConfig::default()).unwrap();
        registry
            .register_job(name, Frame::new(0x10, &[]).unwrap(), Duration::from_millis(1))
            .unwrap();
        registry.subscribe(name, None, |_: &Frame| {}).unwrap();
    }
    thread::sleep(Duration::from_millis(20));

    registry.dispose();
    assert!(!registry.is_initialized());
    assert!(registry.channels().is_empty());
}
