use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use cabincan_frame::{Frame, FrameFlags, MAX_DLC};
use socketcan::{
    CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame as _, Id, Socket, SocketOptions,
    StandardId,
};
use tracing::{debug, info, trace, warn};

use crate::config::{ChannelConfig, Mode};
use crate::error::{CanError, Result};
use crate::linkctl::LinkControl;
use crate::traits::{Backend, BusState, Handle, RxCallback, Timeout};
use crate::worker::WorkerGuard;

/// Receive-thread read tick; bounds how long `close` waits for the join.
const RX_TICK: Duration = Duration::from_millis(100);

/// Retry spacing after a receive error, doubled up to the cap.
const RX_BACKOFF_MIN: Duration = Duration::from_millis(50);
const RX_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Retry spacing while the device transmit queue is full.
const TX_BACKOFF_MIN: Duration = Duration::from_micros(200);
const TX_BACKOFF_MAX: Duration = Duration::from_millis(5);

const INBOX_CAPACITY: usize = 256;

#[derive(Default)]
struct InboxState {
    frames: VecDeque<Frame>,
    /// Last receive error; cleared by the next frame off the socket.
    fault: Option<String>,
}

/// Frames taken off the socket by the receive thread, kept for `read`.
#[derive(Default)]
struct Inbox {
    state: Mutex<InboxState>,
    arrived: Condvar,
}

impl Inbox {
    fn lock(&self) -> MutexGuard<'_, InboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, frame: Frame) {
        let mut state = self.lock();
        if state.frames.len() == INBOX_CAPACITY {
            state.frames.pop_front();
        }
        state.frames.push_back(frame);
        self.arrived.notify_one();
    }

    /// Record a receive failure. Returns `true` on the healthy-to-faulted edge.
    fn set_fault(&self, reason: String) -> bool {
        let mut state = self.lock();
        let first = state.fault.is_none();
        state.fault = Some(reason);
        self.arrived.notify_all();
        first
    }

    /// Returns `true` if a fault was cleared.
    fn clear_fault(&self) -> bool {
        self.lock().fault.take().is_some()
    }

    fn fault(&self) -> Option<String> {
        self.lock().fault.clone()
    }

    /// Queued frames drain first; an empty queue on a faulted link fails
    /// instead of waiting for frames that cannot arrive.
    fn pop(&self, timeout: Timeout) -> Result<Frame> {
        let deadline = timeout.deadline();
        let mut state = self.lock();
        loop {
            if let Some(frame) = state.frames.pop_front() {
                return Ok(frame);
            }
            if let Some(reason) = &state.fault {
                return Err(receive_fault(reason));
            }
            state = match (timeout, deadline) {
                (Timeout::NonBlocking, _) => return Err(CanError::WouldBlock),
                (_, Some(deadline)) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(CanError::Timeout);
                    }
                    self.arrived
                        .wait_timeout(state, left)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                _ => self
                    .arrived
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

fn receive_fault(reason: &str) -> CanError {
    CanError::state(format!("receive path down: {reason}"))
}

struct SocketLink {
    control: LinkControl,
    socket: Arc<CanSocket>,
    bring_up: bool,
    on_rx: Arc<Mutex<Option<RxCallback>>>,
    inbox: Arc<Inbox>,
    rx_worker: Mutex<Option<WorkerGuard>>,
}

/// Linux SocketCAN backend over raw CAN sockets.
///
/// Each open link owns a non-blocking [`CanSocket`] and a receive thread
/// that queues every frame for `read` (up to 256, oldest dropped) and hands
/// it to the installed callback. Receive errors put the link in a fault
/// state that `read` and `status` report until frames flow again.
pub struct SocketCanBackend {
    links: Mutex<HashMap<Handle, Arc<SocketLink>>>,
    next_handle: AtomicU32,
}

impl SocketCanBackend {
    pub fn new() -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
        }
    }

    fn lock_links(&self) -> MutexGuard<'_, HashMap<Handle, Arc<SocketLink>>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link(&self, handle: Handle) -> Result<Arc<SocketLink>> {
        self.lock_links()
            .get(&handle)
            .cloned()
            .ok_or_else(|| CanError::state(format!("socketcan handle {} is not open", handle.raw())))
    }
}

impl Default for SocketCanBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for SocketCanBackend {
    fn name(&self) -> &'static str {
        "socketcan"
    }

    /// Binding to interface index 0 succeeds whenever the kernel has
    /// `AF_CAN` raw socket support.
    fn probe(&self) -> Result<()> {
        CanSocket::open_iface(0)
            .map(drop)
            .map_err(|err| CanError::from_io("socket(AF_CAN)", err))
    }

    fn open(&self, name: &str, config: &ChannelConfig) -> Result<Handle> {
        if name.is_empty() {
            return Err(CanError::invalid("link name must not be empty"));
        }
        if name.len() >= libc::IFNAMSIZ {
            return Err(CanError::invalid(format!(
                "interface name `{name}` longer than {} bytes",
                libc::IFNAMSIZ - 1
            )));
        }
        config.validate()?;

        let control = LinkControl::open(name)?;
        if config.bring_up {
            control.configure(config)?;
        } else if config.mode != Mode::Normal {
            warn!(link = name, mode = ?config.mode, "controller mode ignored without bring_up");
        }

        let socket = CanSocket::open(name).map_err(|err| CanError::from_io(name, err))?;
        socket
            .set_nonblocking(true)
            .map_err(|err| CanError::from_io("set_nonblocking", err))?;
        socket
            .set_recv_own_msgs(config.mode.is_loopback())
            .map_err(|err| CanError::from_io("CAN_RAW_RECV_OWN_MSGS", err))?;

        let socket = Arc::new(socket);
        let on_rx: Arc<Mutex<Option<RxCallback>>> = Arc::new(Mutex::new(None));
        let inbox = Arc::new(Inbox::default());
        let worker = spawn_rx_worker(name, socket.clone(), on_rx.clone(), inbox.clone())?;

        let handle = Handle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let link = Arc::new(SocketLink {
            control,
            socket,
            bring_up: config.bring_up,
            on_rx,
            inbox,
            rx_worker: Mutex::new(Some(worker)),
        });
        self.lock_links().insert(handle, link);
        debug!(link = name, handle = handle.raw(), "socketcan link opened");
        Ok(handle)
    }

    fn set_callback(&self, handle: Handle, on_rx: Option<RxCallback>) -> Result<()> {
        let link = self.link(handle)?;
        *link.on_rx.lock().unwrap_or_else(PoisonError::into_inner) = on_rx;
        Ok(())
    }

    fn write(&self, handle: Handle, frame: &Frame, timeout: Timeout) -> Result<()> {
        let raw = to_socket_frame(frame)?;
        let link = self.link(handle)?;
        retry_while_full(timeout, || link.socket.write_frame(&raw))
    }

    fn read(&self, handle: Handle, timeout: Timeout) -> Result<Frame> {
        let link = self.link(handle)?;
        link.inbox.pop(timeout)
    }

    fn status(&self, handle: Handle) -> Result<BusState> {
        let link = self.link(handle)?;
        if let Some(reason) = link.inbox.fault() {
            return Err(receive_fault(&reason));
        }
        link.control.state()
    }

    fn recover(&self, handle: Handle) -> Result<()> {
        let link = self.link(handle)?;
        if !link.bring_up {
            return Err(CanError::Unsupported(
                "bus-off restart needs a link opened with bring_up",
            ));
        }
        link.control.restart()
    }

    fn close(&self, handle: Handle) {
        let Some(link) = self.lock_links().remove(&handle) else {
            return;
        };
        let worker = link
            .rx_worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(worker);
        *link.on_rx.lock().unwrap_or_else(PoisonError::into_inner) = None;
        debug!(link = %link.control.name(), handle = handle.raw(), "socketcan link closed");
    }
}

fn spawn_rx_worker(
    name: &str,
    socket: Arc<CanSocket>,
    on_rx: Arc<Mutex<Option<RxCallback>>>,
    inbox: Arc<Inbox>,
) -> Result<WorkerGuard> {
    let link = name.to_string();
    WorkerGuard::spawn(format!("cabincan-rx-{name}"), move |token| {
        let mut backoff = RX_BACKOFF_MIN;
        while !token.is_cancelled() {
            let raw = match socket.read_frame_timeout(RX_TICK) {
                Ok(raw) => raw,
                Err(err) if is_idle(&err) => continue,
                Err(err) => {
                    if inbox.set_fault(err.to_string()) {
                        warn!(link = %link, error = %err, "receive failed; retrying");
                    }
                    if token.wait_timeout(backoff) {
                        break;
                    }
                    backoff = (backoff * 2).min(RX_BACKOFF_MAX);
                    continue;
                }
            };
            backoff = RX_BACKOFF_MIN;
            if inbox.clear_fault() {
                info!(link = %link, "receive path recovered");
            }

            let frame = match from_socket_frame(&raw) {
                Ok(frame) => frame,
                Err(err) => {
                    trace!(link = %link, error = %err, "dropped malformed frame");
                    continue;
                }
            };
            inbox.push(frame);
            let callback = on_rx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(callback) = callback {
                callback(frame);
            }
        }
    })
}

/// Read outcomes that only mean "nothing arrived this tick".
fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// CAN raw sockets report a full device queue as `ENOBUFS` rather than
/// `EAGAIN`, and neither is signalled through `POLLOUT`.
fn is_queue_full(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::ENOBUFS)
}

/// Run `attempt` until it succeeds, the error is not a full queue, or the
/// timeout runs out.
fn retry_while_full<F>(timeout: Timeout, mut attempt: F) -> Result<()>
where
    F: FnMut() -> io::Result<()>,
{
    let deadline = timeout.deadline();
    let mut backoff = TX_BACKOFF_MIN;
    loop {
        let err = match attempt() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if is_queue_full(&err) => err,
            Err(err) => return Err(CanError::from_io("write", err)),
        };
        let pause = match (timeout, deadline) {
            (Timeout::NonBlocking, _) => return Err(CanError::WouldBlock),
            (_, Some(deadline)) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    trace!(error = %err, "transmit queue still full at deadline");
                    return Err(CanError::Timeout);
                }
                backoff.min(left)
            }
            _ => backoff,
        };
        std::thread::sleep(pause);
        backoff = (backoff * 2).min(TX_BACKOFF_MAX);
    }
}

fn to_socket_frame(frame: &Frame) -> Result<CanFrame> {
    frame.validate()?;
    if frame.is_error() {
        return Err(CanError::invalid("error frames cannot be transmitted"));
    }
    let id: Id = if frame.is_extended() {
        ExtendedId::new(frame.id).map(Id::from)
    } else {
        u16::try_from(frame.id)
            .ok()
            .and_then(StandardId::new)
            .map(Id::from)
    }
    .ok_or_else(|| CanError::invalid(format!("identifier {:#X} out of range", frame.id)))?;

    let raw = if frame.is_remote() {
        CanFrame::new_remote(id, frame.dlc() as usize)
    } else {
        CanFrame::new(id, frame.payload())
    };
    raw.ok_or_else(|| CanError::invalid(format!("frame {frame} rejected")))
}

fn from_socket_frame(raw: &CanFrame) -> Result<Frame> {
    let mut flags = FrameFlags::NONE;
    flags.set(FrameFlags::EXTENDED_ID, raw.is_extended());
    flags.set(FrameFlags::REMOTE_REQUEST, raw.is_remote_frame());
    flags.set(FrameFlags::ERROR, raw.is_error_frame());

    let len = raw.dlc().min(MAX_DLC as usize);
    let payload = if raw.is_remote_frame() {
        &[][..]
    } else {
        &raw.data()[..len.min(raw.data().len())]
    };
    let mut frame = Frame::with_flags(raw.raw_id(), payload, flags)?;
    frame.len = len as u8;
    Ok(frame)
}
