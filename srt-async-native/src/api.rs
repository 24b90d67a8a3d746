//! Synchronous SRT API surface
//!
//! One trait method per native library call. Every method may block; the
//! task runner is the only caller and serializes all calls on its worker
//! thread.

use crate::error::NativeError;
use crate::options::{OptValue, SockOpt};
use bytes::Bytes;

/// Sentinel returned by native calls on failure.
pub const SRT_ERROR: i32 = -1;

/// Epoll readiness flag: socket has data (or a pending accept).
pub const EPOLL_IN: u32 = 0x1;
/// Epoll readiness flag: socket is writable.
pub const EPOLL_OUT: u32 = 0x4;
/// Epoll readiness flag: socket is broken or closed.
pub const EPOLL_ERR: u32 = 0x8;

pub type ApiResult<T> = Result<T, NativeError>;

/// Socket states, numerically identical to the native `SRT_SOCKSTATUS`
/// enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SockState {
    Init = 1,
    Opened = 2,
    Listening = 3,
    Connecting = 4,
    Connected = 5,
    Broken = 6,
    Closing = 7,
    Closed = 8,
    NonExist = 9,
}

impl SockState {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            1 => Some(SockState::Init),
            2 => Some(SockState::Opened),
            3 => Some(SockState::Listening),
            4 => Some(SockState::Connecting),
            5 => Some(SockState::Connected),
            6 => Some(SockState::Broken),
            7 => Some(SockState::Closing),
            8 => Some(SockState::Closed),
            9 => Some(SockState::NonExist),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// True for the states that end a connection's life: the server loop
    /// treats an event on a socket in one of these as a disconnection.
    pub fn is_defunct(self) -> bool {
        matches!(
            self,
            SockState::Broken | SockState::Closed | SockState::NonExist
        )
    }
}

/// One readiness record from `epoll_uwait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpollEvent {
    pub fd: i32,
    pub flags: u32,
}

impl EpollEvent {
    pub fn readable(&self) -> bool {
        self.flags & EPOLL_IN != 0
    }

    pub fn error(&self) -> bool {
        self.flags & EPOLL_ERR != 0
    }
}

/// Socket statistics snapshot, a pass-through of the native counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SrtStats {
    /// Milliseconds since the connection was established.
    pub ms_time_stamp: i64,
    pub pkt_sent: i64,
    pub pkt_recv: i64,
    pub pkt_snd_loss: i32,
    pub pkt_rcv_loss: i32,
    pub pkt_retrans: i32,
    pub byte_sent: u64,
    pub byte_recv: u64,
    pub mbps_send_rate: f64,
    pub mbps_recv_rate: f64,
    pub ms_rtt: f64,
    pub mbps_bandwidth: f64,
    pub byte_avail_snd_buf: i32,
    pub byte_avail_rcv_buf: i32,
}

/// The native SRT call surface.
///
/// All methods are synchronous and may block (`read`, `accept` and
/// `epoll_uwait` in particular). Failures are returned as the native error
/// descriptor; the runner above folds them into `ERROR`-valued replies.
pub trait SrtApi: Send {
    /// Create a socket. `sender` marks the send side of a live stream
    /// (`SRTO_SENDER`).
    fn create_socket(&mut self, sender: bool) -> ApiResult<i32>;

    fn bind(&mut self, fd: i32, addr: &str, port: u16) -> ApiResult<()>;

    fn listen(&mut self, fd: i32, backlog: i32) -> ApiResult<()>;

    fn connect(&mut self, fd: i32, host: &str, port: u16) -> ApiResult<()>;

    /// Accept a pending connection, returning the new socket's fd. Blocks
    /// while the listener's accept queue is empty unless `SRTO_RCVSYN` is
    /// false.
    fn accept(&mut self, fd: i32) -> ApiResult<i32>;

    fn close(&mut self, fd: i32) -> ApiResult<()>;

    /// Read one message of at most `max_bytes`. Returns `Some(bytes)` with
    /// the payload, `Some(empty)` when no data is pending, or `None` once
    /// the peer is gone and the inbound queue is drained (EOF).
    fn read(&mut self, fd: i32, max_bytes: usize) -> ApiResult<Option<Bytes>>;

    /// Write one message. In message-API mode payloads beyond the configured
    /// payload size are rejected whole.
    fn write(&mut self, fd: i32, payload: Bytes) -> ApiResult<usize>;

    fn set_sock_opt(&mut self, fd: i32, opt: SockOpt, value: OptValue) -> ApiResult<()>;

    fn get_sock_opt(&mut self, fd: i32, opt: SockOpt) -> ApiResult<OptValue>;

    fn sock_state(&mut self, fd: i32) -> ApiResult<SockState>;

    fn epoll_create(&mut self) -> ApiResult<i32>;

    fn epoll_add_usock(&mut self, epid: i32, fd: i32, flags: u32) -> ApiResult<()>;

    /// Wait up to `timeout_ms` for readiness on the registered sockets.
    /// A zero timeout polls and returns immediately.
    fn epoll_uwait(&mut self, epid: i32, timeout_ms: i64) -> ApiResult<Vec<EpollEvent>>;

    /// Forward the 0-7 log level to the native library. Process-wide side
    /// effect, safe to call repeatedly.
    fn set_log_level(&mut self, level: i32) -> ApiResult<()>;

    fn stats(&mut self, fd: i32, clear: bool) -> ApiResult<SrtStats>;
}
