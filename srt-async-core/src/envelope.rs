//! Request and reply envelopes
//!
//! Typed messages exchanged between the facade and its task runner. The
//! request enumeration is the dispatch table: one variant per native
//! operation, so a malformed or unknown method cannot be constructed.

use bytes::Bytes;
use srt_async_native::{EpollEvent, NativeError, OptValue, SockOpt, SockState, SrtStats};
use std::time::Instant;

/// One native operation, with its arguments.
///
/// Write payloads are carried by value; submitting a write moves the buffer
/// into the envelope and the caller keeps no view of it.
#[derive(Debug)]
pub enum Request {
    CreateSocket { sender: bool },
    Bind { fd: i32, addr: String, port: u16 },
    Listen { fd: i32, backlog: i32 },
    Connect { fd: i32, host: String, port: u16 },
    Accept { fd: i32 },
    Close { fd: i32 },
    Read { fd: i32, max_bytes: usize },
    Write { fd: i32, payload: Bytes },
    SetSockOpt { fd: i32, opt: SockOpt, value: OptValue },
    GetSockOpt { fd: i32, opt: SockOpt },
    SockState { fd: i32 },
    EpollCreate,
    EpollAddUsock { epid: i32, fd: i32, flags: u32 },
    EpollUwait { epid: i32, timeout_ms: i64 },
    SetLogLevel { level: i32 },
    Stats { fd: i32, clear: bool },
}

impl Request {
    /// Method tag echoed in the reply for diagnostics.
    pub fn method(&self) -> &'static str {
        match self {
            Request::CreateSocket { .. } => "create_socket",
            Request::Bind { .. } => "bind",
            Request::Listen { .. } => "listen",
            Request::Connect { .. } => "connect",
            Request::Accept { .. } => "accept",
            Request::Close { .. } => "close",
            Request::Read { .. } => "read",
            Request::Write { .. } => "write",
            Request::SetSockOpt { .. } => "set_sock_opt",
            Request::GetSockOpt { .. } => "get_sock_opt",
            Request::SockState { .. } => "sock_state",
            Request::EpollCreate => "epoll_create",
            Request::EpollAddUsock { .. } => "epoll_add_usock",
            Request::EpollUwait { .. } => "epoll_uwait",
            Request::SetLogLevel { .. } => "set_log_level",
            Request::Stats { .. } => "stats",
        }
    }
}

/// A request plus its submission timestamp.
#[derive(Debug)]
pub struct Envelope {
    pub request: Request,
    pub submitted: Instant,
}

impl Envelope {
    pub fn new(request: Request) -> Self {
        Envelope {
            request,
            submitted: Instant::now(),
        }
    }
}

/// Result payload of one native call.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A socket or epoll identifier.
    Fd(i32),
    /// Success without a payload.
    Unit,
    /// Bytes written.
    Size(usize),
    /// Bytes read. An empty buffer means no data was pending.
    Data(Bytes),
    /// End of stream: the peer is gone and the queue is drained.
    Eof,
    Opt(OptValue),
    State(SockState),
    Events(Vec<EpollEvent>),
    Stats(SrtStats),
    /// The native `ERROR` sentinel. The descriptor travels in
    /// [`Reply::error`].
    Error,
}

/// One reply, emitted in the exact order requests were accepted.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Echo of the request's method tag.
    pub method: &'static str,
    pub value: Value,
    /// Error descriptor when the native call failed.
    pub error: Option<NativeError>,
    /// When the caller submitted the request.
    pub submitted: Instant,
    /// When the runner finished the call and queued this reply.
    pub queued: Instant,
}

/// Protocol-level outcome of one call.
///
/// A native `ERROR` return is not a future failure; it resolves the call
/// with `Outcome::Error` and parks the descriptor in the facade's error
/// slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    Value(T),
    Error,
}

impl<T> Outcome<T> {
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error)
    }

    pub fn value(self) -> Option<T> {
        match self {
            Outcome::Value(v) => Some(v),
            Outcome::Error => None,
        }
    }

    pub fn as_ref(&self) -> Outcome<&T> {
        match self {
            Outcome::Value(v) => Outcome::Value(v),
            Outcome::Error => Outcome::Error,
        }
    }
}

/// Outcome of one `read` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadResult {
    /// A payload; empty when no data was pending.
    Data(Bytes),
    /// Peer gone, queue drained.
    Eof,
    /// Native `ERROR`; descriptor in the error slot.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_tags() {
        assert_eq!(Request::EpollCreate.method(), "epoll_create");
        assert_eq!(
            Request::Write {
                fd: 1,
                payload: Bytes::new()
            }
            .method(),
            "write"
        );
        assert_eq!(Request::Accept { fd: 1 }.method(), "accept");
    }

    #[test]
    fn test_outcome_accessors() {
        let ok: Outcome<i32> = Outcome::Value(4);
        assert!(!ok.is_error());
        assert_eq!(ok.value(), Some(4));

        let err: Outcome<i32> = Outcome::Error;
        assert!(err.is_error());
        assert_eq!(err.value(), None);
    }
}
