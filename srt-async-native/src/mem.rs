//! In-process loopback engine
//!
//! A shared-state implementation of [`SrtApi`] that connects sockets created
//! through different handles of the same [`MemNet`]. It reproduces the
//! message-API semantics the wrapper relies on — listener accept queues,
//! MTU-bounded atomic messages, epoll readiness with blocking waits, broken
//! state on peer close — without touching the network. The test suites run
//! their loopback scenarios on it, and it doubles as an offline development
//! backend.

use crate::api::{
    ApiResult, EpollEvent, SockState, SrtApi, SrtStats, EPOLL_ERR, EPOLL_IN,
};
use crate::error::{codes, NativeError};
use crate::options::{OptValue, SockOpt};
use crate::DEFAULT_PAYLOAD_SIZE;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone)]
struct Counters {
    pkt_sent: i64,
    pkt_recv: i64,
    byte_sent: u64,
    byte_recv: u64,
}

#[derive(Debug)]
struct SocketEntry {
    state: SockState,
    sender: bool,
    opts: HashMap<SockOpt, OptValue>,
    bound_port: Option<u16>,
    /// Accepted-but-not-yet-popped fds, listener side.
    accept_queue: VecDeque<i32>,
    peer: Option<i32>,
    inbox: VecDeque<Bytes>,
    counters: Counters,
    established: Option<Instant>,
}

impl SocketEntry {
    fn new(sender: bool) -> Self {
        SocketEntry {
            state: SockState::Init,
            sender,
            opts: HashMap::new(),
            bound_port: None,
            accept_queue: VecDeque::new(),
            peer: None,
            inbox: VecDeque::new(),
            counters: Counters::default(),
            established: None,
        }
    }

    fn bool_opt(&self, opt: SockOpt, default: bool) -> bool {
        self.opts
            .get(&opt)
            .and_then(OptValue::as_bool)
            .unwrap_or(default)
    }

    fn int_opt(&self, opt: SockOpt, default: i32) -> i32 {
        self.opts
            .get(&opt)
            .and_then(OptValue::as_int)
            .unwrap_or(default)
    }
}

#[derive(Default)]
struct EngineState {
    next_fd: i32,
    next_epid: i32,
    sockets: HashMap<i32, SocketEntry>,
    /// epid -> (fd -> subscribed flags)
    epolls: HashMap<i32, HashMap<i32, u32>>,
    /// Listening port -> listener fd.
    listeners: HashMap<u16, i32>,
    log_level: i32,
}

struct Shared {
    state: Mutex<EngineState>,
    wakeup: Condvar,
}

/// Handle to one in-process network. Every [`MemApi`] cloned off the same
/// net shares the socket table, so a facade pair on two worker threads can
/// connect to each other.
#[derive(Clone)]
pub struct MemNet {
    shared: Arc<Shared>,
}

impl Default for MemNet {
    fn default() -> Self {
        Self::new()
    }
}

impl MemNet {
    pub fn new() -> Self {
        MemNet {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::default()),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// A new API handle onto this net. One per task runner.
    pub fn api(&self) -> MemApi {
        MemApi {
            shared: self.shared.clone(),
        }
    }
}

/// [`SrtApi`] implementation backed by a [`MemNet`].
pub struct MemApi {
    shared: Arc<Shared>,
}

impl MemApi {
    fn ready_flags(state: &EngineState, fd: i32, subscribed: u32) -> u32 {
        let mut flags = 0;
        match state.sockets.get(&fd) {
            None => flags |= EPOLL_ERR,
            Some(entry) => {
                if entry.state.is_defunct() {
                    flags |= EPOLL_ERR;
                }
                if !entry.inbox.is_empty() || !entry.accept_queue.is_empty() {
                    flags |= EPOLL_IN;
                }
            }
        }
        flags & (subscribed | EPOLL_ERR)
    }
}

impl SrtApi for MemApi {
    fn create_socket(&mut self, sender: bool) -> ApiResult<i32> {
        let mut state = self.shared.state.lock();
        state.next_fd += 1;
        let fd = state.next_fd;
        state.sockets.insert(fd, SocketEntry::new(sender));
        Ok(fd)
    }

    fn bind(&mut self, fd: i32, _addr: &str, port: u16) -> ApiResult<()> {
        let mut state = self.shared.state.lock();
        if state.listeners.contains_key(&port) {
            return Err(NativeError::new(
                codes::ECONNSETUP,
                format!("port {port} is already bound"),
            ));
        }
        let entry = state
            .sockets
            .get_mut(&fd)
            .ok_or_else(|| NativeError::invalid_socket(fd))?;
        entry.state = SockState::Opened;
        entry.bound_port = Some(port);
        Ok(())
    }

    fn listen(&mut self, fd: i32, _backlog: i32) -> ApiResult<()> {
        let mut state = self.shared.state.lock();
        let entry = state
            .sockets
            .get_mut(&fd)
            .ok_or_else(|| NativeError::invalid_socket(fd))?;
        let port = entry.bound_port.ok_or_else(|| {
            NativeError::new(codes::ECONNSETUP, format!("socket {fd} is not bound"))
        })?;
        entry.state = SockState::Listening;
        state.listeners.insert(port, fd);
        Ok(())
    }

    fn connect(&mut self, fd: i32, _host: &str, port: u16) -> ApiResult<()> {
        let mut state = self.shared.state.lock();
        let listener_fd = *state.listeners.get(&port).ok_or_else(|| {
            NativeError::new(codes::ECONNSETUP, format!("no listener on port {port}"))
        })?;

        state.next_fd += 1;
        let remote_fd = state.next_fd;
        let mut remote = SocketEntry::new(false);
        remote.state = SockState::Connected;
        remote.peer = Some(fd);
        remote.established = Some(Instant::now());
        state.sockets.insert(remote_fd, remote);

        let local = state
            .sockets
            .get_mut(&fd)
            .ok_or_else(|| NativeError::invalid_socket(fd))?;
        local.state = SockState::Connected;
        local.peer = Some(remote_fd);
        local.established = Some(Instant::now());

        let listener = state
            .sockets
            .get_mut(&listener_fd)
            .ok_or_else(|| NativeError::invalid_socket(listener_fd))?;
        listener.accept_queue.push_back(remote_fd);

        self.shared.wakeup.notify_all();
        Ok(())
    }

    fn accept(&mut self, fd: i32) -> ApiResult<i32> {
        let mut state = self.shared.state.lock();
        loop {
            let entry = state
                .sockets
                .get_mut(&fd)
                .ok_or_else(|| NativeError::invalid_socket(fd))?;
            if entry.state != SockState::Listening {
                return Err(NativeError::new(
                    codes::ENOLISTEN,
                    format!("socket {fd} is not listening"),
                ));
            }
            if let Some(accepted) = entry.accept_queue.pop_front() {
                return Ok(accepted);
            }
            if !entry.bool_opt(SockOpt::RcvSyn, true) {
                return Err(NativeError::new(
                    codes::EASYNCRCV,
                    "no pending connection",
                ));
            }
            self.shared.wakeup.wait(&mut state);
        }
    }

    fn close(&mut self, fd: i32) -> ApiResult<()> {
        let mut state = self.shared.state.lock();
        let entry = state
            .sockets
            .get_mut(&fd)
            .ok_or_else(|| NativeError::invalid_socket(fd))?;
        entry.state = SockState::Closed;
        let peer = entry.peer.take();
        let port = entry.bound_port.take();

        if let Some(peer_fd) = peer {
            if let Some(peer_entry) = state.sockets.get_mut(&peer_fd) {
                if !peer_entry.state.is_defunct() {
                    peer_entry.state = SockState::Broken;
                }
                peer_entry.peer = None;
            }
        }
        if let Some(port) = port {
            if state.listeners.get(&port) == Some(&fd) {
                state.listeners.remove(&port);
            }
        }
        // SRT drops closed sockets from every epoll set it was registered
        // in; without this a dead fd would report ERROR forever.
        for set in state.epolls.values_mut() {
            set.remove(&fd);
        }

        self.shared.wakeup.notify_all();
        Ok(())
    }

    fn read(&mut self, fd: i32, max_bytes: usize) -> ApiResult<Option<Bytes>> {
        let mut state = self.shared.state.lock();
        let entry = state
            .sockets
            .get_mut(&fd)
            .ok_or_else(|| NativeError::invalid_socket(fd))?;

        match entry.inbox.front() {
            Some(message) if message.len() > max_bytes => Err(NativeError::new(
                codes::ELARGEMSG,
                format!(
                    "message of {} bytes exceeds the {} byte read buffer",
                    message.len(),
                    max_bytes
                ),
            )),
            Some(_) => {
                let message = entry.inbox.pop_front().unwrap_or_default();
                entry.counters.pkt_recv += 1;
                entry.counters.byte_recv += message.len() as u64;
                Ok(Some(message))
            }
            // Queue drained and the peer is gone: end of stream.
            None if entry.peer.is_none() && entry.state.is_defunct() => Ok(None),
            None if entry.state == SockState::Connected => Ok(Some(Bytes::new())),
            None => Err(NativeError::not_connected(fd)),
        }
    }

    fn write(&mut self, fd: i32, payload: Bytes) -> ApiResult<usize> {
        let mut state = self.shared.state.lock();
        let entry = state
            .sockets
            .get(&fd)
            .ok_or_else(|| NativeError::invalid_socket(fd))?;
        if entry.state != SockState::Connected {
            return Err(NativeError::not_connected(fd));
        }
        let message_api = entry.bool_opt(SockOpt::MessageApi, true);
        let payload_size =
            entry.int_opt(SockOpt::PayloadSize, DEFAULT_PAYLOAD_SIZE as i32) as usize;
        if message_api && payload.len() > payload_size {
            return Err(NativeError::new(
                codes::ELARGEMSG,
                format!(
                    "message of {} bytes exceeds the {} byte payload limit",
                    payload.len(),
                    payload_size
                ),
            ));
        }
        let peer_fd = entry
            .peer
            .ok_or_else(|| NativeError::new(codes::ECONNLOST, "peer is gone"))?;

        let len = payload.len();
        let peer = state
            .sockets
            .get_mut(&peer_fd)
            .ok_or_else(|| NativeError::new(codes::ECONNLOST, "peer is gone"))?;
        peer.inbox.push_back(payload);

        let entry = state
            .sockets
            .get_mut(&fd)
            .ok_or_else(|| NativeError::invalid_socket(fd))?;
        entry.counters.pkt_sent += 1;
        entry.counters.byte_sent += len as u64;

        self.shared.wakeup.notify_all();
        Ok(len)
    }

    fn set_sock_opt(&mut self, fd: i32, opt: SockOpt, value: OptValue) -> ApiResult<()> {
        let mut state = self.shared.state.lock();
        let entry = state
            .sockets
            .get_mut(&fd)
            .ok_or_else(|| NativeError::invalid_socket(fd))?;
        entry.opts.insert(opt, value);
        Ok(())
    }

    fn get_sock_opt(&mut self, fd: i32, opt: SockOpt) -> ApiResult<OptValue> {
        let state = self.shared.state.lock();
        let entry = state
            .sockets
            .get(&fd)
            .ok_or_else(|| NativeError::invalid_socket(fd))?;
        if let Some(value) = entry.opts.get(&opt) {
            return Ok(value.clone());
        }
        let value = match opt {
            SockOpt::MessageApi => OptValue::Bool(true),
            SockOpt::RcvSyn | SockOpt::SndSyn => OptValue::Bool(true),
            SockOpt::PayloadSize => OptValue::Int(DEFAULT_PAYLOAD_SIZE as i32),
            SockOpt::Sender => OptValue::Bool(entry.sender),
            SockOpt::State => OptValue::Int(entry.state.as_raw()),
            _ => OptValue::Int(0),
        };
        Ok(value)
    }

    fn sock_state(&mut self, fd: i32) -> ApiResult<SockState> {
        let state = self.shared.state.lock();
        Ok(state
            .sockets
            .get(&fd)
            .map(|entry| entry.state)
            .unwrap_or(SockState::NonExist))
    }

    fn epoll_create(&mut self) -> ApiResult<i32> {
        let mut state = self.shared.state.lock();
        state.next_epid += 1;
        let epid = state.next_epid;
        state.epolls.insert(epid, HashMap::new());
        Ok(epid)
    }

    fn epoll_add_usock(&mut self, epid: i32, fd: i32, flags: u32) -> ApiResult<()> {
        let mut state = self.shared.state.lock();
        if !state.sockets.contains_key(&fd) {
            return Err(NativeError::invalid_socket(fd));
        }
        let set = state.epolls.get_mut(&epid).ok_or_else(|| {
            NativeError::new(codes::EINVPOLLID, format!("invalid epoll id {epid}"))
        })?;
        set.insert(fd, flags);
        Ok(())
    }

    fn epoll_uwait(&mut self, epid: i32, timeout_ms: i64) -> ApiResult<Vec<EpollEvent>> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms.max(0) as u64);
        let mut state = self.shared.state.lock();
        loop {
            let set = state.epolls.get(&epid).ok_or_else(|| {
                NativeError::new(codes::EINVPOLLID, format!("invalid epoll id {epid}"))
            })?;

            let mut events: Vec<EpollEvent> = set
                .iter()
                .filter_map(|(&fd, &subscribed)| {
                    let flags = Self::ready_flags(&state, fd, subscribed);
                    (flags != 0).then_some(EpollEvent { fd, flags })
                })
                .collect();
            // Deterministic dispatch order across runs.
            events.sort_by_key(|ev| ev.fd);

            let now = Instant::now();
            if !events.is_empty() || now >= deadline {
                return Ok(events);
            }
            if self
                .shared
                .wakeup
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                continue;
            }
        }
    }

    fn set_log_level(&mut self, level: i32) -> ApiResult<()> {
        let mut state = self.shared.state.lock();
        state.log_level = level;
        Ok(())
    }

    fn stats(&mut self, fd: i32, clear: bool) -> ApiResult<SrtStats> {
        let mut state = self.shared.state.lock();
        let entry = state
            .sockets
            .get_mut(&fd)
            .ok_or_else(|| NativeError::invalid_socket(fd))?;
        let snapshot = SrtStats {
            ms_time_stamp: entry
                .established
                .map(|at| at.elapsed().as_millis() as i64)
                .unwrap_or(0),
            pkt_sent: entry.counters.pkt_sent,
            pkt_recv: entry.counters.pkt_recv,
            byte_sent: entry.counters.byte_sent,
            byte_recv: entry.counters.byte_recv,
            ..SrtStats::default()
        };
        if clear {
            entry.counters = Counters::default();
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_pair(net: &MemNet, port: u16) -> (MemApi, i32, i32) {
        let mut api = net.api();
        let listener = api.create_socket(false).unwrap();
        api.bind(listener, "127.0.0.1", port).unwrap();
        api.listen(listener, 16).unwrap();

        let caller = api.create_socket(true).unwrap();
        api.connect(caller, "127.0.0.1", port).unwrap();
        let accepted = api.accept(listener).unwrap();
        (api, caller, accepted)
    }

    #[test]
    fn test_connect_accept() {
        let net = MemNet::new();
        let (mut api, caller, accepted) = connected_pair(&net, 9100);

        assert_eq!(api.sock_state(caller).unwrap(), SockState::Connected);
        assert_eq!(api.sock_state(accepted).unwrap(), SockState::Connected);
    }

    #[test]
    fn test_connect_without_listener_fails() {
        let net = MemNet::new();
        let mut api = net.api();
        let fd = api.create_socket(true).unwrap();
        let err = api.connect(fd, "127.0.0.1", 9101).unwrap_err();
        assert_eq!(err.code, codes::ECONNSETUP);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let net = MemNet::new();
        let (mut api, caller, accepted) = connected_pair(&net, 9102);

        let sent = api.write(caller, Bytes::from_static(b"hello srt")).unwrap();
        assert_eq!(sent, 9);

        let received = api.read(accepted, 1316).unwrap().unwrap();
        assert_eq!(&received[..], b"hello srt");
    }

    #[test]
    fn test_read_without_data_is_empty() {
        let net = MemNet::new();
        let (mut api, _caller, accepted) = connected_pair(&net, 9103);

        let received = api.read(accepted, 1316).unwrap().unwrap();
        assert!(received.is_empty());
    }

    #[test]
    fn test_oversized_message_rejected() {
        let net = MemNet::new();
        let (mut api, caller, _accepted) = connected_pair(&net, 9104);

        let at_limit = Bytes::from(vec![0u8; DEFAULT_PAYLOAD_SIZE]);
        assert_eq!(api.write(caller, at_limit).unwrap(), DEFAULT_PAYLOAD_SIZE);

        let over_limit = Bytes::from(vec![0u8; DEFAULT_PAYLOAD_SIZE + 1]);
        let err = api.write(caller, over_limit).unwrap_err();
        assert_eq!(err.code, codes::ELARGEMSG);
    }

    #[test]
    fn test_close_breaks_peer_then_eof() {
        let net = MemNet::new();
        let (mut api, caller, accepted) = connected_pair(&net, 9105);

        api.write(caller, Bytes::from_static(b"last words")).unwrap();
        api.close(caller).unwrap();

        assert_eq!(api.sock_state(accepted).unwrap(), SockState::Broken);
        // Queued data is still readable, then the stream reports EOF.
        assert_eq!(
            api.read(accepted, 1316).unwrap().unwrap(),
            Bytes::from_static(b"last words")
        );
        assert_eq!(api.read(accepted, 1316).unwrap(), None);
    }

    #[test]
    fn test_epoll_reports_listener_and_data() {
        let net = MemNet::new();
        let mut api = net.api();
        let listener = api.create_socket(false).unwrap();
        api.bind(listener, "127.0.0.1", 9106).unwrap();
        api.listen(listener, 16).unwrap();

        let epid = api.epoll_create().unwrap();
        api.epoll_add_usock(epid, listener, EPOLL_IN | EPOLL_ERR)
            .unwrap();
        assert!(api.epoll_uwait(epid, 0).unwrap().is_empty());

        let caller = api.create_socket(true).unwrap();
        api.connect(caller, "127.0.0.1", 9106).unwrap();

        let events = api.epoll_uwait(epid, 0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fd, listener);
        assert!(events[0].readable());

        let accepted = api.accept(listener).unwrap();
        assert!(api.epoll_uwait(epid, 0).unwrap().is_empty());

        api.epoll_add_usock(epid, accepted, EPOLL_IN | EPOLL_ERR)
            .unwrap();
        api.write(caller, Bytes::from_static(b"ping")).unwrap();
        let events = api.epoll_uwait(epid, 0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fd, accepted);
        assert!(events[0].readable());
    }

    #[test]
    fn test_epoll_error_flag_on_broken_socket() {
        let net = MemNet::new();
        let (mut api, caller, accepted) = connected_pair(&net, 9107);

        let epid = api.epoll_create().unwrap();
        api.epoll_add_usock(epid, accepted, EPOLL_IN | EPOLL_ERR)
            .unwrap();
        api.close(caller).unwrap();

        let events = api.epoll_uwait(epid, 0).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].error());
    }

    #[test]
    fn test_nonblocking_accept_without_peer() {
        let net = MemNet::new();
        let mut api = net.api();
        let listener = api.create_socket(false).unwrap();
        api.bind(listener, "127.0.0.1", 9108).unwrap();
        api.listen(listener, 16).unwrap();
        api.set_sock_opt(listener, SockOpt::RcvSyn, OptValue::Bool(false))
            .unwrap();

        let err = api.accept(listener).unwrap_err();
        assert_eq!(err.code, codes::EASYNCRCV);
    }

    #[test]
    fn test_stats_counters() {
        let net = MemNet::new();
        let (mut api, caller, accepted) = connected_pair(&net, 9109);

        api.write(caller, Bytes::from_static(b"0123456789")).unwrap();
        api.read(accepted, 1316).unwrap();

        let sent = api.stats(caller, false).unwrap();
        assert_eq!(sent.pkt_sent, 1);
        assert_eq!(sent.byte_sent, 10);

        let recv = api.stats(accepted, true).unwrap();
        assert_eq!(recv.pkt_recv, 1);
        assert_eq!(recv.byte_recv, 10);

        // Cleared on request.
        let recv = api.stats(accepted, false).unwrap();
        assert_eq!(recv.pkt_recv, 0);
    }
}
