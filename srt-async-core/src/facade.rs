//! Asynchronous facade
//!
//! The host-side API. Submitting an operation pushes a completion entry
//! onto a FIFO, hands the envelope to the task runner, and returns a
//! future. Replies come back in submission order; each one pops exactly one
//! completion entry, updates the error slot if the native call failed, and
//! resolves the caller.
//!
//! Futures fail only for facade-level reasons — disposed state, a missed
//! deadline, or a dead worker. A native `ERROR` return is an ordinary
//! result ([`Outcome::Error`]) with its descriptor parked in the error
//! slot.

use crate::envelope::{Envelope, Outcome, ReadResult, Reply, Request, Value};
use crate::runner::spawn_runner;
use bytes::Bytes;
use parking_lot::Mutex;
use srt_async_native::{
    EpollEvent, NativeError, OptValue, SockOpt, SockState, SrtApi, SrtStats,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Facade-level failure. Protocol failures are never reported here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FacadeError {
    #[error("facade is disposed")]
    Disposed,

    #[error("call timed out")]
    Timeout,

    #[error("worker thread is gone")]
    WorkerGone,

    #[error("unexpected reply variant for {0}")]
    UnexpectedReply(&'static str),
}

/// Callback fired when a reply is delivered, regardless of whether the
/// paired future is still listening.
pub type ReplyCallback = Box<dyn FnOnce(&Reply) + Send>;

struct PendingCall {
    complete: oneshot::Sender<Reply>,
    callback: Option<ReplyCallback>,
}

struct Inner {
    request_tx: Mutex<Option<mpsc::Sender<Envelope>>>,
    pending: Mutex<VecDeque<PendingCall>>,
    last_error: Mutex<Option<NativeError>>,
    call_timeout: Mutex<Option<Duration>>,
    disposed: Arc<AtomicBool>,
}

/// A submitted call that has not been awaited yet.
///
/// Splitting submission from completion lets callers batch: submit several
/// requests back to back (they hit the runner in that order), then await
/// the replies.
pub struct PendingReply {
    rx: oneshot::Receiver<Reply>,
    timeout: Option<Duration>,
    disposed: Arc<AtomicBool>,
}

impl PendingReply {
    /// Wait for the reply, honoring the timeout captured at submission.
    ///
    /// A timeout fails this future only; the completion entry stays queued
    /// and the eventual reply is still consumed in order (and delivered to
    /// the registered callback, if any).
    pub async fn recv(self) -> Result<Reply, FacadeError> {
        let disposed = self.disposed;
        let gone = move |_| {
            if disposed.load(Ordering::Acquire) {
                FacadeError::Disposed
            } else {
                FacadeError::WorkerGone
            }
        };
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.rx).await {
                Ok(result) => result.map_err(gone),
                Err(_) => Err(FacadeError::Timeout),
            },
            None => self.rx.await.map_err(gone),
        }
    }
}

/// Handle to one worker-backed SRT endpoint API.
///
/// Cheap to clone; all clones share the worker, the completion FIFO and the
/// error slot. Must be created and used inside a tokio runtime.
#[derive(Clone)]
pub struct AsyncSrt {
    inner: Arc<Inner>,
}

impl AsyncSrt {
    /// Start the worker thread and reply pump for the given native API.
    pub fn spawn(api: Box<dyn SrtApi>) -> AsyncSrt {
        let (request_tx, request_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = tokio::sync::mpsc::unbounded_channel();
        let disposed = Arc::new(AtomicBool::new(false));

        spawn_runner(api, request_rx, reply_tx, disposed.clone());

        let inner = Arc::new(Inner {
            request_tx: Mutex::new(Some(request_tx)),
            pending: Mutex::new(VecDeque::new()),
            last_error: Mutex::new(None),
            call_timeout: Mutex::new(None),
            disposed,
        });
        Self::spawn_pump(Arc::downgrade(&inner), reply_rx);
        AsyncSrt { inner }
    }

    fn spawn_pump(
        inner: Weak<Inner>,
        mut replies: tokio::sync::mpsc::UnboundedReceiver<Reply>,
    ) {
        tokio::spawn(async move {
            while let Some(reply) = replies.recv().await {
                let Some(inner) = inner.upgrade() else { break };
                if let Some(error) = reply.error.clone() {
                    *inner.last_error.lock() = Some(error);
                }
                let entry = inner.pending.lock().pop_front();
                match entry {
                    Some(entry) => {
                        if let Some(callback) = entry.callback {
                            callback(&reply);
                        }
                        // The receiver may be gone (timed-out future); the
                        // queue stays aligned either way.
                        let _ = entry.complete.send(reply);
                    }
                    None => {
                        if !inner.disposed.load(Ordering::Acquire) {
                            tracing::warn!(
                                method = reply.method,
                                "reply arrived with no pending completion"
                            );
                        }
                    }
                }
            }
        });
    }

    /// Submit a request without awaiting it.
    pub fn submit(&self, request: Request) -> Result<PendingReply, FacadeError> {
        self.submit_inner(request, None)
    }

    /// Submit a request with a plain completion callback. The callback
    /// fires when the reply is delivered, even if the returned future has
    /// already failed with a timeout.
    pub fn submit_with_callback(
        &self,
        request: Request,
        callback: ReplyCallback,
    ) -> Result<PendingReply, FacadeError> {
        self.submit_inner(request, Some(callback))
    }

    fn submit_inner(
        &self,
        request: Request,
        callback: Option<ReplyCallback>,
    ) -> Result<PendingReply, FacadeError> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(FacadeError::Disposed);
        }
        // The push and the channel send happen under the pending lock so
        // FIFO position always matches wire order.
        let mut pending = self.inner.pending.lock();
        let tx_guard = self.inner.request_tx.lock();
        let Some(tx) = tx_guard.as_ref() else {
            return Err(FacadeError::Disposed);
        };

        let (complete, rx) = oneshot::channel();
        pending.push_back(PendingCall { complete, callback });
        if tx.send(Envelope::new(request)).is_err() {
            pending.pop_back();
            return Err(FacadeError::WorkerGone);
        }

        Ok(PendingReply {
            rx,
            timeout: *self.inner.call_timeout.lock(),
            disposed: self.inner.disposed.clone(),
        })
    }

    async fn call(&self, request: Request) -> Result<Reply, FacadeError> {
        self.submit(request)?.recv().await
    }

    /// Most recent native error descriptor, if any call has failed.
    pub fn last_error(&self) -> Option<NativeError> {
        self.inner.last_error.lock().clone()
    }

    /// Set the deadline applied to every subsequent call. `None` disables
    /// timeouts.
    pub fn set_call_timeout(&self, timeout: Option<Duration>) {
        *self.inner.call_timeout.lock() = timeout;
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Tear the facade down: every pending completion is dropped without
    /// firing its callback, the request channel closes, and the worker
    /// exits once its in-flight call finishes. Idempotent; subsequent
    /// submissions fail with [`FacadeError::Disposed`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut pending = self.inner.pending.lock();
        let mut tx = self.inner.request_tx.lock();
        pending.clear();
        tx.take();
        tracing::debug!("facade disposed");
    }

    // Typed operations, one per native call.

    pub async fn create_socket(&self, sender: bool) -> Result<Outcome<i32>, FacadeError> {
        fd_outcome(self.call(Request::CreateSocket { sender }).await?)
    }

    pub async fn bind(&self, fd: i32, addr: &str, port: u16) -> Result<Outcome<()>, FacadeError> {
        unit_outcome(
            self.call(Request::Bind {
                fd,
                addr: addr.to_string(),
                port,
            })
            .await?,
        )
    }

    pub async fn listen(&self, fd: i32, backlog: i32) -> Result<Outcome<()>, FacadeError> {
        unit_outcome(self.call(Request::Listen { fd, backlog }).await?)
    }

    pub async fn connect(
        &self,
        fd: i32,
        host: &str,
        port: u16,
    ) -> Result<Outcome<()>, FacadeError> {
        unit_outcome(
            self.call(Request::Connect {
                fd,
                host: host.to_string(),
                port,
            })
            .await?,
        )
    }

    pub async fn accept(&self, fd: i32) -> Result<Outcome<i32>, FacadeError> {
        fd_outcome(self.call(Request::Accept { fd }).await?)
    }

    pub async fn close(&self, fd: i32) -> Result<Outcome<()>, FacadeError> {
        unit_outcome(self.call(Request::Close { fd }).await?)
    }

    pub async fn read(&self, fd: i32, max_bytes: usize) -> Result<ReadResult, FacadeError> {
        match self.call(Request::Read { fd, max_bytes }).await?.value {
            Value::Data(bytes) => Ok(ReadResult::Data(bytes)),
            Value::Eof => Ok(ReadResult::Eof),
            Value::Error => Ok(ReadResult::Error),
            _ => Err(FacadeError::UnexpectedReply("read")),
        }
    }

    /// Write one message. The payload is moved into the runner; the caller
    /// keeps no view of it after this call.
    pub async fn write(&self, fd: i32, payload: Bytes) -> Result<Outcome<usize>, FacadeError> {
        match self.call(Request::Write { fd, payload }).await?.value {
            Value::Size(n) => Ok(Outcome::Value(n)),
            Value::Error => Ok(Outcome::Error),
            _ => Err(FacadeError::UnexpectedReply("write")),
        }
    }

    pub async fn set_sock_opt(
        &self,
        fd: i32,
        opt: SockOpt,
        value: OptValue,
    ) -> Result<Outcome<()>, FacadeError> {
        unit_outcome(self.call(Request::SetSockOpt { fd, opt, value }).await?)
    }

    pub async fn get_sock_opt(
        &self,
        fd: i32,
        opt: SockOpt,
    ) -> Result<Outcome<OptValue>, FacadeError> {
        match self.call(Request::GetSockOpt { fd, opt }).await?.value {
            Value::Opt(value) => Ok(Outcome::Value(value)),
            Value::Error => Ok(Outcome::Error),
            _ => Err(FacadeError::UnexpectedReply("get_sock_opt")),
        }
    }

    pub async fn sock_state(&self, fd: i32) -> Result<Outcome<SockState>, FacadeError> {
        match self.call(Request::SockState { fd }).await?.value {
            Value::State(state) => Ok(Outcome::Value(state)),
            Value::Error => Ok(Outcome::Error),
            _ => Err(FacadeError::UnexpectedReply("sock_state")),
        }
    }

    pub async fn epoll_create(&self) -> Result<Outcome<i32>, FacadeError> {
        fd_outcome(self.call(Request::EpollCreate).await?)
    }

    pub async fn epoll_add_usock(
        &self,
        epid: i32,
        fd: i32,
        flags: u32,
    ) -> Result<Outcome<()>, FacadeError> {
        unit_outcome(self.call(Request::EpollAddUsock { epid, fd, flags }).await?)
    }

    pub async fn epoll_uwait(
        &self,
        epid: i32,
        timeout_ms: i64,
    ) -> Result<Outcome<Vec<EpollEvent>>, FacadeError> {
        match self.call(Request::EpollUwait { epid, timeout_ms }).await?.value {
            Value::Events(events) => Ok(Outcome::Value(events)),
            Value::Error => Ok(Outcome::Error),
            _ => Err(FacadeError::UnexpectedReply("epoll_uwait")),
        }
    }

    pub async fn set_log_level(&self, level: i32) -> Result<Outcome<()>, FacadeError> {
        unit_outcome(self.call(Request::SetLogLevel { level }).await?)
    }

    pub async fn stats(&self, fd: i32, clear: bool) -> Result<Outcome<SrtStats>, FacadeError> {
        match self.call(Request::Stats { fd, clear }).await?.value {
            Value::Stats(stats) => Ok(Outcome::Value(stats)),
            Value::Error => Ok(Outcome::Error),
            _ => Err(FacadeError::UnexpectedReply("stats")),
        }
    }
}

fn fd_outcome(reply: Reply) -> Result<Outcome<i32>, FacadeError> {
    match reply.value {
        Value::Fd(fd) => Ok(Outcome::Value(fd)),
        Value::Error => Ok(Outcome::Error),
        _ => Err(FacadeError::UnexpectedReply(reply.method)),
    }
}

fn unit_outcome(reply: Reply) -> Result<Outcome<()>, FacadeError> {
    match reply.value {
        Value::Unit => Ok(Outcome::Value(())),
        Value::Error => Ok(Outcome::Error),
        _ => Err(FacadeError::UnexpectedReply(reply.method)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srt_async_native::mem::MemNet;
    use std::sync::mpsc as std_mpsc;

    #[tokio::test]
    async fn test_callbacks_fire_in_submission_order() {
        let net = MemNet::new();
        let facade = AsyncSrt::spawn(Box::new(net.api()));

        let (order_tx, order_rx) = std_mpsc::channel();
        let mut replies = Vec::new();
        for i in 0..8 {
            let tx = order_tx.clone();
            let pending = facade
                .submit_with_callback(
                    Request::SetLogLevel { level: i },
                    Box::new(move |_| tx.send(i).unwrap()),
                )
                .unwrap();
            replies.push(pending);
        }
        for pending in replies {
            pending.recv().await.unwrap();
        }

        let observed: Vec<i32> = order_rx.try_iter().collect();
        assert_eq!(observed, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_protocol_error_resolves_future_and_sets_error_slot() {
        let net = MemNet::new();
        let facade = AsyncSrt::spawn(Box::new(net.api()));

        assert!(facade.last_error().is_none());
        let outcome = facade.listen(424242, 16).await.unwrap();
        assert!(outcome.is_error());

        let error = facade.last_error().unwrap();
        assert_eq!(error.code, srt_async_native::error::codes::EINVSOCK);
    }

    #[tokio::test]
    async fn test_timeout_rejects_future_but_callback_still_fires() {
        let net = MemNet::new();
        let facade = AsyncSrt::spawn(Box::new(net.api()));

        let listener = facade.create_socket(false).await.unwrap().value().unwrap();
        facade.bind(listener, "127.0.0.1", 9200).await.unwrap();
        facade.listen(listener, 16).await.unwrap();

        facade.set_call_timeout(Some(Duration::from_millis(50)));
        let (cb_tx, cb_rx) = std_mpsc::channel();
        let pending = facade
            .submit_with_callback(
                Request::Accept { fd: listener },
                Box::new(move |reply| {
                    cb_tx.send(reply.value.clone()).unwrap();
                }),
            )
            .unwrap();

        // No peer yet: the future misses its deadline.
        assert_eq!(pending.recv().await.unwrap_err(), FacadeError::Timeout);

        // A peer shows up; the blocked native accept returns and the reply
        // is still routed to the registered callback.
        let mut side = net.api();
        let caller = side.create_socket(true).unwrap();
        side.connect(caller, "127.0.0.1", 9200).unwrap();

        let delivered = cb_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(delivered, Value::Fd(_)));

        // The queue stayed aligned: later calls complete normally.
        facade.set_call_timeout(None);
        let state = facade.sock_state(listener).await.unwrap().value().unwrap();
        assert_eq!(state, SockState::Listening);
    }

    #[tokio::test]
    async fn test_dispose_clears_pending_and_rejects_new_calls() {
        let net = MemNet::new();
        let facade = AsyncSrt::spawn(Box::new(net.api()));

        let listener = facade.create_socket(false).await.unwrap().value().unwrap();
        facade.bind(listener, "127.0.0.1", 9201).await.unwrap();
        facade.listen(listener, 16).await.unwrap();

        let (cb_tx, cb_rx) = std_mpsc::channel();
        let pending = facade
            .submit_with_callback(
                Request::Accept { fd: listener },
                Box::new(move |_| {
                    cb_tx.send(()).unwrap();
                }),
            )
            .unwrap();

        facade.dispose();
        assert!(facade.is_disposed());
        assert_eq!(pending.recv().await.unwrap_err(), FacadeError::Disposed);
        // Pending callbacks are dropped without firing.
        assert!(cb_rx
            .recv_timeout(Duration::from_millis(100))
            .is_err());

        assert_eq!(
            facade.epoll_create().await.unwrap_err(),
            FacadeError::Disposed
        );

        // Second dispose is a no-op.
        facade.dispose();
    }

    #[tokio::test]
    async fn test_write_moves_payload() {
        let net = MemNet::new();
        let facade = AsyncSrt::spawn(Box::new(net.api()));

        let listener = facade.create_socket(false).await.unwrap().value().unwrap();
        facade.bind(listener, "127.0.0.1", 9202).await.unwrap();
        facade.listen(listener, 16).await.unwrap();
        let caller = facade.create_socket(true).await.unwrap().value().unwrap();
        facade.connect(caller, "127.0.0.1", 9202).await.unwrap();
        let accepted = facade.accept(listener).await.unwrap().value().unwrap();

        let payload = Bytes::from_static(b"moved into the runner");
        let sent = facade
            .write(caller, payload)
            .await
            .unwrap()
            .value()
            .unwrap();
        assert_eq!(sent, 21);

        match facade.read(accepted, 1316).await.unwrap() {
            ReadResult::Data(data) => assert_eq!(&data[..], b"moved into the runner"),
            other => panic!("unexpected read result: {other:?}"),
        }
    }
}
