//! Task runner
//!
//! The worker-thread message pump. One runner per facade; it owns the
//! native API object end-to-end and executes requests strictly one at a
//! time, so no two native calls are ever active on the same transport
//! handle.

use crate::envelope::{Envelope, Reply, Request, Value};
use srt_async_native::{ApiResult, SrtApi};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;

/// Spawn the worker thread.
///
/// The runner exits when the request channel closes, when the reply side is
/// gone, or when the shared `disposed` flag is raised — in the latter case
/// any requests still queued behind the in-flight one are discarded.
pub fn spawn_runner(
    mut api: Box<dyn SrtApi>,
    requests: Receiver<Envelope>,
    replies: UnboundedSender<Reply>,
    disposed: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while let Ok(envelope) = requests.recv() {
            if disposed.load(Ordering::Acquire) {
                break;
            }
            let reply = dispatch(api.as_mut(), envelope);
            if replies.send(reply).is_err() {
                break;
            }
        }
        tracing::debug!("srt task runner exiting");
    })
}

/// Execute one request and fold the result into a reply.
fn dispatch(api: &mut dyn SrtApi, envelope: Envelope) -> Reply {
    let method = envelope.request.method();
    let submitted = envelope.submitted;

    let result = match envelope.request {
        Request::CreateSocket { sender } => api.create_socket(sender).map(Value::Fd),
        Request::Bind { fd, addr, port } => api.bind(fd, &addr, port).map(|_| Value::Unit),
        Request::Listen { fd, backlog } => api.listen(fd, backlog).map(|_| Value::Unit),
        Request::Connect { fd, host, port } => api.connect(fd, &host, port).map(|_| Value::Unit),
        Request::Accept { fd } => api.accept(fd).map(Value::Fd),
        Request::Close { fd } => api.close(fd).map(|_| Value::Unit),
        Request::Read { fd, max_bytes } => api.read(fd, max_bytes).map(|data| match data {
            Some(bytes) => Value::Data(bytes),
            None => Value::Eof,
        }),
        Request::Write { fd, payload } => api.write(fd, payload).map(Value::Size),
        Request::SetSockOpt { fd, opt, value } => {
            api.set_sock_opt(fd, opt, value).map(|_| Value::Unit)
        }
        Request::GetSockOpt { fd, opt } => api.get_sock_opt(fd, opt).map(Value::Opt),
        Request::SockState { fd } => api.sock_state(fd).map(Value::State),
        Request::EpollCreate => api.epoll_create().map(Value::Fd),
        Request::EpollAddUsock { epid, fd, flags } => {
            api.epoll_add_usock(epid, fd, flags).map(|_| Value::Unit)
        }
        Request::EpollUwait { epid, timeout_ms } => {
            api.epoll_uwait(epid, timeout_ms).map(Value::Events)
        }
        Request::SetLogLevel { level } => api.set_log_level(level).map(|_| Value::Unit),
        Request::Stats { fd, clear } => api.stats(fd, clear).map(Value::Stats),
    };

    let (value, error) = fold(result);
    Reply {
        method,
        value,
        error,
        submitted,
        queued: Instant::now(),
    }
}

fn fold(result: ApiResult<Value>) -> (Value, Option<srt_async_native::NativeError>) {
    match result {
        Ok(value) => (value, None),
        Err(error) => (Value::Error, Some(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srt_async_native::mem::MemNet;
    use std::sync::mpsc;

    fn start(net: &MemNet) -> (
        mpsc::Sender<Envelope>,
        tokio::sync::mpsc::UnboundedReceiver<Reply>,
        Arc<AtomicBool>,
    ) {
        let (request_tx, request_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = tokio::sync::mpsc::unbounded_channel();
        let disposed = Arc::new(AtomicBool::new(false));
        spawn_runner(
            Box::new(net.api()),
            request_rx,
            reply_tx,
            disposed.clone(),
        );
        (request_tx, reply_rx, disposed)
    }

    #[test]
    fn test_replies_in_request_order() {
        let net = MemNet::new();
        let (tx, mut rx, _disposed) = start(&net);

        tx.send(Envelope::new(Request::CreateSocket { sender: false }))
            .unwrap();
        tx.send(Envelope::new(Request::EpollCreate)).unwrap();
        tx.send(Envelope::new(Request::SetLogLevel { level: 5 }))
            .unwrap();
        drop(tx);

        let first = rx.blocking_recv().unwrap();
        assert_eq!(first.method, "create_socket");
        assert!(matches!(first.value, Value::Fd(_)));

        let second = rx.blocking_recv().unwrap();
        assert_eq!(second.method, "epoll_create");

        let third = rx.blocking_recv().unwrap();
        assert_eq!(third.method, "set_log_level");
        assert_eq!(third.value, Value::Unit);

        // Channel closed, runner exited.
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn test_native_failure_becomes_error_reply() {
        let net = MemNet::new();
        let (tx, mut rx, _disposed) = start(&net);

        tx.send(Envelope::new(Request::Listen { fd: 99, backlog: 1 }))
            .unwrap();

        let reply = rx.blocking_recv().unwrap();
        assert_eq!(reply.value, Value::Error);
        assert!(reply.error.is_some());
    }

    #[test]
    fn test_disposed_flag_discards_queued_requests() {
        let net = MemNet::new();
        let (tx, mut rx, disposed) = start(&net);

        disposed.store(true, Ordering::Release);
        tx.send(Envelope::new(Request::EpollCreate)).unwrap();

        // The runner sees the flag before dispatching and exits without
        // replying.
        assert!(rx.blocking_recv().is_none());
    }
}
