//! Accepted-connection handle
//!
//! Wraps one accepted fd. Reads and writes delegate to the server's shared
//! facade; readiness is signalled by the server loop through
//! [`Connection::notify_data`]. Closing is effective at most once and emits
//! `Closing` synchronously before the native close starts, then `Closed`
//! with the close result.

use crate::events::{ObserverId, Observers};
use crate::owner::ServerError;
use bytes::Bytes;
use parking_lot::Mutex;
use srt_async_core::{AsyncSrt, Outcome, ReadResult};
use srt_async_io::ChunkIo;
use srt_async_native::{NativeError, SrtStats};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-connection events, fired synchronously in observer insertion order.
#[derive(Debug)]
pub enum ConnEvent {
    /// The socket has data (or a state change) pending. The first one also
    /// latches [`Connection::first_data_observed`].
    Data,
    /// Close was requested; emitted before the native close begins.
    Closing,
    /// The native close finished; carries the error descriptor when it
    /// failed. The fd is still readable from the handle at this point.
    Closed(Option<NativeError>),
}

struct ConnInner {
    fd: i32,
    facade: Mutex<Option<AsyncSrt>>,
    first_data: AtomicBool,
    close_started: AtomicBool,
    observers: Mutex<Observers<ConnEvent>>,
}

/// Handle to one accepted SRT connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("fd", &self.inner.fd)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(fd: i32, facade: AsyncSrt) -> Self {
        Connection {
            inner: Arc::new(ConnInner {
                fd,
                facade: Mutex::new(Some(facade)),
                first_data: AtomicBool::new(false),
                close_started: AtomicBool::new(false),
                observers: Mutex::new(Observers::new()),
            }),
        }
    }

    /// The accepted socket's fd. Stays readable for the whole life of the
    /// handle, including from `Closed` observers.
    pub fn fd(&self) -> i32 {
        self.inner.fd
    }

    pub fn is_closed(&self) -> bool {
        self.inner.facade.lock().is_none()
    }

    /// True once the first data event has been seen.
    pub fn first_data_observed(&self) -> bool {
        self.inner.first_data.load(Ordering::Acquire)
    }

    pub fn on(&self, observer: impl FnMut(&ConnEvent) + Send + 'static) -> ObserverId {
        self.inner.observers.lock().subscribe(observer)
    }

    pub fn off(&self, id: ObserverId) -> bool {
        self.inner.observers.lock().unsubscribe(id)
    }

    fn emit(&self, event: &ConnEvent) {
        self.inner.observers.lock().emit(event);
    }

    fn facade(&self) -> Result<AsyncSrt, ServerError> {
        self.inner
            .facade
            .lock()
            .clone()
            .ok_or(ServerError::ConnectionClosed)
    }

    /// Mark data readiness and fire the `Data` event. Called by the server
    /// loop; the first-data latch is set before observers run.
    pub(crate) fn notify_data(&self) {
        self.inner.first_data.store(true, Ordering::Release);
        self.emit(&ConnEvent::Data);
    }

    pub async fn read(&self, max_bytes: usize) -> Result<ReadResult, ServerError> {
        Ok(self.facade()?.read(self.inner.fd, max_bytes).await?)
    }

    /// Write one message; the payload is moved away from the caller.
    pub async fn write(&self, payload: Bytes) -> Result<Outcome<usize>, ServerError> {
        Ok(self.facade()?.write(self.inner.fd, payload).await?)
    }

    pub async fn stats(&self, clear: bool) -> Result<Outcome<SrtStats>, ServerError> {
        Ok(self.facade()?.stats(self.inner.fd, clear).await?)
    }

    /// Chunked reader/writer bound to this connection.
    pub fn chunk_io(&self) -> Result<ChunkIo, ServerError> {
        Ok(ChunkIo::new(self.facade()?, self.inner.fd))
    }

    /// Close the connection. Only the first invocation has any effect;
    /// later calls return Ok without emitting anything. A failing native
    /// close is reported to the caller, but the handle still transitions
    /// to closed and `Closed` still fires.
    pub async fn close(&self) -> Result<(), ServerError> {
        if self.inner.close_started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.emit(&ConnEvent::Closing);

        let facade = self.inner.facade.lock().clone();
        let Some(facade) = facade else {
            self.emit(&ConnEvent::Closed(None));
            self.inner.observers.lock().clear();
            return Ok(());
        };

        let result = facade.close(self.inner.fd).await;
        *self.inner.facade.lock() = None;

        let (descriptor, outcome) = match result {
            Ok(Outcome::Value(())) => (None, Ok(())),
            Ok(Outcome::Error) => {
                let error = facade.last_error();
                let outcome = Err(match error.clone() {
                    Some(error) => ServerError::Native(error),
                    None => ServerError::Failed("close"),
                });
                (error, outcome)
            }
            Err(error) => (None, Err(ServerError::Facade(error))),
        };
        self.emit(&ConnEvent::Closed(descriptor));
        self.inner.observers.lock().clear();
        outcome
    }
}
