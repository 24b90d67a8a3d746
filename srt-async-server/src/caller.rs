//! Connect-side socket owner
//!
//! Same lifecycle as the server, with connect instead of listen: create a
//! socket, optionally apply options, open towards a remote listener, then
//! read and write on the established connection.

use crate::config::CallerConfig;
use crate::events::{ObserverId, Observers};
use crate::owner::{check, OwnerState, ServerError, SocketCore};
use bytes::Bytes;
use parking_lot::Mutex;
use srt_async_core::{AsyncSrt, Outcome, ReadResult};
use srt_async_io::ChunkIo;
use srt_async_native::{OptValue, SockOpt, SrtStats};
use std::sync::Arc;

/// Caller lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerEvent {
    Created,
    Opened,
    Disposed,
}

struct CallerInner {
    config: CallerConfig,
    core: SocketCore,
    observers: Mutex<Observers<CallerEvent>>,
}

/// SRT caller: connects to a remote listener.
#[derive(Clone)]
pub struct SrtCaller {
    inner: Arc<CallerInner>,
}

impl SrtCaller {
    pub fn new(config: CallerConfig, facade: AsyncSrt) -> Self {
        if let Some(timeout) = config.call_timeout() {
            facade.set_call_timeout(Some(timeout));
        }
        SrtCaller {
            inner: Arc::new(CallerInner {
                config,
                core: SocketCore::new(facade),
                observers: Mutex::new(Observers::new()),
            }),
        }
    }

    pub fn on(&self, observer: impl FnMut(&CallerEvent) + Send + 'static) -> ObserverId {
        self.inner.observers.lock().subscribe(observer)
    }

    pub fn off(&self, id: ObserverId) -> bool {
        self.inner.observers.lock().unsubscribe(id)
    }

    fn emit(&self, event: &CallerEvent) {
        self.inner.observers.lock().emit(event);
    }

    pub fn state(&self) -> OwnerState {
        self.inner.core.state()
    }

    pub fn fd(&self) -> Option<i32> {
        self.inner.core.fd()
    }

    pub async fn create(&self) -> Result<i32, ServerError> {
        let fd = self.inner.core.create(true).await?;
        self.emit(&CallerEvent::Created);
        Ok(fd)
    }

    pub async fn set_socket_flags(
        &self,
        opts: &[SockOpt],
        values: &[OptValue],
    ) -> Result<Vec<Outcome<()>>, ServerError> {
        self.inner.core.set_socket_flags(opts, values).await
    }

    /// Connect to the configured remote listener.
    pub async fn open(&self) -> Result<(), ServerError> {
        let config = &self.inner.config;
        if config.port == 0 {
            return Err(ServerError::InvalidPort);
        }
        self.inner.core.expect_state(OwnerState::Created)?;
        let facade = self.inner.core.facade()?;
        let fd = self
            .inner
            .core
            .fd()
            .ok_or(ServerError::InvalidState(OwnerState::Fresh))?;

        check(
            facade.connect(fd, &config.host, config.port).await?,
            &facade,
            "connect",
        )?;
        self.inner.core.mark_open()?;
        tracing::debug!(fd, host = %config.host, port = config.port, "caller connected");
        self.emit(&CallerEvent::Opened);
        Ok(())
    }

    fn open_endpoint(&self) -> Result<(AsyncSrt, i32), ServerError> {
        self.inner.core.expect_state(OwnerState::Open)?;
        let facade = self.inner.core.facade()?;
        let fd = self
            .inner
            .core
            .fd()
            .ok_or(ServerError::InvalidState(OwnerState::Fresh))?;
        Ok((facade, fd))
    }

    pub async fn read(&self, max_bytes: usize) -> Result<ReadResult, ServerError> {
        let (facade, fd) = self.open_endpoint()?;
        Ok(facade.read(fd, max_bytes).await?)
    }

    /// Write one message; the payload is moved away from the caller.
    pub async fn write(&self, payload: Bytes) -> Result<Outcome<usize>, ServerError> {
        let (facade, fd) = self.open_endpoint()?;
        Ok(facade.write(fd, payload).await?)
    }

    pub async fn stats(&self, clear: bool) -> Result<Outcome<SrtStats>, ServerError> {
        let (facade, fd) = self.open_endpoint()?;
        Ok(facade.stats(fd, clear).await?)
    }

    /// Chunked reader/writer bound to this caller's socket.
    pub fn chunk_io(&self) -> Result<ChunkIo, ServerError> {
        let (facade, fd) = self.open_endpoint()?;
        Ok(ChunkIo::new(facade, fd))
    }

    /// Close the socket, dispose the facade, emit `Disposed`, detach
    /// observers. Idempotent.
    pub async fn dispose(&self) {
        if !self.inner.core.dispose().await {
            return;
        }
        self.emit(&CallerEvent::Disposed);
        self.inner.observers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srt_async_native::mem::MemNet;
    use srt_async_native::SrtApi;

    #[tokio::test]
    async fn test_open_without_listener_is_protocol_error() {
        let net = MemNet::new();
        let caller = SrtCaller::new(
            CallerConfig::new("127.0.0.1", 9500),
            AsyncSrt::spawn(Box::new(net.api())),
        );
        caller.create().await.unwrap();
        assert!(matches!(
            caller.open().await,
            Err(ServerError::Native(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_and_write() {
        let net = MemNet::new();

        // Listener wired up directly against the engine.
        let mut listener_api = net.api();
        let listener = listener_api.create_socket(false).unwrap();
        listener_api.bind(listener, "127.0.0.1", 9501).unwrap();
        listener_api.listen(listener, 16).unwrap();

        let caller = SrtCaller::new(
            CallerConfig::new("127.0.0.1", 9501),
            AsyncSrt::spawn(Box::new(net.api())),
        );

        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        caller.on(move |event| sink.lock().push(*event));

        caller.create().await.unwrap();
        caller.open().await.unwrap();
        assert_eq!(caller.state(), OwnerState::Open);

        let sent = caller
            .write(Bytes::from_static(b"from the caller"))
            .await
            .unwrap()
            .value()
            .unwrap();
        assert_eq!(sent, 15);

        let accepted = listener_api.accept(listener).unwrap();
        let received = listener_api.read(accepted, 1316).unwrap().unwrap();
        assert_eq!(&received[..], b"from the caller");

        caller.dispose().await;
        assert_eq!(
            log.lock().as_slice(),
            &[CallerEvent::Created, CallerEvent::Opened, CallerEvent::Disposed]
        );
    }

    #[tokio::test]
    async fn test_io_requires_open() {
        let net = MemNet::new();
        let caller = SrtCaller::new(
            CallerConfig::new("127.0.0.1", 9502),
            AsyncSrt::spawn(Box::new(net.api())),
        );
        caller.create().await.unwrap();
        assert!(matches!(
            caller.read(1316).await,
            Err(ServerError::InvalidState(OwnerState::Created))
        ));
        assert!(caller.chunk_io().is_err());
    }
}
