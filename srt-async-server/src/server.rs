//! Epoll-driven server loop
//!
//! The listening-socket owner. Opening runs the bind → listen →
//! epoll-create sequence, registers the listener for readiness, and starts
//! the poll task. The poll task waits on the native epoll through the
//! facade, then dispatches each readiness record: listener events become
//! accepts, defunct-state events become disconnections, everything else is
//! data readiness on a known connection.

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::events::{ObserverId, Observers};
use crate::owner::{check, native_failure, OwnerState, ServerError, SocketCore};
use parking_lot::Mutex;
use srt_async_core::{AsyncSrt, Outcome};
use srt_async_native::{EpollEvent, SockState, EPOLL_ERR, EPOLL_IN};
use std::collections::HashMap;
use std::sync::Arc;

/// Server lifecycle and connection events.
#[derive(Debug)]
pub enum ServerEvent {
    Created,
    Opened,
    /// A peer was accepted and inserted into the connection table.
    Connection(Connection),
    /// A connection left the table; carries its fd.
    Disconnection(i32),
    Disposed,
}

struct ServerInner {
    config: ServerConfig,
    core: SocketCore,
    epid: Mutex<Option<i32>>,
    connections: Mutex<HashMap<i32, Connection>>,
    observers: Mutex<Observers<ServerEvent>>,
}

/// SRT listener with an epoll-driven dispatch loop.
#[derive(Clone)]
pub struct SrtServer {
    inner: Arc<ServerInner>,
}

impl SrtServer {
    /// Wrap a facade as a server. The facade must be dedicated to this
    /// server: a blocking accept on a shared facade would stall every other
    /// caller behind it.
    pub fn new(config: ServerConfig, facade: AsyncSrt) -> Self {
        if let Some(timeout) = config.call_timeout() {
            facade.set_call_timeout(Some(timeout));
        }
        SrtServer {
            inner: Arc::new(ServerInner {
                config,
                core: SocketCore::new(facade),
                epid: Mutex::new(None),
                connections: Mutex::new(HashMap::new()),
                observers: Mutex::new(Observers::new()),
            }),
        }
    }

    pub fn on(&self, observer: impl FnMut(&ServerEvent) + Send + 'static) -> ObserverId {
        self.inner.observers.lock().subscribe(observer)
    }

    pub fn off(&self, id: ObserverId) -> bool {
        self.inner.observers.lock().unsubscribe(id)
    }

    fn emit(&self, event: &ServerEvent) {
        self.inner.observers.lock().emit(event);
    }

    pub fn state(&self) -> OwnerState {
        self.inner.core.state()
    }

    /// The listener fd, once created.
    pub fn fd(&self) -> Option<i32> {
        self.inner.core.fd()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    pub fn connection(&self, fd: i32) -> Option<Connection> {
        self.inner.connections.lock().get(&fd).cloned()
    }

    /// Ask the facade for the listener socket.
    pub async fn create(&self) -> Result<i32, ServerError> {
        let fd = self.inner.core.create(false).await?;
        self.emit(&ServerEvent::Created);
        Ok(fd)
    }

    /// Apply a batch of socket options; allowed between create and open.
    /// All options are submitted before any result is awaited.
    pub async fn set_socket_flags(
        &self,
        opts: &[srt_async_native::SockOpt],
        values: &[srt_async_native::OptValue],
    ) -> Result<Vec<Outcome<()>>, ServerError> {
        self.inner.core.set_socket_flags(opts, values).await
    }

    /// Bind, listen, create the epoll set, and start polling.
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

        if let Some(level) = config.log_level {
            // Process-wide setting; a failure is not fatal to the open.
            if let Ok(Outcome::Error) = facade.set_log_level(level).await {
                tracing::warn!(level, "native log level rejected");
            }
        }

        check(facade.bind(fd, &config.address, config.port).await?, &facade, "bind")?;
        check(facade.listen(fd, config.backlog).await?, &facade, "listen")?;
        let epid = facade
            .epoll_create()
            .await?
            .value()
            .ok_or_else(|| native_failure(&facade, "epoll_create"))?;
        *self.inner.epid.lock() = Some(epid);

        self.inner.core.mark_open()?;
        tracing::debug!(fd, port = config.port, "server listening");
        self.emit(&ServerEvent::Opened);

        check(
            facade.epoll_add_usock(epid, fd, EPOLL_IN | EPOLL_ERR).await?,
            &facade,
            "epoll_add_usock",
        )?;

        let server = self.clone();
        tokio::spawn(async move { server.poll_loop().await });
        Ok(())
    }

    /// Poll the epoll set until the server is disposed, dispatching each
    /// batch of readiness records in array order.
    async fn poll_loop(self) {
        let period = self.inner.config.polling_period();
        let uwait_timeout = self.inner.config.uwait_timeout_ms;
        loop {
            if self.inner.core.state() == OwnerState::Disposed {
                break;
            }
            let Ok(facade) = self.inner.core.facade() else {
                break;
            };
            let Some(epid) = *self.inner.epid.lock() else {
                break;
            };

            match facade.epoll_uwait(epid, uwait_timeout).await {
                Ok(Outcome::Value(events)) => {
                    for event in events {
                        self.handle_event(&facade, epid, event).await;
                    }
                }
                Ok(Outcome::Error) => {
                    tracing::warn!(epid, error = ?facade.last_error(), "epoll_uwait failed");
                }
                // Facade disposed out from under the loop.
                Err(_) => break,
            }

            tokio::time::sleep(period).await;
        }
        tracing::debug!("server poll loop exited");
    }

    async fn handle_event(&self, facade: &AsyncSrt, epid: i32, event: EpollEvent) {
        let state = match facade.sock_state(event.fd).await {
            Ok(Outcome::Value(state)) => state,
            Ok(Outcome::Error) => SockState::NonExist,
            Err(_) => return,
        };

        if Some(event.fd) == self.inner.core.fd() && state == SockState::Listening {
            self.accept_pending(facade, epid, event.fd).await;
        } else if state.is_defunct() {
            let connection = self.inner.connections.lock().get(&event.fd).cloned();
            if let Some(connection) = connection {
                if let Err(error) = connection.close().await {
                    tracing::debug!(fd = event.fd, %error, "close on disconnect failed");
                }
            }
            self.inner.connections.lock().remove(&event.fd);
            self.emit(&ServerEvent::Disconnection(event.fd));
        } else {
            let connection = self.inner.connections.lock().get(&event.fd).cloned();
            match connection {
                Some(connection) => connection.notify_data(),
                None => {
                    tracing::warn!(fd = event.fd, flags = event.flags, "event for unknown fd")
                }
            }
        }
    }

    async fn accept_pending(&self, facade: &AsyncSrt, epid: i32, listener_fd: i32) {
        let accepted = match facade.accept(listener_fd).await {
            Ok(Outcome::Value(fd)) => fd,
            Ok(Outcome::Error) => {
                tracing::warn!(error = ?facade.last_error(), "accept failed");
                return;
            }
            Err(_) => return,
        };

        // Fire-and-forget: registering the new fd must not block the accept
        // path. A failure leaves the connection mute; it is logged, not
        // repaired.
        let registrar = facade.clone();
        tokio::spawn(async move {
            match registrar
                .epoll_add_usock(epid, accepted, EPOLL_IN | EPOLL_ERR)
                .await
            {
                Ok(Outcome::Value(())) => {}
                Ok(Outcome::Error) => {
                    tracing::error!(
                        fd = accepted,
                        error = ?registrar.last_error(),
                        "failed to register accepted socket with epoll"
                    );
                }
                Err(error) => {
                    tracing::error!(fd = accepted, %error, "failed to register accepted socket");
                }
            }
        });

        let connection = Connection::new(accepted, facade.clone());
        self.inner
            .connections
            .lock()
            .insert(accepted, connection.clone());
        tracing::debug!(fd = accepted, "connection accepted");
        self.emit(&ServerEvent::Connection(connection));
    }

    /// Close the listener, dispose the facade, emit `Disposed` and detach
    /// all observers. Idempotent; the poll task exits on its next
    /// iteration.
    pub async fn dispose(&self) {
        if !self.inner.core.dispose().await {
            return;
        }
        self.inner.connections.lock().clear();
        *self.inner.epid.lock() = None;
        self.emit(&ServerEvent::Disposed);
        self.inner.observers.lock().clear();
    }
}
