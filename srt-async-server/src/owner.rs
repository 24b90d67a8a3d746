//! Socket ownership lifecycle
//!
//! Shared core for objects that own exactly one SRT socket: the server
//! (listener) and the caller (connector). The lifecycle only moves forward:
//! `Fresh → Created → Open → Disposed`, and disposed is terminal.

use parking_lot::Mutex;
use srt_async_core::{AsyncSrt, FacadeError, Outcome, Request, Value};
use srt_async_native::{NativeError, OptValue, SockOpt};
use thiserror::Error;

/// Lifecycle state of a socket owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerState {
    /// No socket yet.
    Fresh,
    /// Socket created, options may be applied.
    Created,
    /// Listening or connected.
    Open,
    /// Terminal.
    Disposed,
}

/// Lifecycle and transport errors raised by the server-side objects.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("operation not allowed in state {0:?}")]
    InvalidState(OwnerState),

    #[error("listener port must be non-zero")]
    InvalidPort,

    #[error("options and values arrays differ in length")]
    OptionArity,

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("facade error: {0}")]
    Facade(#[from] FacadeError),

    #[error("native call failed: {0}")]
    Native(NativeError),

    #[error("{0} failed without an error descriptor")]
    Failed(&'static str),
}

/// Build the error for a protocol-level failure, pulling the descriptor
/// out of the facade's error slot.
pub(crate) fn native_failure(facade: &AsyncSrt, op: &'static str) -> ServerError {
    match facade.last_error() {
        Some(error) => ServerError::Native(error),
        None => ServerError::Failed(op),
    }
}

/// Checks a unit outcome, mapping the `ERROR` sentinel to a `ServerError`.
pub(crate) fn check(
    outcome: Outcome<()>,
    facade: &AsyncSrt,
    op: &'static str,
) -> Result<(), ServerError> {
    match outcome {
        Outcome::Value(()) => Ok(()),
        Outcome::Error => Err(native_failure(facade, op)),
    }
}

/// State, facade and fd of one owned socket.
pub(crate) struct SocketCore {
    facade: Mutex<Option<AsyncSrt>>,
    fd: Mutex<Option<i32>>,
    state: Mutex<OwnerState>,
}

impl SocketCore {
    pub(crate) fn new(facade: AsyncSrt) -> Self {
        SocketCore {
            facade: Mutex::new(Some(facade)),
            fd: Mutex::new(None),
            state: Mutex::new(OwnerState::Fresh),
        }
    }

    pub(crate) fn state(&self) -> OwnerState {
        *self.state.lock()
    }

    pub(crate) fn fd(&self) -> Option<i32> {
        *self.fd.lock()
    }

    pub(crate) fn facade(&self) -> Result<AsyncSrt, ServerError> {
        self.facade
            .lock()
            .clone()
            .ok_or(ServerError::InvalidState(OwnerState::Disposed))
    }

    pub(crate) fn expect_state(&self, expected: OwnerState) -> Result<(), ServerError> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(ServerError::InvalidState(state))
        }
    }

    /// Ask the facade for a socket. Requires `Fresh`; calling twice is a
    /// caller error.
    pub(crate) async fn create(&self, sender: bool) -> Result<i32, ServerError> {
        self.expect_state(OwnerState::Fresh)?;
        let facade = self.facade()?;
        let fd = facade
            .create_socket(sender)
            .await?
            .value()
            .ok_or_else(|| native_failure(&facade, "create_socket"))?;
        *self.fd.lock() = Some(fd);
        *self.state.lock() = OwnerState::Created;
        tracing::debug!(fd, "socket created");
        Ok(fd)
    }

    /// Apply a batch of socket options. All requests are submitted before
    /// any reply is awaited; the per-option outcomes come back in order.
    /// Permitted only between create and open.
    pub(crate) async fn set_socket_flags(
        &self,
        opts: &[SockOpt],
        values: &[OptValue],
    ) -> Result<Vec<Outcome<()>>, ServerError> {
        if opts.len() != values.len() {
            return Err(ServerError::OptionArity);
        }
        self.expect_state(OwnerState::Created)?;
        let facade = self.facade()?;
        let fd = self.fd().ok_or(ServerError::InvalidState(OwnerState::Fresh))?;

        let mut submitted = Vec::with_capacity(opts.len());
        for (opt, value) in opts.iter().zip(values.iter()) {
            submitted.push(facade.submit(Request::SetSockOpt {
                fd,
                opt: *opt,
                value: value.clone(),
            })?);
        }

        let mut outcomes = Vec::with_capacity(submitted.len());
        for pending in submitted {
            let reply = pending.recv().await?;
            outcomes.push(match reply.value {
                Value::Unit => Outcome::Value(()),
                Value::Error => Outcome::Error,
                _ => return Err(FacadeError::UnexpectedReply("set_sock_opt").into()),
            });
        }
        Ok(outcomes)
    }

    /// Transition `Created → Open` once the subclass-specific opening
    /// sequence succeeded.
    pub(crate) fn mark_open(&self) -> Result<(), ServerError> {
        self.expect_state(OwnerState::Created)?;
        *self.state.lock() = OwnerState::Open;
        Ok(())
    }

    /// Close the socket if present, then dispose the facade. Returns false
    /// when the owner was already disposed.
    pub(crate) async fn dispose(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == OwnerState::Disposed {
                return false;
            }
            *state = OwnerState::Disposed;
        }
        let facade = self.facade.lock().take();
        let fd = self.fd.lock().take();
        if let Some(facade) = facade {
            if let Some(fd) = fd {
                if let Err(error) = facade.close(fd).await {
                    tracing::debug!(fd, %error, "close during dispose failed");
                }
            }
            facade.dispose();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srt_async_native::mem::MemNet;

    fn facade() -> AsyncSrt {
        AsyncSrt::spawn(Box::new(MemNet::new().api()))
    }

    #[tokio::test]
    async fn test_lifecycle_forward_only() {
        let core = SocketCore::new(facade());
        assert_eq!(core.state(), OwnerState::Fresh);

        core.create(false).await.unwrap();
        assert_eq!(core.state(), OwnerState::Created);

        // Double create is a caller error.
        assert!(matches!(
            core.create(false).await,
            Err(ServerError::InvalidState(OwnerState::Created))
        ));

        core.mark_open().unwrap();
        assert_eq!(core.state(), OwnerState::Open);
        assert!(matches!(
            core.mark_open(),
            Err(ServerError::InvalidState(OwnerState::Open))
        ));

        assert!(core.dispose().await);
        assert_eq!(core.state(), OwnerState::Disposed);
        assert!(!core.dispose().await);
    }

    #[tokio::test]
    async fn test_flags_only_between_create_and_open() {
        let core = SocketCore::new(facade());
        let opts = [SockOpt::MessageApi];
        let vals = [OptValue::Bool(true)];

        assert!(matches!(
            core.set_socket_flags(&opts, &vals).await,
            Err(ServerError::InvalidState(OwnerState::Fresh))
        ));

        core.create(false).await.unwrap();
        let outcomes = core.set_socket_flags(&opts, &vals).await.unwrap();
        assert_eq!(outcomes, vec![Outcome::Value(())]);

        core.mark_open().unwrap();
        assert!(matches!(
            core.set_socket_flags(&opts, &vals).await,
            Err(ServerError::InvalidState(OwnerState::Open))
        ));
    }

    #[tokio::test]
    async fn test_flag_arity_mismatch() {
        let core = SocketCore::new(facade());
        core.create(false).await.unwrap();
        let result = core
            .set_socket_flags(&[SockOpt::MessageApi, SockOpt::PayloadSize], &[OptValue::Bool(true)])
            .await;
        assert!(matches!(result, Err(ServerError::OptionArity)));
    }

    #[tokio::test]
    async fn test_disposed_rejects_everything() {
        let core = SocketCore::new(facade());
        core.create(false).await.unwrap();
        core.dispose().await;

        assert!(matches!(
            core.create(false).await,
            Err(ServerError::InvalidState(OwnerState::Disposed))
        ));
        assert!(core.facade().is_err());
    }
}
