//! Native SRT binding layer
//!
//! This crate is the synchronous floor of the stack: a one-call-per-method
//! facade over the SRT transport library, plus the enumerations (socket
//! options, socket states, epoll flags) and error descriptors the higher
//! layers speak in.
//!
//! Two backends implement the [`SrtApi`] trait: [`sys::LibSrt`] binds the
//! installed native library (cargo feature `libsrt`), and [`mem::MemNet`]
//! provides an in-process loopback engine used by the test suites and for
//! offline development.

pub mod api;
pub mod error;
pub mod mem;
pub mod options;
#[cfg(feature = "libsrt")]
pub mod sys;

pub use api::{
    ApiResult, EpollEvent, SockState, SrtApi, SrtStats, EPOLL_ERR, EPOLL_IN, EPOLL_OUT, SRT_ERROR,
};
pub use error::NativeError;
pub use options::{OptValue, SockOpt};

/// Conventional SRT payload MTU in message-API mode.
pub const DEFAULT_PAYLOAD_SIZE: usize = 1316;
