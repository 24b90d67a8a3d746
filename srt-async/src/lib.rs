//! SRT Async - asynchronous SRT transport wrapper
//!
//! Event-driven server, caller and chunked I/O on top of the blocking
//! native SRT API, offloaded to per-facade worker threads.

pub use srt_async_core as task;
pub use srt_async_io as io;
pub use srt_async_native as native;
pub use srt_async_server as server;

// Re-export commonly used types
pub use srt_async_core::{AsyncSrt, FacadeError, Outcome, ReadResult};
pub use srt_async_io::{ChunkIo, Pacing};
pub use srt_async_native::{NativeError, OptValue, SockOpt, SockState, DEFAULT_PAYLOAD_SIZE};
pub use srt_async_server::{
    CallerConfig, Connection, ServerConfig, ServerError, SrtCaller, SrtServer,
};
