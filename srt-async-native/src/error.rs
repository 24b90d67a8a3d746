//! Native error descriptors
//!
//! SRT reports failures through a sentinel return value plus a separate
//! error channel. `NativeError` carries what that channel yields: the
//! numeric error code and its human-readable description.

use thiserror::Error;

/// Error codes mirrored from the native `SRT_ERRNO` enumeration.
///
/// Only the codes the wrapper itself needs to raise or recognize are named;
/// any other native code still travels through [`NativeError`] untouched.
pub mod codes {
    /// General connection setup failure.
    pub const ECONNSETUP: i32 = 1000;
    /// Connection was established and then broken.
    pub const ECONNLOST: i32 = 2001;
    /// Operation requires a connected socket.
    pub const ENOCONN: i32 = 2002;
    /// Invalid socket identifier.
    pub const EINVSOCK: i32 = 5004;
    /// Socket is not in listening state.
    pub const ENOLISTEN: i32 = 5006;
    /// Message larger than the configured payload size.
    pub const ELARGEMSG: i32 = 5012;
    /// Invalid epoll identifier.
    pub const EINVPOLLID: i32 = 5013;
    /// Non-blocking send would block.
    pub const EASYNCSND: i32 = 6001;
    /// Non-blocking receive has no data.
    pub const EASYNCRCV: i32 = 6002;
}

/// Error descriptor retrieved from the native error channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("SRT error {code}: {message}")]
pub struct NativeError {
    /// Native `SRT_ERRNO` value.
    pub code: i32,
    /// Description from `srt_getlasterror_str` (or the engine equivalent).
    pub message: String,
}

impl NativeError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        NativeError {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for the invalid-socket descriptor.
    pub fn invalid_socket(fd: i32) -> Self {
        NativeError::new(codes::EINVSOCK, format!("invalid socket id {fd}"))
    }

    /// Shorthand for the not-connected descriptor.
    pub fn not_connected(fd: i32) -> Self {
        NativeError::new(codes::ENOCONN, format!("socket {fd} is not connected"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NativeError::new(codes::ELARGEMSG, "message too large");
        assert_eq!(err.to_string(), "SRT error 5012: message too large");
    }

    #[test]
    fn test_helpers_carry_codes() {
        assert_eq!(NativeError::invalid_socket(7).code, codes::EINVSOCK);
        assert_eq!(NativeError::not_connected(7).code, codes::ENOCONN);
    }
}
