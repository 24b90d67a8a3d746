//! Asynchronous core: task runner and facade
//!
//! The native SRT API blocks. This crate turns it into a non-blocking,
//! future-returning API without ever stalling the host runtime: every
//! facade owns one dedicated worker thread (the task runner) that executes
//! native calls strictly in submission order, and the facade pairs each
//! reply with the oldest pending completion.

pub mod envelope;
pub mod facade;
pub mod runner;

pub use envelope::{Envelope, Outcome, ReadResult, Reply, Request, Value};
pub use facade::{AsyncSrt, FacadeError, PendingReply};
