//! Chunked stream I/O
//!
//! SRT's message API moves at most one payload MTU (conventionally 1316
//! bytes) per write. These helpers translate between that constraint and
//! arbitrary-sized application buffers: a pacing writer that slices and
//! submits without monopolizing the host runtime, and an aggregating
//! reader that accumulates messages up to a target size.

pub mod chunk;

pub use chunk::{split_mtu, ChunkError, ChunkIo, Pacing};
