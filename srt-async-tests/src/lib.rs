//! Integration test crate
//!
//! No library code; the end-to-end scenarios live under `tests/`.
