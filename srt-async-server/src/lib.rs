//! SRT server loop and connection management
//!
//! The event-driven side of the wrapper: a listening-socket owner that
//! drives the native epoll facility through its facade, accepts incoming
//! connections, routes readiness per connection, and exposes each accepted
//! peer as an observable [`Connection`]. A caller-side owner covers the
//! connect path with the same lifecycle.

pub mod caller;
pub mod config;
pub mod connection;
pub mod events;
pub mod owner;
pub mod server;

pub use caller::{CallerEvent, SrtCaller};
pub use config::{CallerConfig, ConfigError, ServerConfig, DEFAULT_CALL_TIMEOUT_MS};
pub use connection::{ConnEvent, Connection};
pub use events::{Observers, ObserverId};
pub use owner::{OwnerState, ServerError};
pub use server::{ServerEvent, SrtServer};
