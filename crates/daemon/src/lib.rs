//! rwgate-daemon: hosts the coordinator behind a Unix socket
//!
//! Workers connect with [`SocketTransport`] and use it like any other
//! transport; the daemon cleans up after a worker whose socket closes.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod lifecycle;
pub mod protocol;
pub mod server;
pub mod socket;

pub use lifecycle::{Config, DaemonState, LifecycleError};
pub use protocol::{Frame, ProtocolError, PROTOCOL_VERSION};
pub use server::ServerError;
pub use socket::SocketTransport;
