//! rwgate-core: read/write/unlink coordination for resources shared by worker processes
//!
//! This crate provides:
//! - Pure state machines for the concurrency limiter and per-resource action queues
//! - The coordinator that owns every queue and answers worker messages
//! - The client proxy workers use to request and release access
//! - A transport trait with an in-process implementation

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod id;

pub mod coordination;
pub mod effect;
pub mod protocol;
pub mod transport;

pub mod client;
pub mod config;
pub mod coordinator;
pub mod hooks;
pub mod naming;

// Re-exports
pub use client::{AccessMode, Client, ClientError, Denied, Grant};
pub use config::{ClientConfig, ConfigError, CoordinatorConfig};
pub use coordination::{ActionQueue, Limiter, LimiterConfig, QueueInput, QueueState};
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use effect::{Effect, Event};
pub use hooks::{FilterHook, HookContext, HookPoint, Hooks, ObserverHook};
pub use id::{IdGen, RequestId, ShortIdGen, Ticket, WorkerId};
pub use protocol::{Action, CoordinatorSnapshot, ResourceMeta, Status, Topics};
pub use transport::{Delivery, LocalHub, LocalTransport, Transport, TransportError};
