// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message transport between workers and the coordinator
//!
//! The coordinator and the client proxy only see the [`Transport`] trait, so
//! the same code runs over the in-process [`LocalHub`] and over the daemon's
//! Unix socket.

mod local;
mod subscription;

pub use local::{LocalHub, LocalTransport};
pub use subscription::{SubscriberId, Subscription, TopicPattern};

use crate::id::WorkerId;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// A message as received by a subscriber
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    /// Endpoint that sent the message
    pub origin: WorkerId,
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Sender side of a subscription
pub type Outbox = mpsc::UnboundedSender<Delivery>;
/// Receiver side of a subscription
pub type Inbox = mpsc::UnboundedReceiver<Delivery>;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown target: {0}")]
    UnknownTarget(WorkerId),

    #[error("endpoint already connected: {0}")]
    AlreadyConnected(WorkerId),

    #[error("transport closed")]
    Closed,

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Message passing between one endpoint and its peers
pub trait Transport: Send + Sync + 'static {
    /// Identity of this endpoint
    fn id(&self) -> &WorkerId;

    /// Send to one peer
    fn send(
        &self,
        target: &WorkerId,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<(), TransportError>;

    /// Send to every peer
    fn broadcast(&self, topic: &str, payload: serde_json::Value) -> Result<(), TransportError>;

    /// Receive messages addressed to this endpoint whose topic matches
    fn subscribe(&self, subscription: Subscription) -> Inbox;

    fn unsubscribe(&self, id: &SubscriberId);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn id(&self) -> &WorkerId {
        (**self).id()
    }

    fn send(
        &self,
        target: &WorkerId,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        (**self).send(target, topic, payload)
    }

    fn broadcast(&self, topic: &str, payload: serde_json::Value) -> Result<(), TransportError> {
        (**self).broadcast(topic, payload)
    }

    fn subscribe(&self, subscription: Subscription) -> Inbox {
        (**self).subscribe(subscription)
    }

    fn unsubscribe(&self, id: &SubscriberId) {
        (**self).unsubscribe(id)
    }
}
