// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process transport routing messages between endpoints

use super::subscription::{SubscriberId, Subscription};
use super::{Delivery, Inbox, Outbox, Transport, TransportError};
use crate::id::WorkerId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, trace};

type Endpoints = HashMap<WorkerId, Vec<(Subscription, Outbox)>>;

/// Routes messages between endpoints living in one process
///
/// Each endpoint only receives messages addressed to it (or broadcast) whose
/// topic matches one of its subscriptions.
#[derive(Default)]
pub struct LocalHub {
    endpoints: Arc<RwLock<Endpoints>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint and return its transport handle
    pub fn endpoint(&self, id: impl Into<WorkerId>) -> LocalTransport {
        let id = id.into();
        self.endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id.clone())
            .or_default();
        LocalTransport {
            id,
            hub: self.clone(),
        }
    }

    /// Register an endpoint unless one with the same id already exists
    ///
    /// The check and the registration happen under one write lock, so two
    /// racing callers cannot both claim the id.
    pub fn try_endpoint(&self, id: impl Into<WorkerId>) -> Result<LocalTransport, TransportError> {
        use std::collections::hash_map::Entry;

        let id = id.into();
        match self
            .endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id.clone())
        {
            Entry::Occupied(_) => return Err(TransportError::AlreadyConnected(id)),
            Entry::Vacant(slot) => {
                slot.insert(Vec::new());
            }
        }
        Ok(LocalTransport {
            id,
            hub: self.clone(),
        })
    }

    /// Remove an endpoint and announce its departure on `clean_topic`
    ///
    /// Peers receive an empty payload whose origin is the departed worker,
    /// which is what a process supervisor does when a worker exits.
    pub fn disconnect(&self, worker: &WorkerId, clean_topic: &str) -> Result<(), TransportError> {
        let removed = self
            .endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(worker);
        if removed.is_none() {
            return Err(TransportError::UnknownTarget(worker.clone()));
        }
        debug!(worker = %worker, "endpoint disconnected");
        self.deliver(worker, None, clean_topic, serde_json::json!({}));
        Ok(())
    }

    pub fn is_connected(&self, worker: &WorkerId) -> bool {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(worker)
    }

    /// Get count of registered endpoints
    pub fn endpoint_count(&self) -> usize {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deliver to `target`, or to every endpoint but the origin when `None`
    ///
    /// Returns the number of subscribers reached.
    fn deliver(
        &self,
        origin: &WorkerId,
        target: Option<&WorkerId>,
        topic: &str,
        payload: serde_json::Value,
    ) -> usize {
        let endpoints = self.endpoints.read().unwrap_or_else(|e| e.into_inner());
        let mut reached = 0;

        for (id, subs) in endpoints.iter() {
            let addressed = match target {
                Some(target) => id == target,
                None => id != origin,
            };
            if !addressed {
                continue;
            }
            for (subscription, tx) in subs {
                if subscription.matches(topic)
                    && tx
                        .send(Delivery {
                            origin: origin.clone(),
                            topic: topic.to_string(),
                            payload: payload.clone(),
                        })
                        .is_ok()
                {
                    reached += 1;
                }
            }
        }

        trace!(origin = %origin, topic, reached, "delivered");
        reached
    }
}

impl Clone for LocalHub {
    fn clone(&self) -> Self {
        Self {
            endpoints: Arc::clone(&self.endpoints),
        }
    }
}

/// One endpoint of a [`LocalHub`]
#[derive(Clone)]
pub struct LocalTransport {
    id: WorkerId,
    hub: LocalHub,
}

impl LocalTransport {
    pub fn hub(&self) -> &LocalHub {
        &self.hub
    }
}

impl Transport for LocalTransport {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    fn send(
        &self,
        target: &WorkerId,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        if !self.hub.is_connected(target) {
            return Err(TransportError::UnknownTarget(target.clone()));
        }
        self.hub.deliver(&self.id, Some(target), topic, payload);
        Ok(())
    }

    fn broadcast(&self, topic: &str, payload: serde_json::Value) -> Result<(), TransportError> {
        self.hub.deliver(&self.id, None, topic, payload);
        Ok(())
    }

    fn subscribe(&self, subscription: Subscription) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut endpoints = self
            .hub
            .endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let subs = endpoints.entry(self.id.clone()).or_default();
        subs.retain(|(s, _)| s.id != subscription.id);
        subs.push((subscription, tx));
        rx
    }

    fn unsubscribe(&self, id: &SubscriberId) {
        let mut endpoints = self
            .hub
            .endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = endpoints.get_mut(&self.id) {
            subs.retain(|(s, _)| &s.id != id);
        }
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
