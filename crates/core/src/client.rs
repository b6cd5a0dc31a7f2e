// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker-side proxy for the coordinator
//!
//! Turns request/response message pairs into callbacks and futures. Every
//! request is tracked in a local table keyed by request id until it has been
//! released or refused.

use crate::config::ClientConfig;
use crate::id::{IdGen, RequestId, ShortIdGen, WorkerId};
use crate::protocol::{
    from_payload, to_payload, Action, CleanWorker, CoordinatorSnapshot, ReleaseAction,
    RequestAction, ResourceMeta, ResponseAction, ResponseRelease, StateQuery, StateResponse,
    Status, Topics,
};
use crate::transport::{Delivery, Inbox, Subscription, Transport, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// A granted request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grant {
    pub request_id: RequestId,
    pub action: Action,
    /// Name the coordinator resolved the resource to
    pub resolved_name: Option<String>,
}

/// A request the coordinator refused
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{action} request {request_id} refused: {status}")]
pub struct Denied {
    pub request_id: RequestId,
    pub action: Action,
    pub status: Status,
    pub resolved_name: Option<String>,
}

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request id already in use: {0}")]
    DuplicateId(RequestId),

    #[error("unlink requires a resource name")]
    MissingName,

    #[error("unknown request: {0}")]
    UnknownRequest(RequestId),

    #[error("request already released: {0}")]
    AlreadyReleased(RequestId),

    #[error(transparent)]
    Denied(#[from] Denied),

    #[error("timed out waiting for {0}")]
    Timeout(RequestId),

    #[error("client closed before a response arrived")]
    Closed,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Kind of access window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    pub fn action(&self) -> Action {
        match self {
            AccessMode::Read => Action::Read,
            AccessMode::Write => Action::Write,
        }
    }
}

/// Called once with the outcome of a request
pub type GrantCallback = Box<dyn FnOnce(Result<Grant, Denied>) + Send>;
/// Called once with the status of a release
pub type ReleaseCallback = Box<dyn FnOnce(Status) + Send>;

struct Entry {
    action: Action,
    meta: ResourceMeta,
    callback: Option<GrantCallback>,
    resolved_name: Option<String>,
    /// Cleared when released before the grant arrived
    valid: bool,
    granted: bool,
}

#[derive(Default)]
struct Table {
    requests: HashMap<RequestId, Entry>,
    releases: HashMap<RequestId, VecDeque<ReleaseCallback>>,
    states: HashMap<RequestId, oneshot::Sender<CoordinatorSnapshot>>,
}

struct Shared {
    config: ClientConfig,
    topics: Topics,
    coordinator: WorkerId,
    transport: Arc<dyn Transport>,
    ids: ShortIdGen,
    table: Mutex<Table>,
}

struct Listener(JoinHandle<()>);

impl Drop for Listener {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Per-worker proxy; clones share one correlation table
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
    _listener: Arc<Listener>,
}

impl Client {
    /// Create a client and start listening for responses
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ClientConfig, transport: impl Transport) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let topics = config.topics();
        let inbox = transport.subscribe(Subscription::topics(
            format!("{}:client:{}", config.prefix, transport.id()),
            topics.outbound(),
            "client responses",
        ));
        let shared = Arc::new(Shared {
            coordinator: config.coordinator(),
            ids: ShortIdGen::new(config.id_length),
            topics,
            transport,
            table: Mutex::new(Table::default()),
            config,
        });
        let listener = tokio::spawn(listen(Arc::clone(&shared), inbox));
        Self {
            shared,
            _listener: Arc::new(Listener(listener)),
        }
    }

    /// This worker's id
    pub fn id(&self) -> &WorkerId {
        self.shared.transport.id()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    // === Requests ===

    /// Request `action` on the resource described by `meta`
    ///
    /// With `id` unset a short random id is drawn, retrying on local
    /// collision. An explicit id already tracked by this client is refused
    /// before anything is sent.
    pub fn request(
        &self,
        action: Action,
        meta: ResourceMeta,
        id: Option<RequestId>,
        callback: impl FnOnce(Result<Grant, Denied>) + Send + 'static,
    ) -> Result<RequestId, ClientError> {
        if action == Action::Unlink && meta.name.as_deref().map_or(true, str::is_empty) {
            return Err(ClientError::MissingName);
        }

        let request_id = {
            let mut table = self.shared.lock();
            let request_id = match id {
                Some(id) if table.requests.contains_key(&id) => {
                    return Err(ClientError::DuplicateId(id))
                }
                Some(id) => id,
                None => loop {
                    let id = RequestId::new(self.shared.ids.next());
                    if !table.requests.contains_key(&id) {
                        break id;
                    }
                    trace!(id = %id, "generated request id collided");
                },
            };
            table.requests.insert(
                request_id.clone(),
                Entry {
                    action,
                    meta: meta.clone(),
                    callback: Some(Box::new(callback)),
                    resolved_name: None,
                    valid: true,
                    granted: false,
                },
            );
            request_id
        };

        let message = RequestAction {
            request_id: request_id.clone(),
            action,
            meta,
        };
        if let Err(e) = self.shared.send(&self.shared.topics.request, &message) {
            self.shared.lock().requests.remove(&request_id);
            return Err(e);
        }
        debug!(request = %request_id, action = %action, "requested");
        Ok(request_id)
    }

    /// Exclusive access
    pub fn get_lock(
        &self,
        meta: ResourceMeta,
        callback: impl FnOnce(Result<Grant, Denied>) + Send + 'static,
    ) -> Result<RequestId, ClientError> {
        self.request(Action::Write, meta, None, callback)
    }

    /// Shared or exclusive access depending on `mode`
    pub fn get_access(
        &self,
        mode: AccessMode,
        meta: ResourceMeta,
        callback: impl FnOnce(Result<Grant, Denied>) + Send + 'static,
    ) -> Result<RequestId, ClientError> {
        self.request(mode.action(), meta, None, callback)
    }

    pub fn get_read(
        &self,
        meta: ResourceMeta,
        callback: impl FnOnce(Result<Grant, Denied>) + Send + 'static,
    ) -> Result<RequestId, ClientError> {
        self.request(Action::Read, meta, None, callback)
    }

    /// Permission to delete; `meta` must name the resource
    pub fn get_unlink(
        &self,
        meta: ResourceMeta,
        callback: impl FnOnce(Result<Grant, Denied>) + Send + 'static,
    ) -> Result<RequestId, ClientError> {
        self.request(Action::Unlink, meta, None, callback)
    }

    /// One slot of the coordinator-wide limiter
    pub fn get_thread(
        &self,
        callback: impl FnOnce(Result<Grant, Denied>) + Send + 'static,
    ) -> Result<RequestId, ClientError> {
        self.request(Action::Thread, ResourceMeta::none(), None, callback)
    }

    // === Awaiting helpers ===

    /// Request `action` and wait for the grant
    ///
    /// On timeout the request is released, so a grant arriving later is
    /// handed straight back. `timeout` falls back to the configured default;
    /// with neither set this waits indefinitely.
    pub async fn promised(
        &self,
        action: Action,
        meta: ResourceMeta,
        timeout: Option<Duration>,
    ) -> Result<Grant, ClientError> {
        let (tx, rx) = oneshot::channel();
        let request_id = self.request(action, meta, None, move |outcome| {
            let _ = tx.send(outcome);
        })?;

        let outcome = match timeout.or(self.shared.config.timeout) {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(request = %request_id, ?limit, "timed out waiting for grant");
                    if let Err(e) = self.release(&request_id) {
                        debug!(request = %request_id, error = %e, "release after timeout");
                    }
                    return Err(ClientError::Timeout(request_id));
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(Ok(grant)) => Ok(grant),
            Ok(Err(denied)) => Err(denied.into()),
            Err(_) => Err(ClientError::Closed),
        }
    }

    pub async fn promised_lock(
        &self,
        meta: ResourceMeta,
        timeout: Option<Duration>,
    ) -> Result<Grant, ClientError> {
        self.promised(Action::Write, meta, timeout).await
    }

    pub async fn promised_access(
        &self,
        mode: AccessMode,
        meta: ResourceMeta,
        timeout: Option<Duration>,
    ) -> Result<Grant, ClientError> {
        self.promised(mode.action(), meta, timeout).await
    }

    pub async fn promised_thread(&self, timeout: Option<Duration>) -> Result<Grant, ClientError> {
        self.promised(Action::Thread, ResourceMeta::none(), timeout)
            .await
    }

    // === Release ===

    /// Release a request, granted or not
    pub fn release(&self, request_id: &RequestId) -> Result<(), ClientError> {
        self.release_inner(request_id, None)
    }

    /// Release and be told the coordinator's answer
    pub fn release_with(
        &self,
        request_id: &RequestId,
        callback: impl FnOnce(Status) + Send + 'static,
    ) -> Result<(), ClientError> {
        self.release_inner(request_id, Some(Box::new(callback)))
    }

    /// Release and wait for the coordinator's answer
    pub async fn release_and_wait(&self, request_id: &RequestId) -> Result<Status, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.release_with(request_id, move |status| {
            let _ = tx.send(status);
        })?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    fn release_inner(
        &self,
        request_id: &RequestId,
        callback: Option<ReleaseCallback>,
    ) -> Result<(), ClientError> {
        let message = {
            let mut table = self.shared.lock();
            let entry = table
                .requests
                .get_mut(request_id)
                .ok_or_else(|| ClientError::UnknownRequest(request_id.clone()))?;
            if !entry.valid {
                return Err(ClientError::AlreadyReleased(request_id.clone()));
            }

            let message = if entry.granted {
                table
                    .requests
                    .remove(request_id)
                    .map(|entry| release_message(request_id, &entry))
            } else {
                // Answered when the grant shows up
                entry.valid = false;
                entry.callback = None;
                None
            };
            if let Some(callback) = callback {
                table
                    .releases
                    .entry(request_id.clone())
                    .or_default()
                    .push_back(callback);
            }
            message
        };

        if let Some(message) = message {
            self.shared.send(&self.shared.topics.release, &message)?;
            debug!(request = %request_id, "released");
        } else {
            debug!(request = %request_id, "release deferred until grant");
        }
        Ok(())
    }

    // === Diagnostics and lifecycle ===

    /// Ask the coordinator for a snapshot of everything it tracks
    pub async fn state(&self) -> Result<CoordinatorSnapshot, ClientError> {
        let (tx, rx) = oneshot::channel();
        let request_id = {
            let mut table = self.shared.lock();
            let request_id = loop {
                let id = RequestId::new(self.shared.ids.next());
                if !table.states.contains_key(&id) {
                    break id;
                }
            };
            table.states.insert(request_id.clone(), tx);
            request_id
        };

        let query = StateQuery {
            request_id: request_id.clone(),
        };
        if let Err(e) = self.shared.send(&self.shared.topics.state, &query) {
            self.shared.lock().states.remove(&request_id);
            return Err(e);
        }

        let outcome = match self.shared.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.shared.lock().states.remove(&request_id);
                    return Err(ClientError::Timeout(request_id));
                }
            },
            None => rx.await,
        };
        outcome.map_err(|_| ClientError::Closed)
    }

    /// Ask the coordinator to purge this worker's entries for one action class
    pub fn clean(&self, action: Action) -> Result<(), ClientError> {
        self.shared.broadcast_clean(Some(action))?;
        let mut table = self.shared.lock();
        table.requests.retain(|_, entry| entry.action != action);
        Ok(())
    }

    /// Announce this worker's departure and forget every tracked request
    ///
    /// Callbacks still waiting are dropped; awaiting helpers see
    /// [`ClientError::Closed`].
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.shared.broadcast_clean(None)?;
        let mut table = self.shared.lock();
        let dropped = table.requests.len();
        *table = Table::default();
        debug!(worker = %self.id(), dropped, "disconnected");
        Ok(())
    }

    /// Number of requests tracked locally
    pub fn pending_len(&self) -> usize {
        self.shared.lock().requests.len()
    }

    pub fn is_granted(&self, request_id: &RequestId) -> bool {
        self.shared
            .lock()
            .requests
            .get(request_id)
            .is_some_and(|e| e.granted && e.valid)
    }

    pub fn resolved_name(&self, request_id: &RequestId) -> Option<String> {
        self.shared
            .lock()
            .requests
            .get(request_id)
            .and_then(|e| e.resolved_name.clone())
    }
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send<M: serde::Serialize>(&self, topic: &str, message: &M) -> Result<(), ClientError> {
        let payload = to_payload(message)?;
        self.transport.send(&self.coordinator, topic, payload)?;
        Ok(())
    }

    fn broadcast_clean(&self, action: Option<Action>) -> Result<(), ClientError> {
        let payload = to_payload(&CleanWorker { action })?;
        self.transport
            .broadcast(&self.topics.clean_worker, payload)?;
        Ok(())
    }

    fn dispatch(&self, delivery: Delivery) {
        if delivery.origin != self.coordinator {
            trace!(origin = %delivery.origin, "ignoring delivery from non-coordinator");
            return;
        }

        let topic = delivery.topic.as_str();
        if topic == self.topics.response {
            match from_payload::<ResponseAction>(delivery.payload) {
                Ok(response) => self.on_response(response),
                Err(e) => warn!(error = %e, "malformed response"),
            }
        } else if topic == self.topics.release_response {
            match from_payload::<ResponseRelease>(delivery.payload) {
                Ok(response) => self.on_release_response(response),
                Err(e) => warn!(error = %e, "malformed release response"),
            }
        } else if topic == self.topics.state_response {
            match from_payload::<StateResponse>(delivery.payload) {
                Ok(response) => {
                    if let Some(tx) = self.lock().states.remove(&response.request_id) {
                        let _ = tx.send(response.state);
                    }
                }
                Err(e) => warn!(error = %e, "malformed state response"),
            }
        }
    }

    fn on_response(&self, response: ResponseAction) {
        let ResponseAction {
            request_id,
            resolved_name,
            action,
            status,
        } = response;

        let mut table = self.lock();
        let Some(entry) = table.requests.get_mut(&request_id) else {
            warn!(request = %request_id, status = %status, "response for unknown request");
            return;
        };

        if status.is_ok() {
            entry.granted = true;
            entry.resolved_name = resolved_name.clone();
            if !entry.valid {
                let message = table
                    .requests
                    .remove(&request_id)
                    .map(|entry| release_message(&request_id, &entry));
                drop(table);
                debug!(request = %request_id, "grant arrived after release; handing it back");
                if let Some(message) = message {
                    if let Err(e) = self.send(&self.topics.release, &message) {
                        warn!(request = %request_id, error = %e, "failed to hand back grant");
                    }
                }
                return;
            }
            let callback = entry.callback.take();
            drop(table);
            trace!(request = %request_id, action = %action, "granted");
            if let Some(callback) = callback {
                callback(Ok(Grant {
                    request_id,
                    action,
                    resolved_name,
                }));
            }
            return;
        }

        let entry = table.requests.remove(&request_id);
        let release_callbacks = table.releases.remove(&request_id);
        drop(table);
        debug!(request = %request_id, action = %action, status = %status, "refused");

        match entry {
            Some(entry) if entry.valid => {
                if let Some(callback) = entry.callback {
                    callback(Err(Denied {
                        request_id,
                        action,
                        status,
                        resolved_name,
                    }));
                }
            }
            _ => {
                for callback in release_callbacks.into_iter().flatten() {
                    callback(status);
                }
            }
        }
    }

    fn on_release_response(&self, response: ResponseRelease) {
        let callback = {
            let mut table = self.lock();
            let callback = table
                .releases
                .get_mut(&response.request_id)
                .and_then(VecDeque::pop_front);
            if table
                .releases
                .get(&response.request_id)
                .is_some_and(VecDeque::is_empty)
            {
                table.releases.remove(&response.request_id);
            }
            callback
        };

        if !response.status.is_ok() {
            warn!(request = %response.request_id, status = %response.status, "release refused");
        }
        if let Some(callback) = callback {
            callback(response.status);
        }
    }
}

fn release_message(request_id: &RequestId, entry: &Entry) -> ReleaseAction {
    ReleaseAction {
        request_id: request_id.clone(),
        action: entry.action,
        meta: ResourceMeta {
            name: entry
                .resolved_name
                .clone()
                .or_else(|| entry.meta.name.clone()),
            extension: entry.meta.extension.clone(),
        },
    }
}

async fn listen(shared: Arc<Shared>, mut inbox: Inbox) {
    while let Some(delivery) = inbox.recv().await {
        shared.dispatch(delivery);
    }
    debug!("client inbox closed");
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
