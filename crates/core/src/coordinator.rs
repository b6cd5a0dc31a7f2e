// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The coordinator: single authority over every resource queue
//!
//! One coordinator owns the `name -> ActionQueue` map and the limiter that
//! serves the `thread` action class. It consumes request, release,
//! clean-worker and state messages from its transport and answers with
//! response messages addressed to the requesting worker.
//!
//! Handlers run to completion on one task. Drains requested by queue
//! transitions are collected on a deferred list and run after the handler
//! returns, before the next message is taken.

use crate::config::CoordinatorConfig;
use crate::coordination::{ActionQueue, Limiter, LimiterConfig, QueueInput};
use crate::effect::Effect;
use crate::hooks::{HookContext, HookPoint, Hooks};
use crate::id::{RequestId, Ticket, WorkerId};
use crate::naming;
use crate::protocol::{
    from_payload, to_payload, Action, CleanWorker, CoordinatorSnapshot, ReleaseAction,
    RequestAction, ResponseAction, ResponseRelease, StateQuery, StateResponse, Status, Topics,
};
use crate::transport::{Delivery, Inbox, Subscription, Transport};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Where a tracked request stands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for a generated name; `serial` identifies the attempt chain
    Resolving { serial: u64 },
    Queued,
    Granted,
}

/// A request the coordinator is tracking
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRequest {
    pub ticket: Ticket,
    pub action: Action,
    pub resource: Option<String>,
    pub phase: Phase,
}

/// Generated-name work item, passed back and forth with filter tasks
#[derive(Clone, Debug)]
struct NameRequest {
    ticket: Ticket,
    action: Action,
    serial: u64,
    attempt: u32,
    extension: Option<String>,
}

#[derive(Debug)]
struct NameCandidate {
    request: NameRequest,
    name: String,
}

type PendingKey = (WorkerId, RequestId);

pub struct Coordinator<T: Transport> {
    config: CoordinatorConfig,
    topics: Topics,
    base_dir: PathBuf,
    transport: T,
    inbox: Inbox,
    hooks: Hooks,
    queues: HashMap<String, ActionQueue>,
    threads: Limiter,
    pending: HashMap<PendingKey, PendingRequest>,
    deferred: VecDeque<String>,
    names_tx: mpsc::UnboundedSender<NameCandidate>,
    names_rx: mpsc::UnboundedReceiver<NameCandidate>,
    next_serial: u64,
}

impl<T: Transport> Coordinator<T> {
    /// Create a coordinator and subscribe it to its inbound topics
    ///
    /// Messages sent after this returns are buffered until [`Coordinator::run`]
    /// (or [`Coordinator::process`]) consumes them.
    pub fn new(config: CoordinatorConfig, transport: T) -> Self {
        let topics = config.topics();
        let inbox = transport.subscribe(Subscription::topics(
            format!("{}:coordinator", config.prefix),
            topics.inbound(),
            "coordinator inbound",
        ));
        let (names_tx, names_rx) = mpsc::unbounded_channel();
        Self {
            base_dir: config.base_dir(),
            threads: Limiter::new(LimiterConfig::new(
                format!("{}:threads", config.prefix),
                config.max_threads,
            )),
            topics,
            transport,
            inbox,
            hooks: Hooks::new(),
            queues: HashMap::new(),
            pending: HashMap::new(),
            deferred: VecDeque::new(),
            names_tx,
            names_rx,
            next_serial: 0,
            config,
        }
    }

    /// Share an existing hook registry
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn queue(&self, name: &str) -> Option<&ActionQueue> {
        self.queues.get(name)
    }

    pub fn threads(&self) -> &Limiter {
        &self.threads
    }

    pub fn pending(&self, worker: &WorkerId, request: &RequestId) -> Option<&PendingRequest> {
        self.pending.get(&(worker.clone(), request.clone()))
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            queues: self
                .queues
                .iter()
                .map(|(name, queue)| (name.clone(), queue.snapshot()))
                .collect(),
            threads: self.threads.snapshot(),
            pending: self.pending.len(),
        }
    }

    /// Run on a new task until the returned handle is shut down
    pub fn spawn(self) -> CoordinatorHandle {
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(self.run(rx));
        CoordinatorHandle {
            shutdown: Some(tx),
            task,
        }
    }

    /// Serve messages until `shutdown` fires or the transport closes
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        info!(
            id = %self.transport.id(),
            prefix = %self.topics.prefix,
            "coordinator started"
        );
        let mut detached = false;

        loop {
            tokio::select! {
                delivery = self.inbox.recv() => match delivery {
                    Some(delivery) => self.process(delivery),
                    None => {
                        info!("coordinator inbox closed");
                        break;
                    }
                },

                Some(candidate) = self.names_rx.recv() => {
                    self.on_candidate(candidate);
                    self.run_deferred();
                }

                result = &mut shutdown, if !detached => match result {
                    Ok(()) => break,
                    Err(_) => detached = true,
                },
            }
        }

        info!(pending = self.pending.len(), "coordinator stopped");
    }

    /// Handle one delivery, then run every drain it scheduled
    pub fn process(&mut self, delivery: Delivery) {
        self.handle_delivery(delivery);
        self.run_deferred();
    }

    /// Handle name candidates that are already waiting, without blocking
    pub fn process_ready_names(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(candidate) = self.names_rx.try_recv() {
            self.on_candidate(candidate);
            self.run_deferred();
            handled += 1;
        }
        handled
    }

    fn handle_delivery(&mut self, delivery: Delivery) {
        let Delivery {
            origin,
            topic,
            payload,
        } = delivery;

        if topic == self.topics.request {
            self.on_request(origin, payload);
        } else if topic == self.topics.release {
            self.on_release(origin, payload);
        } else if topic == self.topics.clean_worker {
            self.on_clean(origin, payload);
        } else if topic == self.topics.state {
            self.on_state(origin, payload);
        } else {
            trace!(topic = %topic, "ignoring topic");
        }
    }

    /// Apply deferred drains until none remain
    pub fn run_deferred(&mut self) {
        while let Some(name) = self.deferred.pop_front() {
            self.apply(&name, QueueInput::Drain);
        }
    }

    // === Handlers ===

    fn on_request(&mut self, origin: WorkerId, payload: serde_json::Value) {
        let request: RequestAction = match from_payload(payload.clone()) {
            Ok(request) => request,
            Err(e) => {
                warn!(worker = %origin, error = %e, "malformed request");
                if let (Some(request_id), Some(action)) = (
                    field::<RequestId>(&payload, "request_id"),
                    field::<Action>(&payload, "action"),
                ) {
                    self.respond_action(&origin, request_id, action, None, Status::Malformed);
                }
                return;
            }
        };

        let ticket = Ticket::new(origin, request.request_id);
        let key = (ticket.worker.clone(), ticket.request.clone());
        if self.pending.contains_key(&key) {
            warn!(ticket = %ticket, "duplicate request id");
            self.respond_action(
                &ticket.worker,
                ticket.request.clone(),
                request.action,
                None,
                Status::Duplicate,
            );
            return;
        }

        debug!(ticket = %ticket, action = %request.action, meta = ?request.meta, "request");

        if request.action == Action::Thread {
            self.request_thread(ticket);
            return;
        }

        match request.meta.name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => {
                let resource = naming::resource_key(&naming::resolve_path(&self.base_dir, name));
                self.dispatch(ticket, request.action, resource);
            }
            None if request.action == Action::Unlink => {
                warn!(ticket = %ticket, "unlink without a name");
                self.respond_action(
                    &ticket.worker,
                    ticket.request,
                    Action::Unlink,
                    None,
                    Status::MissingName,
                );
            }
            None => {
                let extension = request
                    .meta
                    .extension
                    .or_else(|| self.config.default_extension.clone());
                self.begin_generation(ticket, request.action, extension);
            }
        }
    }

    fn on_release(&mut self, origin: WorkerId, payload: serde_json::Value) {
        let release: ReleaseAction = match from_payload(payload.clone()) {
            Ok(release) => release,
            Err(e) => {
                warn!(worker = %origin, error = %e, "malformed release");
                if let Some(request_id) = field::<RequestId>(&payload, "request_id") {
                    self.respond_release(&origin, request_id, Status::Malformed);
                }
                return;
            }
        };

        let key = (origin.clone(), release.request_id.clone());
        let Some(pending) = self.pending.remove(&key) else {
            warn!(worker = %origin, request = %release.request_id, "release of unknown request");
            self.respond_release(&origin, release.request_id, Status::NoExist);
            return;
        };
        if pending.action != release.action {
            debug!(
                ticket = %pending.ticket,
                tracked = %pending.action,
                given = %release.action,
                "release names a different action; using the tracked one"
            );
        }

        let released = match (pending.phase, pending.action, &pending.resource) {
            (Phase::Resolving { .. }, _, _) => true,
            (phase, Action::Thread, _) => self.release_thread(&pending.ticket, phase),
            (_, action, Some(resource)) => {
                let resource = resource.clone();
                let effects = self.apply(
                    &resource,
                    QueueInput::Release {
                        ticket: pending.ticket.clone(),
                        action,
                    },
                );
                effects
                    .iter()
                    .any(|e| matches!(e, Effect::Released { ticket, .. } if *ticket == pending.ticket))
            }
            (_, _, None) => false,
        };

        let status = if released { Status::Ok } else { Status::NoExist };
        debug!(ticket = %pending.ticket, action = %pending.action, status = %status, "release");
        self.respond_release(&origin, release.request_id, status);

        if released && self.hooks.has_observers(HookPoint::OnRelease) {
            let hooks = self.hooks.clone();
            let ctx = HookContext {
                worker: pending.ticket.worker,
                request: pending.ticket.request,
                action: pending.action,
                resource: pending.resource,
            };
            tokio::spawn(async move {
                hooks.notify(HookPoint::OnRelease, &ctx).await;
            });
        }
    }

    fn on_clean(&mut self, origin: WorkerId, payload: serde_json::Value) {
        let clean: CleanWorker = from_payload(payload).unwrap_or_else(|e| {
            warn!(worker = %origin, error = %e, "malformed clean-worker; cleaning every action");
            CleanWorker::default()
        });
        let covers = |a: Action| clean.action.map_or(true, |x| x == a);

        let before = self.pending.len();
        self.pending
            .retain(|(worker, _), p| !(worker == &origin && covers(p.action)));
        let dropped = before - self.pending.len();

        if covers(Action::Thread) {
            let freed = self.threads.clean(Some(&origin));
            if freed > 0 {
                self.promote_threads();
            }
        }

        let mut names: Vec<String> = self.queues.keys().cloned().collect();
        names.sort();
        for name in names {
            self.apply(
                &name,
                QueueInput::Clean {
                    worker: Some(origin.clone()),
                    action: clean.action,
                },
            );
        }

        info!(worker = %origin, action = ?clean.action, dropped, "worker cleaned");
    }

    fn on_state(&mut self, origin: WorkerId, payload: serde_json::Value) {
        let query: StateQuery = match from_payload(payload) {
            Ok(query) => query,
            Err(e) => {
                warn!(worker = %origin, error = %e, "malformed state query");
                return;
            }
        };
        let response = StateResponse {
            request_id: query.request_id,
            state: self.snapshot(),
        };
        let topic = self.topics.state_response.clone();
        self.send(&origin, &topic, &response);
    }

    // === Thread class ===

    fn request_thread(&mut self, ticket: Ticket) {
        let key = (ticket.worker.clone(), ticket.request.clone());
        if self.threads.waiting_len() == 0 && self.threads.acquire(&ticket.worker) {
            self.pending.insert(
                key,
                PendingRequest {
                    ticket: ticket.clone(),
                    action: Action::Thread,
                    resource: None,
                    phase: Phase::Granted,
                },
            );
            debug!(ticket = %ticket, "thread granted");
            self.respond_action(&ticket.worker, ticket.request, Action::Thread, None, Status::Ok);
        } else {
            let position = self.threads.enqueue(ticket.clone());
            debug!(ticket = %ticket, position, "thread queued");
            self.pending.insert(
                key,
                PendingRequest {
                    ticket,
                    action: Action::Thread,
                    resource: None,
                    phase: Phase::Queued,
                },
            );
        }
    }

    fn release_thread(&mut self, ticket: &Ticket, phase: Phase) -> bool {
        let released = match phase {
            Phase::Granted => self.threads.release(&ticket.worker),
            _ => self.threads.remove_waiter(ticket),
        };
        if released {
            self.promote_threads();
        }
        released
    }

    fn promote_threads(&mut self) {
        while let Some(ticket) = self.threads.promote_waiter() {
            self.grant(&ticket, Action::Thread, None);
        }
    }

    // === Names ===

    fn begin_generation(&mut self, ticket: Ticket, action: Action, extension: Option<String>) {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.pending.insert(
            (ticket.worker.clone(), ticket.request.clone()),
            PendingRequest {
                ticket: ticket.clone(),
                action,
                resource: None,
                phase: Phase::Resolving { serial },
            },
        );
        self.resolve_generated(NameRequest {
            ticket,
            action,
            serial,
            attempt: 0,
            extension,
        });
    }

    /// Find a free name, inline when no filters are registered
    fn resolve_generated(&mut self, request: NameRequest) {
        if self.hooks.has_filters(HookPoint::OnFilename) {
            self.spawn_candidate(request);
            return;
        }

        let mut request = request;
        loop {
            let name = self.candidate(&request);
            match self.offer_name(request, name) {
                Some(retry) => request = retry,
                None => return,
            }
        }
    }

    fn candidate(&self, request: &NameRequest) -> String {
        let file_name = naming::generate_name(
            &request.ticket.worker,
            &request.ticket.request,
            request.extension.as_deref(),
        );
        naming::resource_key(&naming::resolve_path(&self.base_dir, &file_name))
    }

    /// Run the filter chain on a fresh candidate off the coordinator task
    fn spawn_candidate(&self, request: NameRequest) {
        let hooks = self.hooks.clone();
        let tx = self.names_tx.clone();
        let base_dir = self.base_dir.clone();
        let generated = self.candidate(&request);
        tokio::spawn(async move {
            let ctx = HookContext {
                worker: request.ticket.worker.clone(),
                request: request.ticket.request.clone(),
                action: request.action,
                resource: None,
            };
            let filtered = hooks
                .apply_filters(HookPoint::OnFilename, &ctx, generated)
                .await;
            let name = naming::resource_key(&naming::resolve_path(&base_dir, &filtered));
            if tx.send(NameCandidate { request, name }).is_err() {
                debug!("coordinator gone before name resolved");
            }
        });
    }

    fn on_candidate(&mut self, candidate: NameCandidate) {
        if let Some(retry) = self.offer_name(candidate.request, candidate.name) {
            self.spawn_candidate(retry);
        }
    }

    /// Accept `name` if it is free; returns the request again when another attempt is due
    fn offer_name(&mut self, request: NameRequest, name: String) -> Option<NameRequest> {
        let key = (request.ticket.worker.clone(), request.ticket.request.clone());
        let current = self.pending.get(&key).map(|p| p.phase);
        if current != Some(Phase::Resolving {
            serial: request.serial,
        }) {
            debug!(ticket = %request.ticket, "name resolved for a request no longer waiting");
            return None;
        }

        if !self.is_reserved(&name) {
            debug!(ticket = %request.ticket, name = %name, attempt = request.attempt, "name generated");
            self.dispatch(request.ticket, request.action, name);
            return None;
        }

        let attempt = request.attempt + 1;
        if attempt >= self.config.max_name_attempts {
            warn!(ticket = %request.ticket, attempts = attempt, "no free name found");
            self.pending.remove(&key);
            self.respond_action(
                &request.ticket.worker,
                request.ticket.request,
                request.action,
                None,
                Status::NameExhausted,
            );
            return None;
        }

        trace!(ticket = %request.ticket, name = %name, attempt, "generated name taken");
        Some(NameRequest { attempt, ..request })
    }

    /// Names already bound to a queue (including deleted ones)
    fn is_reserved(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    // === Queues ===

    fn dispatch(&mut self, ticket: Ticket, action: Action, resource: String) {
        let input = match action {
            Action::Read => QueueInput::AcquireRead(ticket.clone()),
            Action::Write => QueueInput::HookWrite(ticket.clone()),
            Action::Unlink => QueueInput::HookUnlink(ticket.clone()),
            Action::Thread => {
                self.request_thread(ticket);
                return;
            }
        };

        self.pending.insert(
            (ticket.worker.clone(), ticket.request.clone()),
            PendingRequest {
                ticket,
                action,
                resource: Some(resource.clone()),
                phase: Phase::Queued,
            },
        );
        self.apply(&resource, input);
    }

    /// Run one queue transition and carry out its effects
    fn apply(&mut self, resource: &str, input: QueueInput) -> Vec<Effect> {
        let read_capacity = self.config.max_concurrent_reads;
        let queue = self
            .queues
            .entry(resource.to_string())
            .or_insert_with(|| ActionQueue::new(resource, read_capacity));
        let (next, effects) = queue.transition(input);
        *queue = next;

        for effect in &effects {
            match effect {
                Effect::Grant { ticket, action } => {
                    self.grant(ticket, *action, Some(resource.to_string()));
                }
                Effect::Reject { ticket, action } => {
                    debug!(ticket = %ticket, action = %action, resource, "rejected");
                    self.pending
                        .remove(&(ticket.worker.clone(), ticket.request.clone()));
                    self.respond_action(
                        &ticket.worker,
                        ticket.request.clone(),
                        *action,
                        Some(resource.to_string()),
                        Status::Deleted,
                    );
                }
                Effect::Released { ticket, action } => {
                    trace!(ticket = %ticket, action = %action, resource, "released");
                }
                Effect::Drain => self.deferred.push_back(resource.to_string()),
                Effect::Emit(event) => {
                    debug!(event = %event.name(), resource = event.resource(), ?event, "queue event");
                }
            }
        }

        effects
    }

    fn grant(&mut self, ticket: &Ticket, action: Action, resource: Option<String>) {
        let key = (ticket.worker.clone(), ticket.request.clone());
        match self.pending.get_mut(&key) {
            Some(pending) => pending.phase = Phase::Granted,
            None => {
                warn!(ticket = %ticket, action = %action, "grant for untracked request");
            }
        }
        debug!(ticket = %ticket, action = %action, resource = ?resource, "granted");
        self.respond_action(
            &ticket.worker,
            ticket.request.clone(),
            action,
            resource,
            Status::Ok,
        );
    }

    // === Responses ===

    fn respond_action(
        &self,
        target: &WorkerId,
        request_id: RequestId,
        action: Action,
        resolved_name: Option<String>,
        status: Status,
    ) {
        let response = ResponseAction {
            request_id,
            resolved_name,
            action,
            status,
        };
        self.send(target, &self.topics.response, &response);
    }

    fn respond_release(&self, target: &WorkerId, request_id: RequestId, status: Status) {
        let response = ResponseRelease { request_id, status };
        self.send(target, &self.topics.release_response, &response);
    }

    fn send<M: Serialize>(&self, target: &WorkerId, topic: &str, message: &M) {
        let payload = match to_payload(message) {
            Ok(payload) => payload,
            Err(e) => {
                error!(topic, error = %e, "failed to encode response");
                return;
            }
        };
        if let Err(e) = self.transport.send(target, topic, payload) {
            warn!(worker = %target, topic, error = %e, "failed to deliver response");
        }
    }
}

/// Handle to a coordinator running on its own task
pub struct CoordinatorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Stop the coordinator and wait for its task to finish
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            error!(error = %e, "coordinator task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Pull one typed field out of a payload that failed to decode as a whole
fn field<V: serde::de::DeserializeOwned>(payload: &serde_json::Value, name: &str) -> Option<V> {
    payload
        .get(name)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
