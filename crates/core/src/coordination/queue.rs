// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-resource action queue
//!
//! Orders shared reads, exclusive writes and terminal unlinks for a single
//! resource. Priority across classes is: drain reads, then service writes,
//! then allow unlink. Within a class requests are served FIFO.
//!
//! Once an unlink executes the queue is `Deleted` and refuses every further
//! request.

use super::limiter::{Limiter, LimiterConfig};
use crate::effect::{Effect, Event};
use crate::id::{Ticket, WorkerId};
use crate::protocol::Action;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Queue state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    /// Reads may be granted; writes wait for the read burst to drain
    #[default]
    Read,
    /// One write is executing; everything else waits
    Write,
    /// Both read and write sides are drained; pending unlinks may run
    Empty,
    /// Terminal: an unlink has executed
    Deleted,
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueState::Read => "read",
            QueueState::Write => "write",
            QueueState::Empty => "empty",
            QueueState::Deleted => "deleted",
        };
        write!(f, "{}", s)
    }
}

/// Inputs that drive queue transitions
#[derive(Clone, Debug)]
pub enum QueueInput {
    AcquireRead(Ticket),
    HookWrite(Ticket),
    HookUnlink(Ticket),
    /// Release a granted ticket, or cancel one still waiting
    Release { ticket: Ticket, action: Action },
    /// Deferred drain step
    Drain,
    /// Remove entries of one worker (or of everyone), optionally for one action class
    Clean {
        worker: Option<WorkerId>,
        action: Option<Action>,
    },
}

/// Depths of one queue, for diagnostics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub state: QueueState,
    pub read_capacity: u32,
    pub active_reads: usize,
    pub queued_reads: usize,
    pub writing: bool,
    pub queued_writes: usize,
    pub active_unlinks: usize,
    pub queued_unlinks: usize,
}

/// Read/write/unlink state machine for one resource
#[derive(Clone, Debug)]
pub struct ActionQueue {
    pub name: String,
    pub state: QueueState,
    /// Capacity for concurrent reads
    readers: Limiter,
    active_reads: Vec<Ticket>,
    read_queue: VecDeque<Ticket>,
    writing: Option<Ticket>,
    write_queue: VecDeque<Ticket>,
    unlinking: Vec<Ticket>,
    unlink_queue: VecDeque<Ticket>,
}

impl ActionQueue {
    /// Create a queue; `read_capacity` of 0 allows unbounded concurrent reads
    pub fn new(name: impl Into<String>, read_capacity: u32) -> Self {
        let name = name.into();
        Self {
            readers: Limiter::new(LimiterConfig::new(format!("{}#reads", name), read_capacity)),
            name,
            state: QueueState::Read,
            active_reads: Vec::new(),
            read_queue: VecDeque::new(),
            writing: None,
            write_queue: VecDeque::new(),
            unlinking: Vec::new(),
            unlink_queue: VecDeque::new(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.state == QueueState::Deleted
    }

    /// Nothing granted and nothing waiting on the read/write side
    pub fn is_idle(&self) -> bool {
        self.writing.is_none()
            && self.active_reads.is_empty()
            && self.read_queue.is_empty()
            && self.write_queue.is_empty()
    }

    pub fn active_reads(&self) -> &[Ticket] {
        &self.active_reads
    }

    pub fn queued_reads(&self) -> usize {
        self.read_queue.len()
    }

    pub fn writer(&self) -> Option<&Ticket> {
        self.writing.as_ref()
    }

    pub fn queued_writes(&self) -> usize {
        self.write_queue.len()
    }

    pub fn queued_unlinks(&self) -> usize {
        self.unlink_queue.len()
    }

    pub fn active_unlinks(&self) -> &[Ticket] {
        &self.unlinking
    }

    /// Action currently granted to `ticket`, if any
    pub fn granted(&self, ticket: &Ticket) -> Option<Action> {
        if self.active_reads.contains(ticket) {
            Some(Action::Read)
        } else if self.writing.as_ref() == Some(ticket) {
            Some(Action::Write)
        } else if self.unlinking.contains(ticket) {
            Some(Action::Unlink)
        } else {
            None
        }
    }

    pub fn is_queued(&self, ticket: &Ticket) -> bool {
        self.read_queue.contains(ticket)
            || self.write_queue.contains(ticket)
            || self.unlink_queue.contains(ticket)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            state: self.state,
            read_capacity: self.readers.config.capacity,
            active_reads: self.active_reads.len(),
            queued_reads: self.read_queue.len(),
            writing: self.writing.is_some(),
            queued_writes: self.write_queue.len(),
            active_unlinks: self.unlinking.len(),
            queued_unlinks: self.unlink_queue.len(),
        }
    }

    /// Pure state transition function
    pub fn transition(&self, input: QueueInput) -> (ActionQueue, Vec<Effect>) {
        let mut next = self.clone();
        let mut effects = Vec::new();

        match input {
            QueueInput::AcquireRead(ticket) => next.acquire_read(ticket, &mut effects),
            QueueInput::HookWrite(ticket) => next.hook_write(ticket, &mut effects),
            QueueInput::HookUnlink(ticket) => next.hook_unlink(ticket, &mut effects),
            QueueInput::Release { ticket, action } => next.release(ticket, action, &mut effects),
            QueueInput::Drain => next.drain(&mut effects),
            QueueInput::Clean { worker, action } => {
                next.clean(worker.as_ref(), action, &mut effects)
            }
        }

        (next, effects)
    }

    fn acquire_read(&mut self, ticket: Ticket, effects: &mut Vec<Effect>) {
        if self.is_deleted() {
            effects.push(reject(ticket, Action::Read));
            return;
        }

        if self.writing.is_some() {
            self.enqueue(ticket, Action::Read, effects);
            return;
        }

        self.set_state(QueueState::Read, effects);
        if self.read_queue.is_empty() && self.readers.acquire(&ticket.worker) {
            self.active_reads.push(ticket.clone());
            effects.push(Effect::Grant {
                ticket,
                action: Action::Read,
            });
        } else {
            self.enqueue(ticket, Action::Read, effects);
        }
    }

    fn hook_write(&mut self, ticket: Ticket, effects: &mut Vec<Effect>) {
        if self.is_deleted() {
            effects.push(reject(ticket, Action::Write));
            return;
        }

        self.enqueue(ticket, Action::Write, effects);
        if self.writing.is_none() && self.active_reads.is_empty() && self.read_queue.is_empty() {
            self.execute_write(effects);
        }
    }

    fn hook_unlink(&mut self, ticket: Ticket, effects: &mut Vec<Effect>) {
        if self.is_deleted() {
            effects.push(reject(ticket, Action::Unlink));
            return;
        }

        self.enqueue(ticket, Action::Unlink, effects);
        if self.is_idle() {
            effects.push(Effect::Drain);
        }
    }

    fn release(&mut self, ticket: Ticket, action: Action, effects: &mut Vec<Effect>) {
        match action {
            Action::Read => {
                if let Some(pos) = self.active_reads.iter().position(|t| t == &ticket) {
                    self.active_reads.remove(pos);
                    self.readers.release(&ticket.worker);
                } else if !remove_from(&mut self.read_queue, &ticket) {
                    return;
                }
                effects.push(Effect::Released { ticket, action });
                effects.push(Effect::Drain);
            }
            Action::Write => {
                if self.writing.as_ref() == Some(&ticket) {
                    self.writing = None;
                    effects.push(Effect::Released { ticket, action });
                    if self.write_queue.is_empty() {
                        if !self.is_deleted() {
                            self.set_state(QueueState::Read, effects);
                        }
                        effects.push(Effect::Drain);
                    } else {
                        self.execute_write(effects);
                    }
                } else if remove_from(&mut self.write_queue, &ticket) {
                    effects.push(Effect::Released { ticket, action });
                    effects.push(Effect::Drain);
                }
            }
            Action::Unlink => {
                if let Some(pos) = self.unlinking.iter().position(|t| t == &ticket) {
                    self.unlinking.remove(pos);
                    effects.push(Effect::Released { ticket, action });
                } else if remove_from(&mut self.unlink_queue, &ticket) {
                    effects.push(Effect::Released { ticket, action });
                }
            }
            Action::Thread => {}
        }
    }

    /// Promote whatever the current state allows
    fn drain(&mut self, effects: &mut Vec<Effect>) {
        if self.is_deleted() || self.writing.is_some() {
            return;
        }

        // 1. Reads first, while capacity allows
        let mut promoted = Vec::new();
        while let Some(front) = self.read_queue.front() {
            if !self.readers.acquire(&front.worker) {
                break;
            }
            if let Some(ticket) = self.read_queue.pop_front() {
                self.active_reads.push(ticket.clone());
                promoted.push(ticket);
            }
        }
        if !promoted.is_empty() {
            self.set_state(QueueState::Read, effects);
            effects.extend(promoted.into_iter().map(|ticket| Effect::Grant {
                ticket,
                action: Action::Read,
            }));
        }
        if !self.active_reads.is_empty() || !self.read_queue.is_empty() {
            return;
        }

        // 2. Then the next write
        if !self.write_queue.is_empty() {
            self.execute_write(effects);
            return;
        }

        // 3. Nothing left on either side: pending unlinks may run
        self.set_state(QueueState::Empty, effects);
        if !self.unlink_queue.is_empty() {
            self.execute_unlinks(effects);
        }
    }

    fn execute_write(&mut self, effects: &mut Vec<Effect>) {
        let Some(ticket) = self.write_queue.pop_front() else {
            return;
        };
        self.writing = Some(ticket.clone());
        self.set_state(QueueState::Write, effects);
        effects.push(Effect::Grant {
            ticket,
            action: Action::Write,
        });
    }

    fn execute_unlinks(&mut self, effects: &mut Vec<Effect>) {
        self.set_state(QueueState::Deleted, effects);
        let count = self.unlink_queue.len();
        while let Some(ticket) = self.unlink_queue.pop_front() {
            self.unlinking.push(ticket.clone());
            effects.push(Effect::Grant {
                ticket,
                action: Action::Unlink,
            });
        }
        effects.push(Effect::Emit(Event::ResourceDeleted {
            resource: self.name.clone(),
            unlinks: count,
        }));
    }

    fn clean(&mut self, worker: Option<&WorkerId>, action: Option<Action>, effects: &mut Vec<Effect>) {
        let owned = |t: &Ticket| worker.map_or(true, |w| &t.worker == w);
        let covers = |a: Action| action.map_or(true, |x| x == a);
        let mut removed = 0;

        if covers(Action::Read) {
            removed += retain_not(&mut self.read_queue, owned);
            let (gone, kept): (Vec<_>, Vec<_>) =
                self.active_reads.drain(..).partition(|t| owned(t));
            for ticket in &gone {
                self.readers.release(&ticket.worker);
            }
            removed += gone.len();
            self.active_reads = kept;
        }

        if covers(Action::Write) {
            removed += retain_not(&mut self.write_queue, owned);
            if self.writing.as_ref().is_some_and(|t| owned(t)) {
                self.writing = None;
                removed += 1;
                if !self.is_deleted() {
                    self.set_state(QueueState::Read, effects);
                }
            }
        }

        if covers(Action::Unlink) {
            removed += retain_not(&mut self.unlink_queue, owned);
            let before = self.unlinking.len();
            self.unlinking.retain(|t| !owned(t));
            removed += before - self.unlinking.len();
        }

        if removed > 0 {
            effects.push(Effect::Emit(Event::WorkerCleaned {
                resource: self.name.clone(),
                worker: worker.map(|w| w.0.clone()),
                removed,
            }));
            effects.push(Effect::Drain);
        }
    }

    fn enqueue(&mut self, ticket: Ticket, action: Action, effects: &mut Vec<Effect>) {
        let queue = match action {
            Action::Read => &mut self.read_queue,
            Action::Write => &mut self.write_queue,
            Action::Unlink => &mut self.unlink_queue,
            Action::Thread => return,
        };
        queue.push_back(ticket.clone());
        let position = queue.len();
        effects.push(Effect::Emit(Event::RequestQueued {
            resource: self.name.clone(),
            ticket,
            action,
            position,
        }));
    }

    fn set_state(&mut self, to: QueueState, effects: &mut Vec<Effect>) {
        if self.state == to {
            return;
        }
        effects.push(Effect::Emit(Event::QueueStateChanged {
            resource: self.name.clone(),
            from: self.state,
            to,
        }));
        self.state = to;
    }
}

fn reject(ticket: Ticket, action: Action) -> Effect {
    Effect::Reject { ticket, action }
}

fn remove_from(queue: &mut VecDeque<Ticket>, ticket: &Ticket) -> bool {
    match queue.iter().position(|t| t == ticket) {
        Some(pos) => queue.remove(pos).is_some(),
        None => false,
    }
}

fn retain_not(queue: &mut VecDeque<Ticket>, owned: impl Fn(&Ticket) -> bool) -> usize {
    let before = queue.len();
    queue.retain(|t| !owned(t));
    before - queue.len()
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
