// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Effects and events for state machine orchestration

use crate::coordination::QueueState;
use crate::id::Ticket;
use crate::protocol::Action;

/// Effects are what a state machine asks its owner to carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The ticket may proceed with its action
    Grant { ticket: Ticket, action: Action },
    /// The ticket was refused outright (terminal queue)
    Reject { ticket: Ticket, action: Action },
    /// A release (or cancellation) of the ticket was applied
    Released { ticket: Ticket, action: Action },
    /// Run a drain step once the current handler has returned
    Drain,
    /// Emit an event for observers
    Emit(Event),
}

/// Events emitted by state machines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    QueueStateChanged {
        resource: String,
        from: QueueState,
        to: QueueState,
    },
    RequestQueued {
        resource: String,
        ticket: Ticket,
        action: Action,
        position: usize,
    },
    ResourceDeleted {
        resource: String,
        unlinks: usize,
    },
    WorkerCleaned {
        resource: String,
        worker: Option<String>,
        removed: usize,
    },
}

impl Event {
    /// Stable event name for logging and pattern matching
    pub fn name(&self) -> String {
        match self {
            Event::QueueStateChanged { .. } => "queue:state".to_string(),
            Event::RequestQueued { action, .. } => format!("queue:{}:queued", action),
            Event::ResourceDeleted { .. } => "queue:deleted".to_string(),
            Event::WorkerCleaned { .. } => "queue:cleaned".to_string(),
        }
    }

    /// Resource the event concerns
    pub fn resource(&self) -> &str {
        match self {
            Event::QueueStateChanged { resource, .. }
            | Event::RequestQueued { resource, .. }
            | Event::ResourceDeleted { resource, .. }
            | Event::WorkerCleaned { resource, .. } => resource,
        }
    }
}
