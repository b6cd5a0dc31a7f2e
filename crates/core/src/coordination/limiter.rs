// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Counting limiter over holder identities
//!
//! A holder may take several slots at once (re-entrant counting). `acquire`
//! only reports whether a slot was granted; callers that want to wait keep
//! their tickets in the limiter's FIFO wait list and promote them as slots
//! free up.

use crate::id::{Ticket, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Limiter configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Name identifying this limiter in logs and snapshots
    pub name: String,
    /// Total slots; 0 means unbounded
    pub capacity: u32,
}

impl LimiterConfig {
    pub fn new(name: impl Into<String>, capacity: u32) -> Self {
        Self {
            name: name.into(),
            capacity,
        }
    }

    pub fn unbounded(name: impl Into<String>) -> Self {
        Self::new(name, 0)
    }
}

/// Bounded counting semaphore keyed by worker
#[derive(Clone, Debug)]
pub struct Limiter {
    pub config: LimiterConfig,
    /// Slots held per worker
    held: HashMap<WorkerId, u32>,
    /// Tickets waiting for a slot, oldest first
    waiting: VecDeque<Ticket>,
}

/// Serializable view of a limiter
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterSnapshot {
    pub name: String,
    pub capacity: u32,
    pub used: u32,
    pub holders: BTreeMap<String, u32>,
    pub waiting: usize,
}

impl Limiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            held: HashMap::new(),
            waiting: VecDeque::new(),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.config.capacity == 0
    }

    /// Slots currently held across all workers
    pub fn used(&self) -> u32 {
        self.held.values().sum()
    }

    /// Free slots, or `None` when unbounded
    pub fn available(&self) -> Option<u32> {
        if self.is_unbounded() {
            None
        } else {
            Some(self.config.capacity.saturating_sub(self.used()))
        }
    }

    pub fn can_acquire(&self) -> bool {
        self.available().map_or(true, |n| n > 0)
    }

    /// Slots held by one worker
    pub fn held_by(&self, worker: &WorkerId) -> u32 {
        self.held.get(worker).copied().unwrap_or(0)
    }

    /// Take one slot for `worker` if one is free
    pub fn acquire(&mut self, worker: &WorkerId) -> bool {
        if !self.can_acquire() {
            return false;
        }
        *self.held.entry(worker.clone()).or_insert(0) += 1;
        true
    }

    /// Give back one slot held by `worker`; false when it held none
    pub fn release(&mut self, worker: &WorkerId) -> bool {
        match self.held.get_mut(worker) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.held.remove(worker);
                true
            }
            None => false,
        }
    }

    /// Drop every slot and waiter of `worker`, or reset entirely with `None`
    ///
    /// Returns the number of held slots freed.
    pub fn clean(&mut self, worker: Option<&WorkerId>) -> u32 {
        match worker {
            Some(worker) => {
                self.drop_waiters(worker);
                self.held.remove(worker).unwrap_or(0)
            }
            None => {
                let freed = self.used();
                self.held.clear();
                self.waiting.clear();
                freed
            }
        }
    }

    // === Wait list ===

    pub fn enqueue(&mut self, ticket: Ticket) -> usize {
        self.waiting.push_back(ticket);
        self.waiting.len()
    }

    /// Pop the oldest waiter if a slot can be taken for it
    pub fn promote_waiter(&mut self) -> Option<Ticket> {
        let worker = self.waiting.front()?.worker.clone();
        if !self.acquire(&worker) {
            return None;
        }
        self.waiting.pop_front()
    }

    pub fn remove_waiter(&mut self, ticket: &Ticket) -> bool {
        let before = self.waiting.len();
        self.waiting.retain(|t| t != ticket);
        self.waiting.len() != before
    }

    pub fn drop_waiters(&mut self, worker: &WorkerId) -> usize {
        let before = self.waiting.len();
        self.waiting.retain(|t| &t.worker != worker);
        before - self.waiting.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_waiting(&self, ticket: &Ticket) -> bool {
        self.waiting.contains(ticket)
    }

    pub fn snapshot(&self) -> LimiterSnapshot {
        LimiterSnapshot {
            name: self.config.name.clone(),
            capacity: self.config.capacity,
            used: self.used(),
            holders: self
                .held
                .iter()
                .map(|(w, n)| (w.0.clone(), *n))
                .collect(),
            waiting: self.waiting.len(),
        }
    }
}

#[cfg(test)]
#[path = "limiter_tests.rs"]
mod tests;
