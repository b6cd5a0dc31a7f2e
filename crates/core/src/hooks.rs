// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Extension hooks invoked by the coordinator
//!
//! Filters transform a value and feed the result to the next filter in
//! registration order. Observers only watch; their outcome never gates the
//! operation that triggered them.

use crate::id::{RequestId, WorkerId};
use crate::protocol::Action;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Where in the request lifecycle a hook runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Candidate name for a request that did not supply one
    OnFilename,
    /// A release has been applied
    OnRelease,
}

impl std::fmt::Display for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HookPoint::OnFilename => "on_filename",
            HookPoint::OnRelease => "on_release",
        };
        write!(f, "{}", s)
    }
}

/// What a hook is told about the request that triggered it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HookContext {
    pub worker: WorkerId,
    pub request: RequestId,
    pub action: Action,
    /// Resolved resource name, when one is known
    pub resource: Option<String>,
}

/// Value-transforming hook
#[async_trait]
pub trait FilterHook: Send + Sync {
    async fn filter(&self, ctx: &HookContext, value: String) -> String;
}

/// Side-effect-only hook
#[async_trait]
pub trait ObserverHook: Send + Sync {
    async fn observe(&self, ctx: &HookContext);
}

#[async_trait]
impl<F> FilterHook for F
where
    F: Fn(&HookContext, String) -> String + Send + Sync,
{
    async fn filter(&self, ctx: &HookContext, value: String) -> String {
        self(ctx, value)
    }
}

#[async_trait]
impl<F> ObserverHook for F
where
    F: Fn(&HookContext) + Send + Sync,
{
    async fn observe(&self, ctx: &HookContext) {
        self(ctx)
    }
}

type Registered<T> = Vec<(String, Arc<T>)>;

#[derive(Default)]
struct HookTable {
    filters: HashMap<HookPoint, Registered<dyn FilterHook>>,
    observers: HashMap<HookPoint, Registered<dyn ObserverHook>>,
}

/// Registry of hooks, shared between the coordinator and the tasks it spawns
#[derive(Clone, Default)]
pub struct Hooks {
    table: Arc<RwLock<HookTable>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; an existing hook with the same id is replaced
    pub fn read_hook(
        &self,
        point: HookPoint,
        id: impl Into<String>,
        observer: impl ObserverHook + 'static,
    ) {
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        upsert(
            table.observers.entry(point).or_default(),
            id.into(),
            Arc::new(observer),
        );
    }

    /// Register a filter; an existing hook with the same id is replaced
    pub fn write_hook(&self, point: HookPoint, id: impl Into<String>, filter: impl FilterHook + 'static) {
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        upsert(
            table.filters.entry(point).or_default(),
            id.into(),
            Arc::new(filter),
        );
    }

    /// Remove a hook of either kind; returns whether anything was removed
    pub fn remove_hook(&self, point: HookPoint, id: &str) -> bool {
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = false;
        if let Some(filters) = table.filters.get_mut(&point) {
            let before = filters.len();
            filters.retain(|(hook_id, _)| hook_id != id);
            removed |= filters.len() != before;
        }
        if let Some(observers) = table.observers.get_mut(&point) {
            let before = observers.len();
            observers.retain(|(hook_id, _)| hook_id != id);
            removed |= observers.len() != before;
        }
        removed
    }

    pub fn has_filters(&self, point: HookPoint) -> bool {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.filters.get(&point).is_some_and(|f| !f.is_empty())
    }

    pub fn has_observers(&self, point: HookPoint) -> bool {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.observers.get(&point).is_some_and(|o| !o.is_empty())
    }

    /// Run `value` through every filter at `point`, in registration order
    pub async fn apply_filters(&self, point: HookPoint, ctx: &HookContext, value: String) -> String {
        let filters: Vec<Arc<dyn FilterHook>> = {
            let table = self.table.read().unwrap_or_else(|e| e.into_inner());
            table
                .filters
                .get(&point)
                .map(|f| f.iter().map(|(_, hook)| Arc::clone(hook)).collect())
                .unwrap_or_default()
        };

        let mut value = value;
        for filter in filters {
            value = filter.filter(ctx, value).await;
        }
        value
    }

    /// Tell every observer at `point`
    pub async fn notify(&self, point: HookPoint, ctx: &HookContext) {
        let observers: Vec<Arc<dyn ObserverHook>> = {
            let table = self.table.read().unwrap_or_else(|e| e.into_inner());
            table
                .observers
                .get(&point)
                .map(|o| o.iter().map(|(_, hook)| Arc::clone(hook)).collect())
                .unwrap_or_default()
        };

        for observer in observers {
            observer.observe(ctx).await;
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        let filters: usize = table.filters.values().map(Vec::len).sum();
        let observers: usize = table.observers.values().map(Vec::len).sum();
        f.debug_struct("Hooks")
            .field("filters", &filters)
            .field("observers", &observers)
            .finish()
    }
}

fn upsert<T: ?Sized>(hooks: &mut Registered<T>, id: String, hook: Arc<T>) {
    match hooks.iter_mut().find(|(hook_id, _)| *hook_id == id) {
        Some(slot) => slot.1 = hook,
        None => hooks.push((id, hook)),
    }
}

#[cfg(test)]
#[path = "hooks_tests.rs"]
mod tests;
