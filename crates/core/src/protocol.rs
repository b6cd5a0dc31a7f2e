// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Messages exchanged between workers and the coordinator
//!
//! Payloads are JSON values so the same messages travel over the in-process
//! hub and over the daemon socket unchanged.

use crate::coordination::{LimiterSnapshot, QueueSnapshot};
use crate::id::RequestId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default topic prefix
pub const DEFAULT_PREFIX: &str = "rwgate";

/// Kind of access a request asks for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Shared access
    Read,
    /// Exclusive access
    Write,
    /// Terminal deletion
    Unlink,
    /// One slot of the coordinator-wide limiter, not tied to a resource
    Thread,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Unlink => "unlink",
            Action::Thread => "thread",
        };
        write!(f, "{}", s)
    }
}

/// Outcome reported in responses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Granted (or released)
    Ok,
    /// The resource has been deleted and refuses new requests
    Deleted,
    /// The request id is already tracked for this worker
    Duplicate,
    /// Nothing is known about the request or its resource
    #[serde(rename = "NOEXIST")]
    NoExist,
    /// An unlink arrived without a resource name
    MissingName,
    /// No free generated name could be found
    NameExhausted,
    /// The payload could not be decoded
    Malformed,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Ok => "OK",
            Status::Deleted => "DELETED",
            Status::Duplicate => "DUPLICATE",
            Status::NoExist => "NOEXIST",
            Status::MissingName => "MISSING_NAME",
            Status::NameExhausted => "NAME_EXHAUSTED",
            Status::Malformed => "MALFORMED",
        };
        write!(f, "{}", s)
    }
}

/// Describes the resource a request targets
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMeta {
    /// Explicit name or path; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Extension for generated names (without the dot)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

impl ResourceMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            extension: None,
        }
    }

    pub fn generated(extension: impl Into<String>) -> Self {
        Self {
            name: None,
            extension: Some(extension.into()),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAction {
    pub request_id: RequestId,
    pub action: Action,
    #[serde(default)]
    pub meta: ResourceMeta,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseAction {
    pub request_id: RequestId,
    pub resolved_name: Option<String>,
    pub action: Action,
    pub status: Status,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAction {
    pub request_id: RequestId,
    pub action: Action,
    #[serde(default)]
    pub meta: ResourceMeta,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRelease {
    pub request_id: RequestId,
    pub status: Status,
}

/// Purge everything held by the origin worker, optionally for one action class
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanWorker {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateQuery {
    pub request_id: RequestId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateResponse {
    pub request_id: RequestId,
    pub state: CoordinatorSnapshot,
}

/// Diagnostic view of everything the coordinator tracks
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorSnapshot {
    pub queues: BTreeMap<String, QueueSnapshot>,
    pub threads: LimiterSnapshot,
    pub pending: usize,
}

impl CoordinatorSnapshot {
    pub fn queue(&self, name: &str) -> Option<&QueueSnapshot> {
        self.queues.get(name)
    }
}

/// Message names derived from one prefix
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    pub prefix: String,
    pub request: String,
    pub response: String,
    pub release: String,
    pub release_response: String,
    pub clean_worker: String,
    pub state: String,
    pub state_response: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let topic = |suffix: &str| format!("{}:{}", prefix, suffix);
        Self {
            request: topic("request"),
            response: topic("response"),
            release: topic("release"),
            release_response: topic("release-response"),
            clean_worker: topic("clean-worker"),
            state: topic("state"),
            state_response: topic("state-response"),
            prefix,
        }
    }

    /// Topics the coordinator listens on
    pub fn inbound(&self) -> [&str; 4] {
        [&self.request, &self.release, &self.clean_worker, &self.state]
    }

    /// Topics a worker listens on
    pub fn outbound(&self) -> [&str; 3] {
        [&self.response, &self.release_response, &self.state_response]
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

/// Encode a message as a transport payload
pub fn to_payload<T: Serialize>(message: &T) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(message)
}

/// Decode a transport payload
pub fn from_payload<T: DeserializeOwned>(payload: serde_json::Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(payload)
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
