// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifiers and ID generation

use serde::{Deserialize, Serialize};

/// Identity of a worker process (or of the coordinator endpoint)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        WorkerId::new(id)
    }
}

impl From<String> for WorkerId {
    fn from(id: String) -> Self {
        WorkerId(id)
    }
}

/// Request identifier, unique per worker while the request is tracked
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request as seen by a queue: who asked, and under which id
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub worker: WorkerId,
    pub request: RequestId,
}

impl Ticket {
    pub fn new(worker: WorkerId, request: RequestId) -> Self {
        Self { worker, request }
    }
}

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.worker, self.request)
    }
}

/// Generates identifiers
pub trait IdGen: Clone + Send + Sync {
    fn next(&self) -> String;
}

/// Short random IDs drawn from a v4 UUID
///
/// Callers that need uniqueness check the result against what they already
/// track and draw again on collision.
#[derive(Clone, Debug)]
pub struct ShortIdGen {
    len: usize,
}

impl ShortIdGen {
    pub fn new(len: usize) -> Self {
        Self { len: len.clamp(4, 32) }
    }
}

impl Default for ShortIdGen {
    fn default() -> Self {
        Self::new(12)
    }
}

impl IdGen for ShortIdGen {
    fn next(&self) -> String {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(self.len);
        id
    }
}
