// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource name resolution and generation

use crate::id::{RequestId, WorkerId};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

/// Hex characters kept from the digest of a generated name
pub const GENERATED_NAME_LEN: usize = 16;

/// Resolve `name` against `base_dir` into an absolute, lexically normalised path
///
/// `.` segments are dropped and `..` pops a segment without ever climbing
/// above the root. The filesystem is never consulted, so the result is the
/// same whether or not the file exists.
pub fn resolve_path(base_dir: &Path, name: &str) -> PathBuf {
    let joined = if Path::new(name).is_absolute() {
        PathBuf::from(name)
    } else {
        base_dir.join(name)
    };
    normalize(&joined)
}

/// Lexically normalise a path
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                Some(Component::ParentDir) | Some(Component::CurDir) | None => out.push(".."),
            },
            Component::Normal(segment) => out.push(segment),
        }
    }
    out
}

/// Resource key for a resolved path
pub fn resource_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Synthesise a candidate file name for a request that gave none
///
/// The name is a truncated SHA-256 of the requester, a random salt and the
/// current time, so two calls never agree by construction; collisions with
/// reserved names are still checked by the caller.
pub fn generate_name(worker: &WorkerId, request: &RequestId, extension: Option<&str>) -> String {
    let salt = uuid::Uuid::new_v4();
    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);

    let mut hasher = Sha256::new();
    hasher.update(worker.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(request.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(salt.as_bytes());
    hasher.update(timestamp.as_bytes());
    let digest = hasher.finalize();

    let mut name = hex_encode(&digest[..GENERATED_NAME_LEN / 2]);
    if let Some(ext) = extension.map(|e| e.trim_start_matches('.')).filter(|e| !e.is_empty()) {
        name.push('.');
        name.push_str(ext);
    }
    name
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
#[path = "naming_tests.rs"]
mod tests;
