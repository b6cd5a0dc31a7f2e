// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File handle errors

use rwgate_core::{ClientError, Status};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("handle already holds its lock")]
    AlreadyLocked,

    #[error("handle does not hold its lock")]
    NotLocked,

    #[error("cannot unlink while holding the lock")]
    UnlinkWhileLocked,

    #[error("generated file has not been named yet")]
    Unnamed,

    #[error("grant carried no resource name")]
    NoResolvedName,
}

impl FileError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        FileError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Status of a refused request, if that is what this error is
    pub fn denied_status(&self) -> Option<Status> {
        match self {
            FileError::Client(ClientError::Denied(denied)) => Some(denied.status),
            _ => None,
        }
    }
}
