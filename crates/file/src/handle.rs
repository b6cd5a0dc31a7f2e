// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinated access to one file
//!
//! Reads take a shared grant and writes an exclusive one, each held only
//! for the duration of the I/O. `lock` holds an exclusive grant until
//! `unlock`; while it is held, access windows nest inside it without asking
//! the coordinator again.

use crate::error::FileError;
use rwgate_core::{AccessMode, Action, Client, ClientError, Grant, RequestId, ResourceMeta, Status};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    /// Handle whose transaction the current task is running
    static TRANSACTION: u64;
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Target {
    Named(String),
    Generated { extension: Option<String> },
}

#[derive(Debug, Default)]
struct HandleState {
    lock: Option<RequestId>,
    resolved: Option<PathBuf>,
    /// A transaction holds the turn
    transaction: bool,
}

/// A granted access window
///
/// Give it back with [`FileHandle::release_access`].
#[derive(Debug)]
#[must_use = "access windows must be released"]
pub struct AccessWindow {
    mode: AccessMode,
    path: PathBuf,
    /// `None` when nested inside the handle's lock
    request: Option<RequestId>,
}

impl AccessWindow {
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn is_nested(&self) -> bool {
        self.request.is_none()
    }
}

pub struct FileHandle {
    id: u64,
    client: Client,
    target: Target,
    timeout: Option<Duration>,
    state: Mutex<HandleState>,
    /// Serialises the first request of a generated handle
    naming: tokio::sync::Mutex<()>,
    /// Queue of transactions, served in arrival order
    turns: tokio::sync::Mutex<()>,
}

impl FileHandle {
    /// Handle for an explicit path, resolved by the coordinator
    pub fn open(client: Client, path: impl Into<String>) -> Self {
        Self::with_target(client, Target::Named(path.into()))
    }

    /// Handle for a file whose name the coordinator generates on first use
    pub fn generated(client: Client, extension: Option<&str>) -> Self {
        Self::with_target(
            client,
            Target::Generated {
                extension: extension.map(str::to_string),
            },
        )
    }

    fn with_target(client: Client, target: Target) -> Self {
        Self {
            id: NEXT_HANDLE.fetch_add(1, Ordering::Relaxed),
            timeout: client.config().timeout,
            client,
            target,
            state: Mutex::new(HandleState::default()),
            naming: tokio::sync::Mutex::new(()),
            turns: tokio::sync::Mutex::new(()),
        }
    }

    /// Bound every wait for a grant
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolved path, once a grant has named it
    pub fn path(&self) -> Option<PathBuf> {
        self.state().resolved.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.state().lock.is_some()
    }

    // === Lock ===

    /// Take the exclusive grant and hold it until [`FileHandle::unlock`]
    ///
    /// Blocks writers, readers and deletion of the file by everyone else.
    pub async fn lock(&self) -> Result<PathBuf, FileError> {
        if self.is_locked() {
            return Err(FileError::AlreadyLocked);
        }
        let grant = self.acquire(Action::Write).await?;
        let path = self.learn(&grant)?;

        let mut state = self.state();
        if state.lock.is_some() {
            drop(state);
            self.client.release(&grant.request_id)?;
            return Err(FileError::AlreadyLocked);
        }
        state.lock = Some(grant.request_id);
        debug!(path = %path.display(), "locked");
        Ok(path)
    }

    pub fn unlock(&self) -> Result<(), FileError> {
        let request = self.state().lock.take().ok_or(FileError::NotLocked)?;
        self.client.release(&request)?;
        debug!("unlocked");
        Ok(())
    }

    // === Access windows ===

    /// Open a read or write window on the file
    ///
    /// Outside a transaction, a transaction running on this handle is waited
    /// out first, so its lock never lends a nested window to anyone else.
    pub async fn get_access(&self, mode: AccessMode) -> Result<AccessWindow, FileError> {
        if !self.inside_transaction() {
            while self.state().transaction {
                drop(self.turns.lock().await);
            }
        }

        if self.is_locked() {
            if let Some(path) = self.path() {
                return Ok(AccessWindow {
                    mode,
                    path,
                    request: None,
                });
            }
        }

        let grant = self.acquire(mode.action()).await?;
        let path = self.learn(&grant)?;
        Ok(AccessWindow {
            mode,
            path,
            request: Some(grant.request_id),
        })
    }

    pub fn release_access(&self, window: AccessWindow) -> Result<(), FileError> {
        match window.request {
            Some(request) => Ok(self.client.release(&request)?),
            None => Ok(()),
        }
    }

    /// Run `f` inside an access window, releasing it whatever `f` returns
    pub async fn with_access<T, F, Fut>(&self, mode: AccessMode, f: F) -> Result<T, FileError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T, FileError>>,
    {
        let window = self.get_access(mode).await?;
        let result = f(window.path.clone()).await;
        let released = self.release_access(window);
        let value = result?;
        released?;
        Ok(value)
    }

    // === I/O ===

    pub async fn read(&self) -> Result<Vec<u8>, FileError> {
        self.with_access(AccessMode::Read, |path| async move {
            tokio::fs::read(&path)
                .await
                .map_err(|e| FileError::io(&path, e))
        })
        .await
    }

    pub async fn read_to_string(&self) -> Result<String, FileError> {
        self.with_access(AccessMode::Read, |path| async move {
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| FileError::io(&path, e))
        })
        .await
    }

    /// Replace the file's contents
    pub async fn write(&self, contents: impl AsRef<[u8]>) -> Result<(), FileError> {
        let contents = contents.as_ref();
        self.with_access(AccessMode::Write, |path| async move {
            tokio::fs::write(&path, contents)
                .await
                .map_err(|e| FileError::io(&path, e))
        })
        .await
    }

    pub async fn append(&self, contents: impl AsRef<[u8]>) -> Result<(), FileError> {
        let contents = contents.as_ref();
        self.with_access(AccessMode::Write, |path| async move {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| FileError::io(&path, e))?;
            file.write_all(contents)
                .await
                .map_err(|e| FileError::io(&path, e))?;
            file.flush().await.map_err(|e| FileError::io(&path, e))
        })
        .await
    }

    pub async fn stat(&self) -> Result<std::fs::Metadata, FileError> {
        self.with_access(AccessMode::Read, |path| async move {
            tokio::fs::metadata(&path)
                .await
                .map_err(|e| FileError::io(&path, e))
        })
        .await
    }

    /// Delete the file once every earlier read and write has drained
    ///
    /// A file that is already gone, or already unlinked through the
    /// coordinator, is not an error, so several workers may unlink the same
    /// file. Afterwards the coordinator refuses every other request for it.
    pub async fn unlink(&self) -> Result<(), FileError> {
        if self.is_locked() {
            return Err(FileError::UnlinkWhileLocked);
        }
        let name = match (&self.target, self.path()) {
            (_, Some(path)) => path.to_string_lossy().into_owned(),
            (Target::Named(name), None) => name.clone(),
            (Target::Generated { .. }, None) => return Err(FileError::Unnamed),
        };

        let grant = match self
            .client
            .promised(Action::Unlink, ResourceMeta::named(name), self.timeout)
            .await
        {
            Ok(grant) => grant,
            Err(ClientError::Denied(denied)) if denied.status == Status::Deleted => {
                debug!(resource = ?denied.resolved_name, "already unlinked");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let path = self.learn(&grant)?;

        let removed = match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FileError::io(&path, e)),
        };
        if let Err(e) = self.client.release(&grant.request_id) {
            warn!(path = %path.display(), error = %e, "failed to release unlink");
        }
        debug!(path = %path.display(), removed = ?removed.as_ref().ok(), "unlinked");
        removed.map(|_| ())
    }

    // === Transactions ===

    /// Run `f` with the file locked
    ///
    /// Transactions on one handle run one at a time in the order they were
    /// started, and other access through the handle waits for them. I/O
    /// through the handle from inside `f` nests in the transaction's lock.
    /// If the handle is already locked, `f` runs inside that lock and the
    /// lock is kept afterwards.
    pub async fn transaction<T, F, Fut>(&self, f: F) -> Result<T, FileError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T, FileError>>,
    {
        let _turn = self.turns.lock().await;
        let _running = RunningTransaction::start(self);

        TRANSACTION.scope(self.id, self.locked(f)).await
    }

    async fn locked<T, F, Fut>(&self, f: F) -> Result<T, FileError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T, FileError>>,
    {
        if self.is_locked() {
            return self.with_access(AccessMode::Write, f).await;
        }

        self.lock().await?;
        let result = self.with_access(AccessMode::Write, f).await;
        let unlocked = self.unlock();
        let value = result?;
        unlocked?;
        Ok(value)
    }

    // === Internals ===

    fn inside_transaction(&self) -> bool {
        TRANSACTION.try_with(|id| *id == self.id).unwrap_or(false)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn meta(&self) -> ResourceMeta {
        if let Some(path) = self.path() {
            return ResourceMeta::named(path.to_string_lossy());
        }
        match &self.target {
            Target::Named(name) => ResourceMeta::named(name.clone()),
            Target::Generated { extension } => ResourceMeta {
                name: None,
                extension: extension.clone(),
            },
        }
    }

    async fn acquire(&self, action: Action) -> Result<Grant, FileError> {
        let unnamed = matches!(self.target, Target::Generated { .. }) && self.path().is_none();
        if !unnamed {
            return Ok(self.client.promised(action, self.meta(), self.timeout).await?);
        }

        // Only the first request may generate a name; later ones reuse it
        let _naming = self.naming.lock().await;
        let grant = self
            .client
            .promised(action, self.meta(), self.timeout)
            .await?;
        self.learn(&grant)?;
        Ok(grant)
    }

    fn learn(&self, grant: &Grant) -> Result<PathBuf, FileError> {
        let path = grant
            .resolved_name
            .as_deref()
            .map(PathBuf::from)
            .ok_or(FileError::NoResolvedName)?;
        let mut state = self.state();
        if state.resolved.is_none() {
            debug!(path = %path.display(), "name learned");
            state.resolved = Some(path.clone());
        }
        Ok(path)
    }
}

/// Marks a transaction as running until dropped, cancellation included
struct RunningTransaction<'a> {
    handle: &'a FileHandle,
}

impl<'a> RunningTransaction<'a> {
    fn start(handle: &'a FileHandle) -> Self {
        handle.state().transaction = true;
        Self { handle }
    }
}

impl Drop for RunningTransaction<'_> {
    fn drop(&mut self) {
        self.handle.state().transaction = false;
    }
}

#[cfg(test)]
#[path = "handle_tests.rs"]
mod tests;
