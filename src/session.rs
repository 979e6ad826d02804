//! Binds store handles to request scopes.
//!
//! A [`Shelf`] is built once at startup and shared by every request handler. For each request
//! the host creates a [`RequestScope`], handlers call [`Shelf::open`] with it to get a store
//! handle (taking the read or write lock first), and when the request is over the host calls
//! [`Shelf::close`], which closes every handle in the scope and releases its lock.
//! [`Shelf::scoped`] does all of that around a closure.
use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use tracing::{debug, error, info, instrument, warn};

use crate::config::ShelfConfig;
use crate::engine::{FileBackend, KvsEngine, OpenMode, StoreBackend, StoreOptions};
use crate::lock::{FairLock, FileLock, LockKind, LockToken, NamedLock};
use crate::{Result, ShelfError};

/// A store handle as held by a [`RequestScope`] of a `Shelf<B, L>`
pub type ScopeHandle<B, L> =
    StoreHandle<<B as StoreBackend>::Engine, <L as NamedLock>::Token>;

/// The coordinator that lets many request handlers share one store file.
///
/// Writers get an exclusive lock and readers a shared lock on the configured lock file before
/// the store is opened, so at any time the store is open either for one writer or for any
/// number of readers, across all threads and all cooperating processes.
pub struct Shelf<B: StoreBackend = FileBackend, L: NamedLock = FileLock> {
    config: ShelfConfig,
    backend: B,
    lock: FairLock<L>,
}

impl Shelf<FileBackend, FileLock> {
    /// Creates a coordinator over a [`ShelfStore`](./engine/struct.ShelfStore.html) file,
    /// guarded by an advisory lock file.
    ///
    /// The lock file and store file are created if they do not exist.
    ///
    /// # Errors
    /// returns `ShelfError::Configuration` if no store path is configured, in which case no
    /// file is created
    #[instrument(level = "info")]
    pub fn init(config: ShelfConfig) -> Result<Self> {
        config.store_path()?;
        let lock = FileLock::create(config.lock_path()?)?;
        Shelf::with_parts(config, FileBackend, lock)
    }
}

impl<B: StoreBackend, L: NamedLock> Shelf<B, L> {
    /// Creates a coordinator from a storage backend and a named lock.
    ///
    /// The store file is created (under the write lock) if it does not exist yet, so that
    /// read-only opens never fail just because nothing has been written.
    pub fn with_parts(config: ShelfConfig, backend: B, lock: L) -> Result<Self> {
        let store_path = config.store_path()?.to_path_buf();
        let shelf = Shelf {
            lock: FairLock::with_poll_interval(lock, config.poll_interval()),
            backend,
            config,
        };

        let token = shelf.lock.acquire_write()?;
        let touched = shelf
            .backend
            .open(&store_path, OpenMode::Create, &shelf.store_options())
            .and_then(|store| store.close());
        let released = shelf.lock.release_write(token);
        touched?;
        released?;

        info!("store ready at {:?}", &store_path);
        Ok(shelf)
    }

    /// the config this coordinator was built with
    pub fn config(&self) -> &ShelfConfig {
        &self.config
    }

    /// the lock guarding the store
    pub fn lock(&self) -> &FairLock<L> {
        &self.lock
    }

    /// the path of the store file
    pub fn store_path(&self) -> Result<&Path> {
        self.config.store_path()
    }

    fn store_options(&self) -> StoreOptions {
        self.config.store_options()
    }

    /// Opens the store within `scope` and returns the new handle.
    ///
    /// Write modes take the exclusive lock and make the handle the scope's writer. `ReadOnly`
    /// takes a shared lock and adds the handle to the scope's readers. Both block until the
    /// lock is granted.
    ///
    /// # Errors
    /// returns `ShelfError::Usage`, without taking any lock, if the scope is closed, already
    /// holds the writer, or holds readers and a write mode is requested. Lock and store open
    /// errors are returned as is; if the store fails to open the lock is released again.
    #[instrument(level = "debug", skip(self, scope))]
    pub fn open<'s>(
        &self,
        scope: &'s mut RequestScope<B, L>,
        mode: OpenMode,
    ) -> Result<&'s mut ScopeHandle<B, L>> {
        scope.check_open(mode)?;
        let store_path = self.config.store_path()?;

        let token = if mode.is_write() {
            self.lock.acquire_write()?
        } else if scope.readers.is_empty() {
            self.lock.acquire_read()?
        } else {
            // a waiting writer is blocked on the readers this scope already holds
            self.lock.acquire_read_reentrant()?
        };
        let store = match self.backend.open(store_path, mode, &self.store_options()) {
            Ok(store) => store,
            Err(e) => {
                if let Err(release_err) = self.lock.release(token) {
                    error!("failed to release lock after open error: {}", release_err);
                }
                return Err(e);
            }
        };
        debug!("store opened");

        Ok(scope.insert(StoreHandle { mode, store, token }))
    }

    /// opens the store read-only within `scope`
    pub fn open_read<'s>(
        &self,
        scope: &'s mut RequestScope<B, L>,
    ) -> Result<&'s mut ScopeHandle<B, L>> {
        self.open(scope, OpenMode::ReadOnly)
    }

    /// opens the store for writing within `scope`, creating it if needed
    pub fn open_write<'s>(
        &self,
        scope: &'s mut RequestScope<B, L>,
    ) -> Result<&'s mut ScopeHandle<B, L>> {
        self.open(scope, OpenMode::Create)
    }

    /// Tears down `scope`: closes every handle it holds and releases the handle's lock.
    ///
    /// The lock of a handle is released even when closing its store fails. The first error is
    /// returned once every handle has been dealt with, later ones are logged. The scope is
    /// closed afterwards and closing it again does nothing.
    #[instrument(level = "debug", skip(self, scope))]
    pub fn close(&self, scope: &mut RequestScope<B, L>) -> Result<()> {
        let (writer, mut readers) = scope.take();
        let mut first_err = None;

        let handles = writer.into_iter().chain(readers.drain(..).rev());
        for handle in handles {
            if let Err(e) = self.close_handle(handle) {
                if first_err.is_none() {
                    first_err = Some(e);
                } else {
                    error!("failed to close store handle: {}", e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn close_handle(&self, handle: ScopeHandle<B, L>) -> Result<()> {
        let StoreHandle { mode, store, token } = handle;
        let closed = store.close();
        let released = if mode.is_write() {
            self.lock.release_write(token)
        } else {
            self.lock.release_read(token)
        };
        match (closed, released) {
            (Err(e), Err(release_err)) => {
                error!("failed to release lock after close error: {}", release_err);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), released) => released,
        }
    }

    /// Runs `handler` within a fresh request scope, then tears the scope down.
    ///
    /// Teardown runs exactly once whether the handler succeeds, fails or panics. A handler
    /// error takes precedence over a teardown error, which is then only logged.
    pub fn scoped<T, F>(&self, handler: F) -> Result<T>
    where
        F: FnOnce(&mut RequestScope<B, L>) -> Result<T>,
    {
        let mut teardown = Teardown {
            shelf: self,
            scope: RequestScope::new(),
        };
        let outcome = handler(&mut teardown.scope);
        let closed = self.close(&mut teardown.scope);
        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(close_err)) => {
                error!("request teardown failed: {}", close_err);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }
}

impl<B: StoreBackend, L: NamedLock> fmt::Debug for Shelf<B, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shelf")
            .field("config", &self.config)
            .field("writer_waiting", &self.lock.writer_waiting())
            .finish()
    }
}

// closes the scope if the handler unwinds
struct Teardown<'a, B: StoreBackend, L: NamedLock> {
    shelf: &'a Shelf<B, L>,
    scope: RequestScope<B, L>,
}

impl<B: StoreBackend, L: NamedLock> Drop for Teardown<'_, B, L> {
    fn drop(&mut self) {
        if let Err(e) = self.shelf.close(&mut self.scope) {
            error!("request teardown failed: {}", e);
        }
    }
}

/// An open store together with the lock that protects it.
///
/// Derefs to the store engine, so key/value operations can be called on it directly.
#[derive(Debug)]
pub struct StoreHandle<E, T> {
    mode: OpenMode,
    store: E,
    token: LockToken<T>,
}

impl<E, T> StoreHandle<E, T> {
    /// the mode the store was opened with
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// the kind of lock held for this handle
    pub fn lock_kind(&self) -> LockKind {
        self.token.kind()
    }
}

impl<E, T> Deref for StoreHandle<E, T> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.store
    }
}

impl<E, T> DerefMut for StoreHandle<E, T> {
    fn deref_mut(&mut self) -> &mut E {
        &mut self.store
    }
}

/// Where a [`RequestScope`] is in its lifecycle
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScopeState {
    /// nothing has been opened yet
    Idle,
    /// holding this many reader handles
    Reading(usize),
    /// holding the writer handle
    Writing,
    /// torn down, nothing can be opened anymore
    Closed,
}

/// The store handles opened during one request.
///
/// A scope holds either a single writer handle or any number of reader handles, never both.
/// It moves from `Idle` to `Reading`/`Writing` on the first open and to `Closed` on teardown.
pub struct RequestScope<B: StoreBackend = FileBackend, L: NamedLock = FileLock> {
    writer: Option<ScopeHandle<B, L>>,
    readers: Vec<ScopeHandle<B, L>>,
    closed: bool,
}

impl<B: StoreBackend, L: NamedLock> RequestScope<B, L> {
    /// an empty, idle scope
    pub fn new() -> Self {
        RequestScope {
            writer: None,
            readers: Vec::new(),
            closed: false,
        }
    }

    /// the lifecycle state of this scope
    pub fn state(&self) -> ScopeState {
        if self.closed {
            ScopeState::Closed
        } else if self.writer.is_some() {
            ScopeState::Writing
        } else if !self.readers.is_empty() {
            ScopeState::Reading(self.readers.len())
        } else {
            ScopeState::Idle
        }
    }

    /// the writer handle, if one was opened in this scope
    pub fn writer(&mut self) -> Option<&mut ScopeHandle<B, L>> {
        self.writer.as_mut()
    }

    /// the reader handles opened in this scope, oldest first
    pub fn readers(&mut self) -> &mut [ScopeHandle<B, L>] {
        &mut self.readers
    }

    /// the most recently opened handle
    pub fn current(&mut self) -> Option<&mut ScopeHandle<B, L>> {
        match self.writer.as_mut() {
            Some(writer) => Some(writer),
            None => self.readers.last_mut(),
        }
    }

    fn check_open(&self, mode: OpenMode) -> Result<()> {
        match self.state() {
            ScopeState::Closed => Err(ShelfError::Usage(
                "the request scope has already been torn down".to_owned(),
            )),
            ScopeState::Writing => Err(ShelfError::Usage(format!(
                "cannot open the store with mode '{}', the request already holds the writer",
                mode
            ))),
            ScopeState::Reading(_) if mode.is_write() => Err(ShelfError::Usage(format!(
                "cannot open the store with mode '{}' after opening it for reading in the same request",
                mode
            ))),
            _ => Ok(()),
        }
    }

    fn insert(&mut self, handle: ScopeHandle<B, L>) -> &mut ScopeHandle<B, L> {
        if handle.mode.is_write() {
            return self.writer.insert(handle);
        }
        let idx = self.readers.len();
        self.readers.push(handle);
        &mut self.readers[idx]
    }

    fn take(&mut self) -> (Option<ScopeHandle<B, L>>, Vec<ScopeHandle<B, L>>) {
        self.closed = true;
        (self.writer.take(), mem::take(&mut self.readers))
    }
}

impl<B: StoreBackend, L: NamedLock> Default for RequestScope<B, L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: StoreBackend, L: NamedLock> fmt::Debug for RequestScope<B, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("state", &self.state())
            .finish()
    }
}

impl<B: StoreBackend, L: NamedLock> Drop for RequestScope<B, L> {
    fn drop(&mut self) {
        // dropping the handles still closes the files, which releases flocks
        if self.writer.is_some() || !self.readers.is_empty() {
            warn!("request scope dropped without teardown");
        }
    }
}
