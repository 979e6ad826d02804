use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::{LockKind, LockState, NamedLock};
use crate::{Result, ShelfError};

/// An in-process named lock built on a [`Mutex`] and [`Condvar`].
///
/// It has the same shared/exclusive semantics as [`FileLock`](./struct.FileLock.html) but only
/// excludes threads of the current process. Clones share the same lock state.
#[derive(Debug, Clone)]
pub struct LocalLock {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    name: String,
    state: Mutex<LockState>,
    released: Condvar,
}

/// A held [`LocalLock`]. If the token is dropped without being released, the lock is released
/// when it is dropped.
#[derive(Debug)]
pub struct LocalToken {
    inner: Arc<Inner>,
    kind: LockKind,
    released: bool,
}

impl LocalToken {
    /// the kind of lock this token holds
    pub fn kind(&self) -> LockKind {
        self.kind
    }
}

impl LocalLock {
    /// creates a new, unlocked lock. `name` is only used in log output
    pub fn new(name: impl Into<String>) -> LocalLock {
        LocalLock {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(LockState::Unlocked),
                released: Condvar::new(),
            }),
        }
    }

    /// the current state of the lock
    pub fn state(&self) -> LockState {
        *self.inner.lock_state()
    }
}

impl Inner {
    // the state is a plain enum that is never left half-updated, so a poisoned mutex is safe to use
    fn lock_state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, kind: LockKind) -> Result<()> {
        let mut state = self.lock_state();
        *state = match (*state, kind) {
            (LockState::Shared(n), LockKind::Shared) if n > 1 => LockState::Shared(n - 1),
            (LockState::Shared(_), LockKind::Shared) => LockState::Unlocked,
            (LockState::Exclusive, LockKind::Exclusive) => LockState::Unlocked,
            (current, kind) => {
                return Err(ShelfError::LockRelease(format!(
                    "cannot release a {} lock on '{}' while it is {:?}",
                    kind, &self.name, current
                )))
            }
        };
        debug!("released {} lock on '{}', now {:?}", kind, &self.name, *state);
        self.released.notify_all();
        Ok(())
    }
}

impl NamedLock for LocalLock {
    type Token = LocalToken;

    fn acquire_shared(&self) -> Result<LocalToken> {
        let mut state = self.inner.lock_state();
        while *state == LockState::Exclusive {
            state = self
                .inner
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *state = match *state {
            LockState::Shared(n) => LockState::Shared(n + 1),
            _ => LockState::Shared(1),
        };
        debug!("shared lock on '{}' granted, now {:?}", &self.inner.name, *state);
        Ok(LocalToken {
            inner: Arc::clone(&self.inner),
            kind: LockKind::Shared,
            released: false,
        })
    }

    fn acquire_exclusive(&self) -> Result<LocalToken> {
        let mut state = self.inner.lock_state();
        while *state != LockState::Unlocked {
            state = self
                .inner
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *state = LockState::Exclusive;
        debug!("exclusive lock on '{}' granted", &self.inner.name);
        Ok(LocalToken {
            inner: Arc::clone(&self.inner),
            kind: LockKind::Exclusive,
            released: false,
        })
    }

    fn release(&self, mut token: LocalToken) -> Result<()> {
        if !Arc::ptr_eq(&self.inner, &token.inner) {
            return Err(ShelfError::LockRelease(format!(
                "token for '{}' was released on '{}'",
                &token.inner.name, &self.inner.name
            )));
        }
        token.released = true;
        self.inner.release(token.kind)
    }
}

impl Drop for LocalToken {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.inner.release(self.kind) {
                warn!("failed to release dropped token: {}", e);
            }
        }
    }
}
