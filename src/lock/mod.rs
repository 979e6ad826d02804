//! This module provides the "named lock" capability used to coordinate readers and writers
//! of a store.
//!
//! A named lock is identified by a filesystem path and can be acquired either shared (many
//! concurrent readers) or exclusive (a single writer). Two implementations are provided:
//!
//! - [`FileLock`] uses advisory `flock(2)` locks, so it excludes other threads *and* other
//!   processes that lock the same path
//! - [`LocalLock`] is an in-process lock for single-process deployments
//!
//! Both are wrapped by a [`FairLock`], which adds the "writer waiting" flag that makes new
//! readers back off while a writer is trying to get in.
//!
//! [`FileLock`]: ./struct.FileLock.html
//! [`LocalLock`]: ./struct.LocalLock.html
//! [`FairLock`]: ./struct.FairLock.html
use std::fmt;

use crate::Result;

/// The kinds of lock that can be held on a named lock
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LockKind {
    /// a read lock, any number of them may be held at once
    Shared,
    /// a write lock, excludes every other holder
    Exclusive,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::Shared => write!(f, "shared"),
            LockKind::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// The observable state of a lock resource
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LockState {
    /// nobody holds the lock
    Unlocked,
    /// the lock is held by this many readers (always at least one)
    Shared(usize),
    /// the lock is held by a single writer
    Exclusive,
}

/// A trait for a lock keyed by some name that supports shared and exclusive acquisition.
///
/// Acquisition blocks the calling thread until the lock is granted. There is no timeout and no
/// cancellation.
pub trait NamedLock: Send + Sync {
    /// proof of a held lock, handed back to [`release`](#tymethod.release)
    type Token: Send;

    /// blocks until a shared lock is granted
    fn acquire_shared(&self) -> Result<Self::Token>;

    /// blocks until an exclusive lock is granted
    fn acquire_exclusive(&self) -> Result<Self::Token>;

    /// releases the lock held by `token`
    fn release(&self, token: Self::Token) -> Result<()>;
}

mod fair;
mod file;
mod local;

pub use self::fair::{FairLock, LockToken, DEFAULT_POLL_INTERVAL};
pub use self::file::{FileLock, FileToken};
pub use self::local::{LocalLock, LocalToken};
