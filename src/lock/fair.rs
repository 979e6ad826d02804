use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, instrument, trace};

use super::{LockKind, NamedLock};
use crate::{Result, ShelfError};

/// how long a reader sleeps between checks of the writer-waiting flag
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Wraps a [`NamedLock`] with a process-local "writer waiting" flag.
///
/// A writer raises the flag before it starts waiting for the exclusive lock and lowers it as
/// soon as the lock is granted. New readers poll the flag and hold off while it is raised, so a
/// steady stream of readers cannot keep a writer out forever.
///
/// The flag is lowered when the writer *acquires* the lock, not when it releases it. A reader
/// that checks the flag during the writer's hold will go on to queue for its shared lock, and is
/// then kept out by the exclusive lock itself. The fairness this gives is best effort only, and
/// only between threads sharing this `FairLock`; other processes are not affected by the flag.
#[derive(Debug)]
pub struct FairLock<L> {
    lock: L,
    writer_waiting: AtomicBool,
    poll_interval: Duration,
}

/// A lock held through a [`FairLock`]
#[derive(Debug)]
pub struct LockToken<T> {
    kind: LockKind,
    inner: T,
}

impl<T> LockToken<T> {
    /// the kind of lock held by this token
    pub fn kind(&self) -> LockKind {
        self.kind
    }
}

impl<L: NamedLock> FairLock<L> {
    /// wraps `lock`, polling every [`DEFAULT_POLL_INTERVAL`] while a writer waits
    pub fn new(lock: L) -> Self {
        FairLock::with_poll_interval(lock, DEFAULT_POLL_INTERVAL)
    }

    /// wraps `lock`, polling every `poll_interval` while a writer waits
    pub fn with_poll_interval(lock: L, poll_interval: Duration) -> Self {
        FairLock {
            lock,
            writer_waiting: AtomicBool::new(false),
            poll_interval,
        }
    }

    /// the wrapped lock
    pub fn inner(&self) -> &L {
        &self.lock
    }

    /// returns `true` while a writer of this process is waiting for the exclusive lock
    pub fn writer_waiting(&self) -> bool {
        self.writer_waiting.load(Ordering::Acquire)
    }

    /// Blocks until a shared lock is held.
    ///
    /// While a writer is waiting this first sleeps in steps of the poll interval until the flag
    /// is lowered, then waits for the shared lock itself.
    #[instrument(level = "debug", skip(self))]
    pub fn acquire_read(&self) -> Result<LockToken<L::Token>> {
        while self.writer_waiting() {
            trace!("writer waiting, backing off for {:?}", self.poll_interval);
            thread::sleep(self.poll_interval);
        }
        let inner = self.lock.acquire_shared()?;
        debug!("read lock acquired");
        Ok(LockToken {
            kind: LockKind::Shared,
            inner,
        })
    }

    /// Blocks until a shared lock is held, without backing off for a waiting writer.
    ///
    /// For callers that already hold a shared lock on the same resource: a waiting writer can
    /// not get in before that lock is released, so backing off would wait forever.
    #[instrument(level = "debug", skip(self))]
    pub fn acquire_read_reentrant(&self) -> Result<LockToken<L::Token>> {
        let inner = self.lock.acquire_shared()?;
        debug!("additional read lock acquired");
        Ok(LockToken {
            kind: LockKind::Shared,
            inner,
        })
    }

    /// Raises the writer-waiting flag, blocks until the exclusive lock is held, then lowers the
    /// flag again.
    #[instrument(level = "debug", skip(self))]
    pub fn acquire_write(&self) -> Result<LockToken<L::Token>> {
        self.writer_waiting.store(true, Ordering::Release);
        let acquired = self.lock.acquire_exclusive();
        // lowered on failure as well, or readers would back off forever
        self.writer_waiting.store(false, Ordering::Release);
        let inner = acquired?;
        debug!("write lock acquired");
        Ok(LockToken {
            kind: LockKind::Exclusive,
            inner,
        })
    }

    /// releases a lock taken by [`acquire_read`](#method.acquire_read)
    pub fn release_read(&self, token: LockToken<L::Token>) -> Result<()> {
        self.release_kind(token, LockKind::Shared)
    }

    /// releases a lock taken by [`acquire_write`](#method.acquire_write)
    pub fn release_write(&self, token: LockToken<L::Token>) -> Result<()> {
        self.release_kind(token, LockKind::Exclusive)
    }

    /// releases `token`, whatever kind of lock it holds
    pub fn release(&self, token: LockToken<L::Token>) -> Result<()> {
        let kind = token.kind;
        self.release_kind(token, kind)
    }

    // the underlying lock is always released, a kind mismatch is reported afterwards
    fn release_kind(&self, token: LockToken<L::Token>, expected: LockKind) -> Result<()> {
        let LockToken { kind, inner } = token;
        self.lock.release(inner)?;
        if kind != expected {
            return Err(ShelfError::LockRelease(format!(
                "released a {} lock as {}",
                kind, expected
            )));
        }
        debug!("{} lock released", kind);
        Ok(())
    }
}
