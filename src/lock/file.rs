use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, instrument};

use super::{LockKind, NamedLock};
use crate::{Result, ShelfError};

/// A named lock backed by an advisory `flock(2)` on a lock file.
///
/// Every acquisition opens its own file descriptor on the lock file, so two threads of the same
/// process contend with each other exactly like two separate processes do. The lock is only
/// honored by cooperating processes that lock the same path.
///
/// The lock file is created once by [`FileLock::create`] and is never deleted by this type. If a
/// process dies while holding a lock, the OS drops the lock when the descriptor is closed.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

/// A held `flock`. Closing the descriptor (dropping the token) also releases the lock.
#[derive(Debug)]
pub struct FileToken {
    file: File,
    kind: LockKind,
}

impl FileToken {
    /// the kind of lock this token holds
    pub fn kind(&self) -> LockKind {
        self.kind
    }
}

impl FileLock {
    /// creates the lock file at `path` if it does not exist yet and returns a lock on it.
    /// An existing lock file is left untouched.
    pub fn create(path: impl Into<PathBuf>) -> Result<FileLock> {
        let path = path.into();
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| resource_error(&path, e))?;
        debug!("lock resource ready at {:?}", &path);
        Ok(FileLock { path })
    }

    /// attaches to an existing lock file at `path`.
    ///
    /// Nothing is checked until the first acquisition, which fails with
    /// [`ShelfError::ResourceUnavailable`] if the file is gone.
    pub fn new(path: impl Into<PathBuf>) -> FileLock {
        FileLock { path: path.into() }
    }

    /// path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// returns `true` if nobody, in this or any other process, currently holds a lock on the
    /// resource. This is a point-in-time probe and is only meant for diagnostics and tests.
    ///
    /// The check itself takes the exclusive lock for a moment, so a concurrent acquirer may
    /// briefly block on it.
    pub fn is_unlocked(&self) -> Result<bool> {
        let file = self.open()?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                file.unlock()
                    .map_err(|e| ShelfError::LockRelease(format!("{:?}: {}", &self.path, e)))?;
                Ok(true)
            }
            Err(e) if is_contended(&e) => Ok(false),
            Err(e) => Err(acquire_error(&self.path, e)),
        }
    }

    fn open(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| resource_error(&self.path, e))
    }
}

impl NamedLock for FileLock {
    type Token = FileToken;

    #[instrument(level = "debug", skip(self), fields(path = ?self.path))]
    fn acquire_shared(&self) -> Result<FileToken> {
        let file = self.open()?;
        file.lock_shared()
            .map_err(|e| acquire_error(&self.path, e))?;
        debug!("shared flock granted");
        Ok(FileToken {
            file,
            kind: LockKind::Shared,
        })
    }

    #[instrument(level = "debug", skip(self), fields(path = ?self.path))]
    fn acquire_exclusive(&self) -> Result<FileToken> {
        let file = self.open()?;
        file.lock_exclusive()
            .map_err(|e| acquire_error(&self.path, e))?;
        debug!("exclusive flock granted");
        Ok(FileToken {
            file,
            kind: LockKind::Exclusive,
        })
    }

    fn release(&self, token: FileToken) -> Result<()> {
        // the descriptor is closed when `token` goes out of scope, even if unlock fails
        token.file.unlock().map_err(|e| {
            ShelfError::LockRelease(format!("{} flock on {:?}: {}", token.kind, &self.path, e))
        })?;
        debug!("released {} flock on {:?}", token.kind, &self.path);
        Ok(())
    }
}

fn resource_error(path: &Path, e: io::Error) -> ShelfError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => ShelfError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ShelfError::ResourceUnavailable {
            path: path.to_path_buf(),
            source: e,
        },
    }
}

fn acquire_error(path: &Path, e: io::Error) -> ShelfError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => ShelfError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ShelfError::LockAcquisition {
            path: path.to_path_buf(),
            source: e,
        },
    }
}

// fs2 reports contention as EWOULDBLOCK, which is not always mapped to ErrorKind::WouldBlock
fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
