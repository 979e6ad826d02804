use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// type alias for all operations on a [`Shelf`] that could fail with a [`ShelfError`]
///
/// [`Shelf`]: ./struct.Shelf.html
pub type Result<T> = std::result::Result<T, ShelfError>;

/// The Error variants used by the lock, session and store layers of this crate.
#[derive(Error, Debug)]
pub enum ShelfError {
    /// a required setting was missing or invalid when the coordinator was initialized
    #[error("configuration error: {0}")]
    Configuration(String),

    /// the lock resource file is missing or could not be opened
    #[error("lock resource {path:?} is unavailable: {source}")]
    ResourceUnavailable {
        /// path of the lock resource
        path: PathBuf,
        /// the underlying IO error
        source: io::Error,
    },

    /// the process may not open or lock the lock resource
    #[error("permission denied on lock resource {path:?}")]
    PermissionDenied {
        /// path of the lock resource
        path: PathBuf,
    },

    /// an advisory lock could not be acquired
    #[error("could not acquire lock on {path:?}: {source}")]
    LockAcquisition {
        /// path of the lock resource
        path: PathBuf,
        /// the underlying IO error
        source: io::Error,
    },

    /// an advisory lock could not be released
    #[error("could not release lock: {0}")]
    LockRelease(String),

    /// the store file could not be opened
    #[error("could not open store {path:?}: {source}")]
    StoreOpen {
        /// path of the store file
        path: PathBuf,
        /// the underlying IO error
        source: io::Error,
    },

    /// IO error while reading or writing an open store
    #[error("store IO error: {0}")]
    StoreIo(#[from] io::Error),

    /// store records or wire messages could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// a key was not found in the store
    #[error("Key not found")]
    KeyNotFound,

    /// a mutation was attempted on a store opened read-only
    #[error("store was opened read-only")]
    ReadOnlyStore,

    /// an illegal transition of a request scope, e.g. a writer after a reader
    #[error("usage error: {0}")]
    Usage(String),

    /// an error message returned by a remote server
    #[error("{0}")]
    Protocol(String),
}
