#![deny(missing_docs)]
//! A persistent key-value store kept in a single file, that many request handlers can share
//! safely, whether they run on different threads of one server or in different processes.
//!
//! This crate provides the [`Shelf`] coordinator itself, the [`ShelfStore`] storage engine, and
//! a small threaded TCP server ([`KvsServer`]) and client ([`ShelfClient`]) that act as the host
//! of the coordinator.
//!
//! ## Locking
//! Access to the store is guarded by an advisory lock on a separate lock file (by default the
//! store path plus `.lock`):
//!
//! - a handler that wants to write takes an **exclusive** lock, which waits for every other
//! reader and writer to finish
//! - a handler that only reads takes a **shared** lock, so any number of readers run at once
//!
//! Since the lock is a `flock(2)` on a file, it holds across processes as long as every process
//! goes through a [`Shelf`] configured with the same lock file.
//!
//! Writers announce themselves by raising a "writer waiting" flag before they queue for the
//! exclusive lock. New readers of the same process back off while the flag is raised, which
//! keeps a busy stream of readers from starving writers. See [`FairLock`] for the exact
//! guarantee.
//!
//! ## Request Scopes
//! Every request gets a [`RequestScope`]. Handlers open the store through the coordinator with
//! that scope, and the host tears the scope down when the request is over, which closes the
//! store and releases the lock exactly once, even if the handler failed:
//!
//! ```rust,no_run
//! use shelf::{KvsEngine, Shelf, ShelfConfig};
//! # fn main() -> shelf::Result<()> {
//! let shelf = Shelf::init(ShelfConfig::new().with_store_path("data.db"))?;
//! let value = shelf.scoped(|scope| {
//!     let db = shelf.open_write(scope)?;
//!     db.set("foo".to_owned(), "bar".to_owned())?;
//!     db.get("foo")
//! })?;
//! assert_eq!(value.as_deref(), Some("bar"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Store File
//! [`ShelfStore`] keeps data in a "command log": every `set` and `remove` is appended to the
//! file as a JSON record, and the log is replayed into an in-memory index when the store is
//! opened. Once the size of stale records hits [`COMPACTION_THRESHOLD`], the log is compacted
//! when a writer closes it.
//!
//! [`Shelf`]: ./struct.Shelf.html
//! [`ShelfStore`]: ./engine/struct.ShelfStore.html
//! [`KvsServer`]: ./struct.KvsServer.html
//! [`ShelfClient`]: ./struct.ShelfClient.html
//! [`FairLock`]: ./lock/struct.FairLock.html
//! [`RequestScope`]: ./struct.RequestScope.html
//! [`COMPACTION_THRESHOLD`]: ./engine/constant.COMPACTION_THRESHOLD.html

pub use client::ShelfClient;
pub use command::{Request, Response};
pub use config::ShelfConfig;
pub use engine::{
    FileBackend, KvsEngine, OpenMode, Protocol, ShelfStore, StoreBackend, StoreOptions,
};
pub use error::{Result, ShelfError};
pub use lock::{FairLock, FileLock, LocalLock, LockKind, LockState, NamedLock};
pub use server::KvsServer;
pub use session::{RequestScope, ScopeHandle, ScopeState, Shelf, StoreHandle};
pub use thread_pool::{RayonThreadPool, SharedQueueThreadPool, ThreadPool};

mod client;
mod command;
pub mod config;
pub mod engine;
mod error;
pub mod lock;
mod server;
mod session;
pub mod thread_pool;
