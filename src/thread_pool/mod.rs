//! Thread pools used by the [`KvsServer`](../struct.KvsServer.html) to serve connections.
//!
//! Each accepted connection is handed to an arbitrary thread of the pool, so request handlers
//! that share a [`Shelf`](../struct.Shelf.html) really do run concurrently.
use crate::Result;

/// A pool of threads that jobs can be spawned on
pub trait ThreadPool {
    /// creates a new pool with the given number of `threads`
    ///
    /// # Errors
    /// returns an error if the pool, or any of its threads, could not be created
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// runs `job` on a thread of the pool
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;
}

mod rayon_pool;
mod shared_queue;

pub use self::rayon_pool::RayonThreadPool;
pub use self::shared_queue::SharedQueueThreadPool;
