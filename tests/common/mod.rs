#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shelf::{
    FileBackend, KvsEngine, OpenMode, Result, ShelfConfig, ShelfError, ShelfStore, StoreBackend,
    StoreOptions,
};
use tempfile::TempDir;

/// a fresh temp dir and a config pointing at `data.db` inside it
pub fn temp_config() -> (TempDir, ShelfConfig) {
    let dir = TempDir::new().expect("unable to create temporary working directory");
    let config = ShelfConfig::new()
        .with_store_path(dir.path().join("data.db"))
        .with_poll_interval(Duration::from_millis(5));
    (dir, config)
}

pub fn store_path(dir: &TempDir) -> PathBuf {
    dir.path().join("data.db")
}

pub fn lock_path(dir: &TempDir) -> PathBuf {
    dir.path().join("data.db.lock")
}

/// reads `key` straight from the store file, bypassing any coordinator
pub fn read_key(path: &Path, key: &str) -> Option<String> {
    let mut store = ShelfStore::open(path, OpenMode::ReadOnly, StoreOptions::default())
        .expect("store should open read-only");
    store.get(key).expect("get should succeed")
}

/// A backend whose engines fail to close once `fail_close` is switched on, and that fails to
/// open while `fail_open` is on
#[derive(Clone, Default)]
pub struct FlakyBackend {
    pub fail_close: Arc<AtomicBool>,
    pub fail_open: Arc<AtomicBool>,
}

pub struct FlakyStore {
    inner: ShelfStore,
    fail_close: bool,
}

impl StoreBackend for FlakyBackend {
    type Engine = FlakyStore;

    fn open(&self, path: &Path, mode: OpenMode, options: &StoreOptions) -> Result<FlakyStore> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(ShelfError::StoreOpen {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, "injected open failure"),
            });
        }
        Ok(FlakyStore {
            inner: FileBackend.open(path, mode, options)?,
            fail_close: self.fail_close.load(Ordering::SeqCst),
        })
    }
}

impl KvsEngine for FlakyStore {
    fn get(&mut self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&mut self, key: String, value: String) -> Result<()> {
        self.inner.set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.inner.remove(key)
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    fn close(self) -> Result<()> {
        self.inner.close()?;
        if self.fail_close {
            return Err(ShelfError::StoreIo(io::Error::new(
                io::ErrorKind::Other,
                "injected close failure",
            )));
        }
        Ok(())
    }
}
