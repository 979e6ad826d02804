//! This module provides the key/value storage engine that the coordinator opens on behalf of
//! each request.
//!
//! The coordinator only depends on the [`KvsEngine`] and [`StoreBackend`] traits. The engine
//! shipped with this crate is [`ShelfStore`], which keeps all of its data in a single
//! append-only log file.
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::{Result, ShelfError};

/// The modes a store can be opened with
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpenMode {
    /// open an existing store for reading only (`r`)
    ReadOnly,
    /// open an existing store for reading and writing (`w`)
    Write,
    /// open for reading and writing, creating the store if it does not exist (`c`)
    Create,
    /// always create a new, empty store, discarding any existing data (`n`)
    New,
}

impl OpenMode {
    /// returns `true` for every mode that allows mutations, i.e. everything but `ReadOnly`
    pub fn is_write(&self) -> bool {
        !matches!(self, OpenMode::ReadOnly)
    }
}

impl Default for OpenMode {
    fn default() -> Self {
        OpenMode::Create
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = match self {
            OpenMode::ReadOnly => "r",
            OpenMode::Write => "w",
            OpenMode::Create => "c",
            OpenMode::New => "n",
        };
        write!(f, "{}", flag)
    }
}

impl FromStr for OpenMode {
    type Err = ShelfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(OpenMode::ReadOnly),
            "w" => Ok(OpenMode::Write),
            "c" => Ok(OpenMode::Create),
            "n" => Ok(OpenMode::New),
            _ => Err(ShelfError::Usage(format!(
                "unknown open mode '{}', expected one of r, w, c, n",
                s
            ))),
        }
    }
}

/// How records are serialized into the store file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Protocol {
    /// one compact JSON object per record
    Compact,
    /// indented, human readable JSON records
    Pretty,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Compact
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Compact => write!(f, "compact"),
            Protocol::Pretty => write!(f, "pretty"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ShelfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Ok(Protocol::Compact),
            "pretty" => Ok(Protocol::Pretty),
            _ => Err(ShelfError::Configuration(format!(
                "unknown serialization protocol '{}', expected 'compact' or 'pretty'",
                s
            ))),
        }
    }
}

/// Options passed through to the engine every time a store is opened
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// serialization protocol for newly written records
    pub protocol: Protocol,
    /// when `true`, writes are cached in memory and only written to disk on sync or close
    pub writeback: bool,
}

/// A trait for the basic functionality of a key/value storage engine
pub trait KvsEngine: Send {
    /// Gets the value associated with the given `key`
    ///
    /// Returns `None` if the given `key` does not exist.
    fn get(&mut self, key: &str) -> Result<Option<String>>;

    /// sets a `key` and `value`
    ///
    /// If the given `key` already exists the previous `value` will be overwritten.
    fn set(&mut self, key: String, value: String) -> Result<()>;

    /// Removes the given `key` (and associated value) from the store
    ///
    /// # Errors
    ///
    /// Returns `ShelfError::KeyNotFound` if the given `key` is not found.
    fn remove(&mut self, key: &str) -> Result<()>;

    /// all keys currently in the store, in ascending order
    fn keys(&self) -> Vec<String>;

    /// returns `true` if the store holds a value for `key`
    fn contains_key(&self, key: &str) -> bool;

    /// flushes any buffered data and closes the store
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// A trait for opening a [`KvsEngine`] on a path
pub trait StoreBackend: Send + Sync {
    /// the engine type produced by this backend
    type Engine: KvsEngine;

    /// opens the store at `path` with the given `mode` and `options`
    ///
    /// # Errors
    ///
    /// Returns `ShelfError::StoreOpen` if the store could not be opened.
    fn open(&self, path: &Path, mode: OpenMode, options: &StoreOptions) -> Result<Self::Engine>;
}

mod shelf;

pub use self::shelf::{FileBackend, ShelfStore, COMPACTION_THRESHOLD};
