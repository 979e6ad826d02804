//! Settings of a [`Shelf`](../struct.Shelf.html) coordinator, built in code or read from the
//! `SHELF_*` environment variables.
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{Protocol, StoreOptions};
use crate::lock::DEFAULT_POLL_INTERVAL;
use crate::{Result, ShelfError};

/// environment variable holding the store path
pub const ENV_FILENAME: &str = "SHELF_FILENAME";
/// environment variable holding the lock file path
pub const ENV_LOCKFILE: &str = "SHELF_LOCKFILE";
/// environment variable holding the serialization protocol, `compact` or `pretty`
pub const ENV_PROTOCOL: &str = "SHELF_PROTOCOL";
/// environment variable that turns writeback buffering on or off
pub const ENV_WRITEBACK: &str = "SHELF_WRITEBACK";
/// environment variable holding the reader poll interval in milliseconds
pub const ENV_POLL_MS: &str = "SHELF_POLL_MS";

/// Settings of a [`Shelf`](./struct.Shelf.html) coordinator.
///
/// Only the store path is required. Everything else has a default:
///
/// | setting | default |
/// |---|---|
/// | lock file | `<store path>.lock` |
/// | protocol | [`Protocol::Compact`] |
/// | writeback | disabled |
/// | poll interval | 20ms |
///
/// The store path is not checked until [`store_path`](#method.store_path) is called, which
/// `Shelf::init` does before it touches the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShelfConfig {
    store_path: Option<PathBuf>,
    lock_path: Option<PathBuf>,
    protocol: Protocol,
    writeback: bool,
    poll_interval: Duration,
}

impl Default for ShelfConfig {
    fn default() -> Self {
        ShelfConfig {
            store_path: None,
            lock_path: None,
            protocol: Protocol::default(),
            writeback: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ShelfConfig {
    /// a config with no store path and default values for everything else
    pub fn new() -> Self {
        Self::default()
    }

    /// reads the config from the `SHELF_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env::vars())
    }

    /// Builds a config from `(name, value)` pairs using the same names as
    /// [`from_env`](#method.from_env). Unknown names are ignored.
    ///
    /// # Errors
    /// returns `ShelfError::Configuration` if a value can not be parsed
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let mut config = ShelfConfig::new();

        if let Some(path) = vars.get(ENV_FILENAME).filter(|p| !p.is_empty()) {
            config = config.with_store_path(path);
        }
        if let Some(path) = vars.get(ENV_LOCKFILE).filter(|p| !p.is_empty()) {
            config = config.with_lock_path(path);
        }
        if let Some(protocol) = vars.get(ENV_PROTOCOL) {
            config = config.with_protocol(protocol.parse()?);
        }
        if let Some(writeback) = vars.get(ENV_WRITEBACK) {
            config = config.with_writeback(parse_bool(ENV_WRITEBACK, writeback)?);
        }
        if let Some(millis) = vars.get(ENV_POLL_MS) {
            let millis = millis.parse::<u64>().map_err(|_| {
                ShelfError::Configuration(format!(
                    "{} must be a number of milliseconds, got '{}'",
                    ENV_POLL_MS, millis
                ))
            })?;
            config = config.with_poll_interval(Duration::from_millis(millis));
        }
        Ok(config)
    }

    /// sets the path of the store file
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// sets the path of the lock file
    pub fn with_lock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = Some(path.into());
        self
    }

    /// sets the serialization protocol used for new records
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// turns writeback buffering on or off
    pub fn with_writeback(mut self, writeback: bool) -> Self {
        self.writeback = writeback;
        self
    }

    /// sets how long readers sleep between checks while a writer is waiting
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// the path of the store file
    ///
    /// # Errors
    /// returns `ShelfError::Configuration` if no store path was configured
    pub fn store_path(&self) -> Result<&Path> {
        self.store_path.as_deref().ok_or_else(|| {
            ShelfError::Configuration(format!(
                "a store path is required, set it in the config or with {}",
                ENV_FILENAME
            ))
        })
    }

    /// the path of the lock file, `<store path>.lock` unless set explicitly
    ///
    /// # Errors
    /// returns `ShelfError::Configuration` if neither a lock path nor a store path was configured
    pub fn lock_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.lock_path {
            return Ok(path.clone());
        }
        let mut name = self.store_path()?.as_os_str().to_os_string();
        name.push(".lock");
        Ok(PathBuf::from(name))
    }

    /// the serialization protocol
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// whether writeback buffering is enabled
    pub fn writeback(&self) -> bool {
        self.writeback
    }

    /// reader poll interval while a writer is waiting
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// the options passed to the store every time it is opened
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            protocol: self.protocol,
            writeback: self.writeback,
        }
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ShelfError::Configuration(format!(
            "{} must be a boolean, got '{}'",
            name, value
        ))),
    }
}
