use serde::{Deserialize, Serialize};

/// These are the request "commands" that can be sent to a [`KvsServer`](./struct.KvsServer.html)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// get a value from the store
    Get {
        /// the key to search for
        key: String,
    },
    /// set a key/value in the store
    Set {
        /// the key to set
        key: String,
        /// the value to set
        value: String,
    },
    /// remove a key/value from the store
    Remove {
        /// the key to remove
        key: String,
    },
    /// list every key in the store
    Keys,
    /// add one to the integer counter stored under `key`, a missing counter counts as 0
    Incr {
        /// the key of the counter
        key: String,
    },
    /// remove every key from the store
    Reset,
}

impl Request {
    /// returns `true` if serving this request mutates the store
    pub fn is_write(&self) -> bool {
        !matches!(self, Request::Get { .. } | Request::Keys)
    }
}

/// The response Types that can be returned for any Request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// this variant is returned when a request was successful
    Ok(Option<String>),
    /// the keys of the store, returned for a `Keys` request
    Keys(Vec<String>),
    /// this variant is returned if an Error occurs while processing the request
    Err(String),
}
