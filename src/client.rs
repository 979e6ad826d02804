use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use serde::Deserialize;
use serde_json::de::IoRead;
use serde_json::Deserializer;
use crate::command::{Request, Response};
use crate::{Result, ShelfError};

/// `ShelfClient` contains the functionality for communication with a [`KvsServer`]
///
/// [`KvsServer`]: ./struct.KvsServer.html
pub struct ShelfClient {
    reader: Deserializer<IoRead<BufReader<TcpStream>>>,
    writer: BufWriter<TcpStream>,
}

impl ShelfClient {

    /// creates a client and establishes a socket connection to the server at the given `addr`
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let tcp_reader = TcpStream::connect(addr)?;
        let tcp_writer = tcp_reader.try_clone()?;

        Ok(ShelfClient {
            reader: Deserializer::from_reader(BufReader::new(tcp_reader)),
            writer: BufWriter::new(tcp_writer),
        })
    }

    /// gets the value of the specified `key` from the server
    /// ## Returns
    /// `Ok(Some(String))` if the value was found for the key.
    /// `Ok(None)` if there is no value associated with the key
    pub fn get(&mut self, key: String) -> Result<Option<String>> {
        self.send_for_value(Request::Get { key })
    }

    /// sends a set key/value request to the server
    pub fn set(&mut self, key: String, value: String) -> Result<()> {
        self.send_for_value(Request::Set { key, value }).map(|_| ())
    }

    /// removes a key and its associated value from the store
    /// # Errors
    /// `ShelfError::Protocol` if the server could not remove the key, e.g. because it does
    /// not exist
    pub fn remove(&mut self, key: String) -> Result<()> {
        self.send_for_value(Request::Remove { key }).map(|_| ())
    }

    /// lists every key in the store
    pub fn keys(&mut self) -> Result<Vec<String>> {
        match self.send(Request::Keys)? {
            Response::Keys(keys) => Ok(keys),
            other => Err(unexpected(other)),
        }
    }

    /// increments the counter stored under `key` and returns its new value
    pub fn incr(&mut self, key: String) -> Result<i64> {
        let value = self
            .send_for_value(Request::Incr { key })?
            .ok_or_else(|| ShelfError::Protocol("server returned no counter value".to_owned()))?;
        value
            .parse()
            .map_err(|_| ShelfError::Protocol(format!("server returned a non-integer counter: {}", value)))
    }

    /// removes every key from the store
    pub fn reset(&mut self) -> Result<()> {
        self.send_for_value(Request::Reset).map(|_| ())
    }

    fn send_for_value(&mut self, req: Request) -> Result<Option<String>> {
        match self.send(req)? {
            Response::Ok(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    /// sends `req` and waits for its response. An error response is returned as
    /// `ShelfError::Protocol`
    fn send(&mut self, req: Request) -> Result<Response> {
        serde_json::to_writer(&mut self.writer, &req)?;
        self.writer.flush()?;

        match Response::deserialize(&mut self.reader)? {
            Response::Err(msg) => Err(ShelfError::Protocol(msg)), // re-throwing error here
            resp => Ok(resp),
        }
    }
}

fn unexpected(resp: Response) -> ShelfError {
    ShelfError::Protocol(format!("unexpected response from server: {:?}", resp))
}
