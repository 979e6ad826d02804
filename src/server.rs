use crate::command::{Request, Response};
use crate::engine::{KvsEngine, OpenMode, StoreBackend};
use crate::lock::NamedLock;
use crate::thread_pool::ThreadPool;
use crate::{Result, Shelf, ShelfError};
use serde_json::Deserializer;
use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use tracing::{debug, error, info};

/// A TCP socket server that serves key/value requests out of a [`Shelf`].
/// It listens for incoming [`Request`]s on a [`SocketAddr`](https://doc.rust-lang.org/std/net/enum.SocketAddr.html),
/// and serves every connection on a thread of its [`ThreadPool`].
///
/// Every request is served within its own request scope: the store is opened read-only for
/// `Get` and `Keys`, and for writing for everything else, and the scope is torn down before the
/// response is sent.
///
/// # Example
/// Create and run a new server listening on "127.0.0.1:4000", with 4 threads running on a
/// shared queue thread pool
/// ```rust,no_run
/// use std::sync::Arc;
/// use shelf::{KvsServer, Shelf, ShelfConfig, SharedQueueThreadPool, ThreadPool};
/// # fn main() -> shelf::Result<()> {
/// let shelf = Shelf::init(ShelfConfig::new().with_store_path("data.db"))?;
/// let pool = SharedQueueThreadPool::new(4)?;
/// let server = KvsServer::new(Arc::new(shelf), pool);
/// server.run("127.0.0.1:4000")?;
/// # Ok(())
/// # }
/// ```
///
/// [`Request`]: ./enum.Request.html
pub struct KvsServer<B: StoreBackend, L: NamedLock, P: ThreadPool> {
    /// the coordinator shared by every request
    shelf: Arc<Shelf<B, L>>,
    /// a pool of threads that will serve the connections
    pool: P,
}

impl<B, L, P> KvsServer<B, L, P>
where
    B: StoreBackend + 'static,
    L: NamedLock + 'static,
    P: ThreadPool,
{
    /// Create a new `KvsServer` over the given [`Shelf`] and [`ThreadPool`] implementation.
    pub fn new(shelf: Arc<Shelf<B, L>>, pool: P) -> Self {
        KvsServer { shelf, pool }
    }

    /// starts a server listening on the given address.
    ///
    /// # Errors
    /// returns an error if the address could not be bound
    pub fn run<A: ToSocketAddrs>(self, addr: A) -> Result<()> {
        let listener = TcpListener::bind(addr)?;
        self.serve(listener)
    }

    /// serves connections accepted on an already bound `listener`, until it fails
    pub fn serve(self, listener: TcpListener) -> Result<()> {
        info!("serving on {}", listener.local_addr()?);
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let shelf = Arc::clone(&self.shelf);
                    self.pool.spawn(move || {
                        if let Err(e) = serve_client(&*shelf, stream) {
                            error!("Error on serving client: {}", e);
                        }
                    });
                }
                Err(e) => error!("Connection failed: {}", e),
            }
        }
        Ok(())
    }
}

/// Listens for and processes [`Request`]s coming over the given `tcp` stream, sending one
/// [`Response`] back for each of them
fn serve_client<B: StoreBackend, L: NamedLock>(shelf: &Shelf<B, L>, tcp: TcpStream) -> Result<()> {
    let peer_addr = tcp.peer_addr()?;
    let stream_reader = BufReader::new(&tcp);
    let mut stream_writer = BufWriter::new(&tcp);
    let req_reader = Deserializer::from_reader(stream_reader).into_iter::<Request>();

    for req in req_reader {
        let req = req?;
        debug!("Receive request from {}: {:?}", peer_addr, req);

        let resp = match handle(shelf, req) {
            Ok(resp) => resp,
            Err(e) => Response::Err(format!("{}", e)),
        };
        serde_json::to_writer(&mut stream_writer, &resp)?;
        stream_writer.flush()?;
        debug!("Response sent to {}: {:?}", peer_addr, resp);
    }
    Ok(())
}

/// serves a single request within its own request scope
fn handle<B: StoreBackend, L: NamedLock>(shelf: &Shelf<B, L>, req: Request) -> Result<Response> {
    let mode = if req.is_write() {
        OpenMode::Create
    } else {
        OpenMode::ReadOnly
    };
    shelf.scoped(|scope| {
        let db = shelf.open(scope, mode)?;
        match req {
            Request::Get { key } => Ok(Response::Ok(db.get(&key)?)),
            Request::Set { key, value } => {
                db.set(key, value)?;
                Ok(Response::Ok(None))
            }
            Request::Remove { key } => {
                db.remove(&key)?;
                Ok(Response::Ok(None))
            }
            Request::Keys => Ok(Response::Keys(db.keys())),
            Request::Incr { key } => {
                let current = match db.get(&key)? {
                    Some(value) => value.parse::<i64>().map_err(|_| {
                        ShelfError::Usage(format!(
                            "the value of '{}' is not an integer: {}",
                            key, value
                        ))
                    })?,
                    None => 0,
                };
                let next = current
                    .checked_add(1)
                    .ok_or_else(|| {
                        ShelfError::Usage(format!("the counter '{}' would overflow", key))
                    })?
                    .to_string();
                db.set(key, next.clone())?;
                Ok(Response::Ok(Some(next)))
            }
            Request::Reset => {
                for key in db.keys() {
                    db.remove(&key)?;
                }
                Ok(Response::Ok(None))
            }
        }
    })
}
