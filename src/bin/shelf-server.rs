//! this binary starts a shelf server over a single store file
//! to see the list of options, type: `shelf-server --help`
//!
//! Settings not given on the command line are read from the `SHELF_FILENAME`,
//! `SHELF_LOCKFILE`, `SHELF_PROTOCOL`, `SHELF_WRITEBACK` and `SHELF_POLL_MS` environment
//! variables. A store path is required.

use std::net::SocketAddr;
use std::process::exit;
use std::sync::Arc;
use clap::{crate_version, App, Arg, arg_enum, value_t};
use shelf::{
    KvsServer, RayonThreadPool, Result, SharedQueueThreadPool, Shelf, ShelfConfig, ShelfError,
    ThreadPool,
};
use tracing::{info, Level};
use tracing_subscriber::{FmtSubscriber};

arg_enum! {
    #[allow(non_camel_case_types)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    enum Pool {
        shared,
        rayon
    }
}

const DEFAULT_ADDRESS: &str = "127.0.0.1:4000";
const DEFAULT_THREADS: u32 = 8;

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    addr: SocketAddr,
    pool: Pool,
    threads: u32,
    config: ShelfConfig,
}

impl Opt {
    /// validates the command line `matches` and overlays them on the environment config
    /// returns `Ok<Opt>` if everything is valid
    /// # Errors
    /// returns [`ShelfError::Configuration`] if one of the parameters is invalid
    ///
    fn build(matches: &clap::ArgMatches) -> Result<Opt> {
        let addr = matches.value_of("addr").unwrap_or(DEFAULT_ADDRESS);
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| ShelfError::Configuration(format!("could not parse {} into an IP address and port", &addr)))?;

        let threads = value_t!(matches, "threads", u32)
            .map_err(|e| ShelfError::Configuration(format!("invalid thread count: {}", e)))?;
        let pool = value_t!(matches, "pool", Pool)
            .map_err(|e| ShelfError::Configuration(format!("invalid pool: {}", e)))?;

        let mut config = ShelfConfig::from_env()?;
        if let Some(store) = matches.value_of("store") {
            config = config.with_store_path(store);
        }
        if let Some(lock_file) = matches.value_of("lock-file") {
            config = config.with_lock_path(lock_file);
        }
        if let Some(protocol) = matches.value_of("protocol") {
            config = config.with_protocol(protocol.parse()?);
        }
        if matches.is_present("writeback") {
            config = config.with_writeback(true);
        }
        // fail before anything is bound or created
        config.store_path()?;

        Ok(Opt { addr, pool, threads, config })
    }
}


fn main() {
    // parse command line args
    let matches = App::new("shelf-server")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("a multi-threaded server over a single-file key-value store")
        .arg(Arg::with_name("addr")
            .long("addr")
            .value_name("IP_ADDR:PORT")
            .help("sets the IP_ADDR:PORT that the server listens on")
            .default_value(DEFAULT_ADDRESS))
        .arg(Arg::with_name("store")
            .long("store")
            .value_name("PATH")
            .help("path of the store file (or set SHELF_FILENAME)"))
        .arg(Arg::with_name("lock-file")
            .long("lock-file")
            .value_name("PATH")
            .help("path of the lock file, defaults to the store path plus '.lock'"))
        .arg(Arg::with_name("protocol")
            .long("protocol")
            .value_name("PROTOCOL")
            .possible_values(&["compact", "pretty"])
            .help("serialization protocol of store records"))
        .arg(Arg::with_name("writeback")
            .long("writeback")
            .help("buffer writes in memory until the end of each request"))
        .arg(Arg::with_name("threads")
            .long("threads")
            .value_name("N")
            .help("number of worker threads")
            .default_value("8"))
        .arg(Arg::with_name("pool")
            .long("pool")
            .value_name("POOL")
            .possible_values(&Pool::variants())
            .help("the thread pool serving connections")
            .default_value("shared"))
        .arg(Arg::with_name("verbose")
            .short("v")
            .long("verbose")
            .help("log lock and store activity"))
        .get_matches();

    // set up a tracing subscriber to log to STDERR
    let level = if matches.is_present("verbose") { Level::DEBUG } else { Level::INFO };
    subscriber_config(level);

    // validate command line options, store them in Opt
    let opt = match Opt::build(&matches) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };

    // start the server
    if let Err(e) = run(opt) {
        eprintln!("{}", e);
        exit(1);
    }
}


fn run(opt: Opt) -> Result<()> {
    info!("shelf-server {}", env!("CARGO_PKG_VERSION"));
    info!("Store: {:?}, lock file: {:?}", opt.config.store_path()?, opt.config.lock_path()?);
    info!("Listening on {} with {} {} threads", opt.addr, opt.threads, opt.pool);

    let shelf = Arc::new(Shelf::init(opt.config)?);
    let threads = if opt.threads == 0 { DEFAULT_THREADS } else { opt.threads };

    match opt.pool {
        Pool::shared => KvsServer::new(shelf, SharedQueueThreadPool::new(threads)?).run(opt.addr),
        Pool::rayon => KvsServer::new(shelf, RayonThreadPool::new(threads)?).run(opt.addr),
    }
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config(level: Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting tracing default subscriber failed: {}", e);
    }
}
