//! The TCP server shell: accepts connections and dispatches one handler
//! per connection to a thread pool. Out of the storage core proper, but
//! it is the component that imposes the core's concurrency contract
//! (concurrent calls into a shared [`Engine`] from many threads).

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info};

use crate::engine::Engine;
use crate::error::{KvsError, Result};
use crate::protocol::{self, Request};
use crate::thread_pool::ThreadPool;

/// Runs the wire protocol of §4.9 against a shared [`Engine`], dispatching
/// each accepted connection to `P`.
pub struct Server<P: ThreadPool> {
    engine: Arc<Engine>,
    pool: P,
}

impl<P: ThreadPool> Server<P> {
    /// Creates a server around `engine`, dispatching connections to `pool`.
    pub fn new(engine: Engine, pool: P) -> Self {
        Server {
            engine: Arc::new(engine),
            pool,
        }
    }

    /// Binds `addr` and serves connections until a client sends `SHUTDOWN`.
    pub fn run<A: ToSocketAddrs>(self, addr: A) -> Result<()> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        info!("listening on {}", local_addr);

        for stream in listener.incoming() {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => {
                    let engine = Arc::clone(&self.engine);
                    let shutdown = Arc::clone(&shutdown);
                    self.pool.spawn(move || {
                        if let Err(e) = handle_connection(&engine, stream, &shutdown, local_addr) {
                            error!("error serving client: {}", e);
                        }
                    });
                }
                Err(e) => error!("connection failed: {}", e),
            }
        }

        info!("server shutting down");
        Ok(())
    }
}

fn handle_connection(
    engine: &Engine,
    stream: TcpStream,
    shutdown: &Arc<AtomicBool>,
    local_addr: SocketAddr,
) -> Result<()> {
    let peer_addr = stream.peer_addr()?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            // End of stream: the client hung up without SHUTDOWN.
            return Ok(());
        }

        debug!("request from {}: {:?}", peer_addr, line.trim_end());

        let response = match protocol::parse_request(&line) {
            Ok(Request::Put { key, value }) => match engine.put(key, value) {
                Ok(()) => protocol::format_ok(),
                Err(e) => protocol::format_error(&e.to_string()),
            },
            Ok(Request::Read { key }) => match engine.read(&key) {
                Ok(value) => protocol::format_read_ok(value.as_deref()),
                Err(e) => protocol::format_error(&e.to_string()),
            },
            Ok(Request::Delete { key }) => match engine.delete(&key) {
                Ok(()) => protocol::format_ok(),
                Err(e) => protocol::format_error(&e.to_string()),
            },
            Ok(Request::ReadRange { start, end }) => match engine.range_read(&start, &end) {
                Ok(pairs) => protocol::format_range_ok(&pairs)
                    .unwrap_or_else(|e| protocol::format_error(&e.to_string())),
                Err(e) => protocol::format_error(&e.to_string()),
            },
            Ok(Request::BatchPutHeader { count }) => match read_batch_items(&mut reader, count) {
                Ok(items) => match engine.batch_put(items) {
                    Ok(()) => protocol::format_ok(),
                    Err(e) => protocol::format_error(&e.to_string()),
                },
                Err(e) => protocol::format_error(&e.to_string()),
            },
            Ok(Request::Shutdown) => {
                writer.write_all(protocol::format_ok().as_bytes())?;
                writer.flush()?;
                shutdown.store(true, Ordering::SeqCst);
                // The accept loop is blocked in accept(); connect to
                // ourselves once to unblock it so it can observe the flag.
                let _ = TcpStream::connect(local_addr);
                return Ok(());
            }
            Err(e) => protocol::format_error(&e.to_string()),
        };

        writer.write_all(response.as_bytes())?;
        writer.flush()?;
        debug!("response to {}: {:?}", peer_addr, response.trim_end());
    }
}

/// Reads exactly `count` further lines from `reader`, each a `<key>
/// <value>` batch item. Per §4.9, the handler does not assume a single
/// `recv`/read delivers the whole batch: it keeps reading lines off the
/// same buffered connection until all items arrive.
fn read_batch_items(
    reader: &mut BufReader<TcpStream>,
    count: usize,
) -> Result<Vec<(String, String)>> {
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Err(KvsError::BadRequest(
                "unexpected end of stream while reading batch".into(),
            ));
        }
        items.push(protocol::parse_batch_item(&line)?);
    }
    Ok(items)
}
