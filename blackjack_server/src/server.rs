// TCP acceptor and server lifecycle.
//
// Architecture: a listener thread in a non-blocking accept loop (50 ms nap
// on `WouldBlock`) that checks the stop flag each pass, spawning one session
// thread per accepted connection. `start_server` returns a handle plus the
// bound address, so embedders and tests can run on port 0 and stop the
// server deterministically; `run` is the blocking entry point `main` uses,
// with `ctrlc` flipping the stop flag on SIGINT.
//
// Shutdown path: set the flag, then drain the connection set — every
// transport gets a best-effort `C45DOWN` and both socket halves shut, which
// unblocks whatever read a session or match task is parked in. A listener
// that dies on its own (bind address gone) follows the same path with
// reason `NETWORK_LOST` and surfaces the error as a non-zero exit.
//
// Shared state and lock order: identity registry → lobby → connection set;
// each is an independent mutex and none is ever held across network I/O.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use blackjack_protocol::ServerLine;

use crate::config::{ServerConfig, Timing};
use crate::lobby::Lobbies;
use crate::registry::Registry;
use crate::session;
use crate::transport::{ConnId, Transport};

/// Nap between accept attempts; also the stop-flag observation granularity.
const ACCEPT_NAP: Duration = Duration::from_millis(50);

/// State shared by the acceptor, every session, and every match task.
pub(crate) struct Shared {
    pub lobbies: Lobbies,
    pub registry: Registry,
    pub connections: ConnectionSet,
    pub stop: Arc<AtomicBool>,
    pub timing: Timing,
}

/// Every accepted transport, tracked for the shutdown broadcast. Added on
/// accept, removed when its session closes.
pub(crate) struct ConnectionSet {
    inner: Mutex<Vec<Transport>>,
}

impl ConnectionSet {
    fn new() -> ConnectionSet {
        ConnectionSet {
            inner: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, transport: Transport) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transport);
    }

    pub fn remove(&self, id: ConnId) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|t| t.id() != id);
    }

    fn drain(&self) -> Vec<Transport> {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Handle returned by `start_server` to control the running server.
pub struct ServerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<io::Result<()>>>,
}

impl ServerHandle {
    /// The flag a signal handler (or embedder) sets to request shutdown.
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Block until the accept loop exits.
    pub fn wait(mut self) -> io::Result<()> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("accept loop panicked"))),
            None => Ok(()),
        }
    }

    /// Request shutdown and wait for it to complete.
    pub fn stop(self) -> io::Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        self.wait()
    }
}

/// Bind the listener and start the accept loop on a background thread.
/// Returns the handle and the actual bound address (port 0 resolves here).
pub fn start_server(config: ServerConfig) -> io::Result<(ServerHandle, SocketAddr)> {
    // std's Unix listeners come with SO_REUSEADDR already set.
    let listener = TcpListener::bind((config.bind_ip, config.port))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let stop = Arc::new(AtomicBool::new(false));
    let shared = Arc::new(Shared {
        lobbies: Lobbies::new(config.lobby_count),
        registry: Registry::new(),
        connections: ConnectionSet::new(),
        stop: stop.clone(),
        timing: config.timing,
    });
    info!("listening on {addr} with {} lobbies", config.lobby_count);

    let thread = thread::spawn(move || accept_loop(listener, shared));
    Ok((
        ServerHandle {
            stop,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Blocking entry point: start the server and run until SIGINT (or a
/// listener failure) brings it down.
pub fn run(config: ServerConfig) -> io::Result<()> {
    info!("starting blackjack server on {config}");
    let (handle, addr) = start_server(config)?;
    info!("server ready on {addr}");

    let stop = handle.stop_signal();
    if let Err(err) = ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    }) {
        warn!("could not install the SIGINT handler: {err}");
    }
    handle.wait()
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) -> io::Result<()> {
    let mut next_conn = 0u64;
    let result = loop {
        if shared.stop.load(Ordering::SeqCst) {
            break Ok(());
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false).ok();
                let id = ConnId(next_conn);
                next_conn += 1;
                let transport = Transport::new(stream, id);
                info!("{id}: accepted from {peer}");
                match transport.try_clone() {
                    Ok(clone) => shared.connections.add(clone),
                    Err(err) => warn!("{id}: not tracked for shutdown: {err}"),
                }
                let shared = shared.clone();
                thread::spawn(move || session::run_session(shared, transport));
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_NAP),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                // The listen socket is gone (interface down, fd trouble).
                error!("listener failed: {err}");
                break Err(err);
            }
        }
    };

    shared.stop.store(true, Ordering::SeqCst);
    let reason = result.as_ref().err().map(|_| "NETWORK_LOST".to_string());
    broadcast_down(&shared, reason);
    info!("server stopped");
    result
}

/// Tell every tracked connection the server is going away, then shut their
/// socket halves to unblock parked reads. Writes are best-effort and
/// non-blocking; an unresponsive peer must not stall shutdown.
fn broadcast_down(shared: &Shared, reason: Option<String>) {
    let transports = shared.connections.drain();
    info!("notifying {} connections of shutdown", transports.len());
    let line = ServerLine::Down { reason };
    for transport in transports {
        transport.send_best_effort(&line);
        transport.shutdown();
    }
}
