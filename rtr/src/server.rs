// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The RTR TCP server.
//!
//! One listener thread accepts router connections and hands each one to its
//! own [`Connection`] thread. A registry of live write handles lets the
//! validation driver push Serial Notify PDUs when a new serial is
//! installed.

use crate::error::Error;
use crate::handler::Connection;
use crate::messages::{SerialNotify, Timers};
use rp_common::lock;
use slog::{error, info, warn, Logger};
use socket2::{Domain, Socket, Type};
use std::io::Write;
use std::net::{Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{Builder, JoinHandle};
use std::time::Duration;
use vdb::{Db, ProtocolVersion};

/// How often the accept loop checks the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

pub struct ServerConfig {
    pub bind_addr: SocketAddr,

    /// Listen backlog handed to the kernel.
    pub backlog: i32,

    /// Interval timers advertised in version 1 End of Data PDUs.
    pub timers: Timers,

    /// Write timeout, and the bound on how long a partially received PDU
    /// may stall before the connection is closed.
    pub io_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(
                Ipv6Addr::UNSPECIFIED.into(),
                crate::RTR_PORT,
            ),
            backlog: 10,
            timers: Timers::default(),
            io_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Server {
    db: Db,
    config: ServerConfig,
    clients: ClientRegistry,
    shutdown: Arc<AtomicBool>,
    log: Logger,
}

impl Server {
    pub fn new(
        db: Db,
        config: ServerConfig,
        shutdown: Arc<AtomicBool>,
        log: Logger,
    ) -> Self {
        Self {
            db,
            config,
            clients: ClientRegistry::new(),
            shutdown,
            log,
        }
    }

    /// Build the listening socket with the configured backlog.
    pub fn bind(&self) -> Result<TcpListener, Error> {
        let domain = Domain::for_address(self.config.bind_addr);
        let socket = Socket::new(domain, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.bind(&self.config.bind_addr.into())?;
        socket.listen(self.config.backlog)?;
        let listener: TcpListener = socket.into();
        info!(self.log, "rtr server listening";
            "addr" => listener.local_addr()?.to_string(),
        );
        Ok(listener)
    }

    /// Accept loop. Returns once the shutdown flag is raised, after
    /// joining the remaining connection handlers so in-flight responses
    /// finish.
    pub fn run(&self, listener: TcpListener) {
        if let Err(e) = listener.set_nonblocking(true) {
            error!(self.log, "cannot poll rtr listener: {e}");
            return;
        }

        let mut handlers: Vec<JoinHandle<()>> = Vec::new();
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    match self.spawn_handler(stream, peer) {
                        Ok(handle) => handlers.push(handle),
                        Err(e) => warn!(
                            self.log,
                            "failed to start handler for {peer}: {e}"
                        ),
                    }
                    handlers.retain(|h| !h.is_finished());
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    error!(self.log, "accept failed: {e}");
                    std::thread::sleep(ACCEPT_POLL);
                }
            }
        }

        info!(self.log, "rtr listener stopped, draining connections");
        for handle in handlers {
            let _ = handle.join();
        }
    }

    fn spawn_handler(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<JoinHandle<()>, Error> {
        // The listener polls nonblocking; connection handlers block with
        // read timeouts instead.
        stream.set_nonblocking(false)?;

        let writer = Arc::new(Mutex::new(stream.try_clone()?));
        let version = Arc::new(Mutex::new(None));
        let id = self.clients.register(peer, writer.clone(), version.clone());

        let conn = Connection::new(
            id,
            peer,
            stream,
            writer,
            version,
            self.db.clone(),
            self.config.timers,
            self.config.io_timeout,
            self.clients.clone(),
            self.shutdown.clone(),
            self.log.new(slog::o!("peer" => peer.to_string())),
        );
        let conn = match conn {
            Ok(conn) => conn,
            Err(e) => {
                self.clients.remove(id);
                return Err(e);
            }
        };

        Builder::new()
            .name(format!("rtr-{peer}"))
            .spawn(move || conn.run())
            .map_err(Error::from)
    }

    /// Tell every connected router that `serial` is available. Called by
    /// the validation driver after an install that changed the data set.
    pub fn notify(&self, serial: u32) {
        self.clients.notify(&self.db, serial, &self.log);
    }

    /// Number of currently registered router connections.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Live router connections, held as write handles plus the negotiated
/// protocol version.
#[derive(Clone)]
pub(crate) struct ClientRegistry {
    clients: Arc<Mutex<Vec<ClientHandle>>>,
    next_id: Arc<AtomicU64>,
}

#[derive(Clone)]
struct ClientHandle {
    id: u64,
    peer: SocketAddr,
    writer: Arc<Mutex<TcpStream>>,
    version: Arc<Mutex<Option<ProtocolVersion>>>,
}

impl ClientRegistry {
    fn new() -> Self {
        Self {
            clients: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn register(
        &self,
        peer: SocketAddr,
        writer: Arc<Mutex<TcpStream>>,
        version: Arc<Mutex<Option<ProtocolVersion>>>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock!(self.clients).push(ClientHandle {
            id,
            peer,
            writer,
            version,
        });
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        lock!(self.clients).retain(|c| c.id != id);
    }

    fn len(&self) -> usize {
        lock!(self.clients).len()
    }

    fn notify(&self, db: &Db, serial: u32, log: &Logger) {
        // Snapshot the registry so client writer locks are never taken
        // while the registry lock is held.
        let clients: Vec<ClientHandle> = lock!(self.clients).clone();
        let mut dead = Vec::new();
        let mut notified = 0usize;

        for client in &clients {
            // A router that has not spoken yet has no negotiated version
            // to address it with.
            let version = match *lock!(client.version) {
                Some(v) => v,
                None => continue,
            };
            let pdu =
                SerialNotify::new(version, db.session_id(version), serial)
                    .to_wire();
            let mut writer = lock!(client.writer);
            match writer.write_all(&pdu) {
                Ok(()) => notified += 1,
                Err(e) => {
                    info!(log, "dropping rtr client {}: {e}", client.peer);
                    dead.push(client.id);
                }
            }
        }

        if !dead.is_empty() {
            lock!(self.clients).retain(|c| !dead.contains(&c.id));
        }
        if notified > 0 {
            info!(log, "notified routers of new serial";
                "serial" => serial,
                "routers" => notified,
            );
        }
    }
}
