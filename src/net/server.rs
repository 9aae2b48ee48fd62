use super::handlers::RaftTransport;
use super::TransportError;
use log::{debug, info, warn};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Ceiling on concurrently served connections. Above it, new
    /// connections are dropped with a warning.
    pub max_connections: Option<usize>,
}

impl ServerConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            max_connections: None,
        }
    }
}

struct ConnectionLimiter {
    active: AtomicUsize,
    limit: usize,
}

impl ConnectionLimiter {
    fn new(limit: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            limit,
        }
    }

    fn try_acquire(&self) -> bool {
        loop {
            let value = self.active.load(Ordering::Relaxed);
            if value >= self.limit {
                return false;
            }
            if self
                .active
                .compare_exchange(value, value + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn release(&self) {
        self.active.fetch_sub(1, Ordering::Release);
    }
}

struct ConnectionPermit {
    limiter: Arc<ConnectionLimiter>,
}

impl ConnectionPermit {
    fn new(limiter: Arc<ConnectionLimiter>) -> Option<Self> {
        if limiter.try_acquire() {
            Some(Self { limiter })
        } else {
            None
        }
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

/// Running transport listener. Shutting down (or dropping) stops the
/// accept loop and joins it.
///
/// Connection threads are deliberately not joined: stream connections
/// park until the peer directory releases them, and their teardown belongs
/// to that collaborator, not to the listener.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.join.take() {
            if handle.join().is_err() {
                warn!("event=raft_transport_accept_loop_panic");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct RaftTransportServer;

impl RaftTransportServer {
    /// Binds the listener and serves until shutdown. One thread per
    /// inbound connection; stream threads live for the whole peer session.
    pub fn spawn(
        config: ServerConfig,
        transport: Arc<RaftTransport>,
    ) -> Result<ServerHandle, TransportError> {
        let listener = TcpListener::bind(config.bind).map_err(TransportError::Io)?;
        listener.set_nonblocking(true).map_err(TransportError::Io)?;
        let local_addr = listener.local_addr().map_err(TransportError::Io)?;
        info!("event=raft_transport_listen addr={local_addr}");
        let limiter = config
            .max_connections
            .map(|limit| (limit, Arc::new(ConnectionLimiter::new(limit))));
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = shutdown.clone();
        let join = thread::spawn(move || {
            while !shutdown_flag.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        let permit = match limiter.as_ref() {
                            Some((limit, limiter)) => {
                                match ConnectionPermit::new(limiter.clone()) {
                                    Some(permit) => Some(permit),
                                    None => {
                                        warn!(
                                            "event=raft_transport_connection_rejected addr={addr} reason=too_many_connections limit={limit}"
                                        );
                                        continue;
                                    }
                                }
                            }
                            None => None,
                        };
                        debug!("event=raft_transport_accept addr={addr}");
                        let transport = transport.clone();
                        thread::spawn(move || {
                            let _permit = permit;
                            if let Err(err) = transport.serve_connection(stream) {
                                warn!(
                                    "event=raft_transport_connection_error addr={addr} error={err}"
                                );
                            }
                        });
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(ACCEPT_BACKOFF);
                    }
                    Err(err) => {
                        warn!("event=raft_transport_accept_error error={err}");
                        break;
                    }
                }
            }
        });
        Ok(ServerHandle {
            local_addr,
            shutdown,
            join: Some(join),
        })
    }
}
