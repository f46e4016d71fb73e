//! ZMQ socket with a connection monitor
//!
//! The telemetry publisher has no way to know from a send whether anyone is listening, since a PUB
//! socket silently drops messages with no subscribers. [`MonitoredSocket`] runs a thread reading
//! the socket's monitor events and keeps a count of the peers currently connected.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use std::{
    sync::{Arc, atomic::{AtomicBool, AtomicUsize, Ordering}},
    thread,
    time::{Duration, Instant},
};
use zmq::{Context, Socket, SocketEvent, SocketType};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// How long the monitor thread blocks on the monitor socket before checking for shutdown.
const MONITOR_POLL_TIMEOUT_MS: i32 = 100;

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Used to give each monitor a unique inproc endpoint.
static NUM_MONITORS: AtomicUsize = AtomicUsize::new(0);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A zmq socket whose connected peers are counted by a background monitor thread.
///
/// Derefs to the underlying [`Socket`] for sending and receiving.
pub struct MonitoredSocket {
    socket: Socket,

    join_handle: Option<thread::JoinHandle<()>>,

    shutdown: Arc<AtomicBool>,

    peers: Arc<AtomicUsize>,
}

/// Options applied to a monitored socket before it is bound or connected.
///
/// Values in milliseconds follow the
/// [`zmq_setsockopt`](http://api.zeromq.org/4-2:zmq-setsockopt) conventions, `-1` being infinite.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Bind to the endpoint rather than connecting to it
    pub bind: bool,

    /// Wait for the first peer before returning from [`MonitoredSocket::new`], failing after
    /// `connect_timeout` ms
    pub block_on_first_connect: bool,

    /// `ZMQ_CONNECT_TIMEOUT`
    pub connect_timeout: i32,

    /// `ZMQ_LINGER`: how long unsent messages are kept once the socket is closed
    pub linger: i32,

    /// `ZMQ_SNDTIMEO`
    pub send_timeout: i32,

    /// `ZMQ_SNDHWM`: number of outbound messages queued per peer before new ones are dropped
    pub send_hwm: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum MonitoredSocketError {
    #[error("Error creating the socket: {0}")]
    CreateSocketError(zmq::Error),

    #[error("Error enabling monitoring for the socket: {0}")]
    MonitoringEnableError(zmq::Error),

    #[error("Could not bind or connect to {0}: {1}")]
    EndpointError(String, zmq::Error),

    #[error("No peer connected to {0} within the connect timeout")]
    NoPeer(String),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(&'static str, zmq::Error),

    #[error("Could not spawn the monitor thread: {0}")]
    SpawnError(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MonitoredSocket {
    /// Create a socket of `socket_type`, apply `options`, and bind or connect it to `endpoint`.
    pub fn new(
        ctx: &Context,
        socket_type: SocketType,
        options: SocketOptions,
        endpoint: &str
    ) -> Result<Self, MonitoredSocketError> {
        let socket = ctx.socket(socket_type)
            .map_err(MonitoredSocketError::CreateSocketError)?;

        let monitor_endpoint = format!(
            "inproc://monitor_{}",
            NUM_MONITORS.fetch_add(1, Ordering::Relaxed)
        );
        let events = SocketEvent::CONNECTED as i32
            | SocketEvent::ACCEPTED as i32
            | SocketEvent::DISCONNECTED as i32;
        socket.monitor(&monitor_endpoint, events)
            .map_err(MonitoredSocketError::MonitoringEnableError)?;

        let monitor = ctx.socket(zmq::PAIR)
            .map_err(MonitoredSocketError::CreateSocketError)?;
        monitor.set_rcvtimeo(MONITOR_POLL_TIMEOUT_MS)
            .map_err(|e| MonitoredSocketError::SocketOptionError("rcvtimeo", e))?;
        monitor.connect(&monitor_endpoint)
            .map_err(|e| MonitoredSocketError::EndpointError(monitor_endpoint.clone(), e))?;

        options.apply(&socket)?;

        let bound = if options.bind {
            socket.bind(endpoint)
        }
        else {
            socket.connect(endpoint)
        };
        bound.map_err(|e| MonitoredSocketError::EndpointError(endpoint.into(), e))?;

        let peers = Arc::new(AtomicUsize::new(0));

        if options.block_on_first_connect {
            let deadline = match options.connect_timeout {
                t if t > 0 => Some(Instant::now() + Duration::from_millis(t as u64)),
                _ => None,
            };

            while peers.load(Ordering::Relaxed) == 0 {
                if deadline.map(|d| Instant::now() > d).unwrap_or(false) {
                    return Err(MonitoredSocketError::NoPeer(endpoint.into()))
                }
                update_peers(&monitor, &peers);
            }
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let thread_peers = peers.clone();

        let join_handle = thread::Builder::new()
            .name(format!("zmq_monitor_{}", endpoint))
            .spawn(move || {
                while !thread_shutdown.load(Ordering::Relaxed) {
                    if !update_peers(&monitor, &thread_peers) {
                        break
                    }
                }
            })
            .map_err(MonitoredSocketError::SpawnError)?;

        debug!("Monitoring socket on {} via {}", endpoint, monitor_endpoint);

        Ok(Self {
            socket,
            join_handle: Some(join_handle),
            shutdown,
            peers,
        })
    }

    /// True if at least one peer is connected.
    pub fn connected(&self) -> bool {
        self.num_peers() > 0
    }

    /// Number of peers currently connected.
    pub fn num_peers(&self) -> usize {
        self.peers.load(Ordering::Relaxed)
    }
}

impl Drop for MonitoredSocket {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(jh) = self.join_handle.take() {
            if jh.join().is_err() {
                warn!("Socket monitor thread panicked");
            }
        }
    }
}

impl std::ops::Deref for MonitoredSocket {
    type Target = Socket;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl SocketOptions {
    /// Set these options on the given socket.
    pub fn apply(&self, socket: &Socket) -> Result<(), MonitoredSocketError> {
        socket.set_connect_timeout(self.connect_timeout)
            .map_err(|e| MonitoredSocketError::SocketOptionError("connect_timeout", e))?;
        socket.set_linger(self.linger)
            .map_err(|e| MonitoredSocketError::SocketOptionError("linger", e))?;
        socket.set_sndtimeo(self.send_timeout)
            .map_err(|e| MonitoredSocketError::SocketOptionError("sndtimeo", e))?;
        socket.set_sndhwm(self.send_hwm)
            .map_err(|e| MonitoredSocketError::SocketOptionError("sndhwm", e))?;

        Ok(())
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            bind: false,
            block_on_first_connect: true,
            connect_timeout: 0,
            linger: 30_000,
            send_timeout: -1,
            send_hwm: 1000,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read one event from the monitor, if any arrives before the poll timeout, and update the peer
/// count. Returns false if the monitor can no longer be read.
fn update_peers(monitor: &Socket, peers: &AtomicUsize) -> bool {
    match read_event(monitor) {
        Ok(SocketEvent::CONNECTED) | Ok(SocketEvent::ACCEPTED) => {
            peers.fetch_add(1, Ordering::Relaxed);
        },
        Ok(SocketEvent::DISCONNECTED) => {
            let _ = peers.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        },
        Ok(_) | Err(zmq::Error::EAGAIN) => (),
        Err(e) => {
            warn!("Could not read socket monitor event: {}", e);
            return false
        }
    }

    true
}

/// Read an event from a monitor socket.
fn read_event(socket: &Socket) -> Result<SocketEvent, zmq::Error> {
    let msg = socket.recv_msg(0)?;

    if msg.len() < 2 {
        return Err(zmq::Error::EINVAL)
    }
    let event = u16::from_ne_bytes([msg[0], msg[1]]);

    // Second frame is the peer address
    if socket.get_rcvmore()? {
        socket.recv_msg(0)?;
    }

    Ok(SocketEvent::from_raw(event))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn wait_for_peers(socket: &MonitoredSocket, n: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if socket.num_peers() == n {
                return true
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_counts_subscribers() {
        let ctx = zmq::Context::new();
        let server = MonitoredSocket::new(
            &ctx,
            zmq::PUB,
            SocketOptions {
                bind: true,
                block_on_first_connect: false,
                linger: 0,
                ..Default::default()
            },
            "tcp://127.0.0.1:*"
        ).unwrap();
        assert!(!server.connected());

        let endpoint = server.get_last_endpoint().unwrap().unwrap();

        let sub = ctx.socket(zmq::SUB).unwrap();
        sub.set_linger(0).unwrap();
        sub.connect(&endpoint).unwrap();
        assert!(wait_for_peers(&server, 1));
        assert!(server.connected());

        drop(sub);
        assert!(wait_for_peers(&server, 0));
    }

    #[test]
    fn test_no_peer_within_timeout() {
        let ctx = zmq::Context::new();
        let result = MonitoredSocket::new(
            &ctx,
            zmq::PUB,
            SocketOptions {
                bind: true,
                connect_timeout: 200,
                linger: 0,
                ..Default::default()
            },
            "tcp://127.0.0.1:*"
        );

        match result {
            Err(MonitoredSocketError::NoPeer(_)) => (),
            Err(e) => panic!("Expected NoPeer, got {}", e),
            Ok(_) => panic!("Expected NoPeer, got a socket"),
        }
    }
}
