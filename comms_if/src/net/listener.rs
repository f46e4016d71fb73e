//! # Message Listener
//!
//! A listener binds once to a datagram endpoint and, for its whole lifetime, receives one datagram
//! at a time on a dedicated I/O thread, deserializes it as `T` and calls the user callback with
//! it. Callbacks for one listener are never run concurrently.
//!
//! The listener re-arms after every datagram, whether it was handled or produced an error, so a
//! single malformed or undersized datagram never stops it from servicing the next one.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::{
    fs,
    io,
    marker::PhantomData,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    os::unix::{io::AsRawFd, net::UnixDatagram},
    path::{Path, PathBuf},
    sync::{Arc, atomic::{AtomicBool, Ordering}},
    thread,
    time::Duration,
};
use util::audit::AuditSink;

use super::udp::{interface_index, UdpError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default size of the receive buffer. Datagrams at least this long may have been truncated.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 20_000;

/// Time a blocking receive waits before the I/O thread checks whether it should stop.
const RECV_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause after a receive error before re-arming, so a persistently failing socket doesn't spin.
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A datagram transport a [`MsgListener`] can receive on.
pub trait DatagramEndpoint: Send + Sync + 'static {
    /// Block until one datagram arrives (or the read timeout elapses) and copy it into `buf`.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// First teardown phase, stop any further reception.
    fn shutdown(&self) -> io::Result<()>;

    /// Second teardown phase, release anything the endpoint holds outside the process.
    fn close(&self) -> io::Result<()>;

    /// Human readable description for logs.
    fn describe(&self) -> String;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Listens on a datagram endpoint, parsing each datagram as a `T`.
pub struct MsgListener<T> {
    endpoint: Arc<dyn DatagramEndpoint>,
    running: Arc<AtomicBool>,
    join_handle: Option<thread::JoinHandle<()>>,
    _msg: PhantomData<fn() -> T>,
}

/// Unix datagram socket bound to a filesystem path.
pub struct UnixEndpoint {
    socket: UnixDatagram,
    path: PathBuf,
}

/// UDP socket, optionally joined to a multicast group.
pub struct UdpEndpoint {
    socket: UdpSocket,
    multicast: Option<(Ipv6Addr, u32)>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum MsgListenerError {
    #[error("Could not bind to {0}: {1}")]
    BindError(String, io::Error),

    #[error("Could not configure the socket: {0}")]
    SocketOptionError(io::Error),

    #[error("Address error: {0}")]
    AddressError(UdpError),

    #[error("Could not spawn the listener thread: {0}")]
    SpawnError(io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<T> MsgListener<T>
where
    T: DeserializeOwned + 'static
{
    /// Start listening on `endpoint`.
    ///
    /// ## Arguments
    /// - `endpoint`: the bound transport to receive on
    /// - `buffer_size`: size of the receive buffer, see [`DEFAULT_RECV_BUFFER_SIZE`]
    /// - `callback`: called on the I/O thread with every successfully parsed message
    /// - `audit`: if given, the raw bytes of every handled datagram are recorded
    pub fn new<E, F>(
        endpoint: E,
        buffer_size: usize,
        callback: F,
        audit: Option<AuditSink>,
    ) -> Result<Self, MsgListenerError>
    where
        E: DatagramEndpoint,
        F: FnMut(T) + Send + 'static
    {
        let endpoint: Arc<dyn DatagramEndpoint> = Arc::new(endpoint);
        let running = Arc::new(AtomicBool::new(true));

        let thread_endpoint = endpoint.clone();
        let thread_running = running.clone();
        let join_handle = thread::Builder::new()
            .name(format!("listener_{}", endpoint.describe()))
            .spawn(move || listen::<T, F>(
                thread_endpoint,
                thread_running,
                buffer_size.max(1),
                callback,
                audit
            ))
            .map_err(MsgListenerError::SpawnError)?;

        debug!("Listening for {} on {}", std::any::type_name::<T>(), endpoint.describe());

        Ok(Self {
            endpoint,
            running,
            join_handle: Some(join_handle),
            _msg: PhantomData,
        })
    }
}

impl<T> MsgListener<T> {
    /// True until [`MsgListener::stop`] has been called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop listening and tear the transport down.
    ///
    /// Teardown errors are logged, never returned. Calling this more than once has no effect.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return
        }

        if let Err(e) = self.endpoint.shutdown() {
            warn!(
                "Network error while shutting down the {} listener on {}: {}",
                std::any::type_name::<T>(), self.endpoint.describe(), e
            );
        }

        if let Some(jh) = self.join_handle.take() {
            if jh.join().is_err() {
                warn!("Listener thread for {} panicked", self.endpoint.describe());
            }
        }

        if let Err(e) = self.endpoint.close() {
            warn!(
                "Network error while closing the {} listener on {}: {}",
                std::any::type_name::<T>(), self.endpoint.describe(), e
            );
        }
    }
}

impl<T> Drop for MsgListener<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<E: DatagramEndpoint + ?Sized> DatagramEndpoint for Box<E> {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv(buf)
    }

    fn shutdown(&self) -> io::Result<()> {
        (**self).shutdown()
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl UnixEndpoint {
    /// Bind to `path`, replacing any stale socket file left there.
    pub fn bind<P: AsRef<Path>>(path: P, buffer_size: usize) -> Result<Self, MsgListenerError> {
        let path = path.as_ref().to_path_buf();

        match fs::remove_file(&path) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::NotFound => (),
            Err(e) => return Err(MsgListenerError::BindError(format!("{:?}", path), e)),
        }

        let socket = UnixDatagram::bind(&path)
            .map_err(|e| MsgListenerError::BindError(format!("{:?}", path), e))?;
        socket.set_read_timeout(Some(RECV_POLL_TIMEOUT))
            .map_err(MsgListenerError::SocketOptionError)?;
        set_recv_buffer_size(&socket, buffer_size)?;

        Ok(Self { socket, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DatagramEndpoint for UnixEndpoint {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }

    fn shutdown(&self) -> io::Result<()> {
        self.socket.shutdown(std::net::Shutdown::Both)
    }

    fn close(&self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

impl UdpEndpoint {
    /// Bind to `port` on all addresses. If `address` is a multicast group the socket joins it on
    /// the named interface, otherwise the socket binds to `address` directly.
    pub fn bind(
        address: &str,
        port: u16,
        interface: Option<&str>,
        buffer_size: usize,
    ) -> Result<Self, MsgListenerError> {
        let ip: IpAddr = address.parse()
            .map_err(|_| MsgListenerError::AddressError(UdpError::InvalidAddress(address.into())))?;

        let (bind_addr, multicast) = match ip {
            IpAddr::V6(group) if group.is_multicast() => {
                let index = match interface {
                    Some(name) => interface_index(name).map_err(MsgListenerError::AddressError)?,
                    None => 0
                };
                (SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)), Some((group, index)))
            },
            IpAddr::V4(group) if group.is_multicast() => {
                (SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), None)
            },
            other => (SocketAddr::from((other, port)), None),
        };

        let socket = UdpSocket::bind(bind_addr)
            .map_err(|e| MsgListenerError::BindError(bind_addr.to_string(), e))?;

        let joined = match (ip, multicast) {
            (_, Some((group, index))) => socket.join_multicast_v6(&group, index),
            (IpAddr::V4(group), None) if group.is_multicast() =>
                socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED),
            _ => Ok(()),
        };
        joined.map_err(MsgListenerError::SocketOptionError)?;

        socket.set_read_timeout(Some(RECV_POLL_TIMEOUT))
            .map_err(MsgListenerError::SocketOptionError)?;
        set_recv_buffer_size(&socket, buffer_size)?;

        Ok(Self { socket, multicast })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramEndpoint for UdpEndpoint {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }

    fn shutdown(&self) -> io::Result<()> {
        // Unconnected UDP sockets can't be shut down, the read timeout wakes the I/O thread
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        match self.multicast {
            Some((group, index)) => self.socket.leave_multicast_v6(&group, index),
            None => Ok(()),
        }
    }

    fn describe(&self) -> String {
        match self.socket.local_addr() {
            Ok(a) => a.to_string(),
            Err(_) => String::from("udp"),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Body of the listener's I/O thread.
fn listen<T, F>(
    endpoint: Arc<dyn DatagramEndpoint>,
    running: Arc<AtomicBool>,
    buffer_size: usize,
    mut callback: F,
    audit: Option<AuditSink>,
)
where
    T: DeserializeOwned,
    F: FnMut(T)
{
    let mut buf = vec![0u8; buffer_size];

    loop {
        let result = endpoint.recv(&mut buf);

        if !running.load(Ordering::Acquire) {
            return
        }

        match result {
            Ok(num_bytes) => {
                if num_bytes >= buffer_size {
                    warn!(
                        "Received {} bytes on {}, which fills the receive buffer. Data loss has \
                        potentially occurred, consider increasing the buffer size",
                        num_bytes, endpoint.describe()
                    );
                }

                let data = &buf[..num_bytes];
                match serde_json::from_slice::<T>(data) {
                    Ok(msg) => {
                        callback(msg);

                        if let Some(ref sink) = audit {
                            sink.record(data);
                        }
                    },
                    Err(e) => warn!(
                        "Could not parse {} byte datagram on {} as {}: {}",
                        num_bytes, endpoint.describe(), std::any::type_name::<T>(), e
                    ),
                }
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => (),
            Err(e) => {
                warn!(
                    "Network error while receiving {} on {}: {}",
                    std::any::type_name::<T>(), endpoint.describe(), e
                );
                thread::sleep(ERROR_BACKOFF);
            },
        }
    }
}

/// Set `SO_RCVBUF` on a socket.
fn set_recv_buffer_size<S: AsRawFd>(socket: &S, size: usize) -> Result<(), MsgListenerError> {
    let size = size.min(libc::c_int::MAX as usize) as libc::c_int;

    // Safety: the fd is valid for the lifetime of `socket` and `size` outlives the call
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &size as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    match ret {
        0 => Ok(()),
        _ => Err(MsgListenerError::SocketOptionError(io::Error::last_os_error())),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::net::udp::UdpSender;
    use serde::Deserialize;
    use std::sync::mpsc::{channel, Receiver};

    #[derive(Deserialize, Debug, PartialEq)]
    struct Ping {
        seq: u32,
    }

    const WAIT: Duration = Duration::from_secs(2);

    fn unix_listener(
        dir: &tempfile::TempDir,
        buffer_size: usize,
    ) -> (MsgListener<Ping>, PathBuf, Receiver<Ping>) {
        let path = dir.path().join("ping.sock");
        let endpoint = UnixEndpoint::bind(&path, buffer_size).unwrap();
        let (tx, rx) = channel();
        let listener = MsgListener::new(
            endpoint,
            buffer_size,
            move |p: Ping| { tx.send(p).ok(); },
            None,
        ).unwrap();
        (listener, path, rx)
    }

    #[test]
    fn test_recovers_after_corrupt_datagram() {
        let dir = tempfile::tempdir().unwrap();
        let (mut listener, path, rx) = unix_listener(&dir, DEFAULT_RECV_BUFFER_SIZE);

        let client = UnixDatagram::unbound().unwrap();
        client.send_to(b"\x00\xffnot json", &path).unwrap();
        client.send_to(b"", &path).unwrap();
        client.send_to(br#"{"seq": 7}"#, &path).unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ping { seq: 7 });
        assert!(rx.try_recv().is_err());

        listener.stop();
        assert!(!listener.is_running());
        assert!(!path.exists());
    }

    #[test]
    fn test_truncated_datagram_does_not_stop_listener() {
        let dir = tempfile::tempdir().unwrap();
        let (_listener, path, rx) = unix_listener(&dir, 16);

        let client = UnixDatagram::unbound().unwrap();
        // Longer than the buffer so it is cut short and fails to parse
        client.send_to(br#"{"seq": 1, "padding": "xxxxxxxxxxxxxxxx"}"#, &path).unwrap();
        client.send_to(br#"{"seq": 2}"#, &path).unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ping { seq: 2 });
    }

    #[test]
    fn test_audit_records_handled_datagrams() {
        let dir = tempfile::tempdir().unwrap();
        let audit_path = dir.path().join("audit.bin");
        let audit = util::audit::AuditLog::new(&audit_path).unwrap();

        let path = dir.path().join("audited.sock");
        let (tx, rx) = channel();
        let mut listener = MsgListener::new(
            UnixEndpoint::bind(&path, DEFAULT_RECV_BUFFER_SIZE).unwrap(),
            DEFAULT_RECV_BUFFER_SIZE,
            move |p: Ping| { tx.send(p).ok(); },
            audit.sink(),
        ).unwrap();

        let client = UnixDatagram::unbound().unwrap();
        client.send_to(b"garbage", &path).unwrap();
        client.send_to(br#"{"seq":3}"#, &path).unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ping { seq: 3 });

        // Listener holds a sink, so it must stop before the audit log can finish
        listener.stop();
        drop(listener);
        audit.exit();

        let written = fs::read(&audit_path).unwrap();
        // 8 byte timestamp + 4 byte length + payload, garbage is not recorded
        assert_eq!(written.len(), 12 + br#"{"seq":3}"#.len());
        assert!(written.ends_with(br#"{"seq":3}"#));
    }

    #[test]
    fn test_udp_listener() {
        let endpoint = UdpEndpoint::bind("127.0.0.1", 0, None, DEFAULT_RECV_BUFFER_SIZE).unwrap();
        let port = endpoint.local_addr().unwrap().port();

        let (tx, rx) = channel();
        let mut listener = MsgListener::new(
            endpoint,
            DEFAULT_RECV_BUFFER_SIZE,
            move |p: Ping| { tx.send(p).ok(); },
            None,
        ).unwrap();

        let sender = UdpSender::new("127.0.0.1", port, None).unwrap();
        sender.send_bytes(b"{").unwrap();
        sender.send_bytes(br#"{"seq": 11}"#).unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ping { seq: 11 });
        listener.stop();
    }
}
