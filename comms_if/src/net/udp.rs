//! # UDP Sender
//!
//! Sends serialized messages to a multicast group (or a plain unicast address) on a given
//! interface. IPv6 link-local multicast groups need the interface index as the scope of the
//! destination address, which is looked up from the interface name.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;
use std::{
    ffi::CString,
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6, UdpSocket},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A UDP socket bound to an ephemeral port which sends every message to a fixed destination.
#[derive(Debug)]
pub struct UdpSender {
    socket: UdpSocket,
    dest: SocketAddr,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum UdpError {
    #[error("{0:?} is not a valid IP address")]
    InvalidAddress(String),

    #[error("Network interface {0:?} does not exist")]
    UnknownInterface(String),

    #[error("Could not create the UDP socket: {0}")]
    SocketError(io::Error),

    #[error("Could not send the datagram: {0}")]
    SendError(io::Error),

    #[error("Could not serialize the message: {0}")]
    SerializationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl UdpSender {
    /// Create a new sender.
    ///
    /// ## Arguments
    /// - `address`: destination IP, either a multicast group or a unicast address
    /// - `port`: destination port
    /// - `interface`: name of the network interface to send on, required to scope IPv6
    ///   link-local addresses
    pub fn new(address: &str, port: u16, interface: Option<&str>) -> Result<Self, UdpError> {
        let ip: IpAddr = address.parse()
            .map_err(|_| UdpError::InvalidAddress(address.into()))?;

        let (bind_addr, dest) = match ip {
            IpAddr::V4(v4) => (
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
                SocketAddr::from((v4, port))
            ),
            IpAddr::V6(v6) => {
                let scope_id = match interface {
                    Some(name) => interface_index(name)?,
                    None => 0
                };
                (
                    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
                    SocketAddr::V6(SocketAddrV6::new(v6, port, 0, scope_id))
                )
            }
        };

        let socket = UdpSocket::bind(bind_addr).map_err(UdpError::SocketError)?;

        if ip.is_multicast() {
            match ip {
                IpAddr::V4(_) => socket.set_multicast_loop_v4(true),
                IpAddr::V6(_) => socket.set_multicast_loop_v6(true),
            }.map_err(UdpError::SocketError)?;
        }

        Ok(Self { socket, dest })
    }

    /// Destination every datagram is sent to.
    pub fn dest(&self) -> SocketAddr {
        self.dest
    }

    /// Send raw bytes as a single datagram.
    pub fn send_bytes(&self, bytes: &[u8]) -> Result<usize, UdpError> {
        self.socket.send_to(bytes, self.dest).map_err(UdpError::SendError)
    }

    /// Serialize a message as JSON and send it as a single datagram.
    pub fn send_msg<T: Serialize>(&self, msg: &T) -> Result<(), UdpError> {
        let bytes = serde_json::to_vec(msg).map_err(UdpError::SerializationError)?;
        self.send_bytes(&bytes).map(|_| ())
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Look up the kernel index of a network interface by name.
pub fn interface_index(name: &str) -> Result<u32, UdpError> {
    let c_name = CString::new(name).map_err(|_| UdpError::UnknownInterface(name.into()))?;

    // Safety: `c_name` is a valid NUL terminated string that outlives the call
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };

    match index {
        0 => Err(UdpError::UnknownInterface(name.into())),
        i => Ok(i)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_send_to_local_socket() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(std::time::Duration::from_secs(2))).unwrap();
        let port = receiver.local_addr().unwrap().port();

        let sender = UdpSender::new("127.0.0.1", port, None).unwrap();
        sender.send_msg(&vec![1u32, 2, 3]).unwrap();

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"[1,2,3]");
    }

    #[test]
    fn test_bad_inputs() {
        assert!(matches!(
            UdpSender::new("not an ip", 1000, None),
            Err(UdpError::InvalidAddress(_))
        ));
        assert!(matches!(
            interface_index("definitely_not_an_iface0"),
            Err(UdpError::UnknownInterface(_))
        ));
    }
}
