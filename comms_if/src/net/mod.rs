//! # Network Module
//!
//! This module provides the networking abstractions used by the robot:
//!
//! - [`MonitoredSocket`]: a ZMQ socket with a background monitor counting connected peers, used
//!   for the telemetry side channel.
//! - [`udp::UdpSender`]: a multicast UDP sender used for robot status and crash reports.
//! - [`listener::MsgListener`]: a datagram listener which deserializes one message per datagram
//!   and hands it to a callback on its own I/O thread.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod listener;
mod monitored;
pub mod udp;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

pub use monitored::*;

// Export zmq
pub use zmq;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// IPv6 multicast groups, indexed by channel id. Each channel isolates one field's robots.
pub const ROBOT_MULTICAST_CHANNELS: [&str; 4] = [
    "ff02::c3d0:42d2:bb01",
    "ff02::c3d0:42d2:bb02",
    "ff02::c3d0:42d2:bb03",
    "ff02::c3d0:42d2:bb04",
];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Network parameters shared by every networked component of the robot.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NetParams {
    /// Port primitive sets are multicast to
    pub primitive_port: u16,

    /// Port robot statuses are multicast to
    pub robot_status_port: u16,

    /// Port crash reports are multicast to
    pub robot_crash_port: u16,

    /// Port used to check the network is up at startup
    pub network_test_port: u16,

    /// Optional unix datagram socket path primitive sets are also accepted on (simulators and
    /// co-located tools)
    pub local_primitive_path: Option<String>,

    /// If true every received primitive datagram is written to the session's audit directory
    pub audit_primitives: bool,

    /// ZMQ endpoint the telemetry side channel publishes on
    pub tm_endpoint: String,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NetParams {
    /// Look up the multicast group for a channel id.
    pub fn multicast_group(channel_id: usize) -> Option<&'static str> {
        ROBOT_MULTICAST_CHANNELS.get(channel_id).copied()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
