//! # TM Server
//!
//! Side channel publishing a compact view of every cycle's status on a zmq PUB socket, for tools
//! that want to watch the robot without joining its multicast group.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use serde::{Serialize, Deserialize};

use comms_if::{
    net::{MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions, zmq},
    status::{ErrorCode, RobotStatus},
};

use crate::thunderloop::StatusObserver;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Topic every packet is published under.
pub const TM_TOPIC: &str = "robot_tm";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Telemetry server
pub struct TmServer {
    socket: MonitoredSocket,

    /// Number of consecutive failed sends, only the first of a run is logged
    num_consec_send_errors: u64,
}

/// Telemetry packet that is output by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TmPacket {
    pub robot_id: u32,

    pub epoch_time_s: f64,

    pub last_handled_primitive_set: u64,

    pub battery_voltage: f32,

    pub capacitor_voltage: f32,

    pub current_draw: f32,

    pub cpu_temperature: f64,

    pub iteration_time_ms: f64,

    pub error_code: Vec<ErrorCode>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TmServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send telemetry: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the telemetry: {0}")]
    SerializationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TmServer {
    /// Create a new instance of the TM Server.
    ///
    /// This function will not block until a subscriber connects.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, TmServerError> {
        Self::bind(ctx, &params.tm_endpoint)
    }

    pub fn bind(ctx: &zmq::Context, endpoint: &str) -> Result<Self, TmServerError> {
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            bind: true,
            linger: 1,
            send_timeout: 0,
            send_hwm: 10,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(
            ctx,
            zmq::PUB,
            socket_options,
            endpoint
        ).map_err(TmServerError::SocketError)?;

        Ok(Self {
            socket,
            num_consec_send_errors: 0,
        })
    }

    /// True if at least one subscriber is connected.
    pub fn connected(&self) -> bool {
        self.socket.connected()
    }

    pub fn send(&mut self, status: &RobotStatus) -> Result<(), TmServerError> {
        let packet = TmPacket::from_status(status);

        let packet_string = serde_json::to_string(&packet)
            .map_err(TmServerError::SerializationError)?;

        self.socket.send(&format!("{} {}", TM_TOPIC, packet_string), 0)
            .map_err(TmServerError::SendError)
    }
}

impl StatusObserver for TmServer {
    fn observe(&mut self, status: &RobotStatus) {
        match self.send(status) {
            Ok(()) => self.num_consec_send_errors = 0,
            Err(e) => {
                if self.num_consec_send_errors == 0 {
                    warn!("Could not publish telemetry: {}", e);
                }
                self.num_consec_send_errors += 1;
            }
        }
    }
}

impl TmPacket {
    pub fn from_status(status: &RobotStatus) -> Self {
        Self {
            robot_id: status.robot_id,
            epoch_time_s: util::time::epoch_seconds(),
            last_handled_primitive_set: status.last_handled_primitive_set,
            battery_voltage: status.power_status.battery_voltage,
            capacitor_voltage: status.power_status.capacitor_voltage,
            current_draw: status.power_status.current_draw,
            cpu_temperature: status.compute_status.cpu_temperature,
            iteration_time_ms: status.thunderloop_status.iteration_time_ms,
            error_code: status.error_code.clone(),
        }
    }

    /// Parse a message received on a subscriber socket.
    pub fn from_message(msg: &str) -> Option<Self> {
        let body = msg.strip_prefix(TM_TOPIC)?.trim_start();
        serde_json::from_str(body).ok()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_packet_from_status() {
        let mut status = RobotStatus {
            robot_id: 2,
            last_handled_primitive_set: 17,
            error_code: vec![ErrorCode::HighCap],
            ..Default::default()
        };
        status.power_status.battery_voltage = 23.5;

        let packet = TmPacket::from_status(&status);
        assert_eq!(packet.robot_id, 2);
        assert_eq!(packet.battery_voltage, 23.5);
        assert_eq!(packet.error_code, vec![ErrorCode::HighCap]);

        let msg = format!("{} {}", TM_TOPIC, serde_json::to_string(&packet).unwrap());
        assert_eq!(TmPacket::from_message(&msg), Some(packet));
        assert_eq!(TmPacket::from_message("other {}"), None);
    }

    #[test]
    fn test_publish_to_subscriber() {
        let ctx = zmq::Context::new();
        let endpoint = "inproc://tm_server_test";
        let mut server = TmServer::bind(&ctx, endpoint).unwrap();

        let sub = ctx.socket(zmq::SUB).unwrap();
        sub.connect(endpoint).unwrap();
        sub.set_subscribe(TM_TOPIC.as_bytes()).unwrap();
        sub.set_rcvtimeo(50).unwrap();

        let status = RobotStatus { robot_id: 9, ..Default::default() };

        // PUB drops messages until the subscription has propagated, so keep publishing
        let start = Instant::now();
        let packet = loop {
            server.observe(&status);
            if let Ok(msg) = sub.recv_string(0) {
                if let Some(p) = msg.ok().and_then(|m| TmPacket::from_message(&m)) {
                    break p
                }
            }
            assert!(start.elapsed() < Duration::from_secs(5), "no telemetry received");
        };

        assert_eq!(packet.robot_id, 9);
    }
}
