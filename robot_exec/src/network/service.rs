//! Network service

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use std::{sync::Arc, time::Instant};

use comms_if::{
    net::{
        listener::{
            DatagramEndpoint, MsgListener, MsgListenerError, UdpEndpoint, UnixEndpoint,
            DEFAULT_RECV_BUFFER_SIZE
        },
        udp::{UdpError, UdpSender},
        NetParams,
    },
    primitive::{PrimitiveSet, Timestamp},
    status::RobotStatus,
};
use util::{audit::AuditSink, time::epoch_seconds};

use super::{
    InboundPrimitive, NetworkLink, PrimitiveTracker, RttRecord, RttTracker, StatusRateLimiter
};
use crate::params::{RobotParams, ThunderloopParams};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Receives primitive sets from every configured source and sends robot statuses.
///
/// Each source has its own listener thread and its own [`Handoff`] slot holding the newest set
/// that source has delivered. [`NetworkService::poll`] picks the newest across all slots.
///
/// [`Handoff`]: crate::handoff::Handoff
pub struct NetworkService {
    status_sender: UdpSender,
    listeners: Vec<MsgListener<PrimitiveSet>>,
    sources: Vec<Arc<PrimitiveSlot>>,
    latest: Option<InboundPrimitive>,
    rtt: RttTracker,
    rate: StatusRateLimiter,
}

type PrimitiveSlot = crate::handoff::Handoff<Option<InboundPrimitive>>;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NetworkServiceError {
    #[error("No multicast group for channel {0}")]
    UnknownChannel(usize),

    #[error("Could not create the status sender: {0}")]
    SenderError(UdpError),

    #[error("Could not start the primitive listener: {0}")]
    ListenerError(MsgListenerError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NetworkService {
    /// Create the service from the robot's parameters.
    ///
    /// Primitive sets are received on the robot's multicast channel, and also on the local unix
    /// socket if one is configured. Statuses are sent to the same channel.
    pub fn new(
        robot: &RobotParams,
        net: &NetParams,
        loop_params: &ThunderloopParams,
        audit: Option<AuditSink>,
    ) -> Result<Self, NetworkServiceError> {
        let group = NetParams::multicast_group(robot.channel_id)
            .ok_or(NetworkServiceError::UnknownChannel(robot.channel_id))?;
        let interface = Some(robot.network_interface.as_str());

        let status_sender = UdpSender::new(group, net.robot_status_port, interface)
            .map_err(NetworkServiceError::SenderError)?;

        let mut endpoints: Vec<Box<dyn DatagramEndpoint>> = vec![Box::new(
            UdpEndpoint::bind(group, net.primitive_port, interface, DEFAULT_RECV_BUFFER_SIZE)
                .map_err(NetworkServiceError::ListenerError)?
        )];

        if let Some(ref path) = net.local_primitive_path {
            endpoints.push(Box::new(
                UnixEndpoint::bind(path, DEFAULT_RECV_BUFFER_SIZE)
                    .map_err(NetworkServiceError::ListenerError)?
            ));
        }

        info!(
            "Network service sending statuses to {}, listening for primitives on {} source(s)",
            status_sender.dest(), endpoints.len()
        );

        Self::with_endpoints(status_sender, endpoints, loop_params, audit)
    }

    /// Create the service on explicit endpoints.
    pub fn with_endpoints(
        status_sender: UdpSender,
        endpoints: Vec<Box<dyn DatagramEndpoint>>,
        loop_params: &ThunderloopParams,
        audit: Option<AuditSink>,
    ) -> Result<Self, NetworkServiceError> {
        let mut listeners = Vec::with_capacity(endpoints.len());
        let mut sources = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            let slot = Arc::new(PrimitiveSlot::default());
            let listener = MsgListener::new(
                endpoint,
                DEFAULT_RECV_BUFFER_SIZE,
                source_callback(slot.clone()),
                audit.clone()
            ).map_err(NetworkServiceError::ListenerError)?;

            listeners.push(listener);
            sources.push(slot);
        }

        Ok(Self {
            status_sender,
            listeners,
            sources,
            latest: None,
            rtt: RttTracker::new(loop_params.primitive_rate_hz, loop_params.status_rate_hz),
            rate: StatusRateLimiter::new(loop_params.loop_hz, loop_params.status_rate_hz),
        })
    }

    /// Get the newest primitive set, and send `status` if the rate limiter says it's worth it.
    pub fn poll(&mut self, status: &mut RobotStatus) -> Option<InboundPrimitive> {
        // Newest across every source first, so only that one is recorded
        let mut newest: Option<Arc<Option<InboundPrimitive>>> = None;
        for slot in self.sources.iter() {
            let candidate = slot.load();
            let replaces = match (&*candidate, newest.as_deref()) {
                (None, _) => false,
                (Some(_), None) | (Some(_), Some(None)) => true,
                (Some(c), Some(Some(n))) => c.set.is_newer_than(&n.set),
            };
            if replaces {
                newest = Some(candidate);
            }
        }

        if let Some(Some(inbound)) = newest.as_deref() {
            let is_newer = match self.latest {
                Some(ref latest) => inbound.set.is_newer_than(&latest.set),
                None => true,
            };

            if is_newer {
                self.rtt.record(RttRecord {
                    sequence_number: inbound.set.sequence_number,
                    ai_sent_time_seconds: inbound.set.time_sent.epoch_timestamp_seconds,
                    robot_received_time_seconds: inbound.received_time_seconds,
                });
                self.latest = Some(inbound.clone());
            }
        }

        if let Some(ref latest) = self.latest {
            status.network_status.primitive_packet_loss_percentage = latest.loss_percentage;
        }

        if self.rate.should_send(status) {
            let now = epoch_seconds();
            status.time_sent = Timestamp { epoch_timestamp_seconds: now };
            status.network_status.primitive_round_trip = self.rtt.resolve(
                status.last_handled_primitive_set,
                now
            );

            if let Err(e) = self.status_sender.send_msg(status) {
                warn!("Could not send robot status: {}", e);
            }
        }
        else {
            status.network_status.primitive_round_trip = None;
        }

        self.latest.clone()
    }

    /// Stop every listener. Calling this more than once has no effect.
    pub fn stop(&mut self) {
        for listener in self.listeners.iter_mut() {
            listener.stop();
        }
        debug!("Network service stopped");
    }
}

impl NetworkLink for NetworkService {
    fn poll(&mut self, status: &mut RobotStatus) -> Option<InboundPrimitive> {
        NetworkService::poll(self, status)
    }

    fn stop(&mut self) {
        NetworkService::stop(self)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build the callback run on a source's listener thread.
///
/// Only sets newer than the last one this source delivered are published, so a reordered
/// datagram can't replace a newer set the control loop hasn't seen yet.
fn source_callback(slot: Arc<PrimitiveSlot>) -> impl FnMut(PrimitiveSet) + Send + 'static {
    let mut tracker = PrimitiveTracker::default();
    let mut newest: Option<Timestamp> = None;

    move |set: PrimitiveSet| {
        tracker.record(set.sequence_number);

        let is_newer = match newest {
            Some(ts) => set.time_sent.epoch_timestamp_seconds > ts.epoch_timestamp_seconds,
            None => true,
        };
        if !is_newer {
            return
        }
        newest = Some(set.time_sent);

        slot.publish(Some(InboundPrimitive {
            set,
            received_at: Instant::now(),
            received_time_seconds: epoch_seconds(),
            loss_percentage: tracker.loss_percentage(),
        }));
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::primitive::Primitive;
    use std::{
        net::UdpSocket,
        os::unix::net::UnixDatagram,
        time::Duration,
    };

    fn set(seq: u64, t: f64) -> PrimitiveSet {
        let mut s = PrimitiveSet {
            sequence_number: seq,
            time_sent: Timestamp { epoch_timestamp_seconds: t },
            ..Default::default()
        };
        s.robot_primitives.insert(0, Primitive::Stop);
        s
    }

    #[test]
    fn test_source_callback_ignores_older_sets() {
        let slot = Arc::new(PrimitiveSlot::default());
        let mut callback = source_callback(slot.clone());

        callback(set(5, 10.0));
        callback(set(4, 9.0));
        assert_eq!(slot.get().unwrap().set.sequence_number, 5);

        // Reordered: smaller sequence but sent later still wins
        callback(set(3, 11.0));
        assert_eq!(slot.get().unwrap().set.sequence_number, 3);
    }

    #[test]
    fn test_poll_receives_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("primitive.sock");

        // Status socket standing in for the AI
        let ai = UdpSocket::bind("127.0.0.1:0").unwrap();
        ai.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let status_sender = UdpSender::new(
            "127.0.0.1", ai.local_addr().unwrap().port(), None
        ).unwrap();

        let params = ThunderloopParams::for_tests();
        let mut service = NetworkService::with_endpoints(
            status_sender,
            vec![Box::new(UnixEndpoint::bind(&path, DEFAULT_RECV_BUFFER_SIZE).unwrap())],
            &params,
            None
        ).unwrap();

        // Nothing received yet, but the first status always goes out
        let mut status = RobotStatus::default();
        assert!(service.poll(&mut status).is_none());
        let mut buf = [0u8; 65536];
        let n = ai.recv(&mut buf).unwrap();
        let sent: RobotStatus = serde_json::from_slice(&buf[..n]).unwrap();
        assert!(sent.time_sent.epoch_timestamp_seconds > 0.0);
        assert!(sent.network_status.primitive_round_trip.is_none());

        // Deliver a set and wait for it to show up
        let now = epoch_seconds();
        let client = UnixDatagram::unbound().unwrap();
        client.send_to(&serde_json::to_vec(&set(42, now)).unwrap(), &path).unwrap();

        let start = Instant::now();
        let inbound = loop {
            if let Some(i) = service.poll(&mut status) {
                break i
            }
            assert!(start.elapsed() < Duration::from_secs(2), "set never arrived");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(inbound.set.sequence_number, 42);

        // Poll until the heartbeat sends a status echoing 42, which carries its round trip
        status.last_handled_primitive_set = 42;
        let rtt = loop {
            service.poll(&mut status);
            if let Some(rtt) = status.network_status.primitive_round_trip {
                break rtt
            }
        };
        assert_eq!(rtt.primitive_sequence_num, 42);
        assert!(rtt.round_trip_seconds() >= 0.0);

        service.stop();
        assert!(!path.exists());
    }

    #[test]
    fn test_poll_takes_newest_across_sources() {
        let dir = tempfile::tempdir().unwrap();
        let older_path = dir.path().join("older.sock");
        let newer_path = dir.path().join("newer.sock");

        let ai = UdpSocket::bind("127.0.0.1:0").unwrap();
        let status_sender = UdpSender::new(
            "127.0.0.1", ai.local_addr().unwrap().port(), None
        ).unwrap();

        // The source holding the older set is checked first
        let params = ThunderloopParams::for_tests();
        let mut service = NetworkService::with_endpoints(
            status_sender,
            vec![
                Box::new(UnixEndpoint::bind(&older_path, DEFAULT_RECV_BUFFER_SIZE).unwrap()),
                Box::new(UnixEndpoint::bind(&newer_path, DEFAULT_RECV_BUFFER_SIZE).unwrap()),
            ],
            &params,
            None
        ).unwrap();

        let client = UnixDatagram::unbound().unwrap();
        client.send_to(&serde_json::to_vec(&set(2, 9.0)).unwrap(), &older_path).unwrap();
        client.send_to(&serde_json::to_vec(&set(1, 10.0)).unwrap(), &newer_path).unwrap();

        // Wait for both listeners to deliver before polling
        let start = Instant::now();
        while service.sources.iter().any(|s| s.load().is_none()) {
            assert!(start.elapsed() < Duration::from_secs(2), "sets never arrived");
            std::thread::sleep(Duration::from_millis(5));
        }

        let mut status = RobotStatus::default();
        let inbound = service.poll(&mut status).unwrap();
        assert_eq!(inbound.set.sequence_number, 1);
        assert_eq!(service.rtt.len(), 1);

        // Nothing new, the older set is still not taken
        assert_eq!(service.poll(&mut status).unwrap().set.sequence_number, 1);
        assert_eq!(service.rtt.len(), 1);
        assert!(service.rtt.resolve(2, 20.0).is_none());

        service.stop();
    }
}
