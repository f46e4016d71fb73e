//! # Network module
//!
//! Decouples the asynchronous arrival of primitive sets from the control loop, which polls for
//! the newest one once per cycle, and sends robot statuses back to the AI.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod rate;
mod rtt;
mod service;
mod tracker;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Instant;

use comms_if::{primitive::PrimitiveSet, status::RobotStatus};

pub use rate::*;
pub use rtt::*;
pub use service::*;
pub use tracker::*;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// The control loop's view of the network.
pub trait NetworkLink: Send {
    /// Get the newest primitive set received so far and, if warranted, send `status`.
    ///
    /// Never blocks waiting for a message. Fills in the network fields of `status` that only the
    /// network knows.
    fn poll(&mut self, status: &mut RobotStatus) -> Option<InboundPrimitive>;

    /// Stop receiving, blocking until all receive threads have finished.
    fn stop(&mut self);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A received primitive set along with its reception details.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundPrimitive {
    pub set: PrimitiveSet,

    /// When the set was received, on the monotonic clock
    pub received_at: Instant,

    /// When the set was received, in epoch seconds
    pub received_time_seconds: f64,

    /// Packet loss of the source the set arrived on, at the time it arrived
    pub loss_percentage: f64,
}
