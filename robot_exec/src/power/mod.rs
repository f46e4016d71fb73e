//! # Power module
//!
//! The power board handles the battery, the kicker and chipper capacitor, and the breakbeam. It
//! talks to the robot's computer over a serial link using fixed size frames: every exchange is
//! one status frame from the board followed by one command frame to it.
//!
//! [`PowerService`] runs that exchange continuously on its own thread, so the control loop only
//! ever touches the latest status and the next command through a [`CommandChannel`].
//!
//! [`CommandChannel`]: crate::handoff::CommandChannel

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod serial;
mod service;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use comms_if::eqpt::power::{KickCalibration, PowerControl, PowerStatus};

pub use serial::*;
pub use service::*;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// The control loop's view of a power board.
pub trait PowerLink: Send {
    /// Hand over the next command and get the latest status. Must never block on I/O.
    fn poll(&mut self, control: &PowerControl, calibration: &KickCalibration) -> PowerStatus;

    /// Time since the last good status was received, `None` if none has been received yet.
    fn status_age(&self) -> Option<Duration>;

    /// Stop any background activity, blocking until it has finished.
    fn stop(&mut self);
}
