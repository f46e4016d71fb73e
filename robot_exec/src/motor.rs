//! # Motor service
//!
//! The motor board driver is outside this crate. The control loop only needs to hand it a
//! [`MotorControl`] each cycle and get back a [`MotorStatus`], whose measured velocity is fed to
//! the primitive executor on the next cycle.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::motor::{MotorControl, MotorStatus};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait MotorService: Send {
    /// Apply `control` and return the latest feedback. Must not block on I/O.
    fn poll(&mut self, control: &MotorControl) -> MotorStatus;

    /// Bring the motors to a stop.
    fn make_safe(&mut self);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Used when no motor board is fitted.
///
/// Reports the commanded velocity as the measured one, which lets the executor's acceleration
/// limiting run open loop.
#[derive(Debug, Default)]
pub struct NullMotorService {
    last: MotorStatus,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MotorService for NullMotorService {
    fn poll(&mut self, control: &MotorControl) -> MotorStatus {
        self.last = MotorStatus {
            local_velocity: control.target_velocity,
            dribbler_speed_rpm: control.dribbler_speed_rpm,
            motor_faults: vec![],
        };
        self.last.clone()
    }

    fn make_safe(&mut self) {
        self.last = MotorStatus::stopped();
    }
}
