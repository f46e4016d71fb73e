//! # Motor Board Interface
//!
//! Demands and feedback exchanged with the motor service. The motor board driver itself lives
//! outside this workspace, these types are the boundary the control loop talks across.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Robot-relative velocity.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct LocalVelocity {
    /// Forward velocity in m/s
    pub x_m_per_s: f64,

    /// Leftward velocity in m/s
    pub y_m_per_s: f64,

    /// Counter-clockwise angular velocity in rad/s
    pub angular_rad_per_s: f64,
}

/// Demands for the motor service.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct MotorControl {
    pub target_velocity: LocalVelocity,
    pub dribbler_speed_rpm: f64,
}

/// Faults reported for one motor.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct MotorFaultIndicator {
    pub motor: MotorIndex,
    pub enabled: bool,
    pub faults: Vec<MotorFault>,
}

/// Feedback from the motor service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct MotorStatus {
    /// Measured robot-relative velocity
    pub local_velocity: LocalVelocity,

    pub dribbler_speed_rpm: f64,

    /// One entry per motor that reported faults this cycle
    pub motor_faults: Vec<MotorFaultIndicator>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MotorIndex {
    FrontLeft,
    BackLeft,
    BackRight,
    FrontRight,
    Dribbler,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MotorFault {
    OverTemperature,
    OverCurrent,
    UnderVoltage,
    HallSensorError,
    CommsTimeout,
    DriverFault,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for MotorIndex {
    fn default() -> Self {
        MotorIndex::FrontLeft
    }
}

impl MotorStatus {
    /// Status reported when the motors have been commanded to stop.
    pub fn stopped() -> Self {
        Self::default()
    }
}
