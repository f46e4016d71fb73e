//! # Robot Status
//!
//! Status reports flow from the robot back to the AI. A full [`RobotStatus`] is assembled by the
//! control loop every cycle; a [`RobotCrash`] is broadcast once if the robot software dies.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::{
    eqpt::{motor::MotorStatus, power::PowerStatus},
    primitive::Timestamp,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Everything the robot reports about itself.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RobotStatus {
    pub robot_id: u32,

    /// Sequence number of the primitive set the loop was executing when this status was built
    pub last_handled_primitive_set: u64,

    pub time_sent: Timestamp,

    pub thunderloop_status: ThunderloopStatus,
    pub network_status: NetworkStatus,
    pub power_status: PowerStatus,
    pub motor_status: MotorStatus,
    pub compute_status: ComputeStatus,
    pub chipper_kicker_status: ChipperKickerStatus,
    pub primitive_executor_status: PrimitiveExecutorStatus,

    /// Faults raised this cycle
    pub error_code: Vec<ErrorCode>,

    /// Hash of the flashed control loop build
    pub firmware_version: String,

    /// Date the control loop was flashed
    pub date_flashed: String,
}

/// Per-stage timing of the control loop, all in milliseconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ThunderloopStatus {
    pub network_service_poll_time_ms: f64,
    pub primitive_executor_start_time_ms: f64,
    pub primitive_executor_step_time_ms: f64,
    pub power_service_poll_time_ms: f64,
    pub motor_service_poll_time_ms: f64,

    /// Duration of the whole previous iteration
    pub iteration_time_ms: f64,
}

/// Network telemetry.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct NetworkStatus {
    pub ms_since_last_primitive_received: f64,

    /// Fraction of primitive sets lost over the tracking window, as a percentage
    pub primitive_packet_loss_percentage: f64,

    /// Round trip record for the primitive set echoed in `last_handled_primitive_set`, if it was
    /// still being tracked
    pub primitive_round_trip: Option<RoundTripTime>,
}

/// Timing of one primitive set from the AI to the robot and back.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct RoundTripTime {
    pub primitive_sequence_num: u64,

    /// Epoch time the AI sent the primitive set
    pub ai_sent_time_seconds: f64,

    /// Epoch time the robot received the primitive set
    pub robot_received_time_seconds: f64,

    /// Epoch time the status echoing this set was sent
    pub status_sent_time_seconds: f64,
}

/// State of the robot's on-board computer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ComputeStatus {
    pub cpu_temperature: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ChipperKickerStatus {
    pub ms_since_kicker_fired: f64,
    pub ms_since_chipper_fired: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct PrimitiveExecutorStatus {
    /// True while the executor is running the stop primitive
    pub running_stop: bool,

    /// True if the stop was forced because primitives timed out
    pub timed_out: bool,
}

/// Report broadcast when the robot software is killed by a signal.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RobotCrash {
    pub robot_id: u32,
    pub stack_dump: String,
    pub exit_signal: String,

    /// Last status the control loop assembled before the crash
    pub status: RobotStatus,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Conditions the robot flags to the operator.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    LowBattery,
    HighCap,
    HighBoardTemp,
    UnstablePowerSupply,
    PeripheralDisconnected,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RoundTripTime {
    /// Time spent between the AI sending the set and the robot echoing it.
    pub fn round_trip_seconds(&self) -> f64 {
        self.status_sent_time_seconds - self.ai_sent_time_seconds
    }
}
