//! # Data Store
//!
//! Holds everything the control loop gathers during a cycle. It is cleared at the start of every
//! cycle and merged into the robot status at the end of it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::{Duration, Instant};

use comms_if::{
    eqpt::{motor::LocalVelocity, power::PowerControl},
    status::{ErrorCode, ThunderloopStatus},
};
use util::time::duration_to_ms;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Control loop data store.
#[derive(Debug, Default)]
pub struct DataStore {
    // Cycle management
    /// Number of cycles already executed
    pub num_cycles: u64,

    /// True if this cycle falls on a 1Hz boundary
    pub is_1_hz_cycle: bool,

    /// Start of the previous cycle
    pub last_cycle_start: Option<Instant>,

    /// Data gathered this cycle
    pub iteration: IterationState,

    // Data carried between cycles
    /// Velocity measured by the motor service on the previous cycle
    pub measured_velocity: LocalVelocity,

    /// Latest CPU temperature, refreshed at 1 Hz
    pub cpu_temperature_c: Option<f64>,

    /// Latest power rail stability check, refreshed at 1 Hz
    pub power_stable: bool,
}

/// Per-cycle data, discarded once merged into the status.
#[derive(Debug, Clone, Default)]
pub struct IterationState {
    /// Time the loop woke for this cycle
    pub wake: Option<Instant>,

    /// Duration of the whole previous cycle, wake to wake
    pub iteration_time: Duration,

    pub network_poll_time: Duration,
    pub executor_start_time: Duration,
    pub executor_step_time: Duration,
    pub power_poll_time: Duration,
    pub motor_poll_time: Duration,

    /// Power demand sent this cycle
    pub power_control: PowerControl,

    pub faults: Vec<ErrorCode>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DataStore {
    /// Perform actions required at the start of a cycle.
    ///
    /// Clears the per-cycle data and sets the 1Hz cycle flag.
    pub fn cycle_start(&mut self, now: Instant, cycle_frequency_hz: f64) {
        let cycles_per_second = (cycle_frequency_hz.round() as u64).max(1);
        self.is_1_hz_cycle = self.num_cycles % cycles_per_second == 0;

        self.iteration = IterationState {
            wake: Some(now),
            iteration_time: self.last_cycle_start
                .map(|l| now.saturating_duration_since(l))
                .unwrap_or_default(),
            ..Default::default()
        };

        self.last_cycle_start = Some(now);
    }

    /// Perform actions required at the end of a cycle.
    pub fn cycle_end(&mut self) {
        self.num_cycles += 1;
    }
}

impl IterationState {
    /// Stage timings in the form reported in the status.
    pub fn thunderloop_status(&self) -> ThunderloopStatus {
        ThunderloopStatus {
            network_service_poll_time_ms: duration_to_ms(self.network_poll_time),
            primitive_executor_start_time_ms: duration_to_ms(self.executor_start_time),
            primitive_executor_step_time_ms: duration_to_ms(self.executor_step_time),
            power_service_poll_time_ms: duration_to_ms(self.power_poll_time),
            motor_service_poll_time_ms: duration_to_ms(self.motor_poll_time),
            iteration_time_ms: duration_to_ms(self.iteration_time),
        }
    }
}
