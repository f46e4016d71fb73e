//! Status rate limiting

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{eqpt::motor::MotorFaultIndicator, status::{ErrorCode, RobotStatus}};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Decides which cycles' statuses are worth sending.
///
/// A status is sent when the faults it reports differ from the last sent status, when the
/// breakbeam has changed state since the last sent status, or when the heartbeat floor number of
/// cycles have gone by without a send.
#[derive(Debug)]
pub struct StatusRateLimiter {
    heartbeat_floor: u32,
    cycles_since_send: u32,
    last_sent: Option<SentState>,
}

#[derive(Debug, PartialEq)]
struct SentState {
    motor_faults: Vec<MotorFaultIndicator>,
    error_code: Vec<ErrorCode>,
    breakbeam_tripped: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StatusRateLimiter {
    /// Create a limiter for a loop running at `loop_hz` which should report at least at
    /// `status_rate_hz`.
    pub fn new(loop_hz: f64, status_rate_hz: f64) -> Self {
        Self {
            heartbeat_floor: heartbeat_floor(loop_hz, status_rate_hz),
            cycles_since_send: 0,
            last_sent: None,
        }
    }

    pub fn heartbeat_floor(&self) -> u32 {
        self.heartbeat_floor
    }

    /// Called once per cycle with that cycle's status. If this returns true the status must be
    /// sent, as it's recorded as the last sent status.
    pub fn should_send(&mut self, status: &RobotStatus) -> bool {
        self.cycles_since_send = self.cycles_since_send.saturating_add(1);

        let state = SentState::from_status(status);

        let send = match self.last_sent {
            None => true,
            Some(ref last) => {
                last.motor_faults != state.motor_faults
                    || last.error_code != state.error_code
                    || last.breakbeam_tripped != state.breakbeam_tripped
                    || self.cycles_since_send >= self.heartbeat_floor
            }
        };

        if send {
            self.cycles_since_send = 0;
            self.last_sent = Some(state);
        }

        send
    }
}

impl SentState {
    fn from_status(status: &RobotStatus) -> Self {
        let mut error_code = status.error_code.clone();
        error_code.sort();
        error_code.dedup();

        Self {
            motor_faults: status.motor_status.motor_faults.clone(),
            error_code,
            breakbeam_tripped: status.power_status.breakbeam_tripped,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Maximum number of cycles between two sends, `ceil(loop_hz / status_rate_hz)`.
pub fn heartbeat_floor(loop_hz: f64, status_rate_hz: f64) -> u32 {
    if !(status_rate_hz > 0.0) || !(loop_hz > 0.0) {
        return 1
    }

    ((loop_hz / status_rate_hz).ceil() as u32).max(1)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
