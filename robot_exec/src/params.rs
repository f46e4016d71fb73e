//! # Robot Executable Parameters
//!
//! This module provide parameters for the robot executable. Every file is loaded once at startup
//! and is read-only afterwards.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Serialize, Deserialize};

use comms_if::{eqpt::power::KickCalibration, net::NetParams};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Identity and calibration of this particular robot (`robot.toml`).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RobotParams {
    pub robot_id: u32,

    /// Index into the multicast channel table
    pub channel_id: usize,

    /// Name of the network interface used for multicast, e.g. `wlan0`
    pub network_interface: String,

    /// Kicker and chipper calibration
    pub calibration: KickCalibration,
}

/// Parameters of the control loop (`thunderloop.toml`).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ThunderloopParams {
    /// Frequency of the control loop.
    ///
    /// Units: Hz
    pub loop_hz: f64,

    /// Target rate robot statuses are broadcast at when nothing noteworthy changes.
    ///
    /// Units: Hz
    pub status_rate_hz: f64,

    /// Rate the AI broadcasts primitive sets at, used to size the round trip record buffer.
    ///
    /// Units: Hz
    pub primitive_rate_hz: f64,

    /// Maximum age of the last accepted primitive set before the robot is stopped.
    ///
    /// Units: milliseconds
    pub packet_timeout_ms: f64,

    /// Maximum age of the last power board status before it's considered disconnected.
    ///
    /// Units: milliseconds
    pub peripheral_timeout_ms: f64,

    pub thresholds: FaultThresholds,

    /// Thermal zone file giving the CPU temperature in milli-degrees
    pub cpu_temperature_path: String,

    /// Kernel log scanned for power rail over current alarms
    pub kernel_log_path: String,

    /// File holding the hash of the flashed build
    pub firmware_version_path: String,

    /// File holding the date the build was flashed
    pub date_flashed_path: String,
}

/// Thresholds fault codes are raised against.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct FaultThresholds {
    /// Units: volts
    pub low_battery_v: f32,

    /// Units: volts
    pub high_cap_v: f32,

    /// Units: degrees C
    pub high_board_temp_c: f64,
}

/// Power board serial link parameters (`power.toml`).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PowerParams {
    /// Path of the serial device, e.g. `/dev/ttyTHS1`
    pub device: String,

    pub baud_rate: u32,

    /// Maximum time a single frame read may block for.
    ///
    /// Units: milliseconds
    pub read_timeout_ms: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParamsError {
    #[error("Loop frequency must be positive, found {0}")]
    InvalidLoopFrequency(f64),

    #[error("Rate {0} must be positive and no higher than the loop frequency, found {1}")]
    InvalidRate(&'static str, f64),

    #[error("Timeout {0} must be positive, found {1}")]
    InvalidTimeout(&'static str, f64),

    #[error("No multicast group for channel {0}")]
    InvalidChannel(usize),

    #[error("Network interface name is empty")]
    EmptyInterface,

    #[error("Kick calibration is not usable: {0:?}")]
    InvalidCalibration(KickCalibration),

    #[error("Baud rate must be positive")]
    InvalidBaudRate,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RobotParams {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        if NetParams::multicast_group(self.channel_id).is_none() {
            return Err(ParamsError::InvalidChannel(self.channel_id))
        }

        if self.network_interface.trim().is_empty() {
            return Err(ParamsError::EmptyInterface)
        }

        if !self.calibration.kick_coeff.is_finite() || self.calibration.kick_constant == 0 {
            return Err(ParamsError::InvalidCalibration(self.calibration))
        }

        Ok(())
    }
}

impl ThunderloopParams {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        if !(self.loop_hz > 0.0) || !self.loop_hz.is_finite() {
            return Err(ParamsError::InvalidLoopFrequency(self.loop_hz))
        }

        if !(self.status_rate_hz > 0.0) || self.status_rate_hz > self.loop_hz {
            return Err(ParamsError::InvalidRate("status_rate_hz", self.status_rate_hz))
        }

        if !(self.primitive_rate_hz > 0.0) || self.primitive_rate_hz > self.loop_hz {
            return Err(ParamsError::InvalidRate("primitive_rate_hz", self.primitive_rate_hz))
        }

        // Converted to `Duration`s, which can't hold an infinite or NaN length
        if !(self.packet_timeout_ms > 0.0) || !self.packet_timeout_ms.is_finite() {
            return Err(ParamsError::InvalidTimeout("packet_timeout_ms", self.packet_timeout_ms))
        }

        if !(self.peripheral_timeout_ms > 0.0) || !self.peripheral_timeout_ms.is_finite() {
            return Err(ParamsError::InvalidTimeout(
                "peripheral_timeout_ms", self.peripheral_timeout_ms
            ))
        }

        Ok(())
    }
}

impl PowerParams {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        if self.baud_rate == 0 {
            return Err(ParamsError::InvalidBaudRate)
        }

        if self.read_timeout_ms == 0 {
            return Err(ParamsError::InvalidTimeout("read_timeout_ms", 0.0))
        }

        Ok(())
    }
}

#[cfg(test)]
impl ThunderloopParams {
    /// Parameters matching the shipped `thunderloop.toml`, with host paths that don't exist.
    pub(crate) fn for_tests() -> Self {
        Self {
            loop_hz: 200.0,
            status_rate_hz: 30.0,
            primitive_rate_hz: 60.0,
            packet_timeout_ms: 500.0,
            peripheral_timeout_ms: 250.0,
            thresholds: FaultThresholds {
                low_battery_v: 20.5,
                high_cap_v: 210.0,
                high_board_temp_c: 80.0,
            },
            cpu_temperature_path: "/nonexistent/thermal_zone1/temp".into(),
            kernel_log_path: "/nonexistent/kern.log".into(),
            firmware_version_path: "/nonexistent/FIRMWARE_VERSION".into(),
            date_flashed_path: "/nonexistent/DATE_FLASHED".into(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
