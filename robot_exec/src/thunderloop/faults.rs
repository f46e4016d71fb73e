//! Fault detection
//!
//! The fault set is rebuilt from scratch every cycle from the freshest samples, so a condition
//! that clears stops being reported on the very next status.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::PathBuf,
    time::Duration,
};

use comms_if::{eqpt::power::PowerStatus, status::ErrorCode};

use crate::params::FaultThresholds;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Written to the kernel log by the Jetson's thermal driver when the power rail over current
/// alarm trips.
pub const OVER_CURRENT_MARKER: &str = "soctherm: OC ALARM 0x00000001";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Latest samples faults are computed from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultInputs {
    pub power_status: PowerStatus,

    /// Age of `power_status`, `None` if the board has never reported
    pub power_status_age: Option<Duration>,

    /// Units: degrees C, `None` if the temperature couldn't be read
    pub cpu_temperature_c: Option<f64>,

    pub power_stable: bool,
}

/// Scans the kernel log for power rail over current alarms.
///
/// Each check only reads what has been appended since the previous check.
#[derive(Debug)]
pub struct PowerStabilityMonitor {
    path: PathBuf,
    offset: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PowerStabilityMonitor {
    /// Start monitoring `path`, skipping anything already in it.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let offset = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Self { path, offset }
    }

    /// Returns false if the alarm has been logged since the last check.
    ///
    /// A log that can't be read is treated as stable, a false unstable report would stop the
    /// robot for nothing.
    pub fn check(&mut self) -> bool {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                debug!("Could not open {:?} to check power stability: {}", self.path, e);
                return true
            }
        };

        let len = match file.metadata() {
            Ok(m) => m.len(),
            Err(_) => return true,
        };

        // Rotated or truncated, start from the beginning of the new file
        if len < self.offset {
            self.offset = 0;
        }

        if file.seek(SeekFrom::Start(self.offset)).is_err() {
            return true
        }

        let mut appended = Vec::new();
        match file.read_to_end(&mut appended) {
            Ok(n) => self.offset += n as u64,
            Err(e) => {
                debug!("Could not read {:?}: {}", self.path, e);
                return true
            }
        }

        let found = String::from_utf8_lossy(&appended).contains(OVER_CURRENT_MARKER);
        if found {
            warn!("Power rail over current alarm found in {:?}", self.path);
        }

        !found
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Compute this cycle's fault codes, sorted.
pub fn compute_faults(
    inputs: &FaultInputs,
    thresholds: &FaultThresholds,
    peripheral_timeout: Duration,
) -> Vec<ErrorCode> {
    let mut faults = Vec::new();

    match inputs.power_status_age {
        Some(age) if age <= peripheral_timeout => {
            if inputs.power_status.battery_voltage <= thresholds.low_battery_v {
                faults.push(ErrorCode::LowBattery);
            }
            if inputs.power_status.capacitor_voltage >= thresholds.high_cap_v {
                faults.push(ErrorCode::HighCap);
            }
        },
        _ => faults.push(ErrorCode::PeripheralDisconnected),
    }

    if let Some(t) = inputs.cpu_temperature_c {
        if t >= thresholds.high_board_temp_c {
            faults.push(ErrorCode::HighBoardTemp);
        }
    }

    if !inputs.power_stable {
        faults.push(ErrorCode::UnstablePowerSupply);
    }

    faults.sort();
    faults
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
