//! # Power Board Interface
//!
//! The power board drives the kicker/chipper capacitors and reports battery and capacitor
//! voltages. It talks to the robot computer over a serial link using fixed size frames:
//!
//! ```text
//! +-------+-----+-----------------+-------------+
//! | START | LEN | payload (LEN B) | CRC16 (LE)  |
//! +-------+-----+-----------------+-------------+
//! ```
//!
//! The CRC is CRC-16/CCITT-FALSE computed over the payload only. All multi-byte payload fields
//! are little endian.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// First byte of every frame in both directions.
pub const START_BYTE: u8 = 0xA5;

/// Length of the command payload (mode, kick pulse, chip pulse).
const COMMAND_PAYLOAD_LEN: usize = 1 + 4 + 4;

/// Length of the status payload (battery, capacitor, current, sequence, flags).
const STATUS_PAYLOAD_LEN: usize = 4 + 4 + 4 + 2 + 1;

/// Start byte + length byte + checksum.
const FRAME_OVERHEAD: usize = 1 + 1 + 2;

/// Total length of a command frame written to the power board.
pub const COMMAND_FRAME_LEN: usize = COMMAND_PAYLOAD_LEN + FRAME_OVERHEAD;

/// Total length of a status frame read from the power board.
pub const STATUS_FRAME_LEN: usize = STATUS_PAYLOAD_LEN + FRAME_OVERHEAD;

/// Bit in the status flags set while the breakbeam is interrupted.
const FLAG_BREAKBEAM: u8 = 0x01;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Power control demanded by a primitive.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct PowerControl {
    pub chicker: ChickerCommand,
}

/// Per-robot calibration used to convert chicker demands into pulse widths.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct KickCalibration {
    /// Exponential coefficient of the kick speed to pulse width curve
    pub kick_coeff: f64,

    /// Pulse width in microseconds of a 0 m/s kick
    pub kick_constant: u32,

    /// Pulse width in microseconds used for every chip
    pub chip_pulse_width: u32,
}

/// Calibrated command written to the power board.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PowerPulseCommand {
    pub mode: PulseMode,
    pub kick_pulse_width_us: u32,
    pub chip_pulse_width_us: u32,
}

/// Latest feedback from the power board.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct PowerStatus {
    pub battery_voltage: f32,
    pub capacitor_voltage: f32,
    pub current_draw: f32,
    pub breakbeam_tripped: bool,

    /// Rolling frame counter maintained by the board
    pub sequence: u16,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Kicker/chipper demand.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum ChickerCommand {
    None,
    Kick { speed_m_per_s: f64 },
    Chip { distance_m: f64 },
    AutoKick { speed_m_per_s: f64 },
    AutoChip { distance_m: f64 },
}

/// Pulse mode understood by the power board firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseMode {
    Idle = 0,
    Kick = 1,
    Chip = 2,
    AutoKick = 3,
    AutoChip = 4,
}

/// Errors produced when framing or unframing power board messages.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FrameError {
    #[error("Expected a {expected} byte frame, got {found} bytes")]
    WrongLength { expected: usize, found: usize },

    #[error("Frame starts with 0x{0:02X}, not the start byte")]
    BadStartByte(u8),

    #[error("Frame declares a {0} byte payload")]
    BadPayloadLength(u8),

    #[error("Checksum mismatch: frame has 0x{found:04X}, payload gives 0x{computed:04X}")]
    BadChecksum { found: u16, computed: u16 },

    #[error("Unknown pulse mode {0}")]
    UnknownMode(u8),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ChickerCommand {
    fn default() -> Self {
        ChickerCommand::None
    }
}

impl Default for PulseMode {
    fn default() -> Self {
        PulseMode::Idle
    }
}

impl ChickerCommand {
    /// True if this command fires (or arms) the kicker.
    pub fn is_kick(&self) -> bool {
        matches!(self, ChickerCommand::Kick { .. } | ChickerCommand::AutoKick { .. })
    }

    /// True if this command fires (or arms) the chipper.
    pub fn is_chip(&self) -> bool {
        matches!(self, ChickerCommand::Chip { .. } | ChickerCommand::AutoChip { .. })
    }
}

impl PulseMode {
    fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0 => Ok(PulseMode::Idle),
            1 => Ok(PulseMode::Kick),
            2 => Ok(PulseMode::Chip),
            3 => Ok(PulseMode::AutoKick),
            4 => Ok(PulseMode::AutoChip),
            v => Err(FrameError::UnknownMode(v)),
        }
    }
}

impl PowerPulseCommand {
    /// Apply the robot's calibration to a power control demand.
    ///
    /// Kick pulse width follows `kick_constant * exp(kick_coeff * speed)`, chips always use the
    /// calibrated chip pulse width. Negative or non-finite demands produce an idle command.
    pub fn from_control(control: &PowerControl, calib: &KickCalibration) -> Self {
        let kick_width = |speed: f64| -> Option<u32> {
            if !speed.is_finite() || speed < 0.0 {
                return None
            }
            let width = calib.kick_constant as f64 * (calib.kick_coeff * speed).exp();
            Some(width.round().min(u32::MAX as f64) as u32)
        };
        let chip_valid = |distance: f64| distance.is_finite() && distance >= 0.0;

        match control.chicker {
            ChickerCommand::None => Self::default(),
            ChickerCommand::Kick { speed_m_per_s } => match kick_width(speed_m_per_s) {
                Some(w) => Self { mode: PulseMode::Kick, kick_pulse_width_us: w, ..Self::default() },
                None => Self::default(),
            },
            ChickerCommand::AutoKick { speed_m_per_s } => match kick_width(speed_m_per_s) {
                Some(w) => Self { mode: PulseMode::AutoKick, kick_pulse_width_us: w, ..Self::default() },
                None => Self::default(),
            },
            ChickerCommand::Chip { distance_m } if chip_valid(distance_m) => Self {
                mode: PulseMode::Chip,
                chip_pulse_width_us: calib.chip_pulse_width,
                ..Self::default()
            },
            ChickerCommand::AutoChip { distance_m } if chip_valid(distance_m) => Self {
                mode: PulseMode::AutoChip,
                chip_pulse_width_us: calib.chip_pulse_width,
                ..Self::default()
            },
            _ => Self::default(),
        }
    }

    /// Marshal the command into a frame ready to be written to the serial port.
    pub fn marshal(&self) -> [u8; COMMAND_FRAME_LEN] {
        let mut payload = Vec::with_capacity(COMMAND_PAYLOAD_LEN);
        // Writes into a Vec can't fail
        payload.push(self.mode as u8);
        payload.write_u32::<LittleEndian>(self.kick_pulse_width_us).ok();
        payload.write_u32::<LittleEndian>(self.chip_pulse_width_us).ok();

        let mut frame = [0u8; COMMAND_FRAME_LEN];
        frame[0] = START_BYTE;
        frame[1] = COMMAND_PAYLOAD_LEN as u8;
        frame[2..2 + COMMAND_PAYLOAD_LEN].copy_from_slice(&payload);
        let crc = crc16(&payload).to_le_bytes();
        frame[COMMAND_FRAME_LEN - 2] = crc[0];
        frame[COMMAND_FRAME_LEN - 1] = crc[1];
        frame
    }

    /// Parse a command frame, as the power board would.
    pub fn unmarshal(frame: &[u8]) -> Result<Self, FrameError> {
        let payload = check_frame(frame, COMMAND_FRAME_LEN)?;
        let mut cursor = Cursor::new(payload);

        // Lengths have been checked so the reads can't run short
        let mode = PulseMode::from_u8(cursor.read_u8().unwrap_or(0xFF))?;
        Ok(Self {
            mode,
            kick_pulse_width_us: cursor.read_u32::<LittleEndian>().unwrap_or(0),
            chip_pulse_width_us: cursor.read_u32::<LittleEndian>().unwrap_or(0),
        })
    }
}

impl PowerStatus {
    /// Parse a status frame read from the serial port.
    pub fn unmarshal(frame: &[u8]) -> Result<Self, FrameError> {
        let payload = check_frame(frame, STATUS_FRAME_LEN)?;
        let mut cursor = Cursor::new(payload);

        let battery_voltage = cursor.read_f32::<LittleEndian>().unwrap_or(0.0);
        let capacitor_voltage = cursor.read_f32::<LittleEndian>().unwrap_or(0.0);
        let current_draw = cursor.read_f32::<LittleEndian>().unwrap_or(0.0);
        let sequence = cursor.read_u16::<LittleEndian>().unwrap_or(0);
        let flags = cursor.read_u8().unwrap_or(0);

        Ok(Self {
            battery_voltage,
            capacitor_voltage,
            current_draw,
            breakbeam_tripped: flags & FLAG_BREAKBEAM != 0,
            sequence,
        })
    }

    /// Marshal the status into a frame, as the power board would.
    pub fn marshal(&self) -> [u8; STATUS_FRAME_LEN] {
        let mut payload = Vec::with_capacity(STATUS_PAYLOAD_LEN);
        payload.write_f32::<LittleEndian>(self.battery_voltage).ok();
        payload.write_f32::<LittleEndian>(self.capacitor_voltage).ok();
        payload.write_f32::<LittleEndian>(self.current_draw).ok();
        payload.write_u16::<LittleEndian>(self.sequence).ok();
        payload.push(if self.breakbeam_tripped { FLAG_BREAKBEAM } else { 0 });

        let mut frame = [0u8; STATUS_FRAME_LEN];
        frame[0] = START_BYTE;
        frame[1] = STATUS_PAYLOAD_LEN as u8;
        frame[2..2 + STATUS_PAYLOAD_LEN].copy_from_slice(&payload);
        let crc = crc16(&payload).to_le_bytes();
        frame[STATUS_FRAME_LEN - 2] = crc[0];
        frame[STATUS_FRAME_LEN - 1] = crc[1];
        frame
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Validate framing and return the payload slice.
fn check_frame(frame: &[u8], expected_len: usize) -> Result<&[u8], FrameError> {
    if frame.len() != expected_len {
        return Err(FrameError::WrongLength { expected: expected_len, found: frame.len() })
    }
    if frame[0] != START_BYTE {
        return Err(FrameError::BadStartByte(frame[0]))
    }
    if frame[1] as usize != expected_len - FRAME_OVERHEAD {
        return Err(FrameError::BadPayloadLength(frame[1]))
    }

    let payload = &frame[2..expected_len - 2];
    let found = u16::from_le_bytes([frame[expected_len - 2], frame[expected_len - 1]]);
    let computed = crc16(payload);
    if found != computed {
        return Err(FrameError::BadChecksum { found, computed })
    }

    Ok(payload)
}

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF, no reflection).
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const CALIB: KickCalibration = KickCalibration {
        kick_coeff: 0.3,
        kick_constant: 300,
        chip_pulse_width: 250,
    };

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_calibration() {
        let kick = PowerPulseCommand::from_control(
            &PowerControl { chicker: ChickerCommand::Kick { speed_m_per_s: 2.0 } },
            &CALIB,
        );
        assert_eq!(kick.mode, PulseMode::Kick);
        assert_eq!(kick.kick_pulse_width_us, (300.0 * (0.6f64).exp()).round() as u32);
        assert_eq!(kick.chip_pulse_width_us, 0);

        let chip = PowerPulseCommand::from_control(
            &PowerControl { chicker: ChickerCommand::AutoChip { distance_m: 1.0 } },
            &CALIB,
        );
        assert_eq!(chip.mode, PulseMode::AutoChip);
        assert_eq!(chip.chip_pulse_width_us, 250);

        let bad = PowerPulseCommand::from_control(
            &PowerControl { chicker: ChickerCommand::Kick { speed_m_per_s: -1.0 } },
            &CALIB,
        );
        assert_eq!(bad, PowerPulseCommand::default());

        let idle = PowerPulseCommand::from_control(&PowerControl::default(), &CALIB);
        assert_eq!(idle.mode, PulseMode::Idle);
    }

    #[test]
    fn test_command_frame() {
        let cmd = PowerPulseCommand {
            mode: PulseMode::Kick,
            kick_pulse_width_us: 1234,
            chip_pulse_width_us: 0,
        };
        let frame = cmd.marshal();
        assert_eq!(frame[0], START_BYTE);
        assert_eq!(frame[1] as usize, COMMAND_FRAME_LEN - 4);
        assert_eq!(PowerPulseCommand::unmarshal(&frame), Ok(cmd));
    }

    #[test]
    fn test_status_frame_errors() {
        let status = PowerStatus {
            battery_voltage: 24.5,
            capacitor_voltage: 180.0,
            current_draw: 2.25,
            breakbeam_tripped: true,
            sequence: 77,
        };
        let frame = status.marshal();
        assert_eq!(PowerStatus::unmarshal(&frame), Ok(status));

        let mut corrupted = frame;
        corrupted[4] ^= 0xFF;
        assert!(matches!(
            PowerStatus::unmarshal(&corrupted),
            Err(FrameError::BadChecksum { .. })
        ));

        let mut bad_start = frame;
        bad_start[0] = 0x00;
        assert_eq!(PowerStatus::unmarshal(&bad_start), Err(FrameError::BadStartByte(0x00)));

        assert_eq!(
            PowerStatus::unmarshal(&frame[..5]),
            Err(FrameError::WrongLength { expected: STATUS_FRAME_LEN, found: 5 })
        );
    }
}
