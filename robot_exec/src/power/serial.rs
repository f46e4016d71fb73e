//! Serial link to the power board

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use serialport::{ClearBuffer, SerialPort};
use std::{io::{self, Read, Write}, path::Path, time::Duration};

use super::PowerServiceError;
use crate::params::PowerParams;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A byte link that moves whole frames.
///
/// All operations are blocking. They are only ever called from the power service's own thread.
pub trait SerialLink: Send + 'static {
    /// Discard anything waiting to be read.
    fn flush_receive(&mut self) -> io::Result<()>;

    /// Block until exactly `buf.len()` bytes have been read.
    fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Discard anything waiting to be sent.
    fn flush_send(&mut self) -> io::Result<()>;

    /// Write the whole frame.
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SerialLink for Box<dyn SerialPort> {
    fn flush_receive(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.read_exact(buf)
    }

    fn flush_send(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Output).map_err(io::Error::from)
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.write_all(frame)?;
        self.flush()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Open the power board's serial port.
///
/// A missing device is reported as [`PowerServiceError::DeviceMissing`] rather than an open
/// failure, since it means the board isn't connected at all.
pub fn open_serial(params: &PowerParams) -> Result<Box<dyn SerialPort>, PowerServiceError> {
    if !Path::new(&params.device).exists() {
        return Err(PowerServiceError::DeviceMissing(params.device.clone()))
    }

    let port = serialport::new(&params.device, params.baud_rate)
        .timeout(Duration::from_millis(params.read_timeout_ms))
        .open()
        .map_err(|e| PowerServiceError::OpenError(params.device.clone(), e))?;

    debug!("Opened power board serial port {} at {} baud", params.device, params.baud_rate);

    Ok(port)
}
