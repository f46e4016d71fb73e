//! Power service

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use std::{
    io,
    sync::{Arc, atomic::{AtomicBool, Ordering}},
    thread,
    time::Duration,
};

use comms_if::eqpt::power::{
    FrameError, KickCalibration, PowerControl, PowerPulseCommand, PowerStatus, STATUS_FRAME_LEN
};
use util::raise_error;

use super::{open_serial, PowerLink, SerialLink};
use crate::{crash::Peripheral, handoff::CommandChannel, params::PowerParams};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Runs the power board link on a background thread.
///
/// The service is `Running` from construction until [`PowerService::stop`] is called (or it is
/// dropped), after which the thread has been joined and the service is `Stopped`.
pub struct PowerService {
    channel: Arc<PowerChannel>,
    running: Arc<AtomicBool>,
    safe: Arc<AtomicBool>,
    join_handle: Option<thread::JoinHandle<()>>,
}

/// Handle that forces the power board into its idle state.
///
/// Only touches an atomic flag so it can be used from a signal handler.
pub struct PowerSafing {
    safe: Arc<AtomicBool>,
}

/// Outcome of one exchange with the board.
#[derive(Debug, PartialEq)]
pub(crate) enum Tick {
    /// A good status was received and published
    Status(PowerStatus),

    /// The status frame was malformed and has been dropped
    Dropped(FrameError),
}

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

type PowerChannel = CommandChannel<PowerPulseCommand, PowerStatus>;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PowerServiceError {
    #[error("Power board device {0} does not exist")]
    DeviceMissing(String),

    #[error("Could not open power board device {0}: {1}")]
    OpenError(String, serialport::Error),

    #[error("Could not spawn the power service thread: {0}")]
    SpawnError(io::Error),

    #[error("Could not read a status frame from the power board: {0}")]
    ReadError(io::Error),

    #[error("Could not write a command frame to the power board: {0}")]
    WriteError(io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PowerService {
    /// Open the serial device described by `params` and start the service on it.
    pub fn open(params: &PowerParams) -> Result<Self, PowerServiceError> {
        let port = open_serial(params)?;
        Self::new(port)
    }

    /// Start the service on an already open link.
    pub fn new<L: SerialLink>(link: L) -> Result<Self, PowerServiceError> {
        let channel = Arc::new(PowerChannel::default());
        let running = Arc::new(AtomicBool::new(true));
        let safe = Arc::new(AtomicBool::new(false));

        let thread_channel = channel.clone();
        let thread_running = running.clone();
        let thread_safe = safe.clone();
        let join_handle = thread::Builder::new()
            .name("power_service".into())
            .spawn(move || run(link, thread_channel, thread_running, thread_safe))
            .map_err(PowerServiceError::SpawnError)?;

        info!("Power service started");

        Ok(Self {
            channel,
            running,
            safe,
            join_handle: Some(join_handle),
        })
    }

    /// Publish the calibrated command and return the latest status from the board.
    ///
    /// Never blocks. The command reaches the board within one exchange.
    pub fn poll(&self, control: &PowerControl, calibration: &KickCalibration) -> PowerStatus {
        self.channel.command.publish(PowerPulseCommand::from_control(control, calibration));
        self.channel.status.load().value
    }

    /// Age of the latest good status, `None` if the board hasn't sent one yet.
    pub fn status_age(&self) -> Option<Duration> {
        self.channel.latest_status().1
    }

    /// Handle used by the crash handler to idle the board.
    pub fn safing(&self) -> Arc<PowerSafing> {
        Arc::new(PowerSafing { safe: self.safe.clone() })
    }

    pub fn is_running(&self) -> bool {
        self.join_handle.is_some()
    }

    /// Stop the background thread and wait for it to finish.
    ///
    /// The thread finishes the exchange it is in the middle of first, so this returns within one
    /// read timeout. Calling this more than once has no effect.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);

        if let Some(jh) = self.join_handle.take() {
            if jh.join().is_err() {
                warn!("Power service thread panicked");
            }
            info!("Power service stopped");
        }
    }
}

impl PowerLink for PowerService {
    fn poll(&mut self, control: &PowerControl, calibration: &KickCalibration) -> PowerStatus {
        PowerService::poll(self, control, calibration)
    }

    fn status_age(&self) -> Option<Duration> {
        PowerService::status_age(self)
    }

    fn stop(&mut self) {
        PowerService::stop(self)
    }
}

impl Drop for PowerService {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Peripheral for PowerSafing {
    fn name(&self) -> &'static str {
        "power board"
    }

    fn make_safe(&self) {
        self.safe.store(true, Ordering::Release);
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Body of the power service thread.
fn run<L: SerialLink>(
    mut link: L,
    channel: Arc<PowerChannel>,
    running: Arc<AtomicBool>,
    safe: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        match tick(&mut link, &channel, safe.load(Ordering::Acquire)) {
            Ok(Tick::Status(_)) => (),
            Ok(Tick::Dropped(e)) => warn!("Dropped malformed power board status: {}", e),
            // The link to the board can't be recovered, so stop the whole robot
            Err(e) => raise_error!("{}", e),
        }
    }

    debug!("Power service thread exiting");
}

/// Perform one exchange with the board.
///
/// A malformed status frame keeps the last good status in the channel. I/O errors are returned,
/// the caller decides how fatal they are.
pub(crate) fn tick<L: SerialLink>(
    link: &mut L,
    channel: &PowerChannel,
    force_idle: bool,
) -> Result<Tick, PowerServiceError> {
    let mut frame = [0u8; STATUS_FRAME_LEN];

    link.flush_receive().map_err(PowerServiceError::ReadError)?;
    link.read_frame(&mut frame).map_err(PowerServiceError::ReadError)?;

    let result = match PowerStatus::unmarshal(&frame) {
        Ok(status) => {
            channel.publish_status(status);
            Tick::Status(status)
        },
        Err(e) => Tick::Dropped(e),
    };

    let command = match force_idle {
        true => PowerPulseCommand::default(),
        false => *channel.command.load(),
    };

    link.flush_send().map_err(PowerServiceError::WriteError)?;
    link.write_frame(&command.marshal()).map_err(PowerServiceError::WriteError)?;

    Ok(result)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::power::{ChickerCommand, PulseMode, COMMAND_FRAME_LEN};
    use std::{
        collections::VecDeque,
        sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender},
    };

    const CALIB: KickCalibration = KickCalibration {
        kick_coeff: 0.3589,
        kick_constant: 300,
        chip_pulse_width: 350,
    };

    /// Scripted link, replays status frames and records written command frames.
    struct FakeLink {
        statuses: VecDeque<Vec<u8>>,
        written: Vec<Vec<u8>>,
    }

    /// Link whose reads wait on a gate so a test decides when each exchange happens.
    struct GatedLink {
        gate: Receiver<()>,
        written: Sender<Vec<u8>>,
    }

    impl SerialLink for FakeLink {
        fn flush_receive(&mut self) -> io::Result<()> { Ok(()) }

        fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<()> {
            match self.statuses.pop_front() {
                Some(f) => {
                    buf.copy_from_slice(&f);
                    Ok(())
                },
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "no more frames")),
            }
        }

        fn flush_send(&mut self) -> io::Result<()> { Ok(()) }

        fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
            self.written.push(frame.to_vec());
            Ok(())
        }
    }

    impl SerialLink for GatedLink {
        fn flush_receive(&mut self) -> io::Result<()> { Ok(()) }

        fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<()> {
            loop {
                match self.gate.recv_timeout(Duration::from_millis(5)) {
                    Ok(()) => break,
                    Err(RecvTimeoutError::Disconnected) => {
                        // Test is done with us, keep exchanging so the thread can see the stop
                        thread::sleep(Duration::from_millis(1));
                        break
                    },
                    Err(RecvTimeoutError::Timeout) => continue,
                }
            }
            buf.copy_from_slice(&status(1).marshal());
            Ok(())
        }

        fn flush_send(&mut self) -> io::Result<()> { Ok(()) }

        fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
            self.written.send(frame.to_vec()).ok();
            Ok(())
        }
    }

    fn status(sequence: u16) -> PowerStatus {
        PowerStatus {
            battery_voltage: 24.1,
            capacitor_voltage: 180.0,
            current_draw: 1.5,
            breakbeam_tripped: sequence % 2 == 0,
            sequence,
        }
    }

    fn gated_service() -> (PowerService, Sender<()>, Receiver<Vec<u8>>) {
        let (gate_tx, gate_rx) = channel();
        let (written_tx, written_rx) = channel();
        let service = PowerService::new(GatedLink { gate: gate_rx, written: written_tx }).unwrap();
        (service, gate_tx, written_rx)
    }

    #[test]
    fn test_default_command_and_status_before_first_poll() {
        let (mut service, gate, written) = gated_service();

        // Nothing received yet, the default status is returned
        assert_eq!(service.status_age(), None);
        assert_eq!(
            service.channel.status.load().value,
            PowerStatus::default()
        );

        // With no command published the board is sent the idle command
        gate.send(()).unwrap();
        let frame = written.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.len(), COMMAND_FRAME_LEN);
        let cmd = PowerPulseCommand::unmarshal(&frame).unwrap();
        assert_eq!(cmd, PowerPulseCommand::default());
        assert_eq!(cmd.mode, PulseMode::Idle);

        drop(gate);
        service.stop();
        assert!(!service.is_running());
    }

    #[test]
    fn test_last_command_wins() {
        let (mut service, gate, written) = gated_service();

        let cmd1 = PowerControl { chicker: ChickerCommand::Kick { speed_m_per_s: 2.0 } };
        let cmd2 = PowerControl { chicker: ChickerCommand::Chip { distance_m: 1.0 } };

        // Both published before the thread gets to its next command load
        service.poll(&cmd1, &CALIB);
        service.poll(&cmd2, &CALIB);
        gate.send(()).unwrap();

        let frame = written.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            PowerPulseCommand::unmarshal(&frame).unwrap(),
            PowerPulseCommand::from_control(&cmd2, &CALIB)
        );

        // The status the board sent is now visible to the control thread
        let latest = service.poll(&cmd2, &CALIB);
        assert_eq!(latest, status(1));
        assert!(service.status_age().is_some());

        drop(gate);
        service.stop();
    }

    #[test]
    fn test_malformed_status_keeps_last_good() {
        let mut garbage = status(3).marshal().to_vec();
        let last = garbage.len() - 1;
        garbage[last] ^= 0xFF;

        let mut link = FakeLink {
            statuses: vec![status(2).marshal().to_vec(), garbage].into(),
            written: vec![],
        };
        let channel = PowerChannel::default();
        channel.command.publish(PowerPulseCommand::from_control(
            &PowerControl { chicker: ChickerCommand::Kick { speed_m_per_s: 1.0 } },
            &CALIB
        ));

        assert_eq!(tick(&mut link, &channel, false).unwrap(), Tick::Status(status(2)));
        match tick(&mut link, &channel, false).unwrap() {
            Tick::Dropped(FrameError::BadChecksum { .. }) => (),
            other => panic!("Expected a dropped frame, got {:?}", other),
        }
        assert_eq!(channel.latest_status().0, status(2));

        // A command is still written after a dropped status
        assert_eq!(link.written.len(), 2);
        assert_eq!(
            PowerPulseCommand::unmarshal(&link.written[1]).unwrap().mode,
            PulseMode::Kick
        );

        // Out of frames, the read error is handed back
        match tick(&mut link, &channel, false) {
            Err(PowerServiceError::ReadError(_)) => (),
            other => panic!("Expected a read error, got {:?}", other),
        }
    }

    #[test]
    fn test_forced_idle() {
        let mut link = FakeLink {
            statuses: vec![status(4).marshal().to_vec()].into(),
            written: vec![],
        };
        let channel = PowerChannel::default();
        channel.command.publish(PowerPulseCommand::from_control(
            &PowerControl { chicker: ChickerCommand::Kick { speed_m_per_s: 3.0 } },
            &CALIB
        ));

        tick(&mut link, &channel, true).unwrap();
        assert_eq!(
            PowerPulseCommand::unmarshal(&link.written[0]).unwrap(),
            PowerPulseCommand::default()
        );
    }

    #[test]
    fn test_open_missing_device() {
        let params = PowerParams {
            device: "/dev/this_power_board_does_not_exist".into(),
            baud_rate: 115200,
            read_timeout_ms: 10,
        };

        match PowerService::open(&params) {
            Err(PowerServiceError::DeviceMissing(d)) => assert_eq!(d, params.device),
            Err(e) => panic!("Unexpected error {}", e),
            Ok(_) => panic!("Opened a device that doesn't exist"),
        }
    }
}
