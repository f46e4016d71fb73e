//! Logging setup for the robot executables
//!
//! Everything logs through the `log` facade. [`logger_init`] routes records to stdout and to the
//! session's log file. The control loop, the power service thread and the network listener threads
//! all share the one dispatch, so records below `INFO` carry the name of the thread that emitted
//! them.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::{self, info, Level};
use colored::{ColoredString, Colorize};
use thiserror::Error;

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Dependencies which are too chatty below `INFO`, capped to `INFO` whatever the minimum level.
const CAPPED_TARGETS: [&str; 2] = ["zmq", "serialport"];

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level of at least `INFO`, found `{0}`")]
    InvalidMinLogLevel(log::LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError)
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// `min_level` must let at least `INFO` through, the startup and shutdown sequence is only
/// recorded at that level.
///
/// # Safety
///
/// - This function must only be called once to prevent corrupting logs.
pub fn logger_init(
    min_level: self::LevelFilter,
    session: &session::Session
) -> Result<(), LoggerInitError> {

    if min_level < Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level))
    }

    let log_file = fern::log_file(&session.log_file_path)
        .map_err(LoggerInitError::LogFileInitError)?;

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}",
                format_line(
                    session::get_elapsed_seconds(),
                    record.level(),
                    record.target(),
                    std::thread::current().name(),
                    message
                )
            ))
        })
        .level(min_level);

    for target in CAPPED_TARGETS.iter() {
        dispatch = dispatch.level_for(*target, min_level.min(LevelFilter::Info));
    }

    dispatch
        .chain(std::io::stdout())
        .chain(log_file)
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    if let Some(epoch) = session::epoch() {
        info!("    Session epoch: {}", epoch);
    }
    info!("    Log level: {:?}", min_level);
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Format one log line.
///
/// `INFO` and above are kept short for reading on the robot's console, anything more verbose
/// includes where the record came from.
fn format_line(
    elapsed_s: f64,
    level: Level,
    target: &str,
    thread: Option<&str>,
    message: &std::fmt::Arguments
) -> String {
    if level > Level::Info {
        format!(
            "[{:10.6} {}] {} ({}): {}",
            elapsed_s,
            level_to_str(level),
            target,
            thread.unwrap_or("?"),
            message
        )
    }
    else {
        format!("[{:10.6} {}] {}", elapsed_s, level_to_str(level), message)
    }
}

/// Get the string representation of a log level
fn level_to_str(level: Level) -> ColoredString {
    match level {
        Level::Trace => "TRC".dimmed().italic(),
        Level::Debug => "DBG".dimmed(),
        Level::Info  => "INF".normal(),
        Level::Warn  => "WRN".yellow(),
        Level::Error => "ERR".red().bold()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_format_line() {
        colored::control::set_override(false);

        let line = format_line(1.5, Level::Info, "robot_lib::power", Some("power_service"), &format_args!("up"));
        assert_eq!(line, "[  1.500000 INF] up");

        let line = format_line(2.0, Level::Debug, "robot_lib::power", Some("power_service"), &format_args!("x = {}", 3));
        assert_eq!(line, "[  2.000000 DBG] robot_lib::power (power_service): x = 3");

        let line = format_line(2.0, Level::Trace, "t", None, &format_args!("m"));
        assert!(line.ends_with("t (?): m"));
    }
}
