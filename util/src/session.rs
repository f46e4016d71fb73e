//! Session management
//!
//! A session is one execution of a robot executable. It owns a timestamped directory holding the
//! log file and any raw audit logs written during the run. The session epoch is the zero point of
//! every log line's timestamp.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use chrono::{DateTime, Utc};
use conquer_once::OnceCell;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

// Internal imports
use crate::time;

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

static SESSION_EPOCH: OnceCell<DateTime<Utc>> = OnceCell::uninit();

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Name of the environment variable pointing at the software root.
pub const SW_ROOT_ENV: &str = "THUNDER_SW_ROOT";

/// Session directory name timestamp, see `chrono::format::strftime`.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Sub directory of the session holding audit logs
const AUDIT_DIR: &str = "audit";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The directories and files belonging to the current session.
#[derive(Clone, Debug)]
pub struct Session {
    /// The root directory for this session
    pub session_root: PathBuf,

    /// The directory raw audit logs are written into
    pub audit_root: PathBuf,

    /// The path to the session's log file
    pub log_file_path: PathBuf,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors associated with the session module.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("The software root environment variable ({}) is not set", SW_ROOT_ENV)]
    SwRootNotSet,

    #[error("Cannot create the session directory {0:?}: {1}")]
    CannotCreateDir(PathBuf, std::io::Error),

    #[error(
        "Cannot initialise the session epoch, has a session already been started? \
         (conquer_once error: {0})"
    )]
    CannotInitEpoch(conquer_once::TryInitError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Session {
    /// Start the process' session under `$THUNDER_SW_ROOT/{sessions_dir}`.
    ///
    /// Creates the directory `{exec_name}_{timestamp}` and its audit sub directory. Only one
    /// session can be started per process.
    pub fn new(exec_name: &str, sessions_dir: &str) -> Result<Self, SessionError> {
        let root = get_sw_root().ok_or(SessionError::SwRootNotSet)?;

        let epoch = Utc::now();
        SESSION_EPOCH.try_init_once(|| epoch)
            .map_err(SessionError::CannotInitEpoch)?;

        Self::create(&root.join(sessions_dir), exec_name, &epoch)
    }

    /// Create the session's directories under `sessions_root` without touching the epoch.
    fn create(
        sessions_root: &Path,
        exec_name: &str,
        epoch: &DateTime<Utc>
    ) -> Result<Self, SessionError> {
        let session_root = sessions_root.join(
            format!("{}_{}", exec_name, epoch.format(TIMESTAMP_FORMAT))
        );
        let audit_root = session_root.join(AUDIT_DIR);

        fs::create_dir_all(&audit_root)
            .map_err(|e| SessionError::CannotCreateDir(audit_root.clone(), e))?;

        Ok(Session {
            log_file_path: session_root.join(format!("{}.log", exec_name)),
            session_root,
            audit_root,
        })
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the software root directory from the `THUNDER_SW_ROOT` environment variable.
pub fn get_sw_root() -> Option<PathBuf> {
    std::env::var_os(SW_ROOT_ENV).map(PathBuf::from)
}

/// Get the number of seconds elapsed since the start of the session.
///
/// Returns `NAN` if the session has not been started yet, so that log lines emitted before the
/// session exists still format.
pub fn get_elapsed_seconds() -> f64 {
    match SESSION_EPOCH.get() {
        Some(e) => time::chrono_to_seconds(Utc::now() - *e).unwrap_or(std::f64::NAN),
        None => std::f64::NAN,
    }
}

/// The session's epoch, `None` before a session has been started.
pub fn epoch() -> Option<&'static DateTime<Utc>> {
    SESSION_EPOCH.get()
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_create_session_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let epoch = Utc.ymd(2023, 7, 4).and_hms(9, 30, 5);

        let session = Session::create(&dir.path().join("sessions"), "robot_exec", &epoch).unwrap();

        assert_eq!(
            session.session_root,
            dir.path().join("sessions").join("robot_exec_20230704_093005")
        );
        assert!(session.audit_root.is_dir());
        assert_eq!(session.log_file_path, session.session_root.join("robot_exec.log"));
    }

    #[test]
    fn test_create_fails_under_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let epoch = Utc.ymd(2023, 7, 4).and_hms(9, 30, 5);

        match Session::create(file.path(), "robot_exec", &epoch) {
            Err(SessionError::CannotCreateDir(_, _)) => (),
            r => panic!("Expected CannotCreateDir, got {:?}", r),
        }
    }
}
