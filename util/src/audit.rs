//! Raw audit log
//!
//! Records raw received bytes to a file from a background thread so that the receiving thread
//! never blocks on disk I/O. Each record is written as:
//!
//! | field     | type      |
//! |-----------|-----------|
//! | timestamp | `f64` LE, epoch seconds |
//! | length    | `u32` LE  |
//! | payload   | `length` bytes |

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use byteorder::{LittleEndian, WriteBytesExt};
use log::warn;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};
use thiserror::Error;

use crate::time::epoch_seconds;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Handle to an audit log writer thread.
pub struct AuditLog {
    path: PathBuf,
    sender: Option<Sender<(f64, Vec<u8>)>>,
    join_handle: Option<JoinHandle<()>>,
}

/// A cloneable handle that can push records into an [`AuditLog`] from another thread.
#[derive(Clone)]
pub struct AuditSink {
    sender: Sender<(f64, Vec<u8>)>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("Could not create the audit log file: {0}")]
    CreateError(std::io::Error),

    #[error("Could not spawn the audit log thread: {0}")]
    SpawnError(std::io::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl AuditLog {
    /// Create (or truncate) the log file at `path` and start the writer thread.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, AuditLogError> {
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(path.as_ref())
            .map_err(AuditLogError::CreateError)?;

        let (tx, rx) = channel();

        let thread_path = path.as_ref().to_path_buf();
        let join_handle = thread::Builder::new()
            .name("audit_log".into())
            .spawn(move || write_thread(thread_path, file, rx))
            .map_err(AuditLogError::SpawnError)?;

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            sender: Some(tx),
            join_handle: Some(join_handle),
        })
    }

    /// Path of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a sink which can be moved into another thread.
    pub fn sink(&self) -> Option<AuditSink> {
        self.sender.as_ref().map(|s| AuditSink { sender: s.clone() })
    }

    /// Stop accepting records, flush everything pending and join the writer thread.
    ///
    /// The writer only exits once every [`AuditSink`] has also been dropped.
    pub fn exit(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.sender.take();
        if let Some(jh) = self.join_handle.take() {
            if jh.join().is_err() {
                warn!("Audit log thread for {:?} panicked", self.path);
            }
        }
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl AuditSink {
    /// Queue a copy of `bytes` to be written, stamped with the current time.
    pub fn record(&self, bytes: &[u8]) {
        if self.sender.send((epoch_seconds(), bytes.to_vec())).is_err() {
            warn!("Audit log writer has stopped, dropping {} bytes", bytes.len());
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn write_thread(path: PathBuf, file: File, receiver: Receiver<(f64, Vec<u8>)>) {
    let mut writer = BufWriter::new(file);

    // Ends once all senders have been dropped
    for (timestamp, bytes) in receiver {
        if let Err(e) = write_record(&mut writer, timestamp, &bytes) {
            warn!("Couldn't write audit record to {:?}: {}", path, e);
        }
    }

    if let Err(e) = writer.flush() {
        warn!("Couldn't flush audit log {:?}: {}", path, e);
    }
}

fn write_record<W: Write>(writer: &mut W, timestamp: f64, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_f64::<LittleEndian>(timestamp)?;
    writer.write_u32::<LittleEndian>(bytes.len() as u32)?;
    writer.write_all(bytes)
}
