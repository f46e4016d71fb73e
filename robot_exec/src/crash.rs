//! # Crash handling
//!
//! When the process receives a fatal signal every registered peripheral is put into a safe state
//! and a [`RobotCrash`] report is broadcast before the process exits.
//!
//! Everything the handler needs lives in a single [`CrashContext`] which is installed once at
//! startup and never modified afterwards. The only thing updated while running is the last status
//! snapshot, which is held in a [`Handoff`] so the handler never waits on the control loop.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use conquer_once::OnceCell;
use log::info;
use std::{backtrace::Backtrace, sync::Arc, time::Duration};

use comms_if::{
    net::udp::{UdpError, UdpSender},
    status::{RobotCrash, RobotStatus},
};

use crate::handoff::Handoff;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Signals which end the process through the crash handler.
pub const FATAL_SIGNALS: [libc::c_int; 6] = [
    libc::SIGSEGV,
    libc::SIGTERM,
    libc::SIGABRT,
    libc::SIGFPE,
    libc::SIGINT,
    libc::SIGILL,
];

/// Time given to peripheral threads to act on a safing request before the process exits.
const SAFING_GRACE: Duration = Duration::from_millis(20);

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

static CRASH_CONTEXT: OnceCell<CrashContext> = OnceCell::uninit();

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something with hardware attached which must be left safe if the robot dies.
///
/// `make_safe` is called from a signal handler, so it must not lock, allocate or block.
pub trait Peripheral: Send + Sync {
    fn name(&self) -> &'static str;

    fn make_safe(&self);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Everything the crash handler has access to.
pub struct CrashContext {
    pub robot_id: u32,

    /// Created up front so the handler doesn't have to open a socket
    pub sender: UdpSender,

    pub peripherals: Vec<Arc<dyn Peripheral>>,

    /// Latest status assembled by the control loop
    pub last_status: Arc<Handoff<RobotStatus>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CrashError {
    #[error("The crash context has already been installed")]
    AlreadyInstalled,

    #[error("Could not install the handler for {0}: {1}")]
    SignalError(&'static str, std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Install the crash context and register the handler for all [`FATAL_SIGNALS`].
///
/// Can only succeed once per process.
pub fn install(context: CrashContext) -> Result<(), CrashError> {
    CRASH_CONTEXT.try_init_once(|| context)
        .map_err(|_| CrashError::AlreadyInstalled)?;

    install_signal_handlers()?;

    info!(
        "Crash handler installed for {:?}",
        FATAL_SIGNALS.iter().map(|s| signal_name(*s)).collect::<Vec<_>>()
    );

    Ok(())
}

/// Register [`handle_signal`] for every fatal signal.
///
/// The handler is reset to the default on entry, so a fault inside the handler itself ends the
/// process rather than recursing.
pub fn install_signal_handlers() -> Result<(), CrashError> {
    for &sig in FATAL_SIGNALS.iter() {
        // Safety: the sigaction struct is fully initialised before use and the handler has the
        // signature expected for a non-SA_SIGINFO handler.
        let ret = unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = libc::SA_RESETHAND;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(sig, &action, std::ptr::null_mut())
        };

        if ret != 0 {
            return Err(CrashError::SignalError(signal_name(sig), std::io::Error::last_os_error()))
        }
    }

    Ok(())
}

/// Name of a signal, as included in crash reports.
pub fn signal_name(sig: libc::c_int) -> &'static str {
    match sig {
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGTERM => "SIGTERM",
        libc::SIGABRT => "SIGABRT",
        libc::SIGFPE => "SIGFPE",
        libc::SIGINT => "SIGINT",
        libc::SIGILL => "SIGILL",
        _ => "UNKNOWN",
    }
}

/// Build the report broadcast when the robot crashes.
pub fn crash_report(
    robot_id: u32,
    sig: libc::c_int,
    stack_dump: String,
    status: RobotStatus
) -> RobotCrash {
    RobotCrash {
        robot_id,
        stack_dump,
        exit_signal: signal_name(sig).into(),
        status,
    }
}

/// Safe every peripheral in `ctx` then broadcast the crash report for `sig`.
///
/// Safing only flips atomics. Capturing the backtrace and serialising the report are not
/// async-signal-safe, but the process is ending and the report is the last thing it does.
pub fn report_crash(ctx: &CrashContext, sig: libc::c_int) -> Result<(), UdpError> {
    for p in ctx.peripherals.iter() {
        p.make_safe();
    }

    eprintln!("\n=========== ROBOT {} CRASHED ({}) ===========", ctx.robot_id, signal_name(sig));
    for p in ctx.peripherals.iter() {
        eprintln!("    {} made safe", p.name());
    }

    let stack_dump = Backtrace::force_capture().to_string();
    eprintln!("{}", stack_dump);

    ctx.sender.send_msg(&crash_report(ctx.robot_id, sig, stack_dump, ctx.last_status.get()))
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Fatal signal handler.
extern "C" fn handle_signal(sig: libc::c_int) {
    if let Some(ctx) = CRASH_CONTEXT.get() {
        if let Err(e) = report_crash(ctx, sig) {
            eprintln!("Could not broadcast the crash report: {}", e);
        }

        // Peripheral threads need a moment to send their idle commands
        let grace = libc::timespec {
            tv_sec: 0,
            tv_nsec: SAFING_GRACE.as_nanos() as libc::c_long,
        };
        // Safety: both pointers are valid for the duration of the call
        unsafe { libc::nanosleep(&grace, std::ptr::null_mut()); }
    }

    // Safety: _exit is async-signal-safe and never returns
    unsafe { libc::_exit(128 + sig) }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
