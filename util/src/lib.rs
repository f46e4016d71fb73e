//! Utility library for the Thunderbots robot software

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod audit;
pub mod host;
#[macro_use]
pub mod logger;
pub mod params;
pub mod session;
pub mod time;

// ---------------------------------------------------------------------------
// MACROS
// ---------------------------------------------------------------------------

/// Fire an unrecoverable error which will abort the process.
///
/// The abort raises `SIGABRT`, so any crash handler installed by the executable (peripheral
/// safing, crash broadcast) runs before the process exits.
///
/// # Notes
/// = It is prefered to return a `Result<_,Error>` instead of raising an error
///   as this allows the application to potentially handle.
#[macro_export]
macro_rules! raise_error {
    () => ({
        log::error!("Explicit error raised.");
        std::process::abort();
    });
    ($fmt:expr) => ({
        log::error!("{}", $fmt);
        std::process::abort();
    });
    ($fmt:expr, $($arg:tt)*) => ({
        log::error!("{}", std::format_args!($fmt, $($arg)*));
        std::process::abort();
    });
}
