//! Diagnostics module - process-wide signal and panic handling.
//!
//! - [`crash`] reports fatal signals and panics, then exits
//! - [`InterruptLogger`] logs `SIGINT` without changing control flow

pub mod crash;
mod interrupt;

pub use crash::{
    install, install_with, is_installed, report_crash, CrashCause, CrashReport, CrashReporter,
    StderrReporter, MAX_FRAMES,
};
pub use interrupt::InterruptLogger;
