//! Fatal crash reporting.
//!
//! A `SIGSEGV` handler and a panic hook are installed once per process. Both
//! capture the current stack, hand it to the installed [`CrashReporter`] and
//! exit with status 1. Nothing is cleaned up on this path, so the socket file
//! may be left behind.
//!
//! Capturing a backtrace inside a signal handler is not async-signal-safe;
//! the report is best effort.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::io::Write;
use std::panic::Location;
use std::sync::{Arc, Once, OnceLock};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

/// Maximum number of stack frames kept in a report.
pub const MAX_FRAMES: usize = 256;

/// Exit status used after a crash report.
pub const CRASH_EXIT_CODE: i32 = 1;

static INSTALL: Once = Once::new();
static REPORTER: OnceLock<Arc<dyn CrashReporter>> = OnceLock::new();

/// What triggered the crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrashCause {
    /// A fatal signal, by number.
    Signal(i32),
    /// A panic with its message and source location.
    Panic {
        message: String,
        location: Option<String>,
    },
}

impl fmt::Display for CrashCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrashCause::Signal(sig) => write!(f, "signal {}", sig),
            CrashCause::Panic {
                message,
                location: Some(location),
            } => write!(f, "panic at {}: {}", location, message),
            CrashCause::Panic {
                message,
                location: None,
            } => write!(f, "panic: {}", message),
        }
    }
}

/// A captured crash: cause plus symbolised stack trace.
#[derive(Debug, Clone)]
pub struct CrashReport {
    /// What triggered the crash.
    pub cause: CrashCause,
    /// Symbolised stack trace, at most [`MAX_FRAMES`] frames.
    pub trace: String,
    /// Number of frames in `trace`.
    pub frames: usize,
}

impl CrashReport {
    /// Capture the current stack for `cause`.
    pub fn capture(cause: CrashCause) -> Self {
        let full = Backtrace::force_capture().to_string();
        let (trace, frames) = truncate_frames(&full, MAX_FRAMES);
        Self {
            cause,
            trace,
            frames,
        }
    }
}

/// Sink for crash reports.
pub trait CrashReporter: Send + Sync + 'static {
    /// Publish a report. Called right before the process exits.
    fn report(&self, report: &CrashReport);
}

/// Default reporter: a critical log event plus the raw trace on stderr.
pub struct StderrReporter;

impl CrashReporter for StderrReporter {
    fn report(&self, report: &CrashReport) {
        tracing::error!(severity = "critical", "Error: {}", report.cause);

        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "Error: {}", report.cause);
        let _ = stderr.write_all(report.trace.as_bytes());
        let _ = stderr.flush();
    }
}

/// Install the crash handlers with the [`StderrReporter`].
///
/// Returns `true` if this call installed them, `false` if they were already
/// installed earlier in the process.
pub fn install() -> bool {
    install_with(Arc::new(StderrReporter))
}

/// Install the crash handlers with a custom reporter.
///
/// Only the first call in a process has any effect.
pub fn install_with(reporter: Arc<dyn CrashReporter>) -> bool {
    let mut installed = false;
    INSTALL.call_once(|| {
        let _ = REPORTER.set(reporter);

        if let Err(e) = install_signal_handler(Signal::SIGSEGV) {
            tracing::error!("sigaction(SIGSEGV) failed: {}", e);
        }
        std::panic::set_hook(Box::new(|info| on_panic(info.payload(), info.location())));

        installed = true;
    });
    installed
}

/// Whether the crash handlers are installed in this process.
pub fn is_installed() -> bool {
    INSTALL.is_completed()
}

/// Capture a report for `cause` and pass it to `reporter`.
///
/// This is everything the installed handlers do except exiting.
pub fn report_crash(cause: CrashCause, reporter: &dyn CrashReporter) -> CrashReport {
    let report = CrashReport::capture(cause);
    reporter.report(&report);
    report
}

fn current_reporter() -> &'static dyn CrashReporter {
    match REPORTER.get() {
        Some(reporter) => reporter.as_ref(),
        None => &StderrReporter,
    }
}

extern "C" fn on_fatal_signal(sig: libc::c_int) {
    report_crash(CrashCause::Signal(sig), current_reporter());
    // SAFETY: _exit is async-signal-safe and never returns.
    unsafe { libc::_exit(CRASH_EXIT_CODE) }
}

fn on_panic(payload: &(dyn Any + Send), location: Option<&Location<'_>>) {
    let message = if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "Box<dyn Any>".to_string()
    };
    let location = location.map(|loc| format!("{}:{}", loc.file(), loc.line()));

    report_crash(CrashCause::Panic { message, location }, current_reporter());
    std::process::exit(CRASH_EXIT_CODE);
}

fn install_signal_handler(sig: Signal) -> nix::Result<()> {
    // Runs on the alternate signal stack so a stack overflow can still be
    // reported.
    let action = SigAction::new(
        SigHandler::Handler(on_fatal_signal),
        SaFlags::SA_ONSTACK,
        SigSet::empty(),
    );
    // SAFETY: the handler only reports and then calls `_exit`.
    unsafe { sigaction(sig, &action) }?;
    Ok(())
}

/// Keep the first `max` frames of a formatted backtrace.
///
/// Frames start with their index (`  12: symbol`); the `at file:line` lines
/// that follow a frame belong to it.
fn truncate_frames(trace: &str, max: usize) -> (String, usize) {
    let mut out = String::with_capacity(trace.len());
    let mut frames = 0;

    for line in trace.lines() {
        if is_frame_start(line) {
            if frames == max {
                break;
            }
            frames += 1;
        }
        out.push_str(line);
        out.push('\n');
    }

    (out, frames)
}

fn is_frame_start(line: &str) -> bool {
    let trimmed = line.trim_start();
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && trimmed[digits..].starts_with(':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReporter {
        reports: Mutex<Vec<CrashReport>>,
    }

    impl CrashReporter for RecordingReporter {
        fn report(&self, report: &CrashReport) {
            self.reports.lock().unwrap().push(report.clone());
        }
    }

    /// Set in a re-executed test binary to pick the crash to trigger.
    const CRASH_MODE_ENV: &str = "MSGPACK_SERVER_CRASH_MODE";

    /// Re-run `test` alone in a child process with `mode` set, returning
    /// the exit code and stderr.
    fn run_crashing_child(test: &str, mode: &str) -> (Option<i32>, String) {
        let output = std::process::Command::new(std::env::current_exe().unwrap())
            .args([test, "--exact", "--nocapture", "--test-threads=1"])
            .env(CRASH_MODE_ENV, mode)
            .output()
            .unwrap();
        (
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        )
    }

    fn fake_trace(frames: usize) -> String {
        (0..frames)
            .map(|i| format!("  {i}: frame_{i}\n             at src/lib.rs:{i}:1\n"))
            .collect()
    }

    #[test]
    fn test_cause_display() {
        assert_eq!(CrashCause::Signal(11).to_string(), "signal 11");
        assert_eq!(
            CrashCause::Panic {
                message: "boom".to_string(),
                location: Some("src/main.rs:3".to_string()),
            }
            .to_string(),
            "panic at src/main.rs:3: boom"
        );
        assert_eq!(
            CrashCause::Panic {
                message: "boom".to_string(),
                location: None,
            }
            .to_string(),
            "panic: boom"
        );
    }

    #[test]
    fn test_report_crash_reaches_reporter() {
        let reporter = RecordingReporter::default();

        let report = report_crash(CrashCause::Signal(libc::SIGSEGV), &reporter);

        let reports = reporter.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].cause, CrashCause::Signal(libc::SIGSEGV));
        assert_eq!(reports[0].frames, report.frames);
        assert!(report.frames <= MAX_FRAMES);
    }

    #[test]
    fn test_truncate_keeps_short_traces() {
        let trace = fake_trace(3);
        let (out, frames) = truncate_frames(&trace, MAX_FRAMES);

        assert_eq!(frames, 3);
        assert_eq!(out, trace);
    }

    #[test]
    fn test_truncate_bounds_frame_count() {
        let trace = fake_trace(MAX_FRAMES + 40);
        let (out, frames) = truncate_frames(&trace, MAX_FRAMES);

        assert_eq!(frames, MAX_FRAMES);
        assert!(out.contains(&format!("frame_{}\n", MAX_FRAMES - 1)));
        assert!(!out.contains(&format!("frame_{}\n", MAX_FRAMES)));
        // Location line of the last kept frame stays attached to it.
        assert!(out.ends_with(&format!("at src/lib.rs:{}:1\n", MAX_FRAMES - 1)));
    }

    #[test]
    fn test_frame_start_detection() {
        assert!(is_frame_start("   0: std::backtrace::Backtrace::create"));
        assert!(is_frame_start("  12: main"));
        assert!(!is_frame_start("             at src/main.rs:1:1"));
        assert!(!is_frame_start("disabled backtrace"));
        assert!(!is_frame_start(""));
    }

    #[test]
    fn test_installed_panic_hook_reports_and_exits() {
        if std::env::var_os(CRASH_MODE_ENV).is_some_and(|mode| mode == "panic") {
            assert!(install());
            panic!("crash hook check");
        }

        let (code, stderr) = run_crashing_child(
            "diagnostics::crash::tests::test_installed_panic_hook_reports_and_exits",
            "panic",
        );

        assert_eq!(code, Some(CRASH_EXIT_CODE), "stderr: {stderr}");
        assert!(stderr.contains("Error: panic"), "stderr: {stderr}");
        assert!(stderr.contains("crash hook check"), "stderr: {stderr}");
    }

    #[test]
    fn test_installed_signal_handler_reports_and_exits() {
        if std::env::var_os(CRASH_MODE_ENV).is_some_and(|mode| mode == "segv") {
            assert!(install());
            nix::sys::signal::raise(Signal::SIGSEGV).unwrap();
            unreachable!("SIGSEGV handler returned");
        }

        let (code, stderr) = run_crashing_child(
            "diagnostics::crash::tests::test_installed_signal_handler_reports_and_exits",
            "segv",
        );

        assert_eq!(code, Some(CRASH_EXIT_CODE), "stderr: {stderr}");
        assert!(
            stderr.contains(&format!("Error: signal {}", libc::SIGSEGV)),
            "stderr: {stderr}"
        );
    }
}
