//! POSIX wait-status classification.
//!
//! | wait status                              | result                    |
//! |------------------------------------------|---------------------------|
//! | exited with 0                            | `NormalTermination`       |
//! | exited with n != 0                       | `AbnormalTermination(n)`  |
//! | SIGINT, SIGKILL, SIGTERM                 | `Killed(sig)`             |
//! | SIGABRT, SIGBUS, SIGFPE, SIGILL, SIGSEGV, SIGSYS, SIGTRAP | `Crashed(sig)` |
//! | any other signal                         | `AbnormalTermination(sig)`|

#[cfg(unix)]
mod unix_impl {
    use childhost_core::TerminationStatus;
    use nix::sys::signal::Signal;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    pub fn classify_exit_status(status: ExitStatus) -> TerminationStatus {
        if let Some(code) = status.code() {
            return match code {
                0 => TerminationStatus::NormalTermination,
                code => TerminationStatus::AbnormalTermination(code),
            };
        }

        match status.signal() {
            Some(raw) => classify_signal(raw),
            // Neither exited nor signalled: stopped or continued, still alive.
            None => TerminationStatus::StillRunning,
        }
    }

    pub fn classify_signal(raw: i32) -> TerminationStatus {
        match Signal::try_from(raw) {
            Ok(Signal::SIGINT | Signal::SIGKILL | Signal::SIGTERM) => TerminationStatus::Killed(raw),
            Ok(
                Signal::SIGABRT
                | Signal::SIGBUS
                | Signal::SIGFPE
                | Signal::SIGILL
                | Signal::SIGSEGV
                | Signal::SIGSYS
                | Signal::SIGTRAP,
            ) => TerminationStatus::Crashed(raw),
            _ => TerminationStatus::AbnormalTermination(raw),
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{classify_exit_status, classify_signal};
