use childhost_core::TerminationStatus;
use std::process::ExitStatus;

/// Exit code reported for a process that has not exited yet
pub const STILL_ACTIVE: u32 = 259;

/// Exit code used when a child is terminated on purpose
pub const RESULT_CODE_KILLED: u32 = 1;

/// Exit code used when a hung child is terminated
pub const RESULT_CODE_HUNG: u32 = 2;

/// `STATUS_CONTROL_C_EXIT`: the console was closed or Ctrl-C was pressed
pub const STATUS_CONTROL_C_EXIT: u32 = 0xC000_013A;

/// Start of the NTSTATUS error range; exceptions such as access violations land here
const NTSTATUS_ERROR_BASE: u32 = 0xC000_0000;

/// Classify a raw Windows exit code.
///
/// `STILL_ACTIVE` is reported as still running even after the process handle
/// signalled: a child may legitimately exit with 259, and the disconnect retry
/// resolves that ambiguity.
pub fn classify_exit_code(code: u32) -> TerminationStatus {
    let raw = code as i32;
    match code {
        0 => TerminationStatus::NormalTermination,
        STILL_ACTIVE => TerminationStatus::StillRunning,
        RESULT_CODE_KILLED | RESULT_CODE_HUNG | STATUS_CONTROL_C_EXIT => {
            TerminationStatus::Killed(raw)
        }
        code if code >= NTSTATUS_ERROR_BASE => TerminationStatus::Crashed(raw),
        _ => TerminationStatus::AbnormalTermination(raw),
    }
}

pub fn classify_exit_status(status: ExitStatus) -> TerminationStatus {
    match status.code() {
        Some(code) => classify_exit_code(code as u32),
        None => TerminationStatus::Killed(-1),
    }
}
