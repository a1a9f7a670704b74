//! Exit-status resolution after a channel drop.
//!
//! The transport can notice that the peer is gone before the OS reports the
//! child's exit status. The first "still running" observation schedules one
//! bounded re-check; a second one gives up. Once resolved, the state never
//! produces another step, so the terminal notification fires at most once.

use crate::process::TerminationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectState {
    #[default]
    NotYetObservedRunning,
    ObservedRunningOnce,
    Resolved {
        was_alive: bool,
    },
}

/// How a disconnect was finally classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Crashed { exit_code: i32 },
    Killed { exit_code: i32 },
    Exited,
    /// Still running after the re-check; stop waiting
    GaveUpWaiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectStep {
    /// Schedule exactly one re-check and emit nothing yet
    AwaitExit,
    Resolve(DisconnectOutcome),
    /// Already resolved; nothing to do
    Ignore,
}

impl DisconnectState {
    /// True from the first "still running" observation on, for good
    pub fn was_alive(&self) -> bool {
        matches!(
            self,
            DisconnectState::ObservedRunningOnce | DisconnectState::Resolved { was_alive: true }
        )
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, DisconnectState::Resolved { .. })
    }

    pub fn observe(self, status: TerminationStatus) -> (DisconnectState, DisconnectStep) {
        let was_alive = self.was_alive();
        let resolved = DisconnectState::Resolved { was_alive };

        match (self, status) {
            (DisconnectState::Resolved { .. }, _) => (self, DisconnectStep::Ignore),
            (DisconnectState::NotYetObservedRunning, TerminationStatus::StillRunning) => (
                DisconnectState::ObservedRunningOnce,
                DisconnectStep::AwaitExit,
            ),
            (DisconnectState::ObservedRunningOnce, TerminationStatus::StillRunning) => (
                resolved,
                DisconnectStep::Resolve(DisconnectOutcome::GaveUpWaiting),
            ),
            (_, TerminationStatus::Crashed(exit_code))
            | (_, TerminationStatus::AbnormalTermination(exit_code)) => (
                resolved,
                DisconnectStep::Resolve(DisconnectOutcome::Crashed { exit_code }),
            ),
            (_, TerminationStatus::Killed(exit_code)) => (
                resolved,
                DisconnectStep::Resolve(DisconnectOutcome::Killed { exit_code }),
            ),
            (_, TerminationStatus::NormalTermination) => {
                (resolved, DisconnectStep::Resolve(DisconnectOutcome::Exited))
            }
        }
    }
}
