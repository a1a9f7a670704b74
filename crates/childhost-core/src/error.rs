use crate::process::ChildId;
use crate::supervisor::LifecycleState;
use thiserror::Error;

/// Core error types for child process supervision
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to launch child process: {0}")]
    LaunchFailed(String),

    #[error("Child {child} cannot {operation} while {state:?}")]
    InvalidState {
        child: ChildId,
        state: LifecycleState,
        operation: &'static str,
    },

    #[error("Channel to child process is closed")]
    ChannelClosed,

    #[error("Child process has not been launched")]
    NotLaunched,

    #[error("No supervisor for child {0}")]
    UnknownChild(ChildId),

    #[error("Control loop is not running")]
    ControlLoopClosed,

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl SupervisorError {
    /// Wrap a launcher failure, keeping the whole context chain in the message
    pub fn launch_failed(error: impl Into<anyhow::Error>) -> Self {
        SupervisorError::LaunchFailed(format!("{:#}", error.into()))
    }

    /// Check if this error means the OS process never came up
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, SupervisorError::LaunchFailed(_))
    }

    /// Check if retrying the same call can never succeed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SupervisorError::ChannelClosed
                | SupervisorError::UnknownChild(_)
                | SupervisorError::ControlLoopClosed
        )
    }
}
