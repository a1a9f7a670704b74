use crate::channel::Message;
use crate::error::SupervisorError;
use crate::process::{ProcessDescriptor, ProcessId};

/// What a supervisor should do after its channel reported an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelErrorAction {
    /// Resolve the exit status and tear the supervisor down
    #[default]
    Disconnect,
    /// Keep the supervisor alive
    Ignore,
}

/// Lifecycle callbacks and policy answers supplied by the owner of a supervisor.
///
/// The supervisor owns its delegate and drops it when it is destroyed, so the
/// delegate always outlives every callback made on it. All callbacks run on the
/// control loop and must not block.
pub trait SupervisorDelegate: Send {
    fn on_process_launched(&mut self, _data: &ProcessDescriptor) {}

    /// The process never came up; no crash or disconnect callback follows
    fn on_process_launch_failed(&mut self, _error: &SupervisorError) {}

    fn on_process_crashed(&mut self, _exit_code: i32) {}

    fn can_shutdown(&self) -> bool {
        true
    }

    /// Return true if the message was handled
    fn on_message_received(&mut self, _message: &Message) -> bool {
        false
    }

    fn on_channel_connected(&mut self, _peer_pid: ProcessId) {}

    fn on_channel_error(&mut self) -> ChannelErrorAction {
        ChannelErrorAction::Disconnect
    }

    /// Last callback before the supervisor is destroyed
    fn on_child_disconnected(&mut self, _data: &ProcessDescriptor) {}
}
