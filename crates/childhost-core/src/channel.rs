use crate::control::WeakControlHandle;
use crate::process::{ChildId, ChildStdio, ExitSignal, ProcessId};
use tracing::debug;

/// One message exchanged with a child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    body: String,
}

impl Message {
    pub fn new<S: Into<String>>(body: S) -> Self {
        Self { body: body.into() }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }
}

impl From<&str> for Message {
    fn from(body: &str) -> Self {
        Message::new(body)
    }
}

impl From<String> for Message {
    fn from(body: String) -> Self {
        Message::new(body)
    }
}

/// What a channel receives once its child process is running
pub struct ChildEndpoint {
    pub pid: ProcessId,
    pub stdio: Option<ChildStdio>,
    /// Resolves when the child exits, if the handle can signal it
    pub exited: Option<ExitSignal>,
}

/// Point-to-point transport bound to one child process.
///
/// Implementations report connect, message and error events through the
/// [`ChannelEventSink`] they were created with.
pub trait Channel: Send {
    /// Queue a message for the child; false once the channel has failed
    fn send(&mut self, message: Message) -> bool;

    /// Called on the control loop after the child has been launched
    fn attach(&mut self, _endpoint: ChildEndpoint) {}

    /// Stop the transport immediately
    fn force_shutdown(&mut self);
}

/// Protocol filter that sees messages before the delegate
pub trait MessageFilter: Send {
    /// Return true to consume the message
    fn on_message_received(&mut self, message: &Message) -> bool;

    fn on_channel_connected(&mut self, _peer_pid: ProcessId) {}

    fn on_channel_error(&mut self) {}
}

#[derive(Debug)]
pub(crate) enum ChannelEvent {
    Connected(ProcessId),
    MessageReceived(Message),
    Error,
}

/// Posts channel events for one child onto the control loop
#[derive(Clone)]
pub struct ChannelEventSink {
    child: ChildId,
    control: WeakControlHandle,
}

impl ChannelEventSink {
    pub(crate) fn new(child: ChildId, control: WeakControlHandle) -> Self {
        Self { child, control }
    }

    pub fn child(&self) -> ChildId {
        self.child
    }

    pub fn connected(&self, peer_pid: ProcessId) {
        self.post(ChannelEvent::Connected(peer_pid));
    }

    pub fn message_received(&self, message: Message) {
        self.post(ChannelEvent::MessageReceived(message));
    }

    pub fn channel_error(&self) {
        self.post(ChannelEvent::Error);
    }

    fn post(&self, event: ChannelEvent) {
        let child = self.child;
        if self
            .control
            .post(move |ctx| ctx.on_channel_event(child, event))
            .is_err()
        {
            debug!(%child, "Control loop gone, dropping channel event");
        }
    }
}
