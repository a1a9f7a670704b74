//! Recording doubles for the launcher, handle, channel and delegate seams.

use crate::channel::{Channel, ChannelEventSink, ChildEndpoint, Message, MessageFilter};
use crate::config::{CommandLine, LaunchParams};
use crate::control::ControlHandle;
use crate::delegate::{ChannelErrorAction, SupervisorDelegate};
use crate::error::SupervisorError;
use crate::process::{
    ChildId, ExitSignal, ProcessDescriptor, ProcessHandle, ProcessId, ProcessLauncher,
    TerminationStatus,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Shared, ordered log of callbacks
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub(crate) fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == event).count()
    }
}

pub(crate) struct RecordingDelegate {
    pub(crate) recorder: Recorder,
    pub(crate) can_shutdown: bool,
    pub(crate) on_error: ChannelErrorAction,
    pub(crate) consume_messages: bool,
}

impl RecordingDelegate {
    pub(crate) fn new(recorder: &Recorder) -> Self {
        Self {
            recorder: recorder.clone(),
            can_shutdown: true,
            on_error: ChannelErrorAction::Disconnect,
            consume_messages: false,
        }
    }
}

impl SupervisorDelegate for RecordingDelegate {
    fn on_process_launched(&mut self, _data: &ProcessDescriptor) {
        self.recorder.push("launched");
    }

    fn on_process_launch_failed(&mut self, _error: &SupervisorError) {
        self.recorder.push("launch_failed");
    }

    fn on_process_crashed(&mut self, exit_code: i32) {
        self.recorder.push(format!("crashed:{exit_code}"));
    }

    fn can_shutdown(&self) -> bool {
        self.can_shutdown
    }

    fn on_message_received(&mut self, message: &Message) -> bool {
        self.recorder.push(format!("message:{}", message.body()));
        self.consume_messages
    }

    fn on_channel_connected(&mut self, peer_pid: ProcessId) {
        self.recorder.push(format!("connected:{peer_pid}"));
    }

    fn on_channel_error(&mut self) -> ChannelErrorAction {
        self.recorder.push("channel_error");
        self.on_error
    }

    fn on_child_disconnected(&mut self, _data: &ProcessDescriptor) {
        self.recorder.push("disconnected");
    }
}

/// Filter that consumes messages starting with a prefix
pub(crate) struct PrefixFilter {
    pub(crate) prefix: &'static str,
    pub(crate) recorder: Recorder,
}

impl MessageFilter for PrefixFilter {
    fn on_message_received(&mut self, message: &Message) -> bool {
        if message.body().starts_with(self.prefix) {
            self.recorder.push(format!("filtered:{}", message.body()));
            return true;
        }
        false
    }

    fn on_channel_error(&mut self) {
        self.recorder.push("filter_error");
    }
}

/// Test-side control over a [`MockHandle`]
#[derive(Clone)]
pub(crate) struct MockProcess {
    status: Arc<Mutex<TerminationStatus>>,
    exited: watch::Sender<bool>,
    terminate_on_shutdown: Arc<AtomicBool>,
    terminated: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
}

impl MockProcess {
    pub(crate) fn new() -> Self {
        let (exited, _) = watch::channel(false);
        Self {
            status: Arc::new(Mutex::new(TerminationStatus::StillRunning)),
            exited,
            terminate_on_shutdown: Arc::new(AtomicBool::new(false)),
            terminated: Arc::new(AtomicBool::new(false)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn set_status(&self, status: TerminationStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// Set the status and fire the exit signal
    pub(crate) fn exit(&self, status: TerminationStatus) {
        self.set_status(status);
        self.exited.send_replace(true);
    }

    pub(crate) fn terminate_on_shutdown(&self) -> bool {
        self.terminate_on_shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Whether the supervisor has dropped its handle
    pub(crate) fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// A handle that can signal its exit
    pub(crate) fn handle(&self, pid: ProcessId) -> Box<dyn ProcessHandle> {
        Box::new(MockHandle {
            pid: Some(pid),
            process: self.clone(),
            signals_exit: true,
        })
    }

    /// A handle that must be polled for its exit
    pub(crate) fn polled_handle(&self, pid: ProcessId) -> Box<dyn ProcessHandle> {
        Box::new(MockHandle {
            pid: Some(pid),
            process: self.clone(),
            signals_exit: false,
        })
    }

    /// A handle that never had a process behind it
    pub(crate) fn invalid_handle(&self) -> Box<dyn ProcessHandle> {
        Box::new(MockHandle {
            pid: None,
            process: self.clone(),
            signals_exit: false,
        })
    }
}

struct MockHandle {
    pid: Option<ProcessId>,
    process: MockProcess,
    signals_exit: bool,
}

impl ProcessHandle for MockHandle {
    fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    fn termination_status(&self) -> TerminationStatus {
        *self.process.status.lock().unwrap()
    }

    fn set_terminate_on_shutdown(&mut self, terminate: bool) {
        self.process
            .terminate_on_shutdown
            .store(terminate, Ordering::SeqCst);
    }

    fn exit_signal(&self) -> Option<ExitSignal> {
        if !self.signals_exit {
            return None;
        }
        let mut exited = self.process.exited.subscribe();
        Some(Box::pin(async move {
            let _ = exited.wait_for(|exited| *exited).await;
        }))
    }

    fn terminate(&mut self) -> anyhow::Result<()> {
        self.process.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.process.released.store(true, Ordering::SeqCst);
    }
}

/// Launcher that hands out queued results in order
#[derive(Clone, Default)]
pub(crate) struct MockLauncher {
    results: Arc<Mutex<VecDeque<Result<Box<dyn ProcessHandle>, SupervisorError>>>>,
    commands: Arc<Mutex<Vec<CommandLine>>>,
}

impl MockLauncher {
    pub(crate) fn push(&self, result: Result<Box<dyn ProcessHandle>, SupervisorError>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub(crate) fn commands(&self) -> Vec<CommandLine> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessLauncher for MockLauncher {
    async fn launch(
        &self,
        command: &CommandLine,
        _params: &LaunchParams,
    ) -> Result<Box<dyn ProcessHandle>, SupervisorError> {
        self.commands.lock().unwrap().push(command.clone());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SupervisorError::LaunchFailed("no result queued".into())))
    }

    fn platform_name(&self) -> &'static str {
        "mock"
    }
}

/// Test-side view of a [`MockChannel`]
#[derive(Clone, Default)]
pub(crate) struct ChannelSpy {
    sink: Arc<Mutex<Option<ChannelEventSink>>>,
    sent: Arc<Mutex<Vec<String>>>,
    attached: Arc<Mutex<Option<ProcessId>>>,
    refuse: Arc<AtomicBool>,
    force_shutdown: Arc<AtomicBool>,
}

impl ChannelSpy {
    pub(crate) fn channel(&self, sink: ChannelEventSink) -> MockChannel {
        *self.sink.lock().unwrap() = Some(sink);
        MockChannel {
            spy: self.clone(),
        }
    }

    pub(crate) fn sink(&self) -> ChannelEventSink {
        self.sink
            .lock()
            .unwrap()
            .clone()
            .expect("channel not created yet")
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn attached_pid(&self) -> Option<ProcessId> {
        *self.attached.lock().unwrap()
    }

    pub(crate) fn refuse_sends(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub(crate) fn was_force_shutdown(&self) -> bool {
        self.force_shutdown.load(Ordering::SeqCst)
    }
}

pub(crate) struct MockChannel {
    spy: ChannelSpy,
}

impl Channel for MockChannel {
    fn send(&mut self, message: Message) -> bool {
        if self.spy.refuse.load(Ordering::SeqCst) {
            return false;
        }
        self.spy.sent.lock().unwrap().push(message.into_body());
        true
    }

    fn attach(&mut self, endpoint: ChildEndpoint) {
        *self.spy.attached.lock().unwrap() = Some(endpoint.pid);
    }

    fn force_shutdown(&mut self) {
        self.spy.force_shutdown.store(true, Ordering::SeqCst);
    }
}

/// Poll the control loop until `check` holds; paused time makes each step instant
pub(crate) async fn wait_until<F>(control: &ControlHandle, mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..10_000 {
        let _ = control.enumerate().await;
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

pub(crate) async fn wait_gone(control: &ControlHandle, child: ChildId) {
    for _ in 0..10_000 {
        if !control.exists(child).await.unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("supervisor {child} never destroyed");
}
