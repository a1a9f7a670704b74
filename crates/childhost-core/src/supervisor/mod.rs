//! # Supervision of one child process.
//!
//! ```text
//! Created ──launch──► Launching ──launched──► Connected ──channel error──► Disconnecting
//!                         │                                                    │
//!                         └─ invalid handle: destroyed            resolved ───► Terminated
//! ```
//!
//! A [`Supervisor`] owns the child's descriptor, channel, process handle, protocol
//! filters and delegate. It lives in the control loop's arena and is only driven from
//! there. Methods that can end the supervisor's life return a [`Disposition`]; the
//! loop destroys the supervisor when told to, which is the only way it dies besides
//! an explicit destroy or terminate-all.

mod disconnect;

pub use disconnect::{DisconnectOutcome, DisconnectState, DisconnectStep};

use crate::channel::{Channel, ChildEndpoint, Message, MessageFilter};
use crate::config::{CommandLine, LaunchParams};
use crate::control::ControlEnv;
use crate::delegate::{ChannelErrorAction, SupervisorDelegate};
use crate::error::SupervisorError;
use crate::metrics::ChildProcessMetric;
use crate::notification::NotificationKind;
use crate::process::{ChildId, ProcessDescriptor, ProcessHandle, ProcessId, TerminationStatus};
use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Created,
    Launching,
    Connected,
    /// Waiting for the exit status after the channel dropped
    Disconnecting,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub(crate) enum Disposition {
    Keep,
    Destroy,
}

pub struct Supervisor {
    data: ProcessDescriptor,
    state: LifecycleState,
    disconnect: DisconnectState,
    channel: Box<dyn Channel>,
    channel_errored: bool,
    process: Option<Box<dyn ProcessHandle>>,
    terminate_on_shutdown: bool,
    filters: Vec<Box<dyn MessageFilter>>,
    delegate: Box<dyn SupervisorDelegate>,
}

impl Supervisor {
    pub(crate) fn new(
        data: ProcessDescriptor,
        delegate: Box<dyn SupervisorDelegate>,
        channel: Box<dyn Channel>,
        terminate_on_shutdown: bool,
    ) -> Self {
        Self {
            data,
            state: LifecycleState::Created,
            disconnect: DisconnectState::default(),
            channel,
            channel_errored: false,
            process: None,
            terminate_on_shutdown,
            filters: Vec::new(),
            delegate,
        }
    }

    pub fn id(&self) -> ChildId {
        self.data.id
    }

    pub fn data(&self) -> &ProcessDescriptor {
        &self.data
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn disconnect_was_alive(&self) -> bool {
        self.disconnect.was_alive()
    }

    pub fn can_shutdown(&self) -> bool {
        self.delegate.can_shutdown()
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.data.name = name;
    }

    pub(crate) fn add_filter(&mut self, filter: Box<dyn MessageFilter>) {
        self.filters.push(filter);
    }

    pub(crate) fn set_terminate_on_shutdown(&mut self, terminate: bool) {
        self.terminate_on_shutdown = terminate;
        if let Some(process) = self.process.as_mut() {
            process.set_terminate_on_shutdown(terminate);
        }
    }

    fn invalid_state(&self, operation: &'static str) -> SupervisorError {
        SupervisorError::InvalidState {
            child: self.data.id,
            state: self.state,
            operation,
        }
    }

    /// Start the OS process through the loop's launcher without waiting for it
    pub(crate) fn launch(
        &mut self,
        env: &ControlEnv,
        mut command: CommandLine,
        params: LaunchParams,
    ) -> Result<(), SupervisorError> {
        if self.state != LifecycleState::Created || self.process.is_some() {
            return Err(self.invalid_state("launch"));
        }

        if let Some(switch) = env.config.child_id_switch.as_deref() {
            if !command.has_switch(switch) {
                command.append_switch_with_value(switch, self.data.id);
            }
        }

        info!(
            child = %self.data.id,
            kind = %self.data.kind,
            platform = env.launcher.platform_name(),
            %command,
            "Launching child process"
        );
        self.state = LifecycleState::Launching;

        let launcher = env.launcher.clone();
        let control = env.control.clone();
        let child = self.data.id;
        tokio::spawn(async move {
            let result = launcher.launch(&command, &params).await;
            if control
                .post(move |ctx| ctx.on_process_launched(child, result))
                .is_err()
            {
                debug!(%child, "Control loop gone, discarding launch result");
            }
        });

        Ok(())
    }

    pub(crate) fn on_process_launched(
        &mut self,
        result: Result<Box<dyn ProcessHandle>, SupervisorError>,
    ) -> Disposition {
        if self.state != LifecycleState::Launching || self.process.is_some() {
            warn!(child = %self.data.id, state = ?self.state, "Ignoring launch result outside of launching");
            return Disposition::Keep;
        }

        let mut process = match result {
            Ok(process) if process.pid().is_some() => process,
            Ok(_) => {
                let error = SupervisorError::LaunchFailed(
                    "launcher returned a handle without a process".to_string(),
                );
                return self.launch_failed(error);
            }
            Err(error) => return self.launch_failed(error),
        };

        process.set_terminate_on_shutdown(self.terminate_on_shutdown);
        let pid = process.pid();
        let stdio = process.take_stdio();
        let exited = process.exit_signal();
        self.data.pid = pid;
        self.process = Some(process);
        self.state = LifecycleState::Connected;
        info!(child = %self.data.id, ?pid, "Child process launched");

        if let Some(pid) = pid {
            self.channel.attach(ChildEndpoint { pid, stdio, exited });
        }
        self.delegate.on_process_launched(&self.data);
        Disposition::Keep
    }

    fn launch_failed(&mut self, error: SupervisorError) -> Disposition {
        error!(child = %self.data.id, kind = %self.data.kind, error = %error, "Child process failed to launch");
        self.delegate.on_process_launch_failed(&error);
        self.state = LifecycleState::Terminated;
        Disposition::Destroy
    }

    /// Adopt a process the caller launched itself
    pub(crate) fn set_handle(
        &mut self,
        mut process: Box<dyn ProcessHandle>,
    ) -> Result<(), SupervisorError> {
        if self.process.is_some() || self.state != LifecycleState::Created {
            return Err(self.invalid_state("set handle"));
        }

        process.set_terminate_on_shutdown(self.terminate_on_shutdown);
        self.data.pid = process.pid();
        self.process = Some(process);
        self.state = LifecycleState::Connected;
        debug!(child = %self.data.id, pid = ?self.data.pid, "Adopted process handle");
        Ok(())
    }

    pub(crate) fn send(&mut self, message: Message) -> Result<(), SupervisorError> {
        match self.state {
            LifecycleState::Launching | LifecycleState::Connected => {}
            LifecycleState::Created => return Err(self.invalid_state("send")),
            LifecycleState::Disconnecting | LifecycleState::Terminated => {
                return Err(SupervisorError::ChannelClosed);
            }
        }

        if self.channel_errored || !self.channel.send(message) {
            return Err(SupervisorError::ChannelClosed);
        }
        Ok(())
    }

    pub fn termination_status(&self) -> Result<TerminationStatus, SupervisorError> {
        self.process
            .as_ref()
            .map(|process| process.termination_status())
            .ok_or(SupervisorError::NotLaunched)
    }

    pub(crate) fn on_channel_connected(&mut self, env: &ControlEnv, peer_pid: ProcessId) {
        debug!(child = %self.data.id, peer_pid, "Channel connected");
        for filter in &mut self.filters {
            filter.on_channel_connected(peer_pid);
        }
        env.bus.publish(NotificationKind::HostConnected, &self.data);
        self.delegate.on_channel_connected(peer_pid);
    }

    pub(crate) fn on_message_received(&mut self, message: &Message) -> bool {
        for filter in &mut self.filters {
            if filter.on_message_received(message) {
                return true;
            }
        }
        self.delegate.on_message_received(message)
    }

    pub(crate) fn on_channel_error(&mut self, env: &mut ControlEnv) -> Disposition {
        if self.channel_errored {
            debug!(child = %self.data.id, "Ignoring repeated channel error");
            return Disposition::Keep;
        }
        self.channel_errored = true;
        warn!(child = %self.data.id, "Channel error");

        for filter in &mut self.filters {
            filter.on_channel_error();
        }

        match self.delegate.on_channel_error() {
            ChannelErrorAction::Disconnect => self.on_child_disconnected(env),
            ChannelErrorAction::Ignore => Disposition::Keep,
        }
    }

    /// Resolve how the child ended and emit the terminal notification.
    ///
    /// Runs once from the channel error and at most once more from the scheduled
    /// re-check.
    pub(crate) fn on_child_disconnected(&mut self, env: &mut ControlEnv) -> Disposition {
        let Some(process) = self.process.as_ref() else {
            warn!(child = %self.data.id, state = ?self.state, "Disconnected before a process handle was set");
            self.disconnect = DisconnectState::Resolved { was_alive: false };
            return self.finish(env);
        };

        let status = process.termination_status();
        let (next, step) = self.disconnect.observe(status);
        self.disconnect = next;
        self.state = LifecycleState::Disconnecting;
        debug!(child = %self.data.id, ?status, ?step, "Child disconnected");

        match step {
            DisconnectStep::Ignore => Disposition::Keep,
            DisconnectStep::AwaitExit => {
                self.schedule_exit_recheck(env);
                Disposition::Keep
            }
            DisconnectStep::Resolve(outcome) => {
                self.report(env, outcome);
                self.finish(env)
            }
        }
    }

    fn report(&mut self, env: &mut ControlEnv, outcome: DisconnectOutcome) {
        let kind = self.data.kind;
        let was_alive = self.disconnect.was_alive();

        match outcome {
            DisconnectOutcome::Crashed { exit_code } => {
                warn!(child = %self.data.id, %kind, exit_code, was_alive, "Child process crashed");
                self.delegate.on_process_crashed(exit_code);
                env.bus.publish(NotificationKind::Crashed, &self.data);
                env.metrics.record(ChildProcessMetric::Crashed, kind);
                if was_alive {
                    env.metrics.record(ChildProcessMetric::CrashedWasAlive, kind);
                }
            }
            DisconnectOutcome::Killed { exit_code } => {
                info!(child = %self.data.id, %kind, exit_code, was_alive, "Child process was killed");
                env.metrics.record(ChildProcessMetric::Killed, kind);
                if was_alive {
                    env.metrics.record(ChildProcessMetric::KilledWasAlive, kind);
                }
            }
            DisconnectOutcome::GaveUpWaiting => {
                warn!(child = %self.data.id, %kind, "Child process still running after disconnect");
                env.metrics.record(ChildProcessMetric::DisconnectedAlive, kind);
            }
            DisconnectOutcome::Exited => {
                info!(child = %self.data.id, %kind, "Child process exited");
            }
        }
    }

    fn finish(&mut self, env: &mut ControlEnv) -> Disposition {
        env.metrics
            .record(ChildProcessMetric::Disconnected, self.data.kind);
        env.bus
            .publish(NotificationKind::HostDisconnected, &self.data);
        self.delegate.on_child_disconnected(&self.data);
        self.state = LifecycleState::Terminated;
        Disposition::Destroy
    }

    /// Re-run the disconnect resolution once the exit status is likely available
    fn schedule_exit_recheck(&self, env: &ControlEnv) {
        let exit_signal = self.process.as_ref().and_then(|p| p.exit_signal());
        let exit_wait = env.config.exit_wait.clone();
        let control = env.control.clone();
        let child = self.data.id;

        tokio::spawn(async move {
            match exit_signal {
                Some(exited) => {
                    if tokio::time::timeout(exit_wait.signal_timeout(), exited)
                        .await
                        .is_err()
                    {
                        debug!(%child, "Exit signal timed out");
                    }
                }
                None => tokio::time::sleep(exit_wait.poll_delay()).await,
            }

            if control
                .post(move |ctx| ctx.recheck_disconnect(child))
                .is_err()
            {
                debug!(%child, "Control loop gone, dropping exit re-check");
            }
        });
    }

    /// Unregister and stop the channel without waiting for a graceful disconnect
    pub(crate) fn force_shutdown(&mut self, env: &mut ControlEnv) {
        info!(child = %self.data.id, "Force shutdown");
        env.registry.unregister(self.data.id);
        self.channel.force_shutdown();
    }

    pub(crate) fn shutdown_started(&mut self, env: &mut ControlEnv) {
        debug!(child = %self.data.id, "Shutdown started");
        env.registry.unregister(self.data.id);
    }
}

#[cfg(test)]
mod tests;
