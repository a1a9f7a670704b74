//! # Control loop.
//!
//! All supervisor state lives in a [`ControlContext`] that is moved into a single task.
//! Everything else talks to it by posting closures through a [`ControlHandle`]:
//!
//! ```text
//! caller ──────────┐
//! launch task ─────┼──► mpsc queue ──► ControlLoop::run ──► ControlContext
//! channel tasks ───┤                                         ├─ supervisors (arena)
//! exit re-checks ──┘                                         ├─ ProcessRegistry
//!                                                            ├─ ChildProcessMetrics
//!                                                            └─ NotificationBus ──► observers
//! ```
//!
//! ## Rules
//! - Tasks run one at a time, in posting order; nothing in the context is locked.
//! - Mutations are fire-and-forget. Queries carry a oneshot reply.
//! - Work posted for a child that no longer exists is dropped.
//! - `shutdown()` stops the loop, which then terminates every registered supervisor
//!   and drops the rest. Dropping the last [`ControlHandle`] does the same.
//! - Launch tasks, exit re-checks and channel sinks hold a `WeakControlHandle` and
//!   never keep the loop alive on their own.

use crate::channel::{Channel, ChannelEvent, ChannelEventSink, Message, MessageFilter};
use crate::config::{CommandLine, HostConfig, LaunchParams};
use crate::delegate::SupervisorDelegate;
use crate::error::SupervisorError;
use crate::metrics::{ChildProcessMetrics, MetricsSnapshot};
use crate::notification::{ChildProcessNotification, NotificationBus};
use crate::process::{ChildId, ProcessDescriptor, ProcessHandle, ProcessKind, ProcessLauncher, TerminationStatus};
use crate::registry::ProcessRegistry;
use crate::supervisor::{Disposition, LifecycleState, Supervisor};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type ControlTask = Box<dyn FnOnce(&mut ControlContext) + Send + 'static>;

/// Cloneable entry point into a running control loop
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlTask>,
    cancellation_token: CancellationToken,
    bus: NotificationBus,
}

/// Posts onto the loop without keeping it alive
#[derive(Clone)]
pub(crate) struct WeakControlHandle {
    tx: mpsc::WeakUnboundedSender<ControlTask>,
}

impl WeakControlHandle {
    pub(crate) fn post(
        &self,
        task: impl FnOnce(&mut ControlContext) + Send + 'static,
    ) -> Result<(), SupervisorError> {
        let tx = self.tx.upgrade().ok_or(SupervisorError::ControlLoopClosed)?;
        tx.send(Box::new(task))
            .map_err(|_| SupervisorError::ControlLoopClosed)
    }
}

/// Shared services a supervisor needs while it is being driven
pub(crate) struct ControlEnv {
    pub(crate) config: HostConfig,
    pub(crate) launcher: Arc<dyn ProcessLauncher>,
    pub(crate) registry: ProcessRegistry,
    pub(crate) metrics: ChildProcessMetrics,
    pub(crate) bus: NotificationBus,
    pub(crate) control: WeakControlHandle,
}

/// State owned by the control loop
pub struct ControlContext {
    supervisors: HashMap<ChildId, Supervisor>,
    env: ControlEnv,
}

pub struct ControlLoop {
    context: ControlContext,
    rx: mpsc::UnboundedReceiver<ControlTask>,
    cancellation_token: CancellationToken,
}

impl ControlLoop {
    pub fn new(
        config: HostConfig,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Result<(Self, ControlHandle), SupervisorError> {
        config
            .validate()
            .map_err(|e| SupervisorError::ConfigurationError(format!("Invalid host config: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancellation_token = CancellationToken::new();
        let bus = NotificationBus::new(config.notification_capacity);
        let handle = ControlHandle {
            tx,
            cancellation_token: cancellation_token.clone(),
            bus: bus.clone(),
        };

        let context = ControlContext {
            supervisors: HashMap::new(),
            env: ControlEnv {
                config,
                launcher,
                registry: ProcessRegistry::new(),
                metrics: ChildProcessMetrics::default(),
                bus,
                control: handle.downgrade(),
            },
        };

        Ok((
            Self {
                context,
                rx,
                cancellation_token,
            },
            handle,
        ))
    }

    /// Create the loop and run it on a new task
    pub fn spawn(
        config: HostConfig,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Result<(ControlHandle, JoinHandle<()>), SupervisorError> {
        let (control_loop, handle) = Self::new(config, launcher)?;
        let join = tokio::spawn(control_loop.run());
        Ok((handle, join))
    }

    pub async fn run(mut self) {
        info!(
            platform = self.context.env.launcher.platform_name(),
            "Control loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => break,
                task = self.rx.recv() => match task {
                    Some(task) => task(&mut self.context),
                    None => break,
                },
            }
        }

        let terminated = self.context.terminate_all();
        let remaining = self.context.supervisors.len();
        self.context.supervisors.clear();
        info!(terminated, remaining, "Control loop stopped");
    }
}

impl ControlContext {
    fn create(
        &mut self,
        data: ProcessDescriptor,
        delegate: Box<dyn SupervisorDelegate>,
        channel: impl FnOnce(ChannelEventSink) -> Box<dyn Channel>,
    ) {
        let child = data.id;
        let sink = ChannelEventSink::new(child, self.env.control.clone());
        let supervisor = Supervisor::new(
            data,
            delegate,
            channel(sink),
            self.env.config.terminate_on_shutdown,
        );

        debug!(%child, kind = %supervisor.data().kind, "Supervisor created");
        self.env.registry.register(child);
        self.supervisors.insert(child, supervisor);
    }

    fn supervisor(&self, child: ChildId) -> Result<&Supervisor, SupervisorError> {
        self.supervisors
            .get(&child)
            .ok_or(SupervisorError::UnknownChild(child))
    }

    fn supervisor_mut(&mut self, child: ChildId) -> Result<&mut Supervisor, SupervisorError> {
        self.supervisors
            .get_mut(&child)
            .ok_or(SupervisorError::UnknownChild(child))
    }

    /// Drive one supervisor and destroy it if it asks to be
    fn dispatch(
        &mut self,
        child: ChildId,
        op: impl FnOnce(&mut Supervisor, &mut ControlEnv) -> Disposition,
    ) {
        let Some(supervisor) = self.supervisors.get_mut(&child) else {
            debug!(%child, "Supervisor already destroyed");
            return;
        };

        if op(supervisor, &mut self.env) == Disposition::Destroy {
            self.destroy(child);
        }
    }

    pub(crate) fn on_process_launched(
        &mut self,
        child: ChildId,
        result: Result<Box<dyn ProcessHandle>, SupervisorError>,
    ) {
        self.dispatch(child, |supervisor, _| supervisor.on_process_launched(result));
    }

    pub(crate) fn on_channel_event(&mut self, child: ChildId, event: ChannelEvent) {
        self.dispatch(child, |supervisor, env| match event {
            ChannelEvent::Connected(peer_pid) => {
                supervisor.on_channel_connected(env, peer_pid);
                Disposition::Keep
            }
            ChannelEvent::MessageReceived(message) => {
                if !supervisor.on_message_received(&message) {
                    debug!(child = %supervisor.id(), body = message.body(), "Unhandled message");
                }
                Disposition::Keep
            }
            ChannelEvent::Error => supervisor.on_channel_error(env),
        });
    }

    pub(crate) fn recheck_disconnect(&mut self, child: ChildId) {
        self.dispatch(child, |supervisor, env| supervisor.on_child_disconnected(env));
    }

    /// Drop a supervisor and its registry entry; returns false if it was already gone
    pub fn destroy(&mut self, child: ChildId) -> bool {
        self.env.registry.unregister(child);
        match self.supervisors.remove(&child) {
            Some(supervisor) => {
                debug!(%child, state = ?supervisor.state(), "Supervisor destroyed");
                true
            }
            None => false,
        }
    }

    /// Descriptors of every registered child, in registration order
    pub fn enumerate(&self) -> Vec<ProcessDescriptor> {
        self.env
            .registry
            .snapshot()
            .iter()
            .filter_map(|child| self.supervisors.get(&child))
            .map(|supervisor| supervisor.data().clone())
            .collect()
    }

    /// Destroy every supervisor registered at call time; returns how many
    pub fn terminate_all(&mut self) -> usize {
        let snapshot = self.env.registry.snapshot();
        let mut terminated = 0;
        for child in snapshot {
            if self.destroy(child) {
                terminated += 1;
            }
        }
        if terminated > 0 {
            info!(terminated, "Terminated all child processes");
        }
        terminated
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.env.metrics.snapshot()
    }

    pub fn is_registered(&self, child: ChildId) -> bool {
        self.env.registry.contains(child)
    }
}

impl ControlHandle {
    pub(crate) fn downgrade(&self) -> WeakControlHandle {
        WeakControlHandle {
            tx: self.tx.downgrade(),
        }
    }

    fn post(
        &self,
        task: impl FnOnce(&mut ControlContext) + Send + 'static,
    ) -> Result<(), SupervisorError> {
        self.tx
            .send(Box::new(task))
            .map_err(|_| SupervisorError::ControlLoopClosed)
    }

    async fn query<T: Send + 'static>(
        &self,
        f: impl FnOnce(&mut ControlContext) -> T + Send + 'static,
    ) -> Result<T, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.post(move |ctx| {
            let _ = tx.send(f(ctx));
        })?;
        rx.await.map_err(|_| SupervisorError::ControlLoopClosed)
    }

    /// Create and register a supervisor; the channel is built on the control loop
    pub fn create_supervisor<D, C, F>(
        &self,
        kind: ProcessKind,
        delegate: D,
        channel: F,
    ) -> Result<ChildId, SupervisorError>
    where
        D: SupervisorDelegate + 'static,
        C: Channel + 'static,
        F: FnOnce(ChannelEventSink) -> C + Send + 'static,
    {
        let data = ProcessDescriptor::new(kind);
        let child = data.id;
        self.post(move |ctx| {
            ctx.create(data, Box::new(delegate), move |sink| {
                Box::new(channel(sink)) as Box<dyn Channel>
            })
        })?;
        Ok(child)
    }

    /// Start the child's process; returns once the launch is under way
    pub async fn launch(
        &self,
        child: ChildId,
        command: CommandLine,
        params: LaunchParams,
    ) -> Result<(), SupervisorError> {
        self.query(move |ctx| {
            let ControlContext { supervisors, env } = ctx;
            supervisors
                .get_mut(&child)
                .ok_or(SupervisorError::UnknownChild(child))?
                .launch(env, command, params)
        })
        .await?
    }

    /// Adopt a process launched outside the supervisor
    pub async fn set_handle(
        &self,
        child: ChildId,
        process: Box<dyn ProcessHandle>,
    ) -> Result<(), SupervisorError> {
        self.query(move |ctx| ctx.supervisor_mut(child)?.set_handle(process))
            .await?
    }

    pub fn set_name<S: Into<String>>(&self, child: ChildId, name: S) -> Result<(), SupervisorError> {
        let name = name.into();
        self.post(move |ctx| {
            if let Ok(supervisor) = ctx.supervisor_mut(child) {
                supervisor.set_name(name);
            }
        })
    }

    pub fn set_terminate_on_shutdown(
        &self,
        child: ChildId,
        terminate: bool,
    ) -> Result<(), SupervisorError> {
        self.post(move |ctx| {
            if let Ok(supervisor) = ctx.supervisor_mut(child) {
                supervisor.set_terminate_on_shutdown(terminate);
            }
        })
    }

    pub fn add_filter<M: MessageFilter + 'static>(
        &self,
        child: ChildId,
        filter: M,
    ) -> Result<(), SupervisorError> {
        self.post(move |ctx| {
            if let Ok(supervisor) = ctx.supervisor_mut(child) {
                supervisor.add_filter(Box::new(filter));
            }
        })
    }

    pub async fn send(
        &self,
        child: ChildId,
        message: impl Into<Message>,
    ) -> Result<(), SupervisorError> {
        let message = message.into();
        self.query(move |ctx| ctx.supervisor_mut(child)?.send(message))
            .await?
    }

    pub async fn termination_status(
        &self,
        child: ChildId,
    ) -> Result<TerminationStatus, SupervisorError> {
        self.query(move |ctx| ctx.supervisor(child)?.termination_status())
            .await?
    }

    pub async fn descriptor(&self, child: ChildId) -> Result<ProcessDescriptor, SupervisorError> {
        self.query(move |ctx| ctx.supervisor(child).map(|s| s.data().clone()))
            .await?
    }

    pub async fn state(&self, child: ChildId) -> Result<LifecycleState, SupervisorError> {
        self.query(move |ctx| ctx.supervisor(child).map(|s| s.state()))
            .await?
    }

    pub async fn disconnect_was_alive(&self, child: ChildId) -> Result<bool, SupervisorError> {
        self.query(move |ctx| ctx.supervisor(child).map(|s| s.disconnect_was_alive()))
            .await?
    }

    pub async fn can_shutdown(&self, child: ChildId) -> Result<bool, SupervisorError> {
        self.query(move |ctx| ctx.supervisor(child).map(|s| s.can_shutdown()))
            .await?
    }

    /// Whether the control loop still owns a supervisor for `child`
    pub async fn exists(&self, child: ChildId) -> Result<bool, SupervisorError> {
        self.query(move |ctx| ctx.supervisors.contains_key(&child))
            .await
    }

    pub fn force_shutdown(&self, child: ChildId) -> Result<(), SupervisorError> {
        self.post(move |ctx| {
            let ControlContext { supervisors, env } = ctx;
            match supervisors.get_mut(&child) {
                Some(supervisor) => supervisor.force_shutdown(env),
                None => warn!(%child, "Force shutdown of unknown child"),
            }
        })
    }

    pub fn shutdown_started(&self, child: ChildId) -> Result<(), SupervisorError> {
        self.post(move |ctx| {
            let ControlContext { supervisors, env } = ctx;
            if let Some(supervisor) = supervisors.get_mut(&child) {
                supervisor.shutdown_started(env);
            }
        })
    }

    /// Destroy a supervisor directly, without a disconnect notification
    pub fn destroy(&self, child: ChildId) -> Result<(), SupervisorError> {
        self.post(move |ctx| {
            ctx.destroy(child);
        })
    }

    pub async fn enumerate(&self) -> Result<Vec<ProcessDescriptor>, SupervisorError> {
        self.query(|ctx| ctx.enumerate()).await
    }

    pub async fn terminate_all(&self) -> Result<usize, SupervisorError> {
        self.query(|ctx| ctx.terminate_all()).await
    }

    pub async fn metrics(&self) -> Result<MetricsSnapshot, SupervisorError> {
        self.query(|ctx| ctx.metrics()).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChildProcessNotification> {
        self.bus.subscribe()
    }

    /// Stop the control loop; registered supervisors are terminated
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

#[cfg(test)]
impl ControlLoop {
    pub(crate) fn env_mut(&mut self) -> &mut ControlEnv {
        &mut self.context.env
    }
}
