use crate::factory::{PlatformLauncherFactory, create_platform_launcher};
use childhost_core::{
    ChildId, ChildProcessNotification, CommandLine, ControlHandle, ControlLoop, HostConfig,
    LaunchParams, ProcessKind, ProcessLauncher, StdioChannel, SupervisorDelegate, SupervisorError,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

pub struct Stopped {
    config: HostConfig,
    launcher: Arc<dyn ProcessLauncher>,
}

pub struct Running {
    control: ControlHandle,
    join: JoinHandle<()>,
}

/// High-level platform-independent child process host.
///
/// Dropping a running host stops its control loop like [`ChildHost::shutdown`], without waiting.
pub struct ChildHost<Status> {
    inner: Status,
}

impl ChildHost<Stopped> {
    /// Create a host that launches children with the platform launcher
    pub fn new(config: HostConfig) -> Self {
        Self::with_launcher(config, create_platform_launcher())
    }

    pub fn with_launcher(config: HostConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            inner: Stopped { config, launcher },
        }
    }

    /// Start the control loop
    pub fn start(self) -> Result<ChildHost<Running>, SupervisorError> {
        let Stopped { config, launcher } = self.inner;
        let (control, join) = ControlLoop::spawn(config, launcher)?;
        info!(platform = PlatformLauncherFactory::platform_name(), "Child host started");
        Ok(ChildHost {
            inner: Running { control, join },
        })
    }
}

impl ChildHost<Running> {
    pub fn control(&self) -> &ControlHandle {
        &self.inner.control
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChildProcessNotification> {
        self.inner.control.subscribe()
    }

    /// Create a supervisor talking to its child over stdin/stdout and launch it
    pub async fn spawn_stdio_child<D: SupervisorDelegate + 'static>(
        &self,
        kind: ProcessKind,
        delegate: D,
        command: CommandLine,
        params: LaunchParams,
    ) -> Result<ChildId, SupervisorError> {
        let control = &self.inner.control;
        let child = control.create_supervisor(kind, delegate, StdioChannel::new)?;
        if let Err(e) = control.launch(child, command, params).await {
            control.destroy(child)?;
            return Err(e);
        }
        Ok(child)
    }

    /// Stop the control loop and wait for it; registered children are terminated
    pub async fn shutdown(self) -> Result<(), SupervisorError> {
        let Running { control, join } = self.inner;
        control.shutdown();
        join.await
            .map_err(|e| SupervisorError::Other(anyhow::anyhow!("Control loop panicked: {e}")))?;
        info!("Child host stopped");
        Ok(())
    }
}
