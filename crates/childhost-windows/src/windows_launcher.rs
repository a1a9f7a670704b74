use crate::classify_exit_status;
use async_trait::async_trait;
use childhost_core::{
    ChildStdio, CommandLine, ExitSignal, ExitWatch, LaunchParams, ProcessHandle, ProcessId,
    ProcessLauncher, SupervisorError, TerminationStatus,
};
use anyhow::Context;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Windows-specific process handle backed by a background reaper
pub struct WindowsProcessHandle {
    exit: ExitWatch,
    stdio: Option<ChildStdio>,
    terminate_on_shutdown: bool,
}

impl WindowsProcessHandle {
    pub fn new(exit: ExitWatch, stdio: Option<ChildStdio>) -> Self {
        Self {
            exit,
            stdio,
            terminate_on_shutdown: true,
        }
    }
}

impl ProcessHandle for WindowsProcessHandle {
    fn pid(&self) -> Option<ProcessId> {
        self.exit.pid()
    }

    fn termination_status(&self) -> TerminationStatus {
        match self.exit.exit_status() {
            Some(status) => classify_exit_status(status),
            None => TerminationStatus::StillRunning,
        }
    }

    fn set_terminate_on_shutdown(&mut self, terminate: bool) {
        self.terminate_on_shutdown = terminate;
    }

    fn take_stdio(&mut self) -> Option<ChildStdio> {
        self.stdio.take()
    }

    fn exit_signal(&self) -> Option<ExitSignal> {
        Some(self.exit.exited())
    }

    /// There is no graceful signal on Windows; the process is terminated outright
    fn terminate(&mut self) -> anyhow::Result<()> {
        if self.exit.exit_status().is_none() && !self.exit.kill() {
            warn!(pid = ?self.exit.pid(), "Terminate already requested");
        }
        Ok(())
    }
}

impl Drop for WindowsProcessHandle {
    fn drop(&mut self) {
        if self.terminate_on_shutdown && self.exit.exit_status().is_none() {
            info!(pid = ?self.exit.pid(), "Terminating child on shutdown");
            self.exit.kill();
        }
    }
}

/// Windows-specific launcher spawning children through `tokio::process`
#[derive(Debug, Default)]
pub struct WindowsProcessLauncher;

impl WindowsProcessLauncher {
    pub fn new() -> Self {
        info!("Initializing Windows process launcher");
        Self
    }

    fn spawn(command: &CommandLine, params: &LaunchParams) -> anyhow::Result<WindowsProcessHandle> {
        let mut cmd = Command::new(command.program());
        cmd.args(command.argv());

        if let Some(dir) = &params.working_directory {
            cmd.current_dir(dir);
        }
        for (key, value) in &params.env {
            cmd.env(key, value);
        }
        #[cfg(windows)]
        {
            use windows::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP;
            if params.new_process_group {
                cmd.creation_flags(CREATE_NEW_PROCESS_GROUP.0);
            }
        }
        if params.capture_stdio {
            cmd.stdin(Stdio::piped()).stdout(Stdio::piped());
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", command.program()))?;

        let stdio = params.capture_stdio.then(|| ChildStdio {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
        });

        if let Some(pid) = child.id() {
            info!(pid, program = command.program(), args = ?command.argv(), "Spawned Windows process");
        }

        Ok(WindowsProcessHandle::new(ExitWatch::spawn(child), stdio))
    }
}

#[async_trait]
impl ProcessLauncher for WindowsProcessLauncher {
    async fn launch(
        &self,
        command: &CommandLine,
        params: &LaunchParams,
    ) -> Result<Box<dyn ProcessHandle>, SupervisorError> {
        let handle = Self::spawn(command, params).map_err(SupervisorError::launch_failed)?;
        Ok(Box::new(handle))
    }

    fn platform_name(&self) -> &'static str {
        "Windows"
    }
}
