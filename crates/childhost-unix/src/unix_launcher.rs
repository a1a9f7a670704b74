use async_trait::async_trait;
use childhost_core::{
    ChildStdio, CommandLine, ExitSignal, ExitWatch, LaunchParams, ProcessHandle, ProcessId,
    ProcessLauncher, SupervisorError, TerminationStatus,
};

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use crate::classify_exit_status;
    use anyhow::Context;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::process::Stdio;
    use std::time::Duration;
    use tokio::process::Command;
    use tracing::{debug, info, warn};

    /// Time a child gets between SIGTERM and SIGKILL on shutdown
    const TERMINATE_GRACE: Duration = Duration::from_millis(2000);

    /// Unix-specific process handle backed by a background reaper
    pub struct UnixProcessHandle {
        exit: ExitWatch,
        process_group: bool,
        stdio: Option<ChildStdio>,
        terminate_on_shutdown: bool,
    }

    impl UnixProcessHandle {
        pub fn new(exit: ExitWatch, process_group: bool, stdio: Option<ChildStdio>) -> Self {
            Self {
                exit,
                process_group,
                stdio,
                terminate_on_shutdown: true,
            }
        }

        fn has_exited(&self) -> bool {
            self.exit.exit_status().is_some()
        }

        /// Deliver `sig` to the child, or to its whole group if it leads one
        fn signal(&self, sig: Signal) -> anyhow::Result<()> {
            let Some(pid) = self.exit.pid() else {
                return Ok(());
            };
            let nix_pid = NixPid::from_raw(pid as i32);

            let result = if self.process_group {
                signal::killpg(nix_pid, sig)
            } else {
                signal::kill(nix_pid, sig)
            };

            match result {
                Ok(()) => {
                    debug!(pid, signal = %sig, group = self.process_group, "Sent signal");
                    Ok(())
                }
                Err(nix::errno::Errno::ESRCH) => {
                    debug!(pid, "Process not found (already terminated)");
                    Ok(())
                }
                Err(e) => Err(e).with_context(|| format!("Failed to send {sig} to process {pid}")),
            }
        }

        /// SIGTERM now, SIGKILL if the child is still around after the grace period
        fn terminate_with_escalation(&mut self) -> anyhow::Result<()> {
            if self.has_exited() {
                return Ok(());
            }
            self.signal(Signal::SIGTERM)?;

            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                self.exit.kill();
                return Ok(());
            };

            let exited = self.exit.exited();
            let pid = self.exit.pid();
            let process_group = self.process_group;
            runtime.spawn(async move {
                if tokio::time::timeout(TERMINATE_GRACE, exited).await.is_ok() {
                    return;
                }
                let Some(pid) = pid else {
                    return;
                };
                let nix_pid = NixPid::from_raw(pid as i32);
                let result = if process_group {
                    signal::killpg(nix_pid, Signal::SIGKILL)
                } else {
                    signal::kill(nix_pid, Signal::SIGKILL)
                };
                match result {
                    Ok(()) => info!(pid, "Sent SIGKILL after grace period"),
                    Err(nix::errno::Errno::ESRCH) => {}
                    Err(e) => warn!(pid, error = %e, "Failed to send SIGKILL"),
                }
            });
            Ok(())
        }
    }

    impl ProcessHandle for UnixProcessHandle {
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

        fn terminate(&mut self) -> anyhow::Result<()> {
            self.terminate_with_escalation()
        }
    }

    impl Drop for UnixProcessHandle {
        fn drop(&mut self) {
            if !self.terminate_on_shutdown || self.has_exited() {
                return;
            }
            if let Err(e) = self.terminate_with_escalation() {
                warn!(pid = ?self.exit.pid(), error = %e, "Failed to terminate child on shutdown");
            }
        }
    }

    /// Unix-specific launcher spawning children through `tokio::process`
    #[derive(Debug, Default)]
    pub struct UnixProcessLauncher;

    impl UnixProcessLauncher {
        pub fn new() -> Self {
            info!("Initializing Unix process launcher");
            Self
        }

        fn spawn(
            command: &CommandLine,
            params: &LaunchParams,
        ) -> anyhow::Result<UnixProcessHandle> {
            let mut cmd = Command::new(command.program());
            cmd.args(command.argv());

            if let Some(dir) = &params.working_directory {
                cmd.current_dir(dir);
            }
            for (key, value) in &params.env {
                cmd.env(key, value);
            }
            if params.new_process_group {
                cmd.process_group(0);
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
                info!(pid, program = command.program(), args = ?command.argv(), "Spawned Unix process");
            }

            Ok(UnixProcessHandle::new(
                ExitWatch::spawn(child),
                params.new_process_group,
                stdio,
            ))
        }
    }

    #[async_trait]
    impl ProcessLauncher for UnixProcessLauncher {
        async fn launch(
            &self,
            command: &CommandLine,
            params: &LaunchParams,
        ) -> Result<Box<dyn ProcessHandle>, SupervisorError> {
            let handle = Self::spawn(command, params).map_err(SupervisorError::launch_failed)?;
            Ok(Box::new(handle))
        }

        fn platform_name(&self) -> &'static str {
            "Unix"
        }
    }
}

// Re-export the Unix implementation when on Unix systems
#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessLauncher};

// Provide stub implementations for non-Unix systems
#[cfg(not(unix))]
pub struct UnixProcessHandle;

#[cfg(not(unix))]
#[derive(Debug, Default)]
pub struct UnixProcessLauncher;

#[cfg(not(unix))]
impl UnixProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
#[async_trait]
impl ProcessLauncher for UnixProcessLauncher {
    async fn launch(
        &self,
        command: &CommandLine,
        _params: &LaunchParams,
    ) -> Result<Box<dyn ProcessHandle>, SupervisorError> {
        Err(SupervisorError::LaunchFailed(format!(
            "Unix launcher is unavailable on this platform: {command}"
        )))
    }

    fn platform_name(&self) -> &'static str {
        "Unix"
    }
}
