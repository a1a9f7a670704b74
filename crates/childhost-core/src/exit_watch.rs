//! Background reaping of a spawned child.
//!
//! [`ExitWatch`] moves a [`tokio::process::Child`] onto its own task, which waits for the
//! process and publishes the exit status through a [`watch`] channel. Platform handles use
//! it to answer termination-status queries without blocking and to offer an exact,
//! event-driven exit signal.

use crate::process::{ExitSignal, ProcessId};
use std::process::ExitStatus;
use tokio::process::Child;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

pub struct ExitWatch {
    pid: Option<ProcessId>,
    status: watch::Receiver<Option<ExitStatus>>,
    kill: Option<oneshot::Sender<()>>,
}

impl ExitWatch {
    /// Take ownership of `child` and start reaping it in the background
    pub fn spawn(mut child: Child) -> Self {
        let pid = child.id();
        let (status_tx, status_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let waited = tokio::select! {
                waited = child.wait() => waited,
                Ok(()) = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        warn!(?pid, error = %e, "Failed to kill child process");
                    }
                    child.wait().await
                }
            };

            match waited {
                Ok(status) => {
                    debug!(?pid, %status, "Child process exited");
                    status_tx.send_replace(Some(status));
                }
                Err(e) => {
                    warn!(?pid, error = %e, "Failed to wait for child process");
                }
            }
        });

        Self {
            pid,
            status: status_rx,
            kill: Some(kill_tx),
        }
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    /// Exit status if the child has been reaped
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.status.borrow()
    }

    /// Resolves once the exit status is available
    pub fn exited(&self) -> ExitSignal {
        let mut status = self.status.clone();
        Box::pin(async move {
            if status.wait_for(|s| s.is_some()).await.is_err() {
                debug!("Exit watcher stopped before the child was reaped");
            }
        })
    }

    /// Ask the reaper to kill the child; returns false if already requested or reaped
    pub fn kill(&mut self) -> bool {
        match self.kill.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}
