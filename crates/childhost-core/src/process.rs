use crate::config::{CommandLine, LaunchParams};
use crate::error::SupervisorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI32, Ordering};
use tokio::process::{ChildStdin, ChildStdout};

/// OS process identifier
pub type ProcessId = u32;

static NEXT_CHILD_ID: AtomicI32 = AtomicI32::new(1);

/// Process-wide unique identifier of a supervised child, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChildId(i32);

impl ChildId {
    /// Allocate the next unique id
    pub fn next() -> Self {
        ChildId(NEXT_CHILD_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: i32) -> Self {
        ChildId(raw)
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ChildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of a child process, used to key metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessKind {
    Renderer,
    Plugin,
    PpapiPlugin,
    Worker,
    Utility,
    Gpu,
    SandboxHelper,
    Unknown,
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Renderer => "renderer",
            ProcessKind::Plugin => "plugin",
            ProcessKind::PpapiPlugin => "ppapi-plugin",
            ProcessKind::Worker => "worker",
            ProcessKind::Utility => "utility",
            ProcessKind::Gpu => "gpu",
            ProcessKind::SandboxHelper => "sandbox-helper",
            ProcessKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one child process as seen by observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDescriptor {
    pub id: ChildId,
    pub kind: ProcessKind,
    /// Human readable name, usually set after launch
    pub name: String,
    /// OS pid, absent until launch completes
    pub pid: Option<ProcessId>,
}

impl ProcessDescriptor {
    pub fn new(kind: ProcessKind) -> Self {
        Self {
            id: ChildId::next(),
            kind,
            name: String::new(),
            pid: None,
        }
    }
}

/// How, or whether, a child process has exited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminationStatus {
    /// Exit status not available yet
    StillRunning,
    /// Zero exit status
    NormalTermination,
    /// Non-zero exit status that is not a fault
    AbnormalTermination(i32),
    /// Fault such as a segmentation violation or abort
    Crashed(i32),
    /// Forced termination by another actor
    Killed(i32),
}

impl TerminationStatus {
    /// Crashes and abnormal terminations are both reported as crashes
    pub fn is_crash(&self) -> bool {
        matches!(
            self,
            TerminationStatus::Crashed(_) | TerminationStatus::AbnormalTermination(_)
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TerminationStatus::StillRunning)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TerminationStatus::StillRunning => None,
            TerminationStatus::NormalTermination => Some(0),
            TerminationStatus::AbnormalTermination(code)
            | TerminationStatus::Crashed(code)
            | TerminationStatus::Killed(code) => Some(*code),
        }
    }
}

/// Future resolving once the OS reports that a process has exited
pub type ExitSignal = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Pipes connected to a launched child's standard streams
#[derive(Debug, Default)]
pub struct ChildStdio {
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
}

/// Trait representing a handle to a launched OS process
pub trait ProcessHandle: Send {
    /// Get the process ID (None if the launch produced no usable process)
    fn pid(&self) -> Option<ProcessId>;

    /// Classify the current exit state without blocking
    fn termination_status(&self) -> TerminationStatus;

    /// Whether dropping this handle must terminate the process
    fn set_terminate_on_shutdown(&mut self, terminate: bool);

    /// Hand over the child's stdio pipes, at most once
    fn take_stdio(&mut self) -> Option<ChildStdio> {
        None
    }

    /// Event-driven exit wait; handles that cannot signal exit return None
    fn exit_signal(&self) -> Option<ExitSignal> {
        None
    }

    /// Terminate the process immediately
    fn terminate(&mut self) -> anyhow::Result<()>;
}

/// Starts OS processes on behalf of supervisors
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start a process for the given command line; never blocks the control loop
    async fn launch(
        &self,
        command: &CommandLine,
        params: &LaunchParams,
    ) -> Result<Box<dyn ProcessHandle>, SupervisorError>;

    /// Get the platform name for logging and debugging
    fn platform_name(&self) -> &'static str;
}
