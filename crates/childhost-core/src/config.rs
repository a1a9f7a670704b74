use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Bounds for resolving the exit status after a channel drop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExitWaitConfig {
    /// Delay before the single re-check when the handle cannot signal exit (in milliseconds)
    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,

    /// Upper bound for the event-driven exit wait (in milliseconds)
    #[serde(default = "default_signal_timeout_ms")]
    pub signal_timeout_ms: u64,
}

impl Default for ExitWaitConfig {
    fn default() -> Self {
        Self {
            poll_delay_ms: default_poll_delay_ms(),
            signal_timeout_ms: default_signal_timeout_ms(),
        }
    }
}

impl ExitWaitConfig {
    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_delay_ms == 0 {
            return Err(anyhow::anyhow!("poll_delay_ms must be greater than zero"));
        }

        if self.poll_delay_ms > 10_000 {
            return Err(anyhow::anyhow!("poll_delay_ms should not exceed 10 seconds"));
        }

        if self.signal_timeout_ms < self.poll_delay_ms {
            return Err(anyhow::anyhow!(
                "signal_timeout_ms cannot be smaller than poll_delay_ms"
            ));
        }

        if self.signal_timeout_ms > 60_000 {
            return Err(anyhow::anyhow!(
                "signal_timeout_ms should not exceed 60 seconds"
            ));
        }

        Ok(())
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    pub fn signal_timeout(&self) -> Duration {
        Duration::from_millis(self.signal_timeout_ms)
    }
}

/// Configuration of a control loop and the supervisors it owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into))]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    #[builder(default)]
    #[serde(default)]
    pub exit_wait: ExitWaitConfig,

    /// Capacity of the lifecycle notification ring
    #[builder(default = "default_notification_capacity()")]
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,

    /// Switch appended to every launched command line, carrying the child id
    #[builder(default = "default_child_id_switch()")]
    #[builder(setter(custom))]
    #[serde(default = "default_child_id_switch")]
    pub child_id_switch: Option<String>,

    /// Initial terminate-on-shutdown flag for launched processes
    #[builder(default = "default_terminate_on_shutdown()")]
    #[serde(default = "default_terminate_on_shutdown")]
    pub terminate_on_shutdown: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            exit_wait: ExitWaitConfig::default(),
            notification_capacity: default_notification_capacity(),
            child_id_switch: default_child_id_switch(),
            terminate_on_shutdown: default_terminate_on_shutdown(),
        }
    }
}

impl HostConfig {
    pub fn builder() -> HostConfigBuilder {
        HostConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        self.exit_wait.validate()?;

        if self.notification_capacity == 0 {
            return Err(anyhow::anyhow!(
                "notification_capacity must be greater than zero"
            ));
        }

        if let Some(switch) = &self.child_id_switch {
            if !switch.starts_with("--") || switch.len() < 3 {
                return Err(anyhow::anyhow!(
                    "child_id_switch must look like --name, got {switch:?}"
                ));
            }
        }

        Ok(())
    }
}

impl HostConfigBuilder {
    pub fn child_id_switch<S: Into<String>>(&mut self, switch: S) -> &mut Self {
        self.child_id_switch = Some(Some(switch.into()));
        self
    }

    pub fn without_child_id_switch(&mut self) -> &mut Self {
        self.child_id_switch = Some(None);
        self
    }
}

/// Program and arguments of a child process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: ToString>(mut self, arg: S) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn args<S: ToString, I: IntoIterator<Item = S>>(mut self, iter: I) -> Self {
        self.args.extend(iter.into_iter().map(|s| s.to_string()));
        self
    }

    /// Append `--switch=value`
    pub fn append_switch_with_value(&mut self, switch: &str, value: impl fmt::Display) {
        self.args.push(format!("{switch}={value}"));
    }

    pub fn has_switch(&self, switch: &str) -> bool {
        self.args
            .iter()
            .any(|arg| arg == switch || arg.strip_prefix(switch).is_some_and(|rest| rest.starts_with('=')))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Platform launch parameters
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into, strip_option))]
pub struct LaunchParams {
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
    #[builder(default)]
    pub working_directory: Option<PathBuf>,
    /// Start the child in its own process group (Unix only)
    #[builder(default = "true")]
    pub new_process_group: bool,
    /// Pipe stdin/stdout so a stdio channel can attach
    #[builder(default = "true")]
    pub capture_stdio: bool,
}

impl Default for LaunchParams {
    fn default() -> Self {
        Self {
            env: HashMap::new(),
            working_directory: None,
            new_process_group: true,
            capture_stdio: true,
        }
    }
}

impl LaunchParams {
    pub fn builder() -> LaunchParamsBuilder {
        LaunchParamsBuilder::default()
    }
}

impl LaunchParamsBuilder {
    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());

        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}

// Default value functions for serde
fn default_poll_delay_ms() -> u64 {
    250
}
fn default_signal_timeout_ms() -> u64 {
    2_000
}
fn default_notification_capacity() -> usize {
    64
}
fn default_child_id_switch() -> Option<String> {
    Some("--child-process-id".to_string())
}
fn default_terminate_on_shutdown() -> bool {
    true
}
