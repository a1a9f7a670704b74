use childhost_core::SupervisorError;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

/// Output format of the global subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install a global `tracing` subscriber filtered by `RUST_LOG`, falling back to `default_level`.
///
/// Fails if another subscriber is already installed.
pub fn init_tracing(format: LogFormat, default_level: &str) -> Result<(), SupervisorError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let result = match format {
        LogFormat::Pretty => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_line_number(true)
            .try_init(),
        LogFormat::Json => fmt().json().with_env_filter(filter).try_init(),
    };
    result.map_err(|e| SupervisorError::ConfigurationError(format!("Tracing init failed: {e}")))?;

    info!(?format, level = default_level, "Tracing initialized");
    Ok(())
}
