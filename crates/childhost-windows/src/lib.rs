//! Windows-specific process launching

mod exit_code;
mod windows_launcher;

pub use exit_code::*;
pub use windows_launcher::{WindowsProcessHandle, WindowsProcessLauncher};

/// Windows-specific launcher factory
pub struct WindowsLauncherFactory;

impl WindowsLauncherFactory {
    pub fn create_launcher() -> WindowsProcessLauncher {
        WindowsProcessLauncher::new()
    }

    pub fn platform_name() -> &'static str {
        "Windows"
    }
}
