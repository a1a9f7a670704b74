use childhost_core::ProcessLauncher;
use std::sync::Arc;

/// Platform-independent factory that selects the appropriate launcher at compile time
pub struct PlatformLauncherFactory;

impl PlatformLauncherFactory {
    #[cfg(unix)]
    pub fn create_launcher() -> childhost_unix::UnixProcessLauncher {
        childhost_unix::UnixLauncherFactory::create_launcher()
    }

    #[cfg(windows)]
    pub fn create_launcher() -> childhost_windows::WindowsProcessLauncher {
        childhost_windows::WindowsLauncherFactory::create_launcher()
    }

    pub fn platform_name() -> &'static str {
        #[cfg(unix)]
        return childhost_unix::UnixLauncherFactory::platform_name();

        #[cfg(windows)]
        return childhost_windows::WindowsLauncherFactory::platform_name();
    }
}

/// Convenience function to create a shared, platform-appropriate launcher
pub fn create_platform_launcher() -> Arc<dyn ProcessLauncher> {
    Arc::new(PlatformLauncherFactory::create_launcher())
}
