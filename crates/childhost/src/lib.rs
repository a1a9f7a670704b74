//! childhost - supervise child processes from a single control loop
//!
//! The facade selects the platform launcher at compile time and re-exports the
//! core crate, so most users only depend on this crate.

mod factory;
mod host;
mod logging;

pub use factory::{PlatformLauncherFactory, create_platform_launcher};
pub use host::{ChildHost, Running, Stopped};
pub use logging::{LogFormat, init_tracing};

// Re-export core functionality
pub use childhost_core::*;
