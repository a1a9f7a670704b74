//! childhost core - platform-independent child process supervision
//!
//! This crate provides the supervisor state machine, the control loop that
//! owns every supervisor, and the traits, configurations and error types
//! shared with the platform-specific launchers.

mod channel;
mod config;
mod control;
mod delegate;
mod error;
mod exit_watch;
mod metrics;
mod notification;
mod process;
mod registry;
mod stdio;
mod supervisor;

#[cfg(test)]
mod testing;

pub use channel::*;
pub use config::*;
pub use control::{ControlContext, ControlHandle, ControlLoop};
pub use delegate::*;
pub use error::*;
pub use exit_watch::*;
pub use metrics::*;
pub use notification::*;
pub use process::*;
pub use registry::*;
pub use stdio::*;
pub use supervisor::{
    DisconnectOutcome, DisconnectState, DisconnectStep, LifecycleState, Supervisor,
};
