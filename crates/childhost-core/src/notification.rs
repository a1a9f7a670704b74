//! Process-wide lifecycle notifications.
//!
//! [`NotificationBus`] wraps a [`tokio::sync::broadcast`] channel. The control loop
//! publishes without blocking; observers (UI, logging, tests) subscribe and receive
//! each notification on their own task, carrying a snapshot of the
//! [`ProcessDescriptor`] taken when it fired.
//!
//! - Events are lost if nobody is subscribed at publish time.
//! - Receivers that fall behind observe `RecvError::Lagged(n)`.

use crate::process::ProcessDescriptor;
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    HostConnected,
    Crashed,
    HostDisconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildProcessNotification {
    pub kind: NotificationKind,
    pub data: ProcessDescriptor,
}

/// Broadcast channel for lifecycle notifications
#[derive(Clone, Debug)]
pub struct NotificationBus {
    tx: broadcast::Sender<ChildProcessNotification>,
}

impl NotificationBus {
    /// Creates a new bus; capacity is clamped to at least 1
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, kind: NotificationKind, data: &ProcessDescriptor) {
        let _ = self.tx.send(ChildProcessNotification {
            kind,
            data: data.clone(),
        });
    }

    /// A receiver only gets notifications sent after it subscribed
    pub fn subscribe(&self) -> broadcast::Receiver<ChildProcessNotification> {
        self.tx.subscribe()
    }
}
