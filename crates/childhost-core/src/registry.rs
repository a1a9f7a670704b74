//! # Live set of supervisors.
//!
//! The registry lists the children that are ready to be considered live, in
//! registration order. A supervisor leaves it on destruction, or earlier through
//! force shutdown or shutdown-started, so a child whose teardown is in flight is
//! never handed out again.
//!
//! ## Rules
//! - The registry is owned by the control loop's [`ControlContext`](crate::ControlContext) and is only
//!   reachable through it, so it is touched from that one task. It is `!Sync`, so
//!   it cannot be shared by reference across threads either.
//! - Iteration goes through [`RegistrySnapshot`], an owned copy of the ids.
//!   Destroying supervisors while walking a snapshot cannot skip or repeat entries.

use crate::process::ChildId;
use std::cell::Cell;
use std::marker::PhantomData;

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    entries: Vec<ChildId>,
    _confined: PhantomData<Cell<()>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the child is already registered
    pub fn register(&mut self, child: ChildId) -> bool {
        if self.entries.contains(&child) {
            return false;
        }
        self.entries.push(child);
        true
    }

    /// Idempotent; returns whether an entry was removed
    pub fn unregister(&mut self, child: ChildId) -> bool {
        match self.entries.iter().position(|&c| c == child) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, child: ChildId) -> bool {
        self.entries.contains(&child)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            ids: self.entries.clone(),
        }
    }
}

/// Owned, restartable copy of the registered ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    ids: Vec<ChildId>,
}

impl RegistrySnapshot {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ChildId> + '_ {
        self.ids.iter().copied()
    }
}

impl IntoIterator for RegistrySnapshot {
    type Item = ChildId;
    type IntoIter = std::vec::IntoIter<ChildId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_once() {
        let mut registry = ProcessRegistry::new();
        let child = ChildId::from_raw(1);
        assert!(registry.register(child));
        assert!(!registry.register(child));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let mut registry = ProcessRegistry::new();
        let child = ChildId::from_raw(1);
        registry.register(child);
        assert!(registry.unregister(child));
        assert!(!registry.unregister(child));
        assert!(!registry.unregister(ChildId::from_raw(99)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_stable_under_mutation() {
        let mut registry = ProcessRegistry::new();
        for raw in 1..=4 {
            registry.register(ChildId::from_raw(raw));
        }

        let snapshot = registry.snapshot();
        let mut visited = Vec::new();
        for child in snapshot.clone() {
            visited.push(child.get());
            // Tearing one child down takes its neighbour with it.
            registry.unregister(child);
            registry.unregister(ChildId::from_raw(child.get() + 1));
        }

        assert_eq!(visited, vec![1, 2, 3, 4]);
        assert!(registry.is_empty());
        assert_eq!(snapshot.len(), 4);
    }
}
