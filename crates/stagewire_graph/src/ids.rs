// SPDX-License-Identifier: MIT OR Apache-2.0
//! Identity services.
//!
//! Two identity systems live side by side:
//! - [`RuntimeId`]: a small integer handed out per port, cheap to compare and
//!   store in edge tables, meaningless across restarts.
//! - UIDs: opaque strings that survive save/load and are used by the wire
//!   protocol and the persisted graph format.
//!
//! Both come from an [`IdGenerator`] that is created once at startup and
//! passed to everything that builds ports or nodes.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use uuid::Uuid;

/// Ephemeral wiring identity of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuntimeId(pub u64);

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How fresh UIDs are produced
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UidMode {
    /// Random v4 UUIDs
    #[default]
    Random,
    /// `prefix-1`, `prefix-2`, ... (deterministic, for tests and fixtures)
    Sequential(String),
}

#[derive(Debug)]
struct IdState {
    next_runtime: Cell<u64>,
    next_uid: Cell<u64>,
    mode: UidMode,
}

/// Hands out runtime ids and UIDs.
///
/// Cloning is cheap and every clone shares the same counters.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    state: Rc<IdState>,
}

impl IdGenerator {
    /// Create a generator producing random UIDs
    pub fn new() -> Self {
        Self::with_mode(UidMode::Random)
    }

    /// Create a generator producing sequential UIDs with the given prefix
    pub fn sequential(prefix: impl Into<String>) -> Self {
        Self::with_mode(UidMode::Sequential(prefix.into()))
    }

    /// Create a generator with an explicit UID mode
    pub fn with_mode(mode: UidMode) -> Self {
        Self {
            state: Rc::new(IdState {
                next_runtime: Cell::new(1),
                next_uid: Cell::new(1),
                mode,
            }),
        }
    }

    /// Allocate the next runtime id
    pub fn next_runtime_id(&self) -> RuntimeId {
        let id = self.state.next_runtime.get();
        self.state.next_runtime.set(id + 1);
        RuntimeId(id)
    }

    /// Peek at the id the next allocation will return
    pub fn peek_runtime_id(&self) -> RuntimeId {
        RuntimeId(self.state.next_runtime.get())
    }

    /// Restart runtime ids from 1.
    ///
    /// Only safe when no ports allocated by this generator are still alive,
    /// i.e. right before a bulk load into an empty graph.
    pub fn reset_runtime_ids(&self) {
        tracing::debug!("Resetting runtime id counter");
        self.state.next_runtime.set(1);
    }

    /// Produce a fresh UID
    pub fn new_uid(&self) -> String {
        match &self.state.mode {
            UidMode::Random => Uuid::new_v4().to_string(),
            UidMode::Sequential(prefix) => {
                let n = self.state.next_uid.get();
                self.state.next_uid.set(n + 1);
                format!("{prefix}-{n}")
            }
        }
    }

    /// The configured UID mode
    pub fn mode(&self) -> &UidMode {
        &self.state.mode
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_ids_are_monotonic() {
        let ids = IdGenerator::new();
        let a = ids.next_runtime_id();
        let b = ids.next_runtime_id();
        assert!(b > a);
        assert_eq!(ids.peek_runtime_id(), RuntimeId(b.0 + 1));
    }

    #[test]
    fn test_clones_share_counters() {
        let ids = IdGenerator::new();
        let other = ids.clone();
        assert_eq!(ids.next_runtime_id(), RuntimeId(1));
        assert_eq!(other.next_runtime_id(), RuntimeId(2));
    }

    #[test]
    fn test_reset_runtime_ids() {
        let ids = IdGenerator::new();
        ids.next_runtime_id();
        ids.next_runtime_id();
        ids.reset_runtime_ids();
        assert_eq!(ids.next_runtime_id(), RuntimeId(1));
    }

    #[test]
    fn test_sequential_uids() {
        let ids = IdGenerator::sequential("node");
        assert_eq!(ids.new_uid(), "node-1");
        assert_eq!(ids.new_uid(), "node-2");
    }

    #[test]
    fn test_random_uids_are_unique() {
        let ids = IdGenerator::new();
        assert_ne!(ids.new_uid(), ids.new_uid());
    }
}
