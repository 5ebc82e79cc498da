// SPDX-License-Identifier: MIT OR Apache-2.0
//! Room (spatial scene) collaborator.
//!
//! Room nodes live outside the processing graph. The middleware only needs
//! to invoke their RPCs and describe them.

use serde_json::{json, Value};

/// Registry of room nodes
pub trait RoomRegistry {
    /// Invoke `name` on room node `uid`.
    ///
    /// `None` if no such node exists, otherwise the RPC's result.
    fn call_rpc(&mut self, uid: &str, name: &str) -> Option<bool>;

    /// Description of every room node
    fn describe(&self) -> Value;
}

/// Room with no nodes
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyRoom;

impl RoomRegistry for EmptyRoom {
    fn call_rpc(&mut self, _uid: &str, _name: &str) -> Option<bool> {
        None
    }

    fn describe(&self) -> Value {
        json!({ "nodes": [] })
    }
}
