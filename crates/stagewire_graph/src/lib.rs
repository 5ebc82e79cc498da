// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed dataflow graph for stagewire.
//!
//! This crate provides the in-process graph engine:
//! - Typed, cached ports with many-to-many connections
//! - Nodes with ports, params and RPCs
//! - Containers that group nodes and own their edges
//! - Linkers that expose container slots and bind their type on first use
//! - A registry of node types and the services nodes are built with
//!
//! ## Threading
//!
//! The graph is single-threaded. Everything that creates nodes or ports
//! takes a [`GraphContext`], which is built once at startup after all node
//! types are registered.

pub mod container;
pub mod ids;
pub mod linker;
pub mod node;
pub mod nodes;
pub mod persist;
pub mod port;
pub mod registry;
pub mod relay;
pub mod value;

pub use container::{Container, Edge};
pub use ids::{IdGenerator, RuntimeId, UidMode};
pub use linker::{Linker, LinkerOrientation, LinkerState};
pub use node::{describe_node, describe_port, Node, NodeBase, NodeKind};
pub use nodes::register_builtin_nodes;
pub use persist::{LoadError, LoadSummary};
pub use port::{Port, PortDirection, Receiver, WeakPort};
pub use registry::{GraphContext, NodeFactory, Registry};
pub use relay::{RelayPair, RelayTable};
pub use value::{AudioBuffer, Body, Feature, Joint, PortType, PortValue};
