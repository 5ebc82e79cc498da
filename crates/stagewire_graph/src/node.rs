// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.

use crate::container::Container;
use crate::ids::{IdGenerator, RuntimeId};
use crate::linker::Linker;
use crate::port::{Port, PortDirection};
use indexmap::IndexMap;
use serde_json::{json, Value};

/// Zero-argument remote procedure exposed by a node
pub type Rpc = Box<dyn FnMut() -> bool>;

/// What a node handle actually is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Ordinary processing node
    Plain,
    /// Group of nodes with its own edge table
    Container,
    /// Container boundary adapter
    Linker,
}

/// State shared by every node: identity, ports and RPC table
pub struct NodeBase {
    type_name: String,
    uid: String,
    /// Editable display title
    pub title: String,
    /// Editor position (opaque to the engine)
    pub position: [f32; 2],
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    rpcs: IndexMap<String, Rpc>,
}

impl NodeBase {
    /// Create a node base with a fresh UID; the title defaults to the type name
    pub fn new(ids: &IdGenerator, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            title: type_name.clone(),
            type_name,
            uid: ids.new_uid(),
            position: [0.0, 0.0],
            inputs: Vec::new(),
            outputs: Vec::new(),
            rpcs: IndexMap::new(),
        }
    }

    /// Stable type name used by the registry
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Stable identity
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Replace the UID (used when restoring a saved graph)
    pub fn set_uid(&mut self, uid: impl Into<String>) {
        self.uid = uid.into();
    }

    /// Add a port, returning a handle to it
    pub fn add_port(&mut self, port: Port) -> Port {
        match port.direction() {
            PortDirection::Input => self.inputs.push(port.clone()),
            PortDirection::Output => self.outputs.push(port.clone()),
        }
        port
    }

    /// Input ports in declaration order
    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    /// Output ports in declaration order
    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    /// Swap out a port for another one with the same direction.
    ///
    /// Only linkers rebuild their ports after construction.
    pub(crate) fn replace_port(&mut self, old: &Port, new: Port) -> bool {
        let list = match old.direction() {
            PortDirection::Input => &mut self.inputs,
            PortDirection::Output => &mut self.outputs,
        };
        match list.iter().position(|p| p == old) {
            Some(index) if new.direction() == old.direction() => {
                list[index] = new;
                true
            }
            _ => false,
        }
    }

    /// Remove a port; returns whether it was present
    pub(crate) fn remove_port(&mut self, port: &Port) -> bool {
        let list = match port.direction() {
            PortDirection::Input => &mut self.inputs,
            PortDirection::Output => &mut self.outputs,
        };
        let before = list.len();
        list.retain(|p| p != port);
        list.len() != before
    }

    /// Register an RPC; returns `false` if the name is taken
    pub fn add_rpc(&mut self, name: impl Into<String>, rpc: impl FnMut() -> bool + 'static) -> bool {
        let name = name.into();
        if self.rpcs.contains_key(&name) {
            return false;
        }
        self.rpcs.insert(name, Box::new(rpc));
        true
    }

    /// Invoke an RPC; unknown names return `false`
    pub fn call(&mut self, name: &str) -> bool {
        match self.rpcs.get_mut(name) {
            Some(rpc) => rpc(),
            None => false,
        }
    }

    /// Registered RPC names in registration order
    pub fn rpc_names(&self) -> Vec<String> {
        self.rpcs.keys().cloned().collect()
    }
}

/// A unit of the graph.
///
/// Implementors own a [`NodeBase`]; everything else has a default.
pub trait Node {
    /// Shared node state
    fn base(&self) -> &NodeBase;

    /// Shared node state, mutably
    fn base_mut(&mut self) -> &mut NodeBase;

    /// Capability discriminant
    fn kind(&self) -> NodeKind {
        NodeKind::Plain
    }

    /// Own configuration (not wiring)
    fn to_params(&self) -> Value {
        json!({})
    }

    /// Apply configuration produced by [`Node::to_params`]
    fn from_params(&mut self, _params: &Value) {}

    /// Input ports
    fn inputs(&self) -> Vec<Port> {
        self.base().inputs().to_vec()
    }

    /// Output ports
    fn outputs(&self) -> Vec<Port> {
        self.base().outputs().to_vec()
    }

    /// Every port this node owns, including ports not listed as inputs or
    /// outputs (linker boundary ports, nested children)
    fn all_ports(&self) -> Vec<Port> {
        let mut ports = self.inputs();
        ports.extend(self.outputs());
        ports
    }

    /// Invoke an RPC by name
    fn call(&mut self, name: &str) -> bool {
        self.base_mut().call(name)
    }

    /// Names of callable RPCs
    fn rpc_names(&self) -> Vec<String> {
        self.base().rpc_names()
    }

    /// Schema and state of this node for remote clients
    fn describe(&self) -> Value {
        describe_node(self)
    }

    /// This node as a container, if it is one
    fn as_container(&self) -> Option<&Container> {
        None
    }

    /// This node as a mutable container, if it is one
    fn as_container_mut(&mut self) -> Option<&mut Container> {
        None
    }

    /// This node as a linker, if it is one
    fn as_linker(&self) -> Option<&Linker> {
        None
    }

    /// This node as a mutable linker, if it is one
    fn as_linker_mut(&mut self) -> Option<&mut Linker> {
        None
    }

    /// Stable identity
    fn uid(&self) -> &str {
        self.base().uid()
    }

    /// Registry type name
    fn type_name(&self) -> &str {
        self.base().type_name()
    }

    /// Display title
    fn title(&self) -> &str {
        &self.base().title
    }

    /// First input port with the given name
    fn input_by_name(&self, name: &str) -> Option<Port> {
        self.inputs().into_iter().find(|p| p.name() == name)
    }

    /// First output port with the given name
    fn output_by_name(&self, name: &str) -> Option<Port> {
        self.outputs().into_iter().find(|p| p.name() == name)
    }

    /// First port (inputs, then outputs) with the given name
    fn port_by_name(&self, name: &str) -> Option<Port> {
        self.input_by_name(name).or_else(|| self.output_by_name(name))
    }

    /// Port with the given UID
    fn port_by_uid(&self, uid: &str) -> Option<Port> {
        self.all_ports().into_iter().find(|p| p.uid() == uid)
    }

    /// Port with the given runtime id
    fn port_by_runtime_id(&self, id: RuntimeId) -> Option<Port> {
        self.all_ports().into_iter().find(|p| p.runtime_id() == id)
    }
}

/// Describe a port for remote clients
pub fn describe_port(port: &Port) -> Value {
    json!({
        "name": port.name(),
        "caption": port.caption(),
        "type": port.port_type(),
        "uid": port.uid(),
        "runtimeId": port.runtime_id().0,
        "enabled": port.is_enabled(),
    })
}

/// Default [`Node::describe`] body
pub fn describe_node<N: Node + ?Sized>(node: &N) -> Value {
    let base = node.base();
    json!({
        "uid": base.uid(),
        "type": base.type_name(),
        "title": base.title,
        "position": base.position,
        "inputs": node.inputs().iter().map(describe_port).collect::<Vec<_>>(),
        "outputs": node.outputs().iter().map(describe_port).collect::<Vec<_>>(),
        "rpcs": node.rpc_names(),
        "params": node.to_params(),
    })
}
