// SPDX-License-Identifier: MIT OR Apache-2.0
//! Recursive node groups and their edge tables.
//!
//! A [`Container`] owns child nodes (including nested containers) and the
//! edges connecting them. Edges are stored by runtime id, which is cheap but
//! only meaningful for the current process; see [`crate::persist`] for how
//! they are written out by UID and port name instead.

use crate::ids::RuntimeId;
use crate::linker::{Linker, LinkerOrientation};
use crate::node::{describe_port, Node, NodeBase, NodeKind};
use crate::port::{Port, PortDirection};
use crate::registry::GraphContext;
use serde_json::{json, Value};
use std::collections::HashSet;

/// Connection between an output port and an input port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Output side
    pub from: RuntimeId,
    /// Input side
    pub to: RuntimeId,
}

impl Edge {
    /// Whether either end is in `ids`
    pub fn touches(&self, ids: &HashSet<RuntimeId>) -> bool {
        ids.contains(&self.from) || ids.contains(&self.to)
    }
}

/// A node that groups other nodes
pub struct Container {
    pub(crate) base: NodeBase,
    pub(crate) ctx: GraphContext,
    level: usize,
    pub(crate) children: Vec<Box<dyn Node>>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) layout: Value,
}

impl Container {
    /// Registry type name
    pub const TYPE_NAME: &'static str = "container";

    /// Create an empty top-level container
    pub fn new(ctx: &GraphContext) -> Self {
        Self {
            base: NodeBase::new(ctx.ids(), Self::TYPE_NAME),
            ctx: ctx.clone(),
            level: 0,
            children: Vec::new(),
            edges: Vec::new(),
            layout: Value::Null,
        }
    }

    /// Create an empty container with a title
    pub fn with_title(ctx: &GraphContext, title: impl Into<String>) -> Self {
        let mut container = Self::new(ctx);
        container.base.title = title.into();
        container
    }

    /// Services used to create children
    pub fn context(&self) -> &GraphContext {
        &self.ctx
    }

    /// Nesting depth (0 for a top-level container)
    pub fn level(&self) -> usize {
        self.level
    }

    fn set_level(&mut self, level: usize) {
        self.level = level;
        for child in &mut self.children {
            if let Some(container) = child.as_container_mut() {
                container.set_level(level + 1);
            }
        }
    }

    /// Opaque editor layout data
    pub fn layout(&self) -> &Value {
        &self.layout
    }

    /// Replace the opaque editor layout data
    pub fn set_layout(&mut self, layout: Value) {
        self.layout = layout;
    }

    /// Direct children in insertion order
    pub fn children(&self) -> &[Box<dyn Node>] {
        &self.children
    }

    /// Number of direct children
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Edges stored in this container (not nested ones)
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Number of edges stored in this container
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Linkers that are direct children
    pub fn linkers(&self) -> impl Iterator<Item = &Linker> {
        self.children.iter().filter_map(|c| c.as_linker())
    }

    /// Add a child and return its UID
    pub fn add_node(&mut self, mut node: Box<dyn Node>) -> String {
        if let Some(container) = node.as_container_mut() {
            container.set_level(self.level + 1);
        }
        let uid = node.uid().to_string();
        tracing::debug!(container = %self.base.uid(), %uid, kind = %node.type_name(), "Added node");
        self.children.push(node);
        uid
    }

    /// Instantiate a registered type as a new child
    pub fn create_node(&mut self, type_name: &str) -> Option<String> {
        let node = self.ctx.create_node(type_name)?;
        Some(self.add_node(node))
    }

    /// Find a node anywhere below this container, depth-first
    pub fn get_node_by_uid(&self, uid: &str) -> Option<&dyn Node> {
        for child in &self.children {
            if child.uid() == uid {
                return Some(child.as_ref());
            }
            if let Some(container) = child.as_container() {
                if let Some(found) = container.get_node_by_uid(uid) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Find a node anywhere below this container, depth-first, mutably
    pub fn get_node_by_uid_mut(&mut self, uid: &str) -> Option<&mut dyn Node> {
        for child in &mut self.children {
            if child.uid() == uid {
                return Some(child.as_mut());
            }
            if let Some(container) = child.as_container_mut() {
                if let Some(found) = container.get_node_by_uid_mut(uid) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// This container or a nested one, by UID
    pub fn get_container_mut(&mut self, uid: &str) -> Option<&mut Container> {
        if self.base.uid() == uid {
            return Some(self);
        }
        self.get_node_by_uid_mut(uid)?.as_container_mut()
    }

    /// UID of the container directly holding node `uid` (this one or a
    /// nested one)
    pub fn parent_uid_of(&self, uid: &str) -> Option<String> {
        for child in &self.children {
            if child.uid() == uid {
                return Some(self.base.uid().to_string());
            }
            if let Some(container) = child.as_container() {
                if let Some(parent) = container.parent_uid_of(uid) {
                    return Some(parent);
                }
            }
        }
        None
    }

    /// Find a port by UID anywhere below this container
    pub fn get_port_by_uid(&self, uid: &str) -> Option<Port> {
        for child in &self.children {
            if let Some(port) = child.port_by_uid(uid) {
                return Some(port);
            }
            if let Some(container) = child.as_container() {
                if let Some(port) = container.get_port_by_uid(uid) {
                    return Some(port);
                }
            }
        }
        None
    }

    /// Find a port by runtime id anywhere below this container
    pub fn get_port_by_runtime_id(&self, id: RuntimeId) -> Option<Port> {
        for child in &self.children {
            if let Some(port) = child.port_by_runtime_id(id) {
                return Some(port);
            }
            if let Some(container) = child.as_container() {
                if let Some(port) = container.get_port_by_runtime_id(id) {
                    return Some(port);
                }
            }
        }
        None
    }

    /// Every port wired to `port` through an edge of this container or a
    /// nested one
    pub fn get_all_ports_connected_to(&self, port: &Port) -> Vec<Port> {
        let mut found = Vec::new();
        self.collect_connected(port.runtime_id(), &mut found);
        found
    }

    fn collect_connected(&self, id: RuntimeId, found: &mut Vec<Port>) {
        for edge in &self.edges {
            let other = if edge.from == id {
                edge.to
            } else if edge.to == id {
                edge.from
            } else {
                continue;
            };
            if let Some(port) = self.get_port_by_runtime_id(other) {
                if !found.contains(&port) {
                    found.push(port);
                }
            }
        }
        for child in &self.children {
            if let Some(container) = child.as_container() {
                container.collect_connected(id, found);
            }
        }
    }

    /// Connect two ports and record the edge here.
    ///
    /// If an endpoint belongs to a linker anywhere below this container, the
    /// linker resolves (and if needed binds) the port actually used. Returns
    /// `false` on direction or type mismatch; nothing is recorded then.
    pub fn connect(&mut self, from: &Port, to: &Port) -> bool {
        let (mut source, mut target) = match (from.direction(), to.direction()) {
            (PortDirection::Output, PortDirection::Input) => (from.clone(), to.clone()),
            (PortDirection::Input, PortDirection::Output) => (to.clone(), from.clone()),
            _ => return false,
        };

        let source_linker = self.find_linker_uid(&source);
        let target_linker = self.find_linker_uid(&target);

        // A linker source can only bind once the target type is known; if
        // the target is itself an unbound linker, bind the target first.
        if let Some(uid) = &source_linker {
            if !target.is_generic() {
                let Some(port) = self.linker_source(uid, &target) else {
                    return false;
                };
                source = port;
            }
        }
        if let Some(uid) = &target_linker {
            let Some(port) = self.linker_target(uid, &source) else {
                return false;
            };
            target = port;
        }
        if let Some(uid) = &source_linker {
            if source.is_generic() {
                let Some(port) = self.linker_source(uid, &target) else {
                    return false;
                };
                source = port;
            }
        }

        if !source.connect(&target) {
            tracing::debug!(from = %source.name(), to = %target.name(), "Connect refused");
            return false;
        }

        self.edges.push(Edge {
            from: source.runtime_id(),
            to: target.runtime_id(),
        });
        tracing::debug!(
            container = %self.base.uid(),
            from = %source.runtime_id(),
            to = %target.runtime_id(),
            "Connected"
        );
        true
    }

    /// Connect `from_uid.from_port` (an output) to `to_uid.to_port` (an input)
    pub fn connect_by_uid(&mut self, from_uid: &str, from_port: &str, to_uid: &str, to_port: &str) -> bool {
        let Some(source) = self
            .get_node_by_uid(from_uid)
            .and_then(|n| n.output_by_name(from_port))
        else {
            tracing::debug!(%from_uid, %from_port, "Unknown source port");
            return false;
        };
        let Some(target) = self
            .get_node_by_uid(to_uid)
            .and_then(|n| n.input_by_name(to_port))
        else {
            tracing::debug!(%to_uid, %to_port, "Unknown target port");
            return false;
        };
        self.connect(&source, &target)
    }

    /// Disconnect two ports and forget their edge. Returns whether they were
    /// connected.
    pub fn disconnect(&mut self, from: &Port, to: &Port) -> bool {
        if !from.disconnect(to) {
            return false;
        }
        let ids: HashSet<RuntimeId> = [from.runtime_id(), to.runtime_id()].into_iter().collect();
        self.remove_edges_where(&|edge: &Edge| ids.contains(&edge.from) && ids.contains(&edge.to));
        true
    }

    /// Remove a node at any depth, every edge touching any of its ports and
    /// every live connection of those ports. Returns whether it was found.
    pub fn delete_node(&mut self, uid: &str) -> bool {
        let Some(node) = self.take_node(uid) else {
            tracing::debug!(%uid, "Delete: node not found");
            return false;
        };

        let ports = node.all_ports();
        let ids: HashSet<RuntimeId> = ports.iter().map(Port::runtime_id).collect();
        for port in &ports {
            port.disconnect_all();
        }
        let pruned = self.remove_edges_where(&|edge: &Edge| edge.touches(&ids));

        tracing::info!(%uid, pruned, "Deleted node");
        true
    }

    /// Remove every child and edge
    pub fn clear(&mut self) {
        for child in &self.children {
            for port in child.all_ports() {
                port.disconnect_all();
            }
        }
        self.children.clear();
        self.edges.clear();
    }

    fn take_node(&mut self, uid: &str) -> Option<Box<dyn Node>> {
        for index in 0..self.children.len() {
            if self.children[index].uid() == uid {
                return Some(self.children.remove(index));
            }
            if let Some(container) = self.children[index].as_container_mut() {
                if let Some(node) = container.take_node(uid) {
                    return Some(node);
                }
            }
        }
        None
    }

    fn remove_edges_where(&mut self, predicate: &dyn Fn(&Edge) -> bool) -> usize {
        let before = self.edges.len();
        self.edges.retain(|edge| !predicate(edge));
        let mut removed = before - self.edges.len();
        for child in &mut self.children {
            if let Some(container) = child.as_container_mut() {
                removed += container.remove_edges_where(predicate);
            }
        }
        removed
    }

    fn find_linker_uid(&self, port: &Port) -> Option<String> {
        for child in &self.children {
            if let Some(linker) = child.as_linker() {
                if linker.owns_port(port) {
                    return Some(linker.uid().to_string());
                }
            }
            if let Some(container) = child.as_container() {
                if let Some(uid) = container.find_linker_uid(port) {
                    return Some(uid);
                }
            }
        }
        None
    }

    fn linker_source(&mut self, uid: &str, target: &Port) -> Option<Port> {
        self.get_node_by_uid_mut(uid)?
            .as_linker_mut()?
            .connect_to_port(target)
    }

    fn linker_target(&mut self, uid: &str, source: &Port) -> Option<Port> {
        self.get_node_by_uid_mut(uid)?
            .as_linker_mut()?
            .connect_from_port(source)
    }

    /// Owner UID and port name of a port listed by one of the nodes below
    /// this container
    pub(crate) fn port_owner(&self, id: RuntimeId) -> Option<(String, String)> {
        for child in &self.children {
            let mut listed = child.inputs().into_iter().chain(child.outputs());
            if let Some(port) = listed.find(|p| p.runtime_id() == id) {
                return Some((child.uid().to_string(), port.name().to_string()));
            }
            if let Some(container) = child.as_container() {
                if let Some(owner) = container.port_owner(id) {
                    return Some(owner);
                }
            }
        }
        None
    }

    /// `(uid.port, uid.port)` form of an edge
    pub fn edge_endpoints(&self, edge: &Edge) -> Option<(String, String)> {
        let (from_uid, from_port) = self.port_owner(edge.from)?;
        let (to_uid, to_port) = self.port_owner(edge.to)?;
        Some((format!("{from_uid}.{from_port}"), format!("{to_uid}.{to_port}")))
    }

    fn boundary_ports(&self, orientation: LinkerOrientation) -> Vec<Port> {
        self.linkers()
            .filter(|l| l.orientation() == orientation)
            .map(|l| l.external_port().clone())
            .collect()
    }
}

impl Node for Container {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Container
    }

    fn to_params(&self) -> Value {
        self.to_document()
    }

    fn from_params(&mut self, params: &Value) {
        if let Err(e) = self.load_document(params) {
            tracing::error!(uid = %self.base.uid(), "Failed to load container: {e}");
        }
    }

    fn inputs(&self) -> Vec<Port> {
        self.boundary_ports(LinkerOrientation::Input)
    }

    fn outputs(&self) -> Vec<Port> {
        self.boundary_ports(LinkerOrientation::Output)
    }

    fn all_ports(&self) -> Vec<Port> {
        self.children.iter().flat_map(|c| c.all_ports()).collect()
    }

    fn describe(&self) -> Value {
        let edges: Vec<Value> = self
            .edges
            .iter()
            .filter_map(|e| self.edge_endpoints(e))
            .map(|(from, to)| json!({ "from": from, "to": to }))
            .collect();

        json!({
            "uid": self.base.uid(),
            "type": self.base.type_name(),
            "title": self.base.title,
            "position": self.base.position,
            "level": self.level,
            "inputs": self.inputs().iter().map(describe_port).collect::<Vec<_>>(),
            "outputs": self.outputs().iter().map(describe_port).collect::<Vec<_>>(),
            "rpcs": self.rpc_names(),
            "children": self.children.iter().map(|c| c.describe()).collect::<Vec<_>>(),
            "edges": edges,
            "layout": self.layout,
        })
    }

    fn as_container(&self) -> Option<&Container> {
        Some(self)
    }

    fn as_container_mut(&mut self) -> Option<&mut Container> {
        Some(self)
    }
}
