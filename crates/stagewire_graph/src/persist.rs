// SPDX-License-Identifier: MIT OR Apache-2.0
//! Saving and loading container documents.
//!
//! Edges are written as `"uid.port"` strings so a document survives a
//! restart. Loading runs in four passes:
//! 1. instantiate every node and an empty shell for every nested container,
//! 2. assemble the container tree,
//! 3. connect edges, container by container,
//! 4. apply each node's saved params.
//!
//! Params come last so nodes that re-send their value on restore find their
//! listeners already connected. Entries that cannot be resolved are logged
//! and skipped; the rest of the document still loads.

use crate::container::{Container, Edge};
use crate::ids::RuntimeId;
use crate::linker::{Linker, LinkerOrientation};
use crate::node::{Node, NodeBase};
use crate::port::Port;
use crate::registry::GraphContext;
use crate::value::PortType;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::collections::HashSet;
use thiserror::Error;

/// Errors that abort a load before anything is changed
#[derive(Debug, Error)]
pub enum LoadError {
    /// The document is not a JSON object
    #[error("container document is not a JSON object")]
    NotAnObject,
    /// A top-level field has the wrong shape
    #[error("field `{0}` must be an array")]
    InvalidField(&'static str),
}

/// What a load restored
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    /// Nodes instantiated (containers excluded)
    pub nodes: usize,
    /// Nested containers attached
    pub containers: usize,
    /// Edges connected
    pub edges: usize,
    /// Entries dropped because they could not be resolved
    pub skipped: usize,
}

enum Slot {
    Node(Box<dyn Node>),
    Container(String),
}

struct Shell {
    parent: Option<String>,
    container: Container,
    slots: Vec<Slot>,
    edges: Vec<Value>,
}

impl Container {
    /// Serialize this container, its children and every nested container
    pub fn to_document(&self) -> Value {
        let mut document = self.document_entry(None);
        let mut nested = Vec::new();
        self.collect_nested(&mut nested);
        document["containers"] = Value::Array(nested);
        document
    }

    /// Replace the contents of this container with a saved document.
    ///
    /// On error nothing has been changed.
    pub fn load_document(&mut self, document: &Value) -> Result<LoadSummary, LoadError> {
        if !document.is_object() {
            return Err(LoadError::NotAnObject);
        }
        let root_nodes = array_field(document, "nodes")?;
        let root_edges = array_field(document, "edges")?;
        let nested = array_field(document, "containers")?;

        // Linkers the document keeps are reused as-is so wiring outside this
        // container still points at live ports.
        let mut kept = self.take_linkers();
        self.clear();
        if let Some(uid) = document.get("uid").and_then(Value::as_str) {
            self.base.set_uid(uid);
        }
        apply_header(&mut self.base, &mut self.layout, document);

        let mut summary = LoadSummary::default();
        let mut params = Vec::new();

        // Pass 1
        let mut root_slots = instantiate(&self.ctx, root_nodes, &mut kept, &mut params, &mut summary);
        for linker in kept.values() {
            for port in linker.all_ports() {
                port.disconnect_all();
            }
        }
        let mut shells: IndexMap<String, Shell> = IndexMap::new();
        for entry in nested {
            let Some(uid) = entry.get("uid").and_then(Value::as_str) else {
                tracing::warn!("Skipping nested container without uid");
                summary.skipped += 1;
                continue;
            };
            let (Ok(nodes), Ok(edges)) = (array_field(entry, "nodes"), array_field(entry, "edges")) else {
                tracing::warn!(%uid, "Skipping malformed nested container");
                summary.skipped += 1;
                continue;
            };

            let mut container = Container::new(&self.ctx);
            container.base.set_uid(uid);
            apply_header(&mut container.base, &mut container.layout, entry);
            let slots = instantiate(&self.ctx, nodes, &mut IndexMap::new(), &mut params, &mut summary);
            shells.insert(
                uid.to_string(),
                Shell {
                    parent: entry.get("parent").and_then(Value::as_str).map(String::from),
                    container,
                    slots,
                    edges: edges.to_vec(),
                },
            );
        }
        self.adopt_unlisted(&mut root_slots, &mut shells);

        let mut edge_lists = vec![(self.base.uid().to_string(), root_edges.to_vec())];
        for (uid, shell) in &mut shells {
            edge_lists.push((uid.clone(), std::mem::take(&mut shell.edges)));
        }

        // Pass 2
        assemble(self, root_slots, &mut shells, &mut summary);
        for uid in shells.keys() {
            tracing::warn!(%uid, "Nested container is not reachable from the root, skipping");
            summary.skipped += 1;
        }

        // Pass 3
        for (container_uid, edges) in edge_lists {
            let Some(container) = self.get_container_mut(&container_uid) else {
                summary.skipped += edges.len();
                continue;
            };
            for edge in &edges {
                let connected = match parse_edge(edge) {
                    Some((from_uid, from_port, to_uid, to_port)) => {
                        container.connect_by_uid(from_uid, from_port, to_uid, to_port)
                    }
                    None => false,
                };
                if connected {
                    summary.edges += 1;
                } else {
                    tracing::warn!(container = %container_uid, %edge, "Skipping unresolvable edge");
                    summary.skipped += 1;
                }
            }
        }

        // Pass 4
        for (uid, node_params) in params {
            if let Some(node) = self.get_node_by_uid_mut(&uid) {
                node.from_params(&node_params);
            }
        }

        tracing::info!(
            uid = %self.base.uid(),
            nodes = summary.nodes,
            containers = summary.containers,
            edges = summary.edges,
            skipped = summary.skipped,
            "Loaded container"
        );
        Ok(summary)
    }

    /// Reload the nested container `uid` from `document`, keeping the edges
    /// that wire it into its parent.
    ///
    /// Boundary edges whose ports did not survive the reload are dropped
    /// and reconnected by UID and port name. Returns `None` if `uid` is not
    /// a container nested below this one.
    pub fn reload_container(&mut self, uid: &str, document: &Value) -> Option<Result<LoadSummary, LoadError>> {
        let parent_uid = self.parent_uid_of(uid)?;
        let parent = self.get_container_mut(&parent_uid)?;

        let boundary: HashSet<RuntimeId> = {
            let child = parent.get_node_by_uid(uid)?.as_container()?;
            let mut ports = child.inputs();
            ports.extend(child.outputs());
            ports.iter().map(Port::runtime_id).collect()
        };
        let wiring: Vec<(Edge, String, String)> = parent
            .edges
            .iter()
            .filter(|edge| edge.touches(&boundary))
            .filter_map(|edge| parent.edge_endpoints(edge).map(|(from, to)| (*edge, from, to)))
            .collect();

        let result = parent.get_node_by_uid_mut(uid)?.as_container_mut()?.load_document(document);

        for (edge, from, to) in wiring {
            if parent.port_owner(edge.from).is_some() && parent.port_owner(edge.to).is_some() {
                continue;
            }
            parent.edges.retain(|e| *e != edge);
            let restored = split_endpoints(&from, &to)
                .is_some_and(|(from_uid, from_port, to_uid, to_port)| {
                    parent.connect_by_uid(from_uid, from_port, to_uid, to_port)
                });
            if !restored {
                tracing::warn!(container = %uid, %from, %to, "Boundary edge dropped after reload");
            }
        }
        Some(result)
    }

    /// Take the direct-child linkers out, keeping their external wiring
    fn take_linkers(&mut self) -> IndexMap<String, Box<dyn Node>> {
        let mut kept = IndexMap::new();
        let mut index = 0;
        while index < self.children.len() {
            if let Some(linker) = self.children[index].as_linker() {
                // The inside is rebuilt by the edge pass
                linker.internal_port().disconnect_all();
                let linker = self.children.remove(index);
                kept.insert(linker.uid().to_string(), linker);
            } else {
                index += 1;
            }
        }
        kept
    }

    fn document_entry(&self, parent: Option<&str>) -> Value {
        let nodes: Vec<Value> = self
            .children
            .iter()
            .map(|child| match child.as_container() {
                Some(container) => json!({ "uid": container.uid(), "container": true }),
                None => node_entry(child.as_ref()),
            })
            .collect();

        let mut edges = Vec::with_capacity(self.edges.len());
        for edge in &self.edges {
            match self.edge_endpoints(edge) {
                Some((from, to)) => edges.push(json!({ "from": from, "to": to })),
                None => tracing::warn!(from = %edge.from, to = %edge.to, "Edge endpoint not found, not saved"),
            }
        }

        let mut entry = json!({
            "uid": self.base.uid(),
            "title": self.base.title,
            "level": self.level(),
            "position": self.base.position,
            "layout": self.layout,
            "nodes": nodes,
            "edges": edges,
        });
        if let Some(parent) = parent {
            entry["parent"] = json!(parent);
        }
        entry
    }

    fn collect_nested(&self, out: &mut Vec<Value>) {
        for child in &self.children {
            if let Some(container) = child.as_container() {
                out.push(container.document_entry(Some(self.base.uid())));
                container.collect_nested(out);
            }
        }
    }

    /// Containers named only through their `parent` field are appended to
    /// that parent's children.
    fn adopt_unlisted(&self, root_slots: &mut Vec<Slot>, shells: &mut IndexMap<String, Shell>) {
        let listed: HashSet<String> = root_slots
            .iter()
            .chain(shells.values().flat_map(|shell| shell.slots.iter()))
            .filter_map(|slot| match slot {
                Slot::Container(uid) => Some(uid.clone()),
                Slot::Node(_) => None,
            })
            .collect();

        let unlisted: Vec<(String, Option<String>)> = shells
            .iter()
            .filter(|(uid, _)| !listed.contains(uid.as_str()))
            .map(|(uid, shell)| (uid.clone(), shell.parent.clone()))
            .collect();

        for (uid, parent) in unlisted {
            match parent.as_deref() {
                Some(parent) if parent != self.base.uid() => match shells.get_mut(parent) {
                    Some(shell) => shell.slots.push(Slot::Container(uid)),
                    None => tracing::warn!(%uid, %parent, "Nested container has an unknown parent"),
                },
                _ => root_slots.push(Slot::Container(uid)),
            }
        }
    }
}

fn assemble(
    target: &mut Container,
    slots: Vec<Slot>,
    shells: &mut IndexMap<String, Shell>,
    summary: &mut LoadSummary,
) {
    for slot in slots {
        match slot {
            Slot::Node(node) => {
                target.add_node(node);
            }
            Slot::Container(uid) => {
                // Removing before recursing also stops reference cycles.
                let Some(shell) = shells.shift_remove(&uid) else {
                    tracing::warn!(%uid, "Unknown or repeated nested container, skipping");
                    summary.skipped += 1;
                    continue;
                };
                let mut container = shell.container;
                assemble(&mut container, shell.slots, shells, summary);
                target.add_node(Box::new(container));
                summary.containers += 1;
            }
        }
    }
}

fn instantiate(
    ctx: &GraphContext,
    entries: &[Value],
    kept: &mut IndexMap<String, Box<dyn Node>>,
    params: &mut Vec<(String, Value)>,
    summary: &mut LoadSummary,
) -> Vec<Slot> {
    let mut slots = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(uid) = entry.get("uid").and_then(Value::as_str) else {
            tracing::warn!("Skipping node without uid");
            summary.skipped += 1;
            continue;
        };
        if entry.get("container").and_then(Value::as_bool) == Some(true) {
            slots.push(Slot::Container(uid.to_string()));
            continue;
        }

        let node_params = entry.get("params").cloned().unwrap_or_else(|| json!({}));
        let reused = reuse_linker(kept, uid, entry, &node_params);
        let Some(mut node) = reused.or_else(|| create_entry(ctx, entry, &node_params)) else {
            tracing::warn!(%uid, kind = ?entry.get("type"), "Skipping node of unknown type");
            summary.skipped += 1;
            continue;
        };

        let base = node.base_mut();
        base.set_uid(uid);
        if let Some(title) = entry.get("title").and_then(Value::as_str) {
            base.title = title.to_string();
        }
        if let Some(position) = read_position(entry) {
            base.position = position;
        }

        params.push((uid.to_string(), node_params));
        summary.nodes += 1;
        slots.push(Slot::Node(node));
    }
    slots
}

fn create_entry(ctx: &GraphContext, entry: &Value, params: &Value) -> Option<Box<dyn Node>> {
    let type_name = entry.get("type").and_then(Value::as_str)?;
    if type_name != Linker::TYPE_NAME {
        return ctx.create_node(type_name);
    }

    let (orientation, name) = linker_shape(entry, params);
    Some(Box::new(Linker::with_name(ctx, orientation, name)))
}

/// A kept linker with the same UID, orientation, port name and binding as `entry`
fn reuse_linker(
    kept: &mut IndexMap<String, Box<dyn Node>>,
    uid: &str,
    entry: &Value,
    params: &Value,
) -> Option<Box<dyn Node>> {
    if entry.get("type").and_then(Value::as_str) != Some(Linker::TYPE_NAME) {
        return None;
    }
    let (orientation, name) = linker_shape(entry, params);
    let linker = kept.get(uid)?.as_linker()?;
    let bound = params.get("boundType").and_then(Value::as_str).and_then(PortType::from_name);
    if linker.orientation() != orientation || linker.port_name() != name || linker.bound_type() != bound {
        return None;
    }
    kept.shift_remove(uid)
}

/// Orientation and port name decide which ports exist, so they must be
/// known before edges are connected.
fn linker_shape<'a>(entry: &Value, params: &'a Value) -> (LinkerOrientation, &'a str) {
    let orientation = entry
        .get("orientation")
        .or_else(|| params.get("orientation"))
        .and_then(|o| serde_json::from_value::<LinkerOrientation>(o.clone()).ok())
        .unwrap_or(LinkerOrientation::Input);
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_else(|| orientation.default_port_name());
    (orientation, name)
}

fn node_entry(node: &dyn Node) -> Value {
    let base = node.base();
    let mut entry = json!({
        "uid": base.uid(),
        "type": base.type_name(),
        "title": base.title,
        "position": base.position,
        "params": node.to_params(),
    });
    if let Some(linker) = node.as_linker() {
        entry["orientation"] = json!(linker.orientation());
    }
    entry
}

fn apply_header(base: &mut NodeBase, layout: &mut Value, entry: &Value) {
    if let Some(title) = entry.get("title").and_then(Value::as_str) {
        base.title = title.to_string();
    }
    if let Some(position) = read_position(entry) {
        base.position = position;
    }
    *layout = entry.get("layout").cloned().unwrap_or(Value::Null);
}

fn read_position(entry: &Value) -> Option<[f32; 2]> {
    serde_json::from_value(entry.get("position")?.clone()).ok()
}

fn array_field<'a>(entry: &'a Value, field: &'static str) -> Result<&'a [Value], LoadError> {
    match entry.get(field) {
        None | Some(Value::Null) => Ok(&[][..]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(LoadError::InvalidField(field)),
    }
}

/// Split `{from: "uid.port", to: "uid.port"}` on the first dot of each end
fn parse_edge(edge: &Value) -> Option<(&str, &str, &str, &str)> {
    split_endpoints(edge.get("from")?.as_str()?, edge.get("to")?.as_str()?)
}

fn split_endpoints<'a>(from: &'a str, to: &'a str) -> Option<(&'a str, &'a str, &'a str, &'a str)> {
    let (from_uid, from_port) = from.split_once('.')?;
    let (to_uid, to_port) = to.split_once('.')?;
    Some((from_uid, from_port, to_uid, to_port))
}
