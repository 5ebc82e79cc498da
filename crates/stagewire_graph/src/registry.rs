// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node type registry and the graph service context.

use crate::ids::IdGenerator;
use crate::node::Node;
use crate::relay::RelayTable;
use indexmap::IndexMap;
use std::rc::Rc;

/// Builds a fresh node instance
pub type NodeFactory = Box<dyn Fn(&GraphContext) -> Box<dyn Node>>;

/// Registry of available node types, grouped for display
pub struct Registry {
    /// Factories by type name
    factories: IndexMap<String, NodeFactory>,
    /// Group name -> type names, both in registration order
    groups: IndexMap<String, Vec<String>>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: IndexMap::new(),
            groups: IndexMap::new(),
        }
    }

    /// Register a node type.
    ///
    /// Returns `false` and keeps the existing factory if `name` is taken.
    pub fn add(
        &mut self,
        group: impl Into<String>,
        name: impl Into<String>,
        factory: impl Fn(&GraphContext) -> Box<dyn Node> + 'static,
    ) -> bool {
        let name = name.into();
        if self.factories.contains_key(&name) {
            tracing::warn!(%name, "Node type already registered");
            return false;
        }

        self.groups.entry(group.into()).or_default().push(name.clone());
        self.factories.insert(name, Box::new(factory));
        true
    }

    /// Whether a type is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate a type; `None` for unknown names
    pub fn create(&self, name: &str, ctx: &GraphContext) -> Option<Box<dyn Node>> {
        self.factories.get(name).map(|factory| factory(ctx))
    }

    /// All type names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Groups and their type names in registration order
    pub fn groups(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.groups.iter().map(|(g, names)| (g.as_str(), names.as_slice()))
    }

    /// Group a type was registered under
    pub fn group_of(&self, name: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|(_, names)| names.iter().any(|n| n == name))
            .map(|(g, _)| g.as_str())
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Services every node constructor needs.
///
/// Built once at startup, after registration, and passed by reference to
/// everything that creates nodes or ports. Cloning is cheap.
#[derive(Clone)]
pub struct GraphContext {
    ids: IdGenerator,
    relays: Rc<RelayTable>,
    registry: Rc<Registry>,
}

impl GraphContext {
    /// Create a context with the standard relay table
    pub fn new(ids: IdGenerator, registry: Registry) -> Self {
        Self::with_relays(ids, registry, RelayTable::standard())
    }

    /// Create a context with an explicit relay table
    pub fn with_relays(ids: IdGenerator, registry: Registry, relays: RelayTable) -> Self {
        Self {
            ids,
            relays: Rc::new(relays),
            registry: Rc::new(registry),
        }
    }

    /// Identity generator
    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    /// Linker relay table
    pub fn relays(&self) -> &RelayTable {
        &self.relays
    }

    /// Node type registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Instantiate a registered node type
    pub fn create_node(&self, name: &str) -> Option<Box<dyn Node>> {
        let node = self.registry.create(name, self);
        if node.is_none() {
            tracing::debug!(%name, "Unknown node type");
        }
        node
    }
}
