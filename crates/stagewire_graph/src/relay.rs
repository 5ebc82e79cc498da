// SPDX-License-Identifier: MIT OR Apache-2.0
//! Relay pairs used by linkers once their type is known.
//!
//! A relay pair is an input port whose receiver forwards every value,
//! unchanged, to a paired output port. The table is closed: a linker can only
//! bind to a type that has an entry here.

use crate::ids::IdGenerator;
use crate::port::{Port, Receiver};
use crate::value::PortType;
use indexmap::IndexMap;

/// Input/output pair forwarding values from `input` to `output`
#[derive(Debug, Clone)]
pub struct RelayPair {
    /// Receiving side
    pub input: Port,
    /// Re-sending side
    pub output: Port,
}

/// Builds a relay pair for one payload type
pub type RelayFactory = fn(&IdGenerator, &str) -> RelayPair;

/// Closed map from payload type to relay factory
pub struct RelayTable {
    factories: IndexMap<PortType, RelayFactory>,
}

impl RelayTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// Table with a forwarding relay for every concrete payload type
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register(PortType::Bool, |ids, name| forward(ids, name, PortType::Bool));
        table.register(PortType::Number, |ids, name| forward(ids, name, PortType::Number));
        table.register(PortType::NumberList, |ids, name| forward(ids, name, PortType::NumberList));
        table.register(PortType::Text, |ids, name| forward(ids, name, PortType::Text));
        table.register(PortType::Vec2, |ids, name| forward(ids, name, PortType::Vec2));
        table.register(PortType::Vec2List, |ids, name| forward(ids, name, PortType::Vec2List));
        table.register(PortType::Vec3, |ids, name| forward(ids, name, PortType::Vec3));
        table.register(PortType::Vec3List, |ids, name| forward(ids, name, PortType::Vec3List));
        table.register(PortType::Quaternion, |ids, name| forward(ids, name, PortType::Quaternion));
        table.register(PortType::Color, |ids, name| forward(ids, name, PortType::Color));
        table.register(PortType::ColorList, |ids, name| forward(ids, name, PortType::ColorList));
        table.register(PortType::Json, |ids, name| forward(ids, name, PortType::Json));
        table.register(PortType::Image, |ids, name| forward(ids, name, PortType::Image));
        table.register(PortType::AudioBuffer, |ids, name| forward(ids, name, PortType::AudioBuffer));
        table.register(PortType::AudioNodeHandle, |ids, name| {
            forward(ids, name, PortType::AudioNodeHandle)
        });
        table.register(PortType::Feature, |ids, name| forward(ids, name, PortType::Feature));
        table.register(PortType::FeatureList, |ids, name| forward(ids, name, PortType::FeatureList));
        table.register(PortType::BodyList, |ids, name| forward(ids, name, PortType::BodyList));
        table
    }

    /// Add a factory; `Generic` and already-registered types are rejected
    pub fn register(&mut self, port_type: PortType, factory: RelayFactory) -> bool {
        if port_type.is_generic() || self.factories.contains_key(&port_type) {
            return false;
        }
        self.factories.insert(port_type, factory);
        true
    }

    /// Whether a linker can bind to `port_type`
    pub fn supports(&self, port_type: PortType) -> bool {
        self.factories.contains_key(&port_type)
    }

    /// Build a relay pair for `port_type`
    pub fn relay_pair(&self, port_type: PortType, ids: &IdGenerator, name: &str) -> Option<RelayPair> {
        self.factories.get(&port_type).map(|factory| factory(ids, name))
    }
}

impl Default for RelayTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn forward(ids: &IdGenerator, name: &str, port_type: PortType) -> RelayPair {
    let output = Port::output(ids, name, port_type);
    let target = output.downgrade();
    let input = Port::input(ids, name, port_type).with_receiver(Receiver::with_context(
        move |value, context| {
            if let Some(output) = target.upgrade() {
                output.send(value.clone(), context);
            }
        },
    ));
    RelayPair { input, output }
}
