// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in node types.

pub mod math;
pub mod utility;
pub mod values;

use crate::container::Container;
use crate::linker::{Linker, LinkerOrientation};
use crate::registry::Registry;

pub use math::ScaleNode;
pub use utility::MonitorNode;
pub use values::{ColorNode, NumberNode, TextNode, ToggleNode};

/// Register every built-in node type
pub fn register_builtin_nodes(registry: &mut Registry) {
    // Structure
    registry.add("Structure", Container::TYPE_NAME, |ctx| Box::new(Container::new(ctx)));
    registry.add("Structure", Linker::TYPE_NAME, |ctx| {
        Box::new(Linker::new(ctx, LinkerOrientation::Input))
    });

    // Values
    registry.add("Values", NumberNode::TYPE_NAME, |ctx| Box::new(NumberNode::new(ctx)));
    registry.add("Values", ToggleNode::TYPE_NAME, |ctx| Box::new(ToggleNode::new(ctx)));
    registry.add("Values", TextNode::TYPE_NAME, |ctx| Box::new(TextNode::new(ctx)));
    registry.add("Values", ColorNode::TYPE_NAME, |ctx| Box::new(ColorNode::new(ctx)));

    // Math
    registry.add("Math", ScaleNode::TYPE_NAME, |ctx| Box::new(ScaleNode::new(ctx)));

    // Utility
    registry.add("Utility", MonitorNode::TYPE_NAME, |ctx| Box::new(MonitorNode::new(ctx)));
}
