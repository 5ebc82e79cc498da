// SPDX-License-Identifier: MIT OR Apache-2.0
//! Arithmetic nodes.

use crate::node::{Node, NodeBase};
use crate::port::{Port, Receiver};
use crate::registry::GraphContext;
use crate::value::{PortType, PortValue};
use serde_json::{json, Value};
use std::cell::Cell;
use std::rc::Rc;

/// `out = in * factor + offset`
pub struct ScaleNode {
    base: NodeBase,
    factor: Rc<Cell<f64>>,
    offset: Rc<Cell<f64>>,
}

impl ScaleNode {
    /// Registry type name
    pub const TYPE_NAME: &'static str = "scale";

    /// Create an identity scale (factor 1, offset 0)
    pub fn new(ctx: &GraphContext) -> Self {
        let ids = ctx.ids();
        let mut base = NodeBase::new(ids, Self::TYPE_NAME);
        let factor = Rc::new(Cell::new(1.0));
        let offset = Rc::new(Cell::new(0.0));
        let output = Port::output(ids, "out", PortType::Number);

        let target = output.downgrade();
        let (f, o) = (factor.clone(), offset.clone());
        // The send context is passed through untouched.
        base.add_port(Port::input(ids, "in", PortType::Number).with_receiver(Receiver::with_context(
            move |incoming, context| {
                let (Some(n), Some(output)) = (incoming.as_number(), target.upgrade()) else {
                    return;
                };
                output.send(PortValue::Number(n * f.get() + o.get()), context);
            },
        )));
        base.add_port(output);

        Self { base, factor, offset }
    }
}

impl Node for ScaleNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn to_params(&self) -> Value {
        json!({ "factor": self.factor.get(), "offset": self.offset.get() })
    }

    fn from_params(&mut self, params: &Value) {
        if let Some(factor) = params.get("factor").and_then(Value::as_f64) {
            self.factor.set(factor);
        }
        if let Some(offset) = params.get("offset").and_then(Value::as_f64) {
            self.offset.set(offset);
        }
    }
}
