// SPDX-License-Identifier: MIT OR Apache-2.0
//! Debugging helpers.

use crate::node::{Node, NodeBase};
use crate::port::{Port, Receiver};
use crate::registry::GraphContext;
use crate::value::{PortType, PortValue};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Logs every value it receives and remembers the last one
pub struct MonitorNode {
    base: NodeBase,
    label: Rc<RefCell<String>>,
    last: Rc<RefCell<Option<String>>>,
}

impl MonitorNode {
    /// Registry type name
    pub const TYPE_NAME: &'static str = "monitor";

    /// Create a monitor with an empty label
    pub fn new(ctx: &GraphContext) -> Self {
        let ids = ctx.ids();
        let mut base = NodeBase::new(ids, Self::TYPE_NAME);
        let label = Rc::new(RefCell::new(String::new()));
        let last = Rc::new(RefCell::new(None));

        let (l, seen) = (label.clone(), last.clone());
        base.add_port(Port::input(ids, "number", PortType::Number).with_receiver(
            Receiver::with_sender(move |value, sender| {
                record(&l, &seen, value, sender, None);
            }),
        ));

        let (l, seen) = (label.clone(), last.clone());
        base.add_port(Port::input(ids, "text", PortType::Text).with_receiver(
            Receiver::with_sender_and_context(move |value, sender, context| {
                record(&l, &seen, value, sender, context);
            }),
        ));

        let seen = last.clone();
        base.add_rpc("clear", move || seen.borrow_mut().take().is_some());

        Self { base, label, last }
    }

    /// Last value received, rendered as `sender: value`
    pub fn last_reading(&self) -> Option<String> {
        self.last.borrow().clone()
    }
}

fn record(
    label: &RefCell<String>,
    last: &RefCell<Option<String>>,
    value: &PortValue,
    sender: &str,
    context: Option<&Value>,
) {
    let reading = format!("{sender}: {}", value.to_json());
    tracing::info!(label = %label.borrow(), ?context, "{reading}");
    *last.borrow_mut() = Some(reading);
}

impl Node for MonitorNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn to_params(&self) -> Value {
        json!({ "label": *self.label.borrow() })
    }

    fn from_params(&mut self, params: &Value) {
        if let Some(label) = params.get("label").and_then(Value::as_str) {
            *self.label.borrow_mut() = label.to_string();
        }
    }
}
