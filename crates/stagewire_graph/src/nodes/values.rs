// SPDX-License-Identifier: MIT OR Apache-2.0
//! Nodes that hold a single value and re-send it.
//!
//! Each node has an input and an output with the same name. A value arriving
//! on the input is stored and sent on; restoring params sends the stored
//! value again so downstream nodes are never cold after a load.

use crate::node::{Node, NodeBase};
use crate::port::{Port, Receiver, WeakPort};
use crate::registry::GraphContext;
use crate::value::{PortType, PortValue};
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn forward(target: &WeakPort, value: PortValue, context: Option<&Value>) {
    if let Some(output) = target.upgrade() {
        output.send(value, context);
    }
}

/// Holds a number
pub struct NumberNode {
    base: NodeBase,
    value: Rc<Cell<f64>>,
    output: Port,
}

impl NumberNode {
    /// Registry type name
    pub const TYPE_NAME: &'static str = "number";

    /// Create a number node holding 0
    pub fn new(ctx: &GraphContext) -> Self {
        let ids = ctx.ids();
        let mut base = NodeBase::new(ids, Self::TYPE_NAME);
        let value = Rc::new(Cell::new(0.0));
        let output = Port::output(ids, "value", PortType::Number);

        let (stored, target) = (value.clone(), output.downgrade());
        base.add_port(Port::input(ids, "value", PortType::Number).with_receiver(
            Receiver::with_context(move |incoming, context| {
                if let Some(n) = incoming.as_number() {
                    stored.set(n);
                    forward(&target, PortValue::Number(n), context);
                }
            }),
        ));
        base.add_port(output.clone());

        let (stored, target) = (value.clone(), output.downgrade());
        base.add_rpc("bang", move || match target.upgrade() {
            Some(output) => {
                output.send(PortValue::Number(stored.get()), None);
                true
            }
            None => false,
        });

        Self { base, value, output }
    }

    /// Current value
    pub fn value(&self) -> f64 {
        self.value.get()
    }

    /// Store and send a value
    pub fn set_value(&self, value: f64) {
        self.value.set(value);
        self.output.send(PortValue::Number(value), None);
    }
}

impl Node for NumberNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn to_params(&self) -> Value {
        json!({ "value": self.value() })
    }

    fn from_params(&mut self, params: &Value) {
        if let Some(value) = params.get("value").and_then(Value::as_f64) {
            self.set_value(value);
        }
    }
}

/// Holds an on/off state
pub struct ToggleNode {
    base: NodeBase,
    state: Rc<Cell<bool>>,
    output: Port,
}

impl ToggleNode {
    /// Registry type name
    pub const TYPE_NAME: &'static str = "toggle";

    /// Create a toggle that starts off
    pub fn new(ctx: &GraphContext) -> Self {
        let ids = ctx.ids();
        let mut base = NodeBase::new(ids, Self::TYPE_NAME);
        let state = Rc::new(Cell::new(false));
        let output = Port::output(ids, "state", PortType::Bool);

        let (stored, target) = (state.clone(), output.downgrade());
        base.add_port(Port::input(ids, "set", PortType::Bool).with_receiver(Receiver::with_context(
            move |incoming, context| {
                if let Some(on) = incoming.as_bool() {
                    stored.set(on);
                    forward(&target, PortValue::Bool(on), context);
                }
            },
        )));
        base.add_port(output.clone());

        let (stored, target) = (state.clone(), output.downgrade());
        base.add_rpc("toggle", move || {
            stored.set(!stored.get());
            forward(&target, PortValue::Bool(stored.get()), None);
            true
        });

        Self { base, state, output }
    }

    /// Current state
    pub fn state(&self) -> bool {
        self.state.get()
    }

    /// Store and send a state
    pub fn set_state(&self, on: bool) {
        self.state.set(on);
        self.output.send(PortValue::Bool(on), None);
    }
}

impl Node for ToggleNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn to_params(&self) -> Value {
        json!({ "state": self.state() })
    }

    fn from_params(&mut self, params: &Value) {
        if let Some(on) = params.get("state").and_then(Value::as_bool) {
            self.set_state(on);
        }
    }
}

/// Holds a string
pub struct TextNode {
    base: NodeBase,
    text: Rc<RefCell<String>>,
    output: Port,
}

impl TextNode {
    /// Registry type name
    pub const TYPE_NAME: &'static str = "text";

    /// Create an empty text node
    pub fn new(ctx: &GraphContext) -> Self {
        let ids = ctx.ids();
        let mut base = NodeBase::new(ids, Self::TYPE_NAME);
        let text = Rc::new(RefCell::new(String::new()));
        let output = Port::output(ids, "text", PortType::Text);

        let (stored, target) = (text.clone(), output.downgrade());
        base.add_port(Port::input(ids, "text", PortType::Text).with_receiver(Receiver::with_context(
            move |incoming, context| {
                if let Some(s) = incoming.as_text() {
                    *stored.borrow_mut() = s.to_string();
                    forward(&target, incoming.clone(), context);
                }
            },
        )));
        base.add_port(output.clone());

        Self { base, text, output }
    }

    /// Current text
    pub fn text(&self) -> String {
        self.text.borrow().clone()
    }

    /// Store and send a string
    pub fn set_text(&self, text: impl Into<String>) {
        let text = text.into();
        *self.text.borrow_mut() = text.clone();
        self.output.send(PortValue::Text(text), None);
    }
}

impl Node for TextNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn to_params(&self) -> Value {
        json!({ "text": self.text() })
    }

    fn from_params(&mut self, params: &Value) {
        if let Some(text) = params.get("text").and_then(Value::as_str) {
            self.set_text(text);
        }
    }
}

/// Holds an RGBA color
pub struct ColorNode {
    base: NodeBase,
    rgba: Rc<Cell<[f32; 4]>>,
    output: Port,
}

impl ColorNode {
    /// Registry type name
    pub const TYPE_NAME: &'static str = "color";

    /// Create a node holding opaque white
    pub fn new(ctx: &GraphContext) -> Self {
        let ids = ctx.ids();
        let mut base = NodeBase::new(ids, Self::TYPE_NAME);
        let rgba = Rc::new(Cell::new([1.0; 4]));
        let output = Port::output(ids, "rgba", PortType::Color);

        let (stored, target) = (rgba.clone(), output.downgrade());
        base.add_port(Port::input(ids, "rgba", PortType::Color).with_receiver(Receiver::with_context(
            move |incoming, context| {
                if let PortValue::Color(color) = incoming {
                    stored.set(*color);
                    forward(&target, PortValue::Color(*color), context);
                }
            },
        )));
        base.add_port(output.clone());

        Self { base, rgba, output }
    }

    /// Current color
    pub fn rgba(&self) -> [f32; 4] {
        self.rgba.get()
    }

    /// Store and send a color
    pub fn set_rgba(&self, rgba: [f32; 4]) {
        self.rgba.set(rgba);
        self.output.send(PortValue::Color(rgba), None);
    }
}

impl Node for ColorNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn to_params(&self) -> Value {
        json!({ "rgba": self.rgba() })
    }

    fn from_params(&mut self, params: &Value) {
        let rgba = params
            .get("rgba")
            .and_then(|v| serde_json::from_value::<[f32; 4]>(v.clone()).ok());
        if let Some(rgba) = rgba {
            self.set_rgba(rgba);
        }
    }
}
