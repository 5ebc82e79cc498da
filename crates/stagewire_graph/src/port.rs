// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed, cached, many-to-many pub/sub ports.
//!
//! A [`Port`] is a cheap handle onto shared port state. Output ports keep the
//! last value they sent and replay it to every listener that connects later,
//! so the graph is never cold after rewiring.
//!
//! Ports are single-threaded (`!Send`). Producers on other threads must hand
//! their values over to the graph thread before calling [`Port::send`].

use crate::ids::{IdGenerator, RuntimeId};
use crate::value::{PortType, PortValue};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    /// Receives values
    Input,
    /// Sends values
    Output,
}

impl PortDirection {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Callback invoked when an input port receives a value.
///
/// The calling convention is fixed when the port is built.
pub enum Receiver {
    /// `f(value)`
    Value(Box<dyn FnMut(&PortValue)>),
    /// `f(value, sender_name)`
    WithSender(Box<dyn FnMut(&PortValue, &str)>),
    /// `f(value, context)`
    WithContext(Box<dyn FnMut(&PortValue, Option<&Value>)>),
    /// `f(value, sender_name, context)`
    WithSenderAndContext(Box<dyn FnMut(&PortValue, &str, Option<&Value>)>),
}

impl Receiver {
    /// Receiver taking only the value
    pub fn value(f: impl FnMut(&PortValue) + 'static) -> Self {
        Self::Value(Box::new(f))
    }

    /// Receiver taking the value and the sending port's name
    pub fn with_sender(f: impl FnMut(&PortValue, &str) + 'static) -> Self {
        Self::WithSender(Box::new(f))
    }

    /// Receiver taking the value and the send context
    pub fn with_context(f: impl FnMut(&PortValue, Option<&Value>) + 'static) -> Self {
        Self::WithContext(Box::new(f))
    }

    /// Receiver taking the value, the sending port's name and the send context
    pub fn with_sender_and_context(
        f: impl FnMut(&PortValue, &str, Option<&Value>) + 'static,
    ) -> Self {
        Self::WithSenderAndContext(Box::new(f))
    }

    fn invoke(&mut self, value: &PortValue, sender: &str, context: Option<&Value>) {
        match self {
            Self::Value(f) => f(value),
            Self::WithSender(f) => f(value, sender),
            Self::WithContext(f) => f(value, context),
            Self::WithSenderAndContext(f) => f(value, sender, context),
        }
    }
}

type Hook = Box<dyn FnMut()>;

struct PortInner {
    runtime_id: RuntimeId,
    uid: String,
    name: String,
    caption: RefCell<String>,
    port_type: PortType,
    direction: PortDirection,
    enabled: Cell<bool>,
    peers: RefCell<Vec<Weak<PortInner>>>,
    cache: RefCell<Option<PortValue>>,
    receiver: RefCell<Option<Receiver>>,
    delivering: Cell<bool>,
    on_connect: RefCell<Option<Hook>>,
    on_disconnect: RefCell<Option<Hook>>,
}

/// Handle to a typed port.
///
/// Clones refer to the same port; equality is identity.
#[derive(Clone)]
pub struct Port(Rc<PortInner>);

/// Non-owning handle to a port
#[derive(Clone)]
pub struct WeakPort(Weak<PortInner>);

impl WeakPort {
    /// Get the port back if it is still alive
    pub fn upgrade(&self) -> Option<Port> {
        self.0.upgrade().map(Port)
    }
}

impl Port {
    fn build(ids: &IdGenerator, name: String, port_type: PortType, direction: PortDirection) -> Self {
        Self(Rc::new(PortInner {
            runtime_id: ids.next_runtime_id(),
            uid: ids.new_uid(),
            caption: RefCell::new(name.clone()),
            name,
            port_type,
            direction,
            enabled: Cell::new(true),
            peers: RefCell::new(Vec::new()),
            cache: RefCell::new(None),
            receiver: RefCell::new(None),
            delivering: Cell::new(false),
            on_connect: RefCell::new(None),
            on_disconnect: RefCell::new(None),
        }))
    }

    /// Create a new input port
    pub fn input(ids: &IdGenerator, name: impl Into<String>, port_type: PortType) -> Self {
        Self::build(ids, name.into(), port_type, PortDirection::Input)
    }

    /// Create a new output port
    pub fn output(ids: &IdGenerator, name: impl Into<String>, port_type: PortType) -> Self {
        Self::build(ids, name.into(), port_type, PortDirection::Output)
    }

    /// Set the receive callback
    pub fn with_receiver(self, receiver: Receiver) -> Self {
        *self.0.receiver.borrow_mut() = Some(receiver);
        self
    }

    /// Set the callback fired when the first listener connects
    pub fn with_connect_callback(self, f: impl FnMut() + 'static) -> Self {
        *self.0.on_connect.borrow_mut() = Some(Box::new(f));
        self
    }

    /// Set the callback fired when the last listener disconnects
    pub fn with_disconnect_callback(self, f: impl FnMut() + 'static) -> Self {
        *self.0.on_disconnect.borrow_mut() = Some(Box::new(f));
        self
    }

    /// Set the display caption
    pub fn with_caption(self, caption: impl Into<String>) -> Self {
        *self.0.caption.borrow_mut() = caption.into();
        self
    }

    /// Ephemeral wiring id
    pub fn runtime_id(&self) -> RuntimeId {
        self.0.runtime_id
    }

    /// Stable id of this port instance
    pub fn uid(&self) -> &str {
        &self.0.uid
    }

    /// Port name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Display caption
    pub fn caption(&self) -> String {
        self.0.caption.borrow().clone()
    }

    /// Change the display caption
    pub fn set_caption(&self, caption: impl Into<String>) {
        *self.0.caption.borrow_mut() = caption.into();
    }

    /// Payload type
    pub fn port_type(&self) -> PortType {
        self.0.port_type
    }

    /// Port direction
    pub fn direction(&self) -> PortDirection {
        self.0.direction
    }

    /// Whether the port is still unbound
    pub fn is_generic(&self) -> bool {
        self.0.port_type.is_generic()
    }

    /// Whether the port passes values
    pub fn is_enabled(&self) -> bool {
        self.0.enabled.get()
    }

    /// Enable or disable the port; a disabled port drops sends and receives
    pub fn set_enabled(&self, enabled: bool) {
        self.0.enabled.set(enabled);
    }

    /// Last value sent on this port
    pub fn cached(&self) -> Option<PortValue> {
        self.0.cache.borrow().clone()
    }

    /// Non-owning handle
    pub fn downgrade(&self) -> WeakPort {
        WeakPort(Rc::downgrade(&self.0))
    }

    /// Live connected peers, in connection order.
    ///
    /// Dropped peers are forgotten here. An output left without listeners
    /// this way fires its disconnect callback.
    pub fn peers(&self) -> Vec<Port> {
        let (live, emptied) = {
            let mut peers = self.0.peers.borrow_mut();
            let before = peers.len();
            peers.retain(|p| p.strong_count() > 0);
            let live: Vec<Port> = peers.iter().filter_map(|p| p.upgrade().map(Port)).collect();
            (live, before > 0 && peers.is_empty())
        };
        if emptied && self.0.direction == PortDirection::Output {
            fire_hook(&self.0.on_disconnect);
        }
        live
    }

    /// Number of live connected peers
    pub fn listener_count(&self) -> usize {
        self.peers().len()
    }

    /// Whether this port is connected to `other`
    pub fn is_connected_to(&self, other: &Port) -> bool {
        self.peers().iter().any(|p| p == other)
    }

    /// Connect two ports.
    ///
    /// Either argument order works. Returns `false` if the directions are not
    /// complementary, the types differ, either side is generic, or the pair
    /// is already connected. Neither port is touched on failure.
    pub fn connect(&self, other: &Port) -> bool {
        let Some((output, input)) = orient(self, other) else {
            tracing::debug!(a = %self.name(), b = %other.name(), "Connect rejected: same direction");
            return false;
        };

        if output.is_generic() || input.is_generic() || output.port_type() != input.port_type() {
            tracing::debug!(
                output = %output.name(),
                input = %input.name(),
                from = %output.port_type(),
                to = %input.port_type(),
                "Connect rejected: type mismatch"
            );
            return false;
        }

        if output.is_connected_to(input) {
            return false;
        }

        let was_idle = output.listener_count() == 0;
        output.0.peers.borrow_mut().push(Rc::downgrade(&input.0));
        input.0.peers.borrow_mut().push(Rc::downgrade(&output.0));

        if was_idle {
            fire_hook(&output.0.on_connect);
        }

        let cached = output.cached();
        if let Some(value) = cached {
            input.deliver(&value, output.name(), None);
        }

        true
    }

    /// Disconnect two ports. Returns whether they were connected.
    pub fn disconnect(&self, other: &Port) -> bool {
        let Some((output, input)) = orient(self, other) else {
            return false;
        };

        // Prune first so dropped peers cannot fire the callback a second time
        output.peers();
        let removed = remove_peer(output, input);
        remove_peer(input, output);

        if removed && output.listener_count() == 0 {
            fire_hook(&output.0.on_disconnect);
        }
        removed
    }

    /// Disconnect from every peer
    pub fn disconnect_all(&self) {
        for peer in self.peers() {
            self.disconnect(&peer);
        }
    }

    /// Cache `value` and deliver it to every listener in connection order
    pub fn send(&self, value: PortValue, context: Option<&Value>) {
        if !self.is_enabled() {
            return;
        }
        if value.port_type() != self.port_type() {
            tracing::warn!(
                port = %self.name(),
                expected = %self.port_type(),
                got = %value.port_type(),
                "Dropping value of the wrong type"
            );
            return;
        }

        *self.0.cache.borrow_mut() = Some(value.clone());
        for peer in self.peers() {
            peer.deliver(&value, self.name(), context);
        }
    }

    /// Deliver a value to this port's owner as if no named sender sent it
    pub fn receive(&self, value: &PortValue, context: Option<&Value>) {
        self.deliver(value, "", context);
    }

    /// Deliver a value to this port's owner, naming the sender
    pub fn receive_from(&self, value: &PortValue, sender: &str, context: Option<&Value>) {
        self.deliver(value, sender, context);
    }

    fn deliver(&self, value: &PortValue, sender: &str, context: Option<&Value>) {
        if !self.is_enabled() {
            return;
        }

        // Taken out for the duration of the call so the callback may touch
        // this port again without a RefCell conflict.
        let taken = self.0.receiver.borrow_mut().take();
        let Some(mut receiver) = taken else {
            if self.0.delivering.get() {
                tracing::warn!(port = %self.name(), "Re-entrant delivery, value dropped");
            } else if self.0.direction == PortDirection::Input {
                tracing::trace!(port = %self.name(), "No receiver, value dropped");
            }
            return;
        };

        self.0.delivering.set(true);
        receiver.invoke(value, sender, context);
        self.0.delivering.set(false);

        let mut slot = self.0.receiver.borrow_mut();
        if slot.is_none() {
            *slot = Some(receiver);
        }
    }
}

fn orient<'a>(a: &'a Port, b: &'a Port) -> Option<(&'a Port, &'a Port)> {
    match (a.direction(), b.direction()) {
        (PortDirection::Output, PortDirection::Input) => Some((a, b)),
        (PortDirection::Input, PortDirection::Output) => Some((b, a)),
        _ => None,
    }
}

fn remove_peer(from: &Port, peer: &Port) -> bool {
    let mut peers = from.0.peers.borrow_mut();
    let before = peers.len();
    peers.retain(|p| !std::ptr::eq(p.as_ptr(), Rc::as_ptr(&peer.0)));
    peers.len() != before
}

fn fire_hook(slot: &RefCell<Option<Hook>>) {
    let taken = slot.borrow_mut().take();
    if let Some(mut hook) = taken {
        hook();
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(hook);
        }
    }
}

impl PartialEq for Port {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Port {}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("runtime_id", &self.0.runtime_id)
            .field("name", &self.0.name)
            .field("type", &self.0.port_type)
            .field("direction", &self.0.direction)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn recording_input(ids: &IdGenerator, port_type: PortType) -> (Port, Rc<RefCell<Vec<f64>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let port = Port::input(ids, "in", port_type).with_receiver(Receiver::value(move |v| {
            if let Some(n) = v.as_number() {
                sink.borrow_mut().push(n);
            }
        }));
        (port, seen)
    }

    #[test]
    fn test_send_reaches_listeners_in_order() {
        let ids = IdGenerator::new();
        let out = Port::output(&ids, "out", PortType::Number);
        let order = Rc::new(RefCell::new(Vec::new()));
        let (a_order, b_order) = (order.clone(), order.clone());
        let a = Port::input(&ids, "a", PortType::Number)
            .with_receiver(Receiver::value(move |_| a_order.borrow_mut().push("a")));
        let b = Port::input(&ids, "b", PortType::Number)
            .with_receiver(Receiver::value(move |_| b_order.borrow_mut().push("b")));

        assert!(out.connect(&a));
        assert!(out.connect(&b));
        out.send(PortValue::Number(1.0), None);

        assert_eq!(*order.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn test_cache_on_connect() {
        let ids = IdGenerator::new();
        let out = Port::output(&ids, "out", PortType::Number);
        let (input, seen) = recording_input(&ids, PortType::Number);

        out.send(PortValue::Number(4.0), None);
        assert!(seen.borrow().is_empty());

        assert!(out.connect(&input));
        assert_eq!(*seen.borrow(), vec![4.0]);
    }

    #[test]
    fn test_type_mismatch_leaves_ports_untouched() {
        let ids = IdGenerator::new();
        let out = Port::output(&ids, "out", PortType::Number);
        let input = Port::input(&ids, "in", PortType::Text);

        assert!(!out.connect(&input));
        assert_eq!(out.listener_count(), 0);
        assert_eq!(input.listener_count(), 0);
    }

    #[test]
    fn test_generic_ports_never_connect() {
        let ids = IdGenerator::new();
        let out = Port::output(&ids, "out", PortType::Generic);
        let input = Port::input(&ids, "in", PortType::Generic);
        assert!(!out.connect(&input));
    }

    #[test]
    fn test_same_direction_rejected() {
        let ids = IdGenerator::new();
        let a = Port::output(&ids, "a", PortType::Number);
        let b = Port::output(&ids, "b", PortType::Number);
        assert!(!a.connect(&b));
    }

    #[test]
    fn test_reverse_argument_order() {
        let ids = IdGenerator::new();
        let out = Port::output(&ids, "out", PortType::Number);
        let (input, seen) = recording_input(&ids, PortType::Number);
        assert!(input.connect(&out));
        out.send(PortValue::Number(2.0), None);
        assert_eq!(*seen.borrow(), vec![2.0]);
    }

    #[test]
    fn test_duplicate_connect_returns_false() {
        let ids = IdGenerator::new();
        let out = Port::output(&ids, "out", PortType::Number);
        let (input, _) = recording_input(&ids, PortType::Number);
        assert!(out.connect(&input));
        assert!(!out.connect(&input));
        assert_eq!(out.listener_count(), 1);
    }

    #[test]
    fn test_connect_and_disconnect_callbacks() {
        let ids = IdGenerator::new();
        let connects = Rc::new(Cell::new(0));
        let disconnects = Rc::new(Cell::new(0));
        let (c, d) = (connects.clone(), disconnects.clone());
        let out = Port::output(&ids, "out", PortType::Number)
            .with_connect_callback(move || c.set(c.get() + 1))
            .with_disconnect_callback(move || d.set(d.get() + 1));
        let (a, _) = recording_input(&ids, PortType::Number);
        let (b, _) = recording_input(&ids, PortType::Number);

        out.connect(&a);
        out.connect(&b);
        assert_eq!(connects.get(), 1);

        out.disconnect(&a);
        assert_eq!(disconnects.get(), 0);
        out.disconnect(&b);
        assert_eq!(disconnects.get(), 1);

        out.connect(&a);
        assert_eq!(connects.get(), 2);
    }

    #[test]
    fn test_disconnect_is_symmetric() {
        let ids = IdGenerator::new();
        let out = Port::output(&ids, "out", PortType::Number);
        let (input, seen) = recording_input(&ids, PortType::Number);
        out.connect(&input);
        assert!(input.disconnect(&out));
        assert!(!out.disconnect(&input));
        out.send(PortValue::Number(1.0), None);
        assert!(seen.borrow().is_empty());
        assert_eq!(input.listener_count(), 0);
    }

    #[test]
    fn test_calling_conventions() {
        let ids = IdGenerator::new();
        let out = Port::output(&ids, "source", PortType::Text);
        let got = Rc::new(RefCell::new(None));
        let sink = got.clone();
        let input = Port::input(&ids, "in", PortType::Text).with_receiver(
            Receiver::with_sender_and_context(move |v, sender, ctx| {
                *sink.borrow_mut() = Some((
                    v.as_text().unwrap_or_default().to_string(),
                    sender.to_string(),
                    ctx.cloned(),
                ));
            }),
        );
        out.connect(&input);
        let context = serde_json::json!({"cue": 3});
        out.send(PortValue::Text("go".into()), Some(&context));

        let (text, sender, ctx) = got.borrow().clone().unwrap();
        assert_eq!(text, "go");
        assert_eq!(sender, "source");
        assert_eq!(ctx, Some(context));
    }

    #[test]
    fn test_disabled_port_drops_values() {
        let ids = IdGenerator::new();
        let out = Port::output(&ids, "out", PortType::Number);
        let (input, seen) = recording_input(&ids, PortType::Number);
        out.connect(&input);
        input.set_enabled(false);
        out.send(PortValue::Number(1.0), None);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_wrong_value_type_not_sent() {
        let ids = IdGenerator::new();
        let out = Port::output(&ids, "out", PortType::Number);
        out.send(PortValue::Bool(true), None);
        assert!(out.cached().is_none());
    }

    #[test]
    fn test_dropped_peer_is_pruned() {
        let ids = IdGenerator::new();
        let out = Port::output(&ids, "out", PortType::Number);
        {
            let (input, _) = recording_input(&ids, PortType::Number);
            out.connect(&input);
            assert_eq!(out.listener_count(), 1);
        }
        assert_eq!(out.listener_count(), 0);
    }

    #[test]
    fn test_dropped_listener_fires_disconnect_once() {
        let ids = IdGenerator::new();
        let disconnects = Rc::new(Cell::new(0));
        let d = disconnects.clone();
        let out = Port::output(&ids, "out", PortType::Number)
            .with_disconnect_callback(move || d.set(d.get() + 1));
        {
            let (input, _) = recording_input(&ids, PortType::Number);
            out.connect(&input);
        }
        assert_eq!(out.listener_count(), 0);
        assert_eq!(out.listener_count(), 0);
        assert_eq!(disconnects.get(), 1);

        let (kept, _) = recording_input(&ids, PortType::Number);
        out.connect(&kept);
        {
            let (dropped, _) = recording_input(&ids, PortType::Number);
            out.connect(&dropped);
        }
        assert!(out.disconnect(&kept));
        assert_eq!(disconnects.get(), 2);
    }

    #[test]
    fn test_reentrant_delivery_is_dropped() {
        let ids = IdGenerator::new();
        let out = Port::output(&ids, "out", PortType::Number);
        let calls = Rc::new(Cell::new(0));
        let (count, weak) = (calls.clone(), out.downgrade());
        let input = Port::input(&ids, "in", PortType::Number).with_receiver(Receiver::value(move |v| {
            count.set(count.get() + 1);
            if let (Some(out), Some(n)) = (weak.upgrade(), v.as_number()) {
                out.send(PortValue::Number(n + 1.0), None);
            }
        }));
        out.connect(&input);

        out.send(PortValue::Number(1.0), None);
        assert_eq!(calls.get(), 1);
        assert_eq!(out.cached().and_then(|v| v.as_number()), Some(2.0));

        out.send(PortValue::Number(5.0), None);
        assert_eq!(calls.get(), 2);
    }
}
