// SPDX-License-Identifier: MIT OR Apache-2.0
//! Drives a middleware through a full client session.

use parking_lot::Mutex;
use serde_json::{json, Value};
use stagewire_graph::{GraphContext, IdGenerator, Node, NodeBase, Port, PortType, PortValue, Receiver, Registry};
use stagewire_protocol::{
    ConnectionRouter, ConnectionStatus, Envelope, MessageReceiver, MessageSender, Method, Middleware,
    TransportError,
};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Default)]
struct Client {
    inbox: Mutex<Vec<Envelope>>,
}

impl Client {
    fn take(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.inbox.lock())
    }
}

impl MessageSender for Client {
    fn send_message(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.inbox.lock().push(envelope.clone());
        Ok(())
    }

    fn host_address(&self) -> String {
        "127.0.0.1:0".to_string()
    }

    fn is_server(&self) -> bool {
        false
    }

    fn current_status(&self) -> ConnectionStatus {
        ConnectionStatus::Connected
    }
}

/// Source with one output and a gain param
struct Source {
    base: NodeBase,
    gain: Rc<Cell<f64>>,
}

impl Node for Source {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn to_params(&self) -> Value {
        json!({ "gain": self.gain.get() })
    }

    fn from_params(&mut self, params: &Value) {
        if let Some(gain) = params.get("gain").and_then(Value::as_f64) {
            self.gain.set(gain);
        }
    }
}

/// Pass-through with one input and one output
struct Relay {
    base: NodeBase,
}

impl Node for Relay {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.add("Test", "X", |ctx| {
        let mut base = NodeBase::new(ctx.ids(), "X");
        base.add_port(Port::output(ctx.ids(), "out", PortType::Number));
        Box::new(Source {
            base,
            gain: Rc::new(Cell::new(0.25)),
        })
    });
    registry.add("Test", "Y", |ctx| {
        let mut base = NodeBase::new(ctx.ids(), "Y");
        let output = Port::output(ctx.ids(), "out", PortType::Number);
        let target = output.downgrade();
        base.add_port(Port::input(ctx.ids(), "in", PortType::Number).with_receiver(
            Receiver::with_context(move |value, context| {
                if let Some(output) = target.upgrade() {
                    output.send(value.clone(), context);
                }
            }),
        ));
        base.add_port(output);
        Box::new(Relay { base })
    });
    registry
}

fn request(middleware: &mut Middleware, identity: &str, type_name: &str, method: &str, data: Value) {
    let message = json!({
        "uid": format!("{identity}-{method}"),
        "type": type_name,
        "method": method,
        "timestamp": 1,
        "data": data,
    });
    middleware.on_text(&message.to_string(), identity);
}

fn reply_to(messages: &[Envelope], uid: &str) -> Envelope {
    messages
        .iter()
        .find(|e| e.uid == uid)
        .cloned()
        .unwrap_or_else(|| panic!("no reply to {uid}"))
}

#[test]
fn test_client_session() {
    let ctx = GraphContext::new(IdGenerator::sequential("e2e"), registry());
    let router = ConnectionRouter::new();
    let first = Arc::new(Client::default());
    let second = Arc::new(Client::default());
    router.register("sender1", first.clone());
    router.register("sender2", second.clone());

    let mut middleware = Middleware::new(&ctx, router);
    middleware.on_connect("sender1");
    middleware.on_connect("sender2");
    let root = middleware.root().uid().to_string();

    // Create A and B
    request(&mut middleware, "sender1", "procnode", "create", json!({ "uid": root, "type": "X" }));
    let uid_a = reply_to(&first.take(), "sender1-create").data["uid"].as_str().unwrap().to_string();
    request(&mut middleware, "sender1", "procnode", "create", json!({ "uid": root, "type": "Y" }));
    let uid_b = reply_to(&first.take(), "sender1-create").data["uid"].as_str().unwrap().to_string();
    assert_ne!(uid_a, uid_b);

    // Both creates were broadcast to the other client
    let seen: Vec<_> = second.take().into_iter().filter(|e| e.method == Method::Create).collect();
    assert_eq!(seen.len(), 2);

    // Connect A.out -> B.in
    request(
        &mut middleware,
        "sender1",
        "procnode",
        "connect",
        json!({ "fromUID": uid_a, "fromPort": "out", "toUID": uid_b, "toPort": "in" }),
    );
    assert_eq!(reply_to(&first.take(), "sender1-connect").data["success"], true);
    assert_eq!(middleware.root().edge_count(), 1);
    assert_eq!(second.take().len(), 1);

    // Params of A
    request(&mut middleware, "sender1", "procnode", "request", json!({ "uid": uid_a }));
    let params = reply_to(&first.take(), "sender1-request").data["params"].clone();
    let expected = middleware.root().get_node_by_uid(&uid_a).unwrap().to_params();
    assert_eq!(params, expected);

    // Subscribe sender1 to B.out
    request(&mut middleware, "sender1", "procnode", "subscribe", json!({ "uid": uid_b, "portName": "out" }));
    assert_eq!(reply_to(&first.take(), "sender1-subscribe").data["success"], true);
    assert!(second.take().is_empty());

    // A value through A reaches sender1 exactly once, and only sender1
    let a_out = middleware
        .root()
        .get_node_by_uid(&uid_a)
        .unwrap()
        .output_by_name("out")
        .unwrap();
    a_out.send(PortValue::Number(0.75), None);

    let pushes = first.take();
    assert_eq!(pushes.len(), 1);
    let push = &pushes[0];
    assert_eq!(push.method, Method::Subscribe);
    assert_eq!(push.data["uid"], uid_b.as_str());
    assert_eq!(push.data["portName"], "out");
    assert_eq!(push.data["type"], "number");
    assert_eq!(push.data["value"], 0.75);
    assert!(second.take().is_empty());

    // Deleting B drops its edge and the subscription
    request(&mut middleware, "sender2", "procnode", "delete", json!({ "uid": uid_b }));
    assert_eq!(reply_to(&second.take(), "sender2-delete").data["success"], true);
    assert_eq!(middleware.root().edge_count(), 0);
    assert_eq!(middleware.subscription_count(), 0);
    first.take();

    a_out.send(PortValue::Number(1.0), None);
    assert!(first.take().is_empty());
}

#[test]
fn test_nested_container_session() {
    let ctx = GraphContext::new(IdGenerator::sequential("nest"), {
        let mut registry = registry();
        stagewire_graph::register_builtin_nodes(&mut registry);
        registry
    });
    let router = ConnectionRouter::new();
    let client = Arc::new(Client::default());
    router.register("c", client.clone());
    let mut middleware = Middleware::new(&ctx, router);
    let root = middleware.root().uid().to_string();

    let create = |middleware: &mut Middleware, container: &str, type_name: &str| {
        request(middleware, "c", "procnode", "create", json!({ "uid": container, "type": type_name }));
        reply_to(&client.take(), "c-create").data["uid"].as_str().unwrap().to_string()
    };

    let group = create(&mut middleware, &root, "container");
    let linker = create(&mut middleware, &group, "linker");
    let inner = create(&mut middleware, &group, "Y");
    let source = create(&mut middleware, &root, "X");

    let connect = |middleware: &mut Middleware, from: (&str, &str), to: (&str, &str)| {
        request(
            middleware,
            "c",
            "procnode",
            "connect",
            json!({ "fromUID": from.0, "fromPort": from.1, "toUID": to.0, "toPort": to.1 }),
        );
        reply_to(&client.take(), "c-connect").data["success"] == true
    };

    assert!(connect(&mut middleware, (&source, "out"), (&group, "in")));
    assert!(connect(&mut middleware, (&linker, "in"), (&inner, "in")));

    let document = middleware.root().to_document();
    assert_eq!(document["edges"].as_array().unwrap().len(), 1);
    let nested = &document["containers"][0];
    assert_eq!(nested["edges"][0]["from"], format!("{linker}.in"));
    assert_eq!(nested["edges"][0]["to"], format!("{inner}.in"));
}
