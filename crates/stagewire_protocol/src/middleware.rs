// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request dispatch between remote clients and the graph.
//!
//! The [`Middleware`] owns the root container and answers every envelope
//! with at most one reply to the requesting identity. Successful mutations
//! (create, delete, connect, update) are additionally broadcast to every
//! registered identity. Subscriptions are the only per-recipient traffic.

use crate::envelope::{Envelope, EnvelopeError, MessageType, Method};
use crate::room::{EmptyRoom, RoomRegistry};
use crate::router::ConnectionRouter;
use crate::transport::{ConnectionStatus, MessageReceiver};
use crate::upload::{store_upload, UploadError};
use indexmap::IndexMap;
use serde_json::{json, Value};
use stagewire_graph::{Container, GraphContext, IdGenerator, Node, Port, PortType, PortValue, Receiver};
use std::path::{Path, PathBuf};

/// A remote identity observing one output port
struct Subscription {
    identity: String,
    node_uid: String,
    port_name: String,
    source: Port,
    adapter: Port,
}

/// Protocol endpoint for one graph
pub struct Middleware {
    root: Container,
    ctx: GraphContext,
    router: ConnectionRouter,
    room: Box<dyn RoomRegistry>,
    subscriptions: Vec<Subscription>,
    /// Instances built for the type schema, handed out by later creates
    pool: IndexMap<String, Vec<Box<dyn Node>>>,
    node_types: Option<Value>,
    upload_root: PathBuf,
    app_name: String,
}

impl Middleware {
    /// Create a middleware with an empty root container
    pub fn new(ctx: &GraphContext, router: ConnectionRouter) -> Self {
        Self {
            root: Container::with_title(ctx, "root"),
            ctx: ctx.clone(),
            router,
            room: Box::new(EmptyRoom),
            subscriptions: Vec::new(),
            pool: IndexMap::new(),
            node_types: None,
            upload_root: PathBuf::from("."),
            app_name: "stagewire".to_string(),
        }
    }

    /// Use a room registry for room RPCs and descriptions
    pub fn with_room(mut self, room: impl RoomRegistry + 'static) -> Self {
        self.room = Box::new(room);
        self
    }

    /// Directory uploads are stored under
    pub fn with_upload_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.upload_root = path.into();
        self
    }

    /// Name reported by `app/request`
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// The graph
    pub fn root(&self) -> &Container {
        &self.root
    }

    /// The graph, mutably
    pub fn root_mut(&mut self) -> &mut Container {
        &mut self.root
    }

    /// Outbound routing
    pub fn router(&self) -> &ConnectionRouter {
        &self.router
    }

    /// Where uploads are stored
    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Handle raw text from `identity`, replying with an error if it does
    /// not decode
    pub fn on_text(&mut self, text: &str, identity: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                let error = EnvelopeError::InvalidJson(e.to_string());
                self.reject("", MessageType::Unknown, &error, identity);
                return;
            }
        };

        match Envelope::parse(&value) {
            Ok(envelope) => self.on_message(envelope, identity),
            Err(error) => {
                let uid = value.get("uid").and_then(Value::as_str).unwrap_or_default();
                let message_type = value
                    .get("type")
                    .and_then(Value::as_str)
                    .map_or(MessageType::Unknown, MessageType::from_wire);
                self.reject(uid, message_type, &error, identity);
            }
        }
    }

    fn reject(&self, uid: &str, message_type: MessageType, error: &EnvelopeError, identity: &str) {
        tracing::warn!(%identity, code = error.code(), "Rejected message: {error}");
        self.router
            .send_to(identity, &Envelope::error_reply(uid, message_type, error));
    }

    fn dispatch(&mut self, envelope: &Envelope, identity: &str) -> Option<Envelope> {
        use MessageType as T;
        use Method as M;

        let reply = match (envelope.message_type, envelope.method) {
            (_, M::Error) => {
                tracing::error!(%identity, data = %envelope.data, "Peer reported an error");
                return None;
            }
            (_, M::Warning) => {
                tracing::warn!(%identity, data = %envelope.data, "Peer reported a warning");
                return None;
            }
            (T::ProcNode, M::Create) => self.create_node(envelope),
            (T::ProcNode, M::Delete) => self.delete_node(envelope),
            (T::ProcNode, M::Connect) => self.connect(envelope),
            (T::ProcNode, M::Disconnect) => failure(
                envelope,
                "notImplemented",
                "procnode/disconnect is not implemented",
            ),
            (T::ProcNode, M::Request) => self.request_params(envelope),
            (T::ProcNode, M::Update) => self.update_node(envelope),
            (T::ProcNode, M::Subscribe) => self.subscribe(envelope, identity),
            (T::ProcNode, M::Unsubscribe) => self.unsubscribe(envelope, identity),
            (T::ProcNode | T::RoomNode, M::RemoteProcedureCall) => self.call_rpc(envelope),
            (T::RoomNode, M::Request) => envelope.reply(M::Request, self.room.describe()),
            (T::Asset, M::Upload) => self.upload(envelope),
            (T::Description, M::Request) => self.describe(envelope, identity),
            (T::App, M::Request) => envelope.reply(M::Request, self.app_info(identity)),
            (T::Interaction, M::Update) => self.inject(envelope),
            (message_type, method) => {
                tracing::warn!(%identity, %message_type, %method, "Unsupported request");
                envelope.reply(
                    M::Warning,
                    json!({ "message": format!("unsupported request {message_type}/{method}") }),
                )
            }
        };
        Some(reply)
    }

    fn notify(&self, method: Method, data: Value) {
        let sent = self
            .router
            .broadcast(&Envelope::new(MessageType::ProcNode, method, data));
        tracing::debug!(%method, sent, "Broadcast graph change");
    }

    fn create_node(&mut self, envelope: &Envelope) -> Envelope {
        let container_uid = envelope.subject_uid().unwrap_or_default();
        let Some(type_name) = envelope.data_str("type") else {
            return failure(envelope, "missingField", "type is required");
        };
        if self.root.get_container_mut(container_uid).is_none() {
            return failure(envelope, "notFound", format!("no container `{container_uid}`"));
        }

        let pooled = self.pool.get_mut(type_name).and_then(Vec::pop);
        let Some(mut node) = pooled.or_else(|| self.ctx.create_node(type_name)) else {
            return failure(envelope, "unknownType", format!("unknown node type `{type_name}`"));
        };
        if let Some(title) = envelope.data_str("title") {
            node.base_mut().title = title.to_string();
        }
        if let Some(position) = read_position(&envelope.data) {
            node.base_mut().position = position;
        }

        let uid = node.uid().to_string();
        let description = node.describe();
        if let Some(container) = self.root.get_container_mut(container_uid) {
            container.add_node(node);
        }

        tracing::info!(%uid, kind = %type_name, container = %container_uid, "Created node");
        self.notify(
            Method::Create,
            json!({ "uid": uid, "container": container_uid, "node": description }),
        );
        envelope.reply(Method::Create, json!({ "uid": uid }))
    }

    fn delete_node(&mut self, envelope: &Envelope) -> Envelope {
        let uid = envelope.subject_uid().unwrap_or_default();
        if uid == self.root.uid() {
            return failure(envelope, "invalid", "the root container cannot be deleted");
        }

        let success = self.root.delete_node(uid);
        if success {
            self.prune_subscriptions();
            self.notify(Method::Delete, json!({ "uid": uid }));
        }
        envelope.reply(Method::Delete, json!({ "uid": uid, "success": success }))
    }

    fn connect(&mut self, envelope: &Envelope) -> Envelope {
        let fields = (
            envelope.data_str("fromUID"),
            envelope.data_str("fromPort"),
            envelope.data_str("toUID"),
            envelope.data_str("toPort"),
        );
        let (Some(from_uid), Some(from_port), Some(to_uid), Some(to_port)) = fields else {
            return failure(envelope, "missingField", "fromUID, fromPort, toUID and toPort are required");
        };

        // The edge belongs to the container holding the source node.
        let owner = self
            .root
            .parent_uid_of(from_uid)
            .unwrap_or_else(|| self.root.uid().to_string());
        let success = self
            .root
            .get_container_mut(&owner)
            .is_some_and(|c| c.connect_by_uid(from_uid, from_port, to_uid, to_port));

        if success {
            self.notify(
                Method::Connect,
                json!({
                    "fromUID": from_uid,
                    "fromPort": from_port,
                    "toUID": to_uid,
                    "toPort": to_port,
                }),
            );
        }
        envelope.reply(Method::Connect, json!({ "success": success }))
    }

    fn request_params(&self, envelope: &Envelope) -> Envelope {
        let Some(uid) = envelope.subject_uid() else {
            return failure(envelope, "missingSubject", "data.uid is required");
        };
        match lookup(&self.root, uid) {
            Some(node) => envelope.reply(Method::Request, json!({ "uid": uid, "params": node.to_params() })),
            None => failure(envelope, "notFound", format!("no node `{uid}`")),
        }
    }

    fn update_node(&mut self, envelope: &Envelope) -> Envelope {
        let uid = envelope.subject_uid().unwrap_or_default();
        let params = envelope.data.get("params");
        if lookup(&self.root, uid).is_none() {
            return failure(envelope, "notFound", format!("no node `{uid}`"));
        }
        // Nested containers reload through their parent so its edges into them survive
        let reloaded = params.and_then(|p| self.root.reload_container(uid, p));
        if let Some(Err(e)) = &reloaded {
            tracing::error!(%uid, "Failed to reload container: {e}");
        }

        let description = {
            let Some(node) = lookup_mut(&mut self.root, uid) else {
                return failure(envelope, "notFound", format!("no node `{uid}`"));
            };
            if let (Some(params), None) = (params, &reloaded) {
                node.from_params(params);
            }
            if let Some(title) = envelope.data_str("title") {
                node.base_mut().title = title.to_string();
            }
            if let Some(position) = read_position(&envelope.data) {
                node.base_mut().position = position;
            }
            node.describe()
        };

        // Params may rebuild ports (containers reload, linkers rebind).
        self.prune_subscriptions();
        self.notify(Method::Update, json!({ "uid": uid, "node": description }));
        envelope.reply(Method::Update, json!({ "uid": uid, "success": true }))
    }

    fn subscribe(&mut self, envelope: &Envelope, identity: &str) -> Envelope {
        let uid = envelope.subject_uid().unwrap_or_default();
        let Some(port_name) = envelope.data_str("portName") else {
            return failure(envelope, "missingField", "portName is required");
        };
        let Some(source) = lookup(&self.root, uid).and_then(|n| n.output_by_name(port_name)) else {
            return failure(envelope, "notFound", format!("no output `{port_name}` on `{uid}`"));
        };

        let exists = self
            .subscriptions
            .iter()
            .any(|s| s.identity == identity && s.source == source);
        if !exists {
            let adapter = subscription_adapter(
                self.ctx.ids(),
                &self.router,
                identity,
                uid,
                port_name,
                source.port_type(),
            );
            if !source.connect(&adapter) {
                return failure(envelope, "invalid", format!("`{port_name}` cannot be observed yet"));
            }
            tracing::debug!(%identity, %uid, port = %port_name, "Subscribed");
            self.subscriptions.push(Subscription {
                identity: identity.to_string(),
                node_uid: uid.to_string(),
                port_name: port_name.to_string(),
                source,
                adapter,
            });
        }
        envelope.reply(
            Method::Subscribe,
            json!({ "uid": uid, "portName": port_name, "success": true }),
        )
    }

    fn unsubscribe(&mut self, envelope: &Envelope, identity: &str) -> Envelope {
        let uid = envelope.subject_uid().unwrap_or_default();
        let Some(port_name) = envelope.data_str("portName") else {
            return failure(envelope, "missingField", "portName is required");
        };

        let position = self
            .subscriptions
            .iter()
            .position(|s| s.identity == identity && s.node_uid == uid && s.port_name == port_name);
        let success = match position {
            Some(index) => {
                let subscription = self.subscriptions.remove(index);
                subscription.source.disconnect(&subscription.adapter);
                true
            }
            None => false,
        };
        envelope.reply(
            Method::Unsubscribe,
            json!({ "uid": uid, "portName": port_name, "success": success }),
        )
    }

    /// Drop subscriptions whose port is no longer in the graph
    fn prune_subscriptions(&mut self) {
        let root = &self.root;
        self.subscriptions.retain(|s| {
            let alive = root.get_port_by_runtime_id(s.source.runtime_id()).is_some();
            if !alive {
                s.source.disconnect(&s.adapter);
                tracing::debug!(identity = %s.identity, uid = %s.node_uid, "Subscription dropped");
            }
            alive
        });
    }

    fn call_rpc(&mut self, envelope: &Envelope) -> Envelope {
        let uid = envelope.subject_uid().unwrap_or_default();
        let Some(name) = envelope.data_str("name") else {
            return failure(envelope, "missingField", "name is required");
        };

        let (success, reason) = match lookup_mut(&mut self.root, uid) {
            Some(node) if node.rpc_names().iter().any(|n| n == name) => (node.call(name), None),
            Some(_) => (false, Some(format!("unknown rpc `{name}`"))),
            None => match self.room.call_rpc(uid, name) {
                Some(success) => (success, None),
                None => (false, Some(format!("unknown node `{uid}`"))),
            },
        };

        tracing::debug!(%uid, rpc = %name, success, "RPC");
        let mut data = json!({ "uid": uid, "name": name, "success": success });
        if let Some(reason) = reason {
            data["reason"] = json!(reason);
        }
        envelope.reply(Method::RemoteProcedureCall, data)
    }

    fn upload(&self, envelope: &Envelope) -> Envelope {
        let stored = match (envelope.data_str("fileName"), envelope.data_str("content")) {
            (Some(file_name), Some(content)) => store_upload(&self.upload_root, file_name, content),
            (None, _) => Err(UploadError::MissingField("fileName")),
            (_, None) => Err(UploadError::MissingField("content")),
        };
        match stored {
            Ok(path) => envelope.reply(
                Method::Upload,
                json!({
                    "uid": envelope.subject_uid(),
                    "fileName": envelope.data_str("fileName"),
                    "path": path.display().to_string(),
                    "success": true,
                }),
            ),
            Err(e) => {
                tracing::warn!("Upload failed: {e}");
                failure(envelope, e.code(), e.to_string())
            }
        }
    }

    fn describe(&mut self, envelope: &Envelope, identity: &str) -> Envelope {
        let scope = envelope.data_str("scope").unwrap_or("full");
        let data = match scope {
            "full" => json!({
                "scope": scope,
                "app": self.app_info(identity),
                "room": self.room.describe(),
                "proc": self.root.describe(),
                "procNodeTypes": self.node_types(),
            }),
            "room" => json!({ "scope": scope, "room": self.room.describe() }),
            "proc" => json!({ "scope": scope, "proc": self.root.describe() }),
            "procNodeTypes" => json!({ "scope": scope, "procNodeTypes": self.node_types() }),
            other => {
                return envelope.reply(
                    Method::Warning,
                    json!({ "message": format!("unknown description scope `{other}`") }),
                );
            }
        };
        envelope.reply(Method::Request, data)
    }

    /// Schema of every registered type, built once from throwaway instances
    /// that are then pooled for later creates
    fn node_types(&mut self) -> Value {
        if let Some(types) = &self.node_types {
            return types.clone();
        }

        let registrations: Vec<(String, String)> = self
            .ctx
            .registry()
            .groups()
            .flat_map(|(group, names)| names.iter().map(move |name| (group.to_string(), name.clone())))
            .collect();

        let mut types = Vec::with_capacity(registrations.len());
        for (group, name) in registrations {
            let Some(node) = self.ctx.create_node(&name) else {
                continue;
            };
            types.push(json!({ "name": name, "group": group, "schema": node.describe() }));
            self.pool.entry(name).or_default().push(node);
        }

        let types = Value::Array(types);
        self.node_types = Some(types.clone());
        types
    }

    fn app_info(&self, identity: &str) -> Value {
        let sender = self.router.get(identity);
        let status = sender
            .as_ref()
            .map_or(ConnectionStatus::Disconnected, |s| s.current_status());
        json!({
            "name": self.app_name,
            "version": env!("CARGO_PKG_VERSION"),
            "hostAddress": sender.as_ref().map(|s| s.host_address()),
            "isServer": sender.as_ref().is_some_and(|s| s.is_server()),
            "status": status.as_str(),
        })
    }

    fn inject(&mut self, envelope: &Envelope) -> Envelope {
        let uid = envelope.subject_uid().unwrap_or_default();
        let (Some(port_name), Some(raw)) = (envelope.data_str("portName"), envelope.data.get("value")) else {
            return failure(envelope, "missingField", "portName and value are required");
        };
        let Some(node) = lookup(&self.root, uid) else {
            return failure(envelope, "notFound", format!("no node `{uid}`"));
        };

        let success = if let Some(port) = node.input_by_name(port_name) {
            match PortValue::from_json(port.port_type(), raw) {
                Some(value) => {
                    port.receive(&value, None);
                    true
                }
                None => false,
            }
        } else if let Some(port) = node.output_by_name(port_name) {
            match PortValue::from_json(port.port_type(), raw) {
                Some(value) => {
                    port.send(value, None);
                    true
                }
                None => false,
            }
        } else {
            false
        };

        envelope.reply(
            Method::Update,
            json!({ "uid": uid, "portName": port_name, "success": success }),
        )
    }
}

impl MessageReceiver for Middleware {
    fn on_message(&mut self, envelope: Envelope, identity: &str) {
        if let Err(error) = envelope.validate() {
            self.reject(&envelope.uid, envelope.message_type, &error, identity);
            return;
        }

        tracing::debug!(
            %identity,
            message_type = %envelope.message_type,
            method = %envelope.method,
            "Dispatching"
        );
        if let Some(reply) = self.dispatch(&envelope, identity) {
            self.router.send_to(identity, &reply);
        }
    }

    fn on_connect(&mut self, identity: &str) {
        tracing::info!(%identity, "Client connected");
    }

    /// Drops the identity's subscriptions and its route
    fn on_disconnect(&mut self, identity: &str) {
        self.subscriptions.retain(|s| {
            let keep = s.identity != identity;
            if !keep {
                s.source.disconnect(&s.adapter);
            }
            keep
        });
        self.router.unregister(identity);
        tracing::info!(%identity, "Client disconnected");
    }
}

fn failure(envelope: &Envelope, code: &str, message: impl Into<String>) -> Envelope {
    envelope.reply(
        Method::Error,
        json!({ "code": code, "message": message.into(), "uid": envelope.subject_uid() }),
    )
}

fn read_position(data: &Value) -> Option<[f32; 2]> {
    serde_json::from_value(data.get("position")?.clone()).ok()
}

fn lookup<'a>(root: &'a Container, uid: &str) -> Option<&'a dyn Node> {
    if root.uid() == uid {
        return Some(root as &dyn Node);
    }
    root.get_node_by_uid(uid)
}

fn lookup_mut<'a>(root: &'a mut Container, uid: &str) -> Option<&'a mut dyn Node> {
    if root.uid() == uid {
        return Some(root as &mut dyn Node);
    }
    root.get_node_by_uid_mut(uid)
}

/// Input port forwarding every value it receives to one identity
fn subscription_adapter(
    ids: &IdGenerator,
    router: &ConnectionRouter,
    identity: &str,
    uid: &str,
    port_name: &str,
    port_type: PortType,
) -> Port {
    let router = router.clone();
    let identity = identity.to_string();
    let uid = uid.to_string();
    let port_name = port_name.to_string();

    Port::input(ids, format!("subscription:{identity}"), port_type).with_receiver(Receiver::value(
        move |value| {
            let push = Envelope::new(
                MessageType::ProcNode,
                Method::Subscribe,
                json!({
                    "uid": uid,
                    "portName": port_name,
                    "type": port_type,
                    "value": value.to_json(),
                }),
            );
            router.send_to(&identity, &push);
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MessageSender, TransportError};
    use parking_lot::Mutex;
    use stagewire_graph::{register_builtin_nodes, Registry};
    use std::sync::Arc;

    #[derive(Default)]
    struct Inbox {
        messages: Mutex<Vec<Envelope>>,
    }

    impl Inbox {
        fn take(&self) -> Vec<Envelope> {
            std::mem::take(&mut *self.messages.lock())
        }
    }

    impl MessageSender for Inbox {
        fn send_message(&self, envelope: &Envelope) -> Result<(), TransportError> {
            self.messages.lock().push(envelope.clone());
            Ok(())
        }

        fn host_address(&self) -> String {
            "inbox".to_string()
        }

        fn is_server(&self) -> bool {
            false
        }

        fn current_status(&self) -> ConnectionStatus {
            ConnectionStatus::Connected
        }
    }

    struct Lights {
        calls: Vec<String>,
    }

    impl RoomRegistry for Lights {
        fn call_rpc(&mut self, uid: &str, name: &str) -> Option<bool> {
            (uid == "lamp").then(|| {
                self.calls.push(name.to_string());
                true
            })
        }

        fn describe(&self) -> Value {
            json!({ "nodes": ["lamp"] })
        }
    }

    fn setup() -> (Middleware, Arc<Inbox>) {
        let mut registry = Registry::new();
        register_builtin_nodes(&mut registry);
        let ctx = GraphContext::new(IdGenerator::sequential("m"), registry);
        let router = ConnectionRouter::new();
        let inbox = Arc::new(Inbox::default());
        router.register("client", inbox.clone());
        let middleware = Middleware::new(&ctx, router).with_room(Lights { calls: Vec::new() });
        (middleware, inbox)
    }

    fn send(middleware: &mut Middleware, type_name: &str, method: &str, data: Value) {
        let text = json!({ "uid": "req", "type": type_name, "method": method, "timestamp": 0, "data": data });
        middleware.on_text(&text.to_string(), "client");
    }

    fn create(middleware: &mut Middleware, inbox: &Inbox, type_name: &str) -> String {
        let root = middleware.root().uid().to_string();
        send(middleware, "procnode", "create", json!({ "uid": root, "type": type_name }));
        let reply = inbox.take().into_iter().find(|e| e.uid == "req").unwrap();
        reply.data["uid"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_invalid_text_gets_error_reply() {
        let (mut middleware, inbox) = setup();
        middleware.on_text("{not json", "client");
        middleware.on_text(r#"{"uid":"a","type":"procnode","method":"create","data":{}}"#, "client");

        let replies = inbox.take();
        assert_eq!(replies[0].data["code"], "invalidJson");
        assert_eq!(replies[1].data["code"], "missingTimestamp");
        assert_eq!(replies[1].uid, "a");
        assert_eq!(replies[1].message_type, MessageType::ProcNode);
    }

    #[test]
    fn test_validation_errors() {
        let (mut middleware, inbox) = setup();
        send(&mut middleware, "nonsense", "request", json!({}));
        send(&mut middleware, "procnode", "nonsense", json!({}));
        send(&mut middleware, "procnode", "delete", json!({}));

        let codes: Vec<_> = inbox.take().iter().map(|e| e.data["code"].clone()).collect();
        assert_eq!(codes, vec![json!("unknownType"), json!("unknownMethod"), json!("missingSubject")]);
    }

    #[test]
    fn test_create_is_broadcast_and_replied() {
        let (mut middleware, inbox) = setup();
        let root = middleware.root().uid().to_string();
        send(&mut middleware, "procnode", "create", json!({ "uid": root, "type": "number", "title": "level" }));

        let messages = inbox.take();
        assert_eq!(messages.len(), 2);
        let notification = &messages[0];
        assert_eq!(notification.method, Method::Create);
        assert_eq!(notification.data["node"]["title"], "level");
        let reply = &messages[1];
        assert_eq!(reply.uid, "req");
        assert_eq!(reply.data["uid"], notification.data["uid"]);
        assert_eq!(middleware.root().child_count(), 1);
    }

    #[test]
    fn test_create_failures() {
        let (mut middleware, inbox) = setup();
        let root = middleware.root().uid().to_string();
        send(&mut middleware, "procnode", "create", json!({ "uid": root, "type": "nope" }));
        send(&mut middleware, "procnode", "create", json!({ "uid": "missing", "type": "number" }));

        let codes: Vec<_> = inbox.take().iter().map(|e| e.data["code"].clone()).collect();
        assert_eq!(codes, vec![json!("unknownType"), json!("notFound")]);
    }

    #[test]
    fn test_disconnect_is_not_implemented() {
        let (mut middleware, inbox) = setup();
        send(&mut middleware, "procnode", "disconnect", json!({}));
        let reply = &inbox.take()[0];
        assert_eq!(reply.method, Method::Error);
        assert_eq!(reply.data["code"], "notImplemented");
    }

    #[test]
    fn test_request_and_update_params() {
        let (mut middleware, inbox) = setup();
        let uid = create(&mut middleware, &inbox, "scale");

        send(&mut middleware, "procnode", "update", json!({ "uid": uid, "params": { "factor": 3.0 } }));
        send(&mut middleware, "procnode", "request", json!({ "uid": uid }));

        let messages = inbox.take();
        let reply = messages.iter().rev().find(|e| e.method == Method::Request).unwrap();
        assert_eq!(reply.data["params"]["factor"], 3.0);
        assert!(messages.iter().any(|e| e.method == Method::Update && e.data["node"]["uid"] == uid));
    }

    #[test]
    fn test_rpc_graph_then_room() {
        let (mut middleware, inbox) = setup();
        let toggle = create(&mut middleware, &inbox, "toggle");

        send(&mut middleware, "procnode", "remoteprocedurecall", json!({ "uid": toggle, "name": "toggle" }));
        send(&mut middleware, "procnode", "remoteprocedurecall", json!({ "uid": toggle, "name": "nope" }));
        send(&mut middleware, "roomnode", "remoteprocedurecall", json!({ "uid": "lamp", "name": "on" }));
        send(&mut middleware, "roomnode", "remoteprocedurecall", json!({ "uid": "ghost", "name": "on" }));

        let replies = inbox.take();
        assert_eq!(replies[0].data["success"], true);
        assert_eq!(replies[1].data["success"], false);
        assert_eq!(replies[1].data["reason"], "unknown rpc `nope`");
        assert_eq!(replies[2].data["success"], true);
        assert_eq!(replies[3].data["reason"], "unknown node `ghost`");
    }

    #[test]
    fn test_node_types_are_pooled() {
        let (mut middleware, inbox) = setup();
        send(&mut middleware, "description", "request", json!({ "scope": "procNodeTypes" }));
        let types = inbox.take()[0].data["procNodeTypes"].clone();
        let number = types
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["name"] == "number")
            .unwrap()
            .clone();

        let uid = create(&mut middleware, &inbox, "number");
        assert_eq!(number["schema"]["uid"], uid);

        send(&mut middleware, "description", "request", json!({ "scope": "procNodeTypes" }));
        assert_eq!(inbox.take()[0].data["procNodeTypes"], types);
    }

    #[test]
    fn test_description_scopes() {
        let (mut middleware, inbox) = setup();
        send(&mut middleware, "description", "request", json!({}));
        send(&mut middleware, "description", "request", json!({ "scope": "room" }));
        send(&mut middleware, "description", "request", json!({ "scope": "weird" }));
        send(&mut middleware, "app", "request", json!({}));

        let replies = inbox.take();
        assert_eq!(replies[0].data["scope"], "full");
        assert!(replies[0].data["proc"]["children"].is_array());
        assert_eq!(replies[1].data["room"]["nodes"][0], "lamp");
        assert_eq!(replies[2].method, Method::Warning);
        assert_eq!(replies[3].data["hostAddress"], "inbox");
        assert_eq!(replies[3].data["status"], "connected");
    }

    #[test]
    fn test_interaction_update_injects_value() {
        let (mut middleware, inbox) = setup();
        let uid = create(&mut middleware, &inbox, "number");
        send(&mut middleware, "interaction", "update", json!({ "uid": uid, "portName": "value", "value": 6.0 }));
        send(&mut middleware, "interaction", "update", json!({ "uid": uid, "portName": "value", "value": "six" }));

        let replies = inbox.take();
        assert_eq!(replies[0].data["success"], true);
        assert_eq!(replies[1].data["success"], false);
        let params = middleware.root().get_node_by_uid(&uid).unwrap().to_params();
        assert_eq!(params["value"], 6.0);
    }

    #[test]
    fn test_unsupported_combination_warns() {
        let (mut middleware, inbox) = setup();
        send(&mut middleware, "asset", "delete", json!({ "uid": "x" }));
        assert_eq!(inbox.take()[0].method, Method::Warning);

        send(&mut middleware, "procnode", "warning", json!({ "uid": "x" }));
        assert!(inbox.take().is_empty());
    }

    #[test]
    fn test_upload_writes_under_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let (middleware, inbox) = setup();
        let mut middleware = middleware.with_upload_root(dir.path());

        send(&mut middleware, "asset", "upload", json!({ "uid": "a", "fileName": "cue.txt", "content": "Z28=" }));
        send(&mut middleware, "asset", "upload", json!({ "uid": "a", "content": "Z28=" }));

        let replies = inbox.take();
        assert_eq!(replies[0].data["success"], true);
        assert_eq!(std::fs::read(dir.path().join("uploads/cue.txt")).unwrap(), b"go");
        assert_eq!(replies[1].data["code"], "missingField");
    }

    #[test]
    fn test_disconnect_drops_subscriptions() {
        let (mut middleware, inbox) = setup();
        let uid = create(&mut middleware, &inbox, "number");
        send(&mut middleware, "procnode", "subscribe", json!({ "uid": uid, "portName": "value" }));
        assert_eq!(middleware.subscription_count(), 1);

        middleware.on_disconnect("client");
        assert_eq!(middleware.subscription_count(), 0);
        assert!(middleware.router().is_empty());
    }

    #[test]
    fn test_unsubscribe_stops_pushes() {
        let (mut middleware, inbox) = setup();
        let uid = create(&mut middleware, &inbox, "number");
        send(&mut middleware, "procnode", "subscribe", json!({ "uid": uid, "portName": "value" }));
        inbox.take();

        send(&mut middleware, "procnode", "unsubscribe", json!({ "uid": uid, "portName": "value" }));
        let replies = inbox.take();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].method, Method::Unsubscribe);
        assert_eq!(replies[0].data["success"], true);
        assert_eq!(middleware.subscription_count(), 0);

        let source = middleware.root().get_node_by_uid(&uid).unwrap().output_by_name("value").unwrap();
        assert_eq!(source.listener_count(), 0);
        source.send(PortValue::Number(5.0), None);
        assert!(inbox.take().is_empty());

        send(&mut middleware, "procnode", "unsubscribe", json!({ "uid": uid, "portName": "value" }));
        assert_eq!(inbox.take()[0].data["success"], false);
    }

    #[test]
    fn test_updating_container_with_own_params_keeps_wiring() {
        let (mut middleware, inbox) = setup();
        let group = create(&mut middleware, &inbox, "container");
        send(&mut middleware, "procnode", "create", json!({ "uid": group, "type": "linker" }));
        let linker = inbox.take().into_iter().find(|e| e.uid == "req").unwrap().data["uid"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(!linker.is_empty());
        let number = create(&mut middleware, &inbox, "number");
        send(
            &mut middleware,
            "procnode",
            "connect",
            json!({ "fromUID": number, "fromPort": "value", "toUID": group, "toPort": "in" }),
        );
        send(&mut middleware, "procnode", "request", json!({ "uid": group }));
        let params = inbox.take().into_iter().find(|e| e.method == Method::Request).unwrap().data["params"].clone();
        let before = middleware.root().to_document();
        assert_eq!(before["edges"].as_array().unwrap().len(), 1);

        send(&mut middleware, "procnode", "update", json!({ "uid": group, "params": params }));
        let reply = inbox.take().into_iter().find(|e| e.uid == "req").unwrap();
        assert_eq!(reply.data["success"], true);
        assert_eq!(middleware.root().to_document(), before);
        assert_eq!(middleware.root().edge_count(), 1);

        let source = middleware.root().get_node_by_uid(&number).unwrap().output_by_name("value").unwrap();
        assert_eq!(source.listener_count(), 1);
    }
}
