// SPDX-License-Identifier: MIT OR Apache-2.0
//! Container boundary adapters with late type binding.
//!
//! A [`Linker`] lives inside a container and exposes one slot of that
//! container to the outside. It owns two ports with the same name:
//! - the *external* port, listed by the owning container as one of its own
//!   inputs (input orientation) or outputs (output orientation);
//! - the *internal* port, listed as the linker's own port and wired to nodes
//!   inside the container.
//!
//! Both start out `Generic`. The first connection on either side picks a
//! relay pair for the partner's type from the [`RelayTable`](crate::relay::RelayTable)
//! and both ports are replaced by that pair. After that the linker only
//! changes again if it is rebuilt through an orientation toggle, which is
//! refused once bound.

use crate::ids::IdGenerator;
use crate::node::{Node, NodeBase, NodeKind};
use crate::port::{Port, PortDirection};
use crate::registry::GraphContext;
use crate::value::PortType;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Which way values cross the container boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkerOrientation {
    /// Outside -> inside
    Input,
    /// Inside -> outside
    Output,
}

impl LinkerOrientation {
    /// The other orientation
    pub fn flipped(self) -> Self {
        match self {
            Self::Input => Self::Output,
            Self::Output => Self::Input,
        }
    }

    pub(crate) fn default_port_name(self) -> &'static str {
        match self {
            Self::Input => "in",
            Self::Output => "out",
        }
    }
}

/// Binding state of a linker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkerState {
    /// Type not yet inferred
    Unbound(LinkerOrientation),
    /// Bound to a concrete type
    Bound(PortType),
}

/// Container boundary adapter
pub struct Linker {
    base: NodeBase,
    ctx: GraphContext,
    orientation: LinkerOrientation,
    bound: Option<PortType>,
    port_name: String,
    external: Port,
    internal: Port,
}

impl Linker {
    /// Registry type name
    pub const TYPE_NAME: &'static str = "linker";

    /// RPC flipping the orientation of an unbound linker
    pub const TOGGLE_RPC: &'static str = "toggleOrientation";

    /// Create an unbound linker with the default port name for `orientation`
    pub fn new(ctx: &GraphContext, orientation: LinkerOrientation) -> Self {
        Self::with_name(ctx, orientation, orientation.default_port_name())
    }

    /// Create an unbound linker whose ports use `name`
    pub fn with_name(ctx: &GraphContext, orientation: LinkerOrientation, name: impl Into<String>) -> Self {
        let port_name = name.into();
        let (external, internal) = generic_ports(ctx.ids(), orientation, &port_name);
        let mut base = NodeBase::new(ctx.ids(), Self::TYPE_NAME);
        base.add_port(internal.clone());

        Self {
            base,
            ctx: ctx.clone(),
            orientation,
            bound: None,
            port_name,
            external,
            internal,
        }
    }

    /// Current orientation
    pub fn orientation(&self) -> LinkerOrientation {
        self.orientation
    }

    /// Binding state
    pub fn state(&self) -> LinkerState {
        match self.bound {
            Some(port_type) => LinkerState::Bound(port_type),
            None => LinkerState::Unbound(self.orientation),
        }
    }

    /// Bound type, if any
    pub fn bound_type(&self) -> Option<PortType> {
        self.bound
    }

    /// Whether the type has been inferred
    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    /// Name shared by both ports
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Port facing the outside of the container
    pub fn external_port(&self) -> &Port {
        &self.external
    }

    /// Port facing the inside of the container
    pub fn internal_port(&self) -> &Port {
        &self.internal
    }

    /// Whether `port` is one of this linker's two ports
    pub fn owns_port(&self, port: &Port) -> bool {
        &self.external == port || &self.internal == port
    }

    /// Change orientation. Refused once bound.
    pub fn set_orientation(&mut self, orientation: LinkerOrientation) -> bool {
        if self.is_bound() {
            tracing::warn!(uid = %self.base.uid(), "Cannot change orientation of a bound linker");
            return false;
        }
        if orientation != self.orientation {
            self.orientation = orientation;
            self.rebuild_generic();
        }
        true
    }

    /// Flip orientation. Refused once bound.
    pub fn toggle_orientation(&mut self) -> bool {
        self.set_orientation(self.orientation.flipped())
    }

    /// Rename both ports. Refused once bound.
    pub fn set_port_name(&mut self, name: impl Into<String>) -> bool {
        if self.is_bound() {
            return false;
        }
        self.port_name = name.into();
        self.rebuild_generic();
        true
    }

    /// Resolve the port a `source` output should connect into.
    ///
    /// Binds to the source's type if still unbound. Once bound, the existing
    /// port is returned unchanged; the caller's type check rejects mismatches.
    pub fn connect_from_port(&mut self, source: &Port) -> Option<Port> {
        if source.direction() != PortDirection::Output {
            return None;
        }
        if !self.is_bound() && !self.bind(source.port_type()) {
            return None;
        }
        Some(self.side(PortDirection::Input).clone())
    }

    /// Resolve the port that should feed a `target` input.
    ///
    /// Same binding rules as [`Linker::connect_from_port`].
    pub fn connect_to_port(&mut self, target: &Port) -> Option<Port> {
        if target.direction() != PortDirection::Input {
            return None;
        }
        if !self.is_bound() && !self.bind(target.port_type()) {
            return None;
        }
        Some(self.side(PortDirection::Output).clone())
    }

    /// Bind to `port_type`, replacing both ports with a relay pair.
    ///
    /// Returns whether the linker ends up bound to `port_type`.
    pub fn bind(&mut self, port_type: PortType) -> bool {
        if let Some(bound) = self.bound {
            return bound == port_type;
        }

        let Some(pair) = self
            .ctx
            .relays()
            .relay_pair(port_type, self.ctx.ids(), &self.port_name)
        else {
            tracing::debug!(%port_type, "No relay for type, linker stays unbound");
            return false;
        };

        let (external, internal) = match self.orientation {
            LinkerOrientation::Input => (pair.input, pair.output),
            LinkerOrientation::Output => (pair.output, pair.input),
        };
        self.install(external, internal);
        self.bound = Some(port_type);

        tracing::debug!(uid = %self.base.uid(), %port_type, "Linker bound");
        true
    }

    fn side(&self, direction: PortDirection) -> &Port {
        if self.external.direction() == direction {
            &self.external
        } else {
            &self.internal
        }
    }

    fn rebuild_generic(&mut self) {
        let (external, internal) = generic_ports(self.ctx.ids(), self.orientation, &self.port_name);
        self.install(external, internal);
    }

    fn install(&mut self, external: Port, internal: Port) {
        self.external.disconnect_all();
        self.internal.disconnect_all();

        // The internal port may change direction on an orientation toggle,
        // so it is removed and re-added rather than swapped in place.
        if !self.base.replace_port(&self.internal, internal.clone()) {
            self.base.remove_port(&self.internal);
            self.base.add_port(internal.clone());
        }
        self.external = external;
        self.internal = internal;
    }
}

fn generic_ports(ids: &IdGenerator, orientation: LinkerOrientation, name: &str) -> (Port, Port) {
    match orientation {
        LinkerOrientation::Input => (
            Port::input(ids, name, PortType::Generic),
            Port::output(ids, name, PortType::Generic),
        ),
        LinkerOrientation::Output => (
            Port::output(ids, name, PortType::Generic),
            Port::input(ids, name, PortType::Generic),
        ),
    }
}

impl Node for Linker {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Linker
    }

    fn to_params(&self) -> Value {
        json!({
            "name": self.port_name,
            "orientation": self.orientation,
            "boundType": self.bound,
        })
    }

    fn from_params(&mut self, params: &Value) {
        if let Some(orientation) = params
            .get("orientation")
            .and_then(|o| serde_json::from_value::<LinkerOrientation>(o.clone()).ok())
        {
            if orientation != self.orientation {
                self.set_orientation(orientation);
            }
        }

        if let Some(name) = params.get("name").and_then(Value::as_str) {
            if name != self.port_name {
                self.set_port_name(name);
            }
        }

        let bound = params
            .get("boundType")
            .and_then(Value::as_str)
            .and_then(PortType::from_name);
        if let Some(port_type) = bound {
            if !self.bind(port_type) {
                tracing::warn!(
                    uid = %self.base.uid(),
                    saved = %port_type,
                    "Linker already bound to a different type"
                );
            }
        }
    }

    fn all_ports(&self) -> Vec<Port> {
        vec![self.internal.clone(), self.external.clone()]
    }

    fn call(&mut self, name: &str) -> bool {
        if name == Self::TOGGLE_RPC {
            return self.toggle_orientation();
        }
        self.base.call(name)
    }

    fn rpc_names(&self) -> Vec<String> {
        let mut names = vec![Self::TOGGLE_RPC.to_string()];
        names.extend(self.base.rpc_names());
        names
    }

    fn as_linker(&self) -> Option<&Linker> {
        Some(self)
    }

    fn as_linker_mut(&mut self) -> Option<&mut Linker> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::Receiver;
    use crate::registry::Registry;
    use crate::value::PortValue;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ctx() -> GraphContext {
        GraphContext::new(IdGenerator::new(), Registry::new())
    }

    #[test]
    fn test_starts_unbound_and_generic() {
        let ctx = ctx();
        let linker = Linker::new(&ctx, LinkerOrientation::Input);
        assert_eq!(linker.state(), LinkerState::Unbound(LinkerOrientation::Input));
        assert!(linker.external_port().is_generic());
        assert!(linker.internal_port().is_generic());
        assert_eq!(linker.external_port().direction(), PortDirection::Input);
        assert_eq!(linker.outputs(), vec![linker.internal_port().clone()]);
    }

    #[test]
    fn test_binding_is_idempotent() {
        let ctx = ctx();
        let mut linker = Linker::new(&ctx, LinkerOrientation::Output);
        let target = Port::input(ctx.ids(), "sink", PortType::Number);

        let first = linker.connect_to_port(&target).unwrap();
        let second = linker.connect_to_port(&target).unwrap();
        assert_eq!(first, second);
        assert_eq!(linker.state(), LinkerState::Bound(PortType::Number));
        assert_eq!(&first, linker.external_port());
    }

    #[test]
    fn test_bound_linker_rejects_other_types() {
        let ctx = ctx();
        let mut linker = Linker::new(&ctx, LinkerOrientation::Input);
        let number = Port::output(ctx.ids(), "n", PortType::Number);
        let text = Port::output(ctx.ids(), "t", PortType::Text);

        let port = linker.connect_from_port(&number).unwrap();
        let again = linker.connect_from_port(&text).unwrap();
        assert_eq!(port, again);
        assert!(!text.connect(&again));
        assert!(number.connect(&port));
    }

    #[test]
    fn test_bound_relay_forwards() {
        let ctx = ctx();
        let mut linker = Linker::new(&ctx, LinkerOrientation::Input);
        let source = Port::output(ctx.ids(), "src", PortType::Number);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let consumer = Port::input(ctx.ids(), "dst", PortType::Number)
            .with_receiver(Receiver::value(move |v| sink.borrow_mut().push(v.as_number())));

        let external = linker.connect_from_port(&source).unwrap();
        assert!(source.connect(&external));
        let internal = linker.connect_to_port(&consumer).unwrap();
        assert!(internal.connect(&consumer));

        source.send(PortValue::Number(3.0), None);
        assert_eq!(*seen.borrow(), vec![Some(3.0)]);
    }

    #[test]
    fn test_toggle_only_while_unbound() {
        let ctx = ctx();
        let mut linker = Linker::new(&ctx, LinkerOrientation::Input);
        let old_external = linker.external_port().clone();

        assert!(linker.call(Linker::TOGGLE_RPC));
        assert_eq!(linker.orientation(), LinkerOrientation::Output);
        assert_ne!(linker.external_port(), &old_external);
        assert_eq!(linker.external_port().direction(), PortDirection::Output);
        assert_eq!(linker.inputs(), vec![linker.internal_port().clone()]);
        assert!(linker.outputs().is_empty());

        assert!(linker.bind(PortType::Color));
        assert!(!linker.toggle_orientation());
        assert_eq!(linker.orientation(), LinkerOrientation::Output);
    }

    #[test]
    fn test_generic_partner_does_not_bind() {
        let ctx = ctx();
        let mut linker = Linker::new(&ctx, LinkerOrientation::Input);
        let generic = Port::output(ctx.ids(), "g", PortType::Generic);
        assert!(linker.connect_from_port(&generic).is_none());
        assert!(!linker.is_bound());
    }

    #[test]
    fn test_params_round_trip() {
        let ctx = ctx();
        let mut linker = Linker::with_name(&ctx, LinkerOrientation::Output, "level");
        linker.bind(PortType::Number);
        let params = linker.to_params();
        assert_eq!(params["boundType"], "number");
        assert_eq!(params["orientation"], "output");

        let mut restored = Linker::new(&ctx, LinkerOrientation::Input);
        restored.from_params(&params);
        assert_eq!(restored.to_params(), params);
        restored.from_params(&params);
        assert_eq!(restored.to_params(), params);
    }
}
