// SPDX-License-Identifier: MIT OR Apache-2.0
//! Capability traits implemented by concrete transports.
//!
//! Sockets, WebSockets or stdio live outside this crate. A transport hands
//! the protocol a [`MessageSender`] per connected identity and feeds inbound
//! traffic to a [`MessageReceiver`].

use crate::envelope::Envelope;
use thiserror::Error;

/// Link state reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Handshake in progress
    Connecting,
    /// Ready to send
    Connected,
    /// Closed or never opened
    Disconnected,
}

impl ConnectionStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Transport failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer is gone
    #[error("connection closed")]
    Closed,
    /// Writing failed
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound half of a connection
pub trait MessageSender: Send + Sync {
    /// Deliver one envelope
    fn send_message(&self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Address this side is reachable at
    fn host_address(&self) -> String;

    /// Whether this side accepted the connection
    fn is_server(&self) -> bool;

    /// Current link state
    fn current_status(&self) -> ConnectionStatus;
}

/// Inbound half of a connection
pub trait MessageReceiver {
    /// Handle a decoded envelope from `identity`
    fn on_message(&mut self, envelope: Envelope, identity: &str);

    /// `identity` connected
    fn on_connect(&mut self, identity: &str);

    /// `identity` went away
    fn on_disconnect(&mut self, identity: &str);
}
