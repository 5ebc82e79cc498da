// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire protocol for stagewire.
//!
//! Remote clients drive the graph with JSON envelopes. This crate provides:
//! - The envelope codec and its validation rules
//! - Sender/receiver traits that concrete transports implement
//! - A thread-safe router from connection identity to sender
//! - The [`Middleware`] dispatcher that applies requests to a graph

pub mod envelope;
pub mod middleware;
pub mod room;
pub mod router;
pub mod transport;
pub mod upload;

pub use envelope::{Envelope, EnvelopeError, MessageType, Method};
pub use middleware::Middleware;
pub use room::{EmptyRoom, RoomRegistry};
pub use router::ConnectionRouter;
pub use transport::{ConnectionStatus, MessageReceiver, MessageSender, TransportError};
pub use upload::UploadError;
