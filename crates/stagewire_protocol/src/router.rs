// SPDX-License-Identifier: MIT OR Apache-2.0
//! Identity to sender routing.
//!
//! The router is the one structure shared across threads: transports may
//! register and drop identities from their own threads while the graph
//! thread sends replies and notifications.

use crate::envelope::Envelope;
use crate::transport::MessageSender;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Maps connection identities to their senders
#[derive(Clone, Default)]
pub struct ConnectionRouter {
    senders: Arc<RwLock<IndexMap<String, Arc<dyn MessageSender>>>>,
}

impl ConnectionRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender, returning the one it replaced
    pub fn register(
        &self,
        identity: impl Into<String>,
        sender: Arc<dyn MessageSender>,
    ) -> Option<Arc<dyn MessageSender>> {
        let identity = identity.into();
        tracing::info!(%identity, "Connection registered");
        self.senders.write().insert(identity, sender)
    }

    /// Forget an identity; returns whether it was known
    pub fn unregister(&self, identity: &str) -> bool {
        let removed = self.senders.write().shift_remove(identity).is_some();
        if removed {
            tracing::info!(%identity, "Connection unregistered");
        }
        removed
    }

    /// Sender registered for `identity`
    pub fn get(&self, identity: &str) -> Option<Arc<dyn MessageSender>> {
        self.senders.read().get(identity).cloned()
    }

    /// Send to one identity; returns whether it was delivered
    pub fn send_to(&self, identity: &str, envelope: &Envelope) -> bool {
        let Some(sender) = self.get(identity) else {
            tracing::debug!(%identity, "Send to unknown identity dropped");
            return false;
        };
        match sender.send_message(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%identity, "Send failed: {e}");
                false
            }
        }
    }

    /// Send to every identity; returns how many deliveries succeeded
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        // Senders are cloned out so no lock is held while writing.
        let senders: Vec<(String, Arc<dyn MessageSender>)> = self
            .senders
            .read()
            .iter()
            .map(|(identity, sender)| (identity.clone(), sender.clone()))
            .collect();

        let mut delivered = 0;
        for (identity, sender) in senders {
            match sender.send_message(envelope) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(%identity, "Broadcast failed: {e}"),
            }
        }
        delivered
    }

    /// Registered identities in registration order
    pub fn identities(&self) -> Vec<String> {
        self.senders.read().keys().cloned().collect()
    }

    /// Number of registered identities
    pub fn len(&self) -> usize {
        self.senders.read().len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.senders.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{MessageType, Method};
    use crate::transport::{ConnectionStatus, TransportError};
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Envelope>>,
        closed: bool,
    }

    impl MessageSender for Recorder {
        fn send_message(&self, envelope: &Envelope) -> Result<(), TransportError> {
            if self.closed {
                return Err(TransportError::Closed);
            }
            self.sent.lock().push(envelope.clone());
            Ok(())
        }

        fn host_address(&self) -> String {
            "test".to_string()
        }

        fn is_server(&self) -> bool {
            true
        }

        fn current_status(&self) -> ConnectionStatus {
            ConnectionStatus::Connected
        }
    }

    #[test]
    fn test_send_and_broadcast() {
        let router = ConnectionRouter::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let dead = Arc::new(Recorder {
            closed: true,
            ..Recorder::default()
        });
        router.register("a", a.clone());
        router.register("b", b.clone());
        router.register("dead", dead);

        let envelope = Envelope::new(MessageType::App, Method::Update, json!({}));
        assert!(router.send_to("a", &envelope));
        assert!(!router.send_to("nobody", &envelope));
        assert!(!router.send_to("dead", &envelope));
        assert_eq!(router.broadcast(&envelope), 2);

        assert_eq!(a.sent.lock().len(), 2);
        assert_eq!(b.sent.lock().len(), 1);
        assert_eq!(router.identities(), vec!["a", "b", "dead"]);
    }

    #[test]
    fn test_register_replaces_and_unregister() {
        let router = ConnectionRouter::new();
        assert!(router.register("a", Arc::new(Recorder::default())).is_none());
        assert!(router.register("a", Arc::new(Recorder::default())).is_some());
        assert_eq!(router.len(), 1);
        assert!(router.unregister("a"));
        assert!(!router.unregister("a"));
        assert!(router.is_empty());
    }

    #[test]
    fn test_router_is_shared_across_threads() {
        let router = ConnectionRouter::new();
        let remote = router.clone();
        std::thread::spawn(move || {
            remote.register("worker", Arc::new(Recorder::default()));
        })
        .join()
        .unwrap();
        assert_eq!(router.identities(), vec!["worker"]);
    }
}
