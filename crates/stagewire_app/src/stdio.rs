// SPDX-License-Identifier: MIT OR Apache-2.0
//! Line-delimited JSON over stdin/stdout.
//!
//! One envelope per line in each direction. Outbound lines go through an
//! unbounded channel to a single writer task so senders never block on the
//! terminal and lines never interleave.

use stagewire_protocol::{ConnectionStatus, Envelope, MessageSender, TransportError};
use tokio::io::{self, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;

/// Identity under which the stdio peer is registered
pub const STDIO_IDENTITY: &str = "stdio";

/// Sender that queues envelopes for the stdout writer
pub struct StdioSender {
    tx: UnboundedSender<String>,
    host_address: String,
}

impl StdioSender {
    /// Wrap the writer channel
    pub fn new(tx: UnboundedSender<String>, host_address: impl Into<String>) -> Self {
        Self {
            tx,
            host_address: host_address.into(),
        }
    }
}

impl MessageSender for StdioSender {
    fn send_message(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let mut line = envelope.to_wire();
        line.push('\n');
        self.tx.send(line).map_err(|_| TransportError::Closed)
    }

    fn host_address(&self) -> String {
        self.host_address.clone()
    }

    fn is_server(&self) -> bool {
        true
    }

    fn current_status(&self) -> ConnectionStatus {
        if self.tx.is_closed() {
            ConnectionStatus::Disconnected
        } else {
            ConnectionStatus::Connected
        }
    }
}

/// Spawn the stdout writer and return its input channel.
///
/// The task ends once every sender is dropped and the queue is drained.
pub fn spawn_stdout_writer() -> (UnboundedSender<String>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let handle = tokio::spawn(async move {
        let mut writer = BufWriter::new(io::stdout());
        while let Some(line) = rx.recv().await {
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::error!("stdout write error: {e}");
                break;
            }
            if let Err(e) = writer.flush().await {
                tracing::error!("stdout flush error: {e}");
                break;
            }
        }
    });
    (tx, handle)
}
