//! Transports: bidirectional frame channels to a single tool server.
//!
//! Every transport buffers inbound frames in a reader task it owns, so
//! [`Transport::receive`] only waits on a channel and is safe to race against
//! other work in `tokio::select!`.

mod memory;
mod sse;
mod stdio;

pub use memory::{MemoryPeer, MemoryTransport};
pub use sse::SseTransport;
pub use stdio::StdioTransport;

use async_trait::async_trait;

use hive_core::TransportKind;

use crate::error::TransportError;

/// Channel capacity for frames buffered by reader tasks.
pub(crate) const INBOUND_CAPACITY: usize = 256;

#[async_trait]
pub trait Transport: Send {
    /// Establish the connection. Called once before any other operation.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Send one complete JSON frame.
    async fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Next inbound frame, or `None` once the remote side has closed.
    async fn receive(&mut self) -> Result<Option<String>, TransportError>;

    /// Release the underlying process or connection. Idempotent.
    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}

/// Build an unopened transport for a server descriptor.
pub fn from_kind(kind: &TransportKind) -> Box<dyn Transport> {
    match kind {
        TransportKind::Stdio { command, args, env } => {
            Box::new(StdioTransport::new(command, args.clone(), env.clone()))
        }
        TransportKind::Sse { url } => Box::new(SseTransport::new(url)),
    }
}
