//! In-process transport backed by a pair of channels.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Transport, INBOUND_CAPACITY};
use crate::error::TransportError;

/// Client side of an in-process connection.
pub struct MemoryTransport {
    /// Frames to the peer; taken on close so the peer sees the end
    outbound: Option<mpsc::Sender<String>>,
    /// Frames from the peer
    inbound: mpsc::Receiver<String>,
    /// Opened and not yet closed
    connected: bool,
}

/// Server side of an in-process connection, handed to an embedded server.
pub struct MemoryPeer {
    /// Frames to the client
    outbound: mpsc::Sender<String>,
    /// Frames from the client
    inbound: mpsc::Receiver<String>,
}

impl MemoryTransport {
    /// Create a connected pair.
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let (to_server, from_client) = mpsc::channel(INBOUND_CAPACITY);
        let (to_client, from_server) = mpsc::channel(INBOUND_CAPACITY);
        (
            MemoryTransport {
                outbound: Some(to_server),
                inbound: from_server,
                connected: false,
            },
            MemoryPeer {
                outbound: to_client,
                inbound: from_client,
            },
        )
    }
}

impl MemoryPeer {
    /// Next frame sent by the client, or `None` once it has closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Send a frame to the client. Fails if the client side is gone.
    pub async fn send(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        self.outbound
            .send(frame.into())
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    pub async fn send_json(&self, value: &serde_json::Value) -> Result<(), TransportError> {
        self.send(value.to_string()).await
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.outbound.is_none() {
            return Err(TransportError::ConnectFailed(
                "in-memory transport already closed".into(),
            ));
        }
        self.connected = true;
        Ok(())
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let outbound = match self.outbound.as_ref() {
            Some(tx) if self.connected => tx,
            _ => return Err(TransportError::WriteError("transport is closed".into())),
        };
        if outbound.send(frame.to_string()).await.is_err() {
            self.connected = false;
            return Err(TransportError::WriteError("peer has gone away".into()));
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<String>, TransportError> {
        if self.outbound.is_none() {
            return Ok(None);
        }
        let frame = self.inbound.recv().await;
        if frame.is_none() {
            self.connected = false;
        }
        Ok(frame)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.outbound.take();
        self.inbound.close();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_exchanges_frames() {
        let (mut transport, mut peer) = MemoryTransport::pair();
        transport.open().await.unwrap();

        transport.send(r#"{"ping":1}"#).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some(r#"{"ping":1}"#));

        peer.send(r#"{"pong":1}"#).await.unwrap();
        assert_eq!(transport.receive().await.unwrap().as_deref(), Some(r#"{"pong":1}"#));
    }

    #[tokio::test]
    async fn test_close_is_seen_by_peer() {
        let (mut transport, mut peer) = MemoryTransport::pair();
        transport.open().await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        assert_eq!(peer.recv().await, None);
        assert!(transport.send("{}").await.is_err());
        assert!(transport.open().await.is_err());
    }

    #[tokio::test]
    async fn test_peer_drop_ends_sequence() {
        let (mut transport, peer) = MemoryTransport::pair();
        transport.open().await.unwrap();
        drop(peer);

        assert_eq!(transport.receive().await.unwrap(), None);
        assert!(!transport.is_connected());
    }
}
