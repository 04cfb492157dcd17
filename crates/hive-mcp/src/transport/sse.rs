//! Event stream transport: one long-lived GET for inbound frames, one POST per outbound frame.
//!
//! The server announces where to POST in an `endpoint` event and delivers
//! frames in `message` events. If the stream closes unexpectedly it is
//! reopened once; a second consecutive loss ends the frame sequence with
//! [`TransportError::StreamLost`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{Transport, INBOUND_CAPACITY};
use crate::error::TransportError;
use crate::sse::SseParser;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reconnects allowed before a lost stream becomes fatal.
const MAX_RECONNECTS: u32 = 1;

type FrameSender = mpsc::Sender<Result<String, TransportError>>;

/// Server-sent events for inbound frames, HTTP POST for outbound ones.
pub struct SseTransport {
    /// Event stream URL
    url: String,
    /// HTTP client shared by the stream and the POST channel
    client: reqwest::Client,
    /// POST target announced by the server's `endpoint` event
    endpoint: Arc<RwLock<Option<Url>>>,
    /// Frames decoded from `message` events
    inbound: Option<mpsc::Receiver<Result<String, TransportError>>>,
    /// Task reading (and once re-opening) the event stream
    stream_task: Option<JoinHandle<()>>,
    /// Stops the stream task on close
    cancel: CancellationToken,
    /// How long `open` waits for the `endpoint` event
    connect_timeout: Duration,
    /// Whether the stream is believed open
    connected: bool,
}

impl SseTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            endpoint: Arc::new(RwLock::new(None)),
            inbound: None,
            stream_task: None,
            cancel: CancellationToken::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connected: false,
        }
    }

    /// How long `open` waits for the `endpoint` event.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The POST URL announced by the server, once known.
    pub fn endpoint(&self) -> Option<Url> {
        self.endpoint.read().clone()
    }

    fn stop_stream(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
    }
}

/// Reader side of the transport, running in its own task.
struct EventStream {
    client: reqwest::Client,
    base: Url,
    endpoint: Arc<RwLock<Option<Url>>>,
    frames: FrameSender,
    cancel: CancellationToken,
}

impl EventStream {
    async fn run(self, ready: oneshot::Sender<Result<(), TransportError>>) {
        let mut ready = Some(ready);
        let mut reconnects = 0;

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return,
                outcome = self.read_stream(&mut ready) => outcome,
            };

            if self.cancel.is_cancelled() || self.frames.is_closed() {
                return;
            }

            // Never got as far as an endpoint on the first connection.
            if let Some(ready) = ready.take() {
                let err = match outcome {
                    Err(e) => e,
                    Ok(_) => TransportError::ConnectFailed(
                        "event stream closed before announcing an endpoint".into(),
                    ),
                };
                let _ = ready.send(Err(err));
                return;
            }

            match outcome {
                Ok(delivered) if delivered > 0 => reconnects = 0,
                Ok(_) => {}
                Err(ref e) => warn!(url = %self.base, error = %e, "Event stream reconnect failed"),
            }

            if reconnects >= MAX_RECONNECTS {
                error!(url = %self.base, "Event stream lost");
                let _ = self.frames.send(Err(TransportError::StreamLost)).await;
                return;
            }
            reconnects += 1;
            warn!(url = %self.base, "Event stream closed, reconnecting");
        }
    }

    /// Read one connection to completion. Returns the number of frames delivered.
    async fn read_stream(
        &self,
        ready: &mut Option<oneshot::Sender<Result<(), TransportError>>>,
    ) -> Result<usize, TransportError> {
        let response = self
            .client
            .get(self.base.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::ConnectFailed(format!(
                "event stream returned HTTP {}",
                status
            )));
        }

        let mut parser = SseParser::new();
        let mut body = response.bytes_stream();
        let mut delivered = 0;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(url = %self.base, error = %e, "Event stream read failed");
                    break;
                }
            };

            for event in parser.feed(&chunk) {
                match event.kind() {
                    "endpoint" => match self.base.join(event.data.trim()) {
                        Ok(url) => {
                            debug!(endpoint = %url, "Server announced endpoint");
                            *self.endpoint.write() = Some(url);
                            if let Some(ready) = ready.take() {
                                let _ = ready.send(Ok(()));
                            }
                        }
                        Err(e) => warn!(data = %event.data, error = %e, "Ignoring bad endpoint"),
                    },
                    "message" => {
                        if serde_json::from_str::<serde_json::Value>(&event.data).is_err() {
                            warn!(frame = %event.data, "Dropping malformed frame from server");
                            continue;
                        }
                        debug!(frame = %event.data, "Received frame");
                        if self.frames.send(Ok(event.data)).await.is_err() {
                            return Ok(delivered);
                        }
                        delivered += 1;
                    }
                    other => debug!(event = other, "Ignoring event"),
                }
            }
        }

        Ok(delivered)
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.connected {
            return Ok(());
        }

        let base = Url::parse(&self.url)
            .map_err(|e| TransportError::ConnectFailed(format!("invalid url {}: {}", self.url, e)))?;

        debug!(url = %base, "Opening event stream");

        self.cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let stream = EventStream {
            client: self.client.clone(),
            base,
            endpoint: self.endpoint.clone(),
            frames: tx,
            cancel: self.cancel.clone(),
        };
        self.stream_task = Some(tokio::spawn(stream.run(ready_tx)));

        let outcome = match tokio::time::timeout(self.connect_timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ConnectFailed(
                "event stream task ended unexpectedly".into(),
            )),
            Err(_) => Err(TransportError::ConnectFailed(format!(
                "no endpoint announced within {}s",
                self.connect_timeout.as_secs()
            ))),
        };

        match outcome {
            Ok(()) => {
                self.inbound = Some(rx);
                self.connected = true;
                Ok(())
            }
            Err(e) => {
                self.stop_stream();
                Err(e)
            }
        }
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::WriteError("transport is closed".into()));
        }
        let endpoint = self
            .endpoint()
            .ok_or_else(|| TransportError::WriteError("no endpoint announced".into()))?;

        debug!(frame = frame, endpoint = %endpoint, "Posting frame");

        let response = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(frame.to_string())
            .send()
            .await
            .map_err(|e| TransportError::WriteError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::WriteError(format!(
                "server rejected frame with HTTP {}",
                status
            )));
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<String>, TransportError> {
        let Some(inbound) = self.inbound.as_mut() else {
            return Ok(None);
        };
        match inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => {
                self.connected = false;
                Err(e)
            }
            None => {
                self.connected = false;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.stop_stream();
        self.inbound.take();
        self.endpoint.write().take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.stop_stream();
    }
}
