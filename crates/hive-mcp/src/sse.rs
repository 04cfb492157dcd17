//! Incremental parser for `text/event-stream` bodies.
//!
//! Chunks arrive at arbitrary byte boundaries, including in the middle of a
//! UTF-8 sequence, so bytes are buffered until a full line is available.

use std::fmt;

/// Event type used when a block carries no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// One dispatched event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`
    pub data: String,
    /// Value of the `id:` field
    pub id: Option<String>,
    /// Reconnect delay in milliseconds
    pub retry: Option<u64>,
}

impl SseEvent {
    /// The event type, falling back to `message`.
    pub fn kind(&self) -> &str {
        self.event.as_deref().unwrap_or(DEFAULT_EVENT)
    }
}

#[derive(Default)]
pub struct SseParser {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every event it completes.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
            } else {
                self.apply_line(line);
            }
        }
        events
    }

    pub fn feed_str(&mut self, text: &str) -> Vec<SseEvent> {
        self.feed(text.as_bytes())
    }

    fn apply_line(&mut self, line: &str) {
        // Comment lines (": keepalive") carry nothing.
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => self.retry = value.parse().ok(),
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            self.retry = None;
            return None;
        }

        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.take(),
            retry: self.retry.take(),
        })
    }

    /// Whether a partial line or an undispatched event is buffered.
    pub fn has_buffered_data(&self) -> bool {
        !self.pending.is_empty() || !self.data.is_empty()
    }

    /// Drop all partial state, e.g. before reading a fresh stream.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Debug for SseParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseParser")
            .field("pending_bytes", &self.pending.len())
            .field("data_lines", &self.data.len())
            .finish()
    }
}
