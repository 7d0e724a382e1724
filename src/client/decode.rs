//! Line-delimited SSE frame decoder
//!
//! Feeds on raw transport chunks and yields complete messages at blank-line
//! boundaries. Handles `data:`/`id:` fields, CRLF line endings, comment lines
//! (dropped - they are keepalives), and fields split across chunks. Unknown
//! fields are ignored per the SSE processing model.

use serde_json::Value;

use crate::events::{ConnectedFrame, Event};

/// One dispatched SSE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    /// Value of the last `id:` line seen in this message, if any.
    pub id: Option<String>,
    /// Concatenated `data:` lines, newline-joined.
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data_lines: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a transport chunk, returning every message completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buf.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(newline) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(message) = self.process_line(&line) {
                messages.push(message);
            }
        }
        messages
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            // Dispatch boundary; nothing to dispatch without data
            if self.data_lines.is_empty() {
                self.id = None;
                return None;
            }
            let message = SseMessage {
                id: self.id.take(),
                data: self.data_lines.join("\n"),
            };
            self.data_lines.clear();
            return Some(message);
        }

        if line.starts_with(':') {
            // Comment / keepalive
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data_lines.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // "event", "retry" and anything else: not part of this protocol
            _ => {}
        }
        None
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Connected(ConnectedFrame),
    Event(Event),
}

/// Parse a message's data payload into a typed frame.
pub fn parse_frame(data: &str) -> Result<ClientFrame, serde_json::Error> {
    let value: Value = serde_json::from_str(data)?;
    if value.get("type").and_then(Value::as_str) == Some("connected") {
        Ok(ClientFrame::Connected(serde_json::from_value(value)?))
    } else {
        Ok(ClientFrame::Event(serde_json::from_value(value)?))
    }
}
