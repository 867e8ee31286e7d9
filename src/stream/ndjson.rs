//! Incremental NDJSON framing for the chat stream.
//!
//! Bytes arrive in arbitrary chunks. A chunk may end in the middle of a
//! multi-byte UTF-8 sequence or in the middle of a line, so the framer keeps
//! two buffers: undecoded tail bytes and decoded text without a newline yet.
//!
//! ```text
//! {"type":"meta","mode":"rag"}\n
//! {"type":"token","content":"Te recomiendo "}\n
//! {"type":"token","content":"La Maria."}\n
//! ```

use tracing::warn;

use crate::models::StreamEvent;

#[derive(Debug, Default)]
pub struct LineFramer {
    /// Trailing bytes of an incomplete UTF-8 sequence.
    carry: Vec<u8>,
    /// Decoded text not yet terminated by a newline.
    buffer: String,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk and return every line it completed.
    /// Blank lines are skipped; returned lines are trimmed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let raw: String = self.buffer.drain(..=pos).collect();
            let line = raw.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Flush at end of input: whatever is left is one unterminated line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.carry.is_empty() {
            self.carry.clear();
            self.buffer.push(char::REPLACEMENT_CHARACTER);
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = rest.trim();
        (!line.is_empty()).then(|| line.to_string())
    }

    /// Bytes or characters still waiting for a newline.
    pub fn is_empty(&self) -> bool {
        self.carry.is_empty() && self.buffer.is_empty()
    }

    fn decode(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, invalid) = rest.split_at(e.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.buffer.push_str(text);
                    }
                    match e.error_len() {
                        // Truly invalid bytes: replace, like a lossy decoder.
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &invalid[len..];
                        }
                        // Sequence cut by the chunk boundary.
                        None => {
                            self.carry = invalid.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Parse one framed line. Failures are logged and the line is dropped.
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    match serde_json::from_str::<StreamEvent>(line) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Dropping malformed NDJSON line ({e}): {}", preview(line));
            None
        }
    }
}

/// Decode a complete body in one go. Mostly useful for tests and for
/// replaying captured streams.
pub fn decode_all(body: &[u8]) -> Vec<StreamEvent> {
    let mut framer = LineFramer::new();
    let mut events: Vec<StreamEvent> = framer.push(body).iter().filter_map(|l| parse_line(l)).collect();
    if let Some(last) = framer.finish() {
        events.extend(parse_line(&last));
    }
    events
}

fn preview(line: &str) -> String {
    const MAX: usize = 120;
    if line.chars().count() > MAX {
        format!("{}…", line.chars().take(MAX).collect::<String>())
    } else {
        line.to_string()
    }
}
