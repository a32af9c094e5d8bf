//! Incremental parser for the PDP's SSE decision stream.
//!
//! The PDP emits decision messages as `data:` frames terminated by a blank
//! line. Frames may span multiple `data:` lines; comment lines (`:`) are
//! keepalives. Event-type and id fields are not used by the decision
//! protocol and are skipped.

/// Accumulates stream bytes and yields complete frame payloads.
///
/// Bytes are buffered raw and decoded per complete line, so a multi-byte
/// UTF-8 character split across two stream chunks never corrupts a frame
/// (a continuation byte is never `\n`).
pub struct SseFrameParser {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            data_lines: Vec::new(),
        }
    }

    /// Feed a chunk of stream bytes; returns the payload of every frame
    /// completed by this chunk.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = match std::str::from_utf8(&raw) {
                Ok(line) => std::borrow::Cow::Borrowed(line),
                Err(_) => {
                    tracing::warn!("invalid UTF-8 in decision stream line");
                    String::from_utf8_lossy(&raw)
                }
            };
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    frames.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data_lines
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
            // Comments (":keepalive") and unused SSE fields fall through.
        }
        frames
    }
}

impl Default for SseFrameParser {
    fn default() -> Self {
        Self::new()
    }
}
