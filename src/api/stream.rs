use crate::logging::emit_sse_parse_error;
use crate::types::RunEvent;

/// Largest frame kept in memory. Bigger frames are dropped up to the next
/// frame boundary.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// Incremental SSE decoder for the run event feed.
///
/// Bytes are buffered until a blank line closes a frame, so multi-byte
/// characters split across network chunks decode intact.
#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: Vec<u8>,
    /// Offset up to which the buffer is known to hold no frame boundary.
    scanned: usize,
    /// Set while skipping the rest of an oversized frame.
    discarding: bool,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, chunk: &[u8]) -> Vec<RunEvent> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut events = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;
        while let Some(end) = find_frame_end(&self.buffer[search_from..]) {
            let end = search_from + end;
            if self.discarding {
                self.discarding = false;
            } else if end - start > MAX_FRAME_BYTES {
                tracing::warn!(limit = MAX_FRAME_BYTES, "dropping oversized run event frame");
            } else {
                let frame = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
                if let Some(event) = decode_frame(&frame) {
                    events.push(event);
                }
            }
            start = end + 2;
            search_from = start;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
        // A trailing newline may pair with the first byte of the next chunk.
        self.scanned = self.buffer.len().saturating_sub(1);

        if self.buffer.len() > MAX_FRAME_BYTES {
            if !self.discarding {
                tracing::warn!(
                    limit = MAX_FRAME_BYTES,
                    "dropping oversized run event frame"
                );
            }
            self.discarding = true;
            let keep_from = self.buffer.len() - 1;
            self.buffer.drain(..keep_from);
            self.scanned = 0;
        }
        events
    }

    /// Returns whatever partial frame is still buffered.
    pub fn flush(&mut self) -> String {
        let leftover = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return String::new();
        }
        String::from_utf8_lossy(&leftover).into_owned()
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

fn decode_frame(frame: &str) -> Option<RunEvent> {
    let mut event_type: Option<&str> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in frame.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event_type = Some(value.trim()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    let data = data_lines.join("\n");
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    let value = match serde_json::from_str::<serde_json::Value>(data) {
        Ok(value) => value,
        Err(error) => {
            emit_sse_parse_error(event_type, data, &error);
            return None;
        }
    };

    match RunEvent::decode(value, event_type) {
        Ok(event) => Some(event),
        Err(error) => {
            tracing::warn!(%error, event_type = event_type.unwrap_or("<none>"), "dropping malformed run event");
            None
        }
    }
}
