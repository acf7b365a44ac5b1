//! SSE Event Parser (§4.E): turns an arbitrary byte stream into a lazy
//! sequence of parsed server-sent events, hand-rolled (rather than reusing
//! `eventsource-stream`) to get the exact discard-oldest-half overflow policy
//! and `[DONE]` sentinel handling §4.E specifies.

const MAX_BUFFER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEvent {
    /// A `data: ...` payload, with whatever `event:` name preceded it (if any).
    Data { event: Option<String>, data: String },
    /// The literal `data: [DONE]` sentinel.
    Done,
}

/// Line-accumulating buffer. Feed it raw bytes via [`Self::push`]; each call
/// returns every event the new bytes completed.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    pending_event_name: Option<String>,
    pending_data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<ParsedEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        self.enforce_cap();

        let mut events = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=newline_pos);
            if let Some(event) = self.consume_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn consume_line(&mut self, line: &str) -> Option<ParsedEvent> {
        if line.is_empty() {
            // blank line: dispatch the accumulated event, if anything arrived
            if self.pending_data.is_empty() {
                self.pending_event_name = None;
                return None;
            }
            let data = self.pending_data.join("\n");
            let event = self.pending_event_name.take();
            self.pending_data.clear();
            return Some(if data == "[DONE]" {
                ParsedEvent::Done
            } else {
                ParsedEvent::Data { event, data }
            });
        }

        if let Some(rest) = line.strip_prefix("data:") {
            self.pending_data.push(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("event:") {
            self.pending_event_name = Some(rest.trim_start().to_string());
        }
        // `id:` and `:`-comment lines are accepted but not tracked; nothing
        // in this gateway's translation needs the event id.
        None
    }

    /// Drops the oldest half of the buffer when it grows past the 64 KiB cap
    /// without ever seeing a newline (an upstream emitting unframed data).
    fn enforce_cap(&mut self) {
        if self.buffer.len() <= MAX_BUFFER_BYTES {
            return;
        }
        let mut cut = self.buffer.len() / 2;
        while !self.buffer.is_char_boundary(cut) {
            cut += 1;
        }
        self.buffer.drain(..cut);
        log::warn!(target: "gateway::sse", "SSE line buffer exceeded {MAX_BUFFER_BYTES} bytes, discarded oldest half");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_data_line_per_event() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: {\"a\":1}\n\n");
        assert_eq!(
            events,
            vec![ParsedEvent::Data {
                event: None,
                data: "{\"a\":1}".to_string()
            }]
        );
    }

    #[test]
    fn recognizes_done_sentinel() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: [DONE]\n\n");
        assert_eq!(events, vec![ParsedEvent::Done]);
    }

    #[test]
    fn splits_across_multiple_pushes() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: {\"a\"").is_empty());
        let events = parser.push(b":1}\n\n");
        assert_eq!(
            events,
            vec![ParsedEvent::Data {
                event: None,
                data: "{\"a\":1}".to_string()
            }]
        );
    }

    #[test]
    fn overflow_discards_oldest_half() {
        let mut parser = SseParser::new();
        let junk = vec![b'x'; MAX_BUFFER_BYTES + 10];
        parser.push(&junk);
        assert!(parser.buffer.len() <= MAX_BUFFER_BYTES);
    }
}
