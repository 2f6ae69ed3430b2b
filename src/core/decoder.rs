//! Incremental decoding of streamed response bodies.
//!
//! Network chunks do not respect character boundaries, so bytes belonging to
//! an incomplete UTF-8 sequence are carried over to the next chunk instead of
//! being decoded on their own. Malformed sequences become U+FFFD and decoding
//! continues.

use memchr::memchr;

#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `chunk` (plus any carried bytes) as forms complete
    /// characters. A trailing partial sequence is held back.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut decoded = String::with_capacity(self.pending.len());
        let mut start = 0;
        while start < self.pending.len() {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    start = self.pending.len();
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    decoded.push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    match err.error_len() {
                        Some(invalid_len) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + invalid_len;
                        }
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        decoded
    }

    /// Flush at end of stream. Leftover bytes can never complete, so they are
    /// reported as a single replacement character.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        char::REPLACEMENT_CHARACTER.to_string()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Unwraps `text/event-stream` framing into the text carried by `data:` lines.
#[derive(Debug, Default)]
pub struct EventStreamFramer {
    buffer: String,
    data_lines: Vec<String>,
}

impl EventStreamFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed decoded text and collect every event completed by it.
    pub fn feed(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let mut events = Vec::new();
        while let Some(newline_pos) = memchr(b'\n', self.buffer.as_bytes()) {
            let line: String = self.buffer.drain(..=newline_pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Dispatch whatever is left once the body ends without a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let line = line.trim_end_matches('\r').to_string();
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data_lines.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let event = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multibyte_character_split_across_chunks_is_reassembled() {
        let bytes = "naïve café".as_bytes();
        // "ï" is two bytes; split between them.
        let split = "na".len() + 1;
        let mut decoder = Utf8ChunkDecoder::new();

        let first = decoder.decode(&bytes[..split]);
        assert_eq!(first, "na");
        assert!(decoder.has_pending());

        let second = decoder.decode(&bytes[split..]);
        assert_eq!(second, "ïve café");
        assert!(!decoder.has_pending());
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn four_byte_sequence_fed_one_byte_at_a_time() {
        let bytes = "ok 🩺".as_bytes();
        let mut decoder = Utf8ChunkDecoder::new();
        let mut out = String::new();
        for byte in bytes {
            out.push_str(&decoder.decode(std::slice::from_ref(byte)));
        }
        assert_eq!(out, "ok 🩺");
    }

    #[test]
    fn malformed_bytes_become_replacement_and_decoding_continues() {
        let mut decoder = Utf8ChunkDecoder::new();
        let out = decoder.decode(&[b'a', 0xFF, b'b']);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn truncated_sequence_at_end_of_stream_is_replaced() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.decode(&[b'x', 0xE2, 0x80]), "x");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn event_stream_frames_split_across_feeds() {
        let mut framer = EventStreamFramer::new();
        assert!(framer.feed("data: Does the cou").is_empty());
        let events = framer.feed("gh bring up phlegm?\n\ndata:next\n\n");
        assert_eq!(events, vec!["Does the cough bring up phlegm?", "next"]);
    }

    #[test]
    fn event_stream_joins_multiline_data_and_skips_comments() {
        let mut framer = EventStreamFramer::new();
        let events = framer.feed(": keep-alive\r\nevent: message\r\ndata: one\r\ndata: two\r\n\r\n");
        assert_eq!(events, vec!["one\ntwo"]);
    }

    #[test]
    fn event_stream_finish_flushes_unterminated_event() {
        let mut framer = EventStreamFramer::new();
        assert!(framer.feed("data: tail").is_empty());
        assert_eq!(framer.finish().as_deref(), Some("tail"));
        assert_eq!(framer.finish(), None);
    }
}
