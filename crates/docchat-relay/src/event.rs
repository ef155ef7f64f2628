//! Browser-facing event records.
//!
//! Each event is written as one `data: <json>\n\n` record. The JSON object has
//! exactly one key, `text` or `error`, so a record is self-delimiting and can be
//! parsed before the rest of the response has arrived.

use bytes::Bytes;
use tracing::warn;

/// One record sent to the browser.
///
/// `Error` is terminal: nothing is written after it.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientEvent {
    /// A backend fragment, forwarded unchanged.
    Text(String),
    /// Human-readable terminal failure.
    Error(String),
}

impl ClientEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Returns the fragment for text events.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Error(_) => None,
        }
    }

    /// Serializes the event as a single `data:` record.
    pub fn encode(&self) -> Bytes {
        let json = serde_json::to_string(self)
            .expect("ClientEvent serialization should be infallible");
        Bytes::from(format!("data: {json}\n\n"))
    }
}

/// Incremental parser for a stream of encoded [`ClientEvent`] records.
///
/// Accepts arbitrary byte boundaries, including splits inside a record or
/// inside a multi-byte character.
#[derive(Debug, Default)]
pub struct EventParser {
    buf: Vec<u8>,
}

impl EventParser {
    /// Feeds bytes and returns every event completed by them, in order.
    ///
    /// Records that are not valid event JSON are skipped.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<ClientEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some((idx, delim_len)) = find_record_delimiter(&self.buf) {
            let record = self.buf[..idx].to_vec();
            self.buf.drain(..idx + delim_len);
            if let Some(event) = parse_record(&record) {
                events.push(event);
            }
        }
        events
    }

    /// Returns true when bytes of an unfinished record are still buffered.
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }
}

/// Parses a complete encoded body into its events.
pub fn parse_events(body: &[u8]) -> Vec<ClientEvent> {
    EventParser::default().push_chunk(body)
}

fn find_record_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn parse_record(bytes: &[u8]) -> Option<ClientEvent> {
    let text = String::from_utf8_lossy(bytes);
    let data: Vec<&str> = text
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if data.is_empty() {
        return None;
    }
    let payload = data.join("\n");
    match serde_json::from_str(&payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(error = %err, "skipping unparseable event record");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_event_wire_format() {
        let encoded = ClientEvent::Text("The ".into()).encode();
        assert_eq!(&encoded[..], b"data: {\"text\":\"The \"}\n\n");
    }

    #[test]
    fn error_event_wire_format() {
        let encoded = ClientEvent::Error("Server responded with status: 500".into()).encode();
        assert_eq!(
            &encoded[..],
            b"data: {\"error\":\"Server responded with status: 500\"}\n\n"
        );
    }

    #[test]
    fn newlines_inside_fragments_stay_on_one_line() {
        let encoded = ClientEvent::Text("line one\n\nline two".into()).encode();
        let body = std::str::from_utf8(&encoded).unwrap();
        assert_eq!(body.matches("\n\n").count(), 1);
        assert_eq!(
            parse_events(&encoded),
            vec![ClientEvent::Text("line one\n\nline two".into())]
        );
    }

    #[test]
    fn parser_recovers_events_across_arbitrary_splits() {
        let events = vec![
            ClientEvent::Text("The ".into()),
            ClientEvent::Text("réport ".into()),
            ClientEvent::Text("shows growth.".into()),
            ClientEvent::Error("boom".into()),
        ];
        let body: Vec<u8> = events.iter().flat_map(|e| e.encode().to_vec()).collect();

        for split in [1, 3, 7, 13] {
            let mut parser = EventParser::default();
            let mut parsed = Vec::new();
            for piece in body.chunks(split) {
                parsed.extend(parser.push_chunk(piece));
            }
            assert_eq!(parsed, events, "split size {split}");
            assert!(!parser.has_pending());
        }
    }

    #[test]
    fn parser_skips_records_without_event_json() {
        let body = b": keep-alive\n\ndata: not json\n\ndata: {\"text\":\"ok\"}\n\n";
        assert_eq!(parse_events(body), vec![ClientEvent::Text("ok".into())]);
    }

    #[test]
    fn only_error_is_terminal() {
        assert!(ClientEvent::Error("x".into()).is_terminal());
        assert!(!ClientEvent::Text("x".into()).is_terminal());
        assert_eq!(ClientEvent::Text("x".into()).as_text(), Some("x"));
    }
}
