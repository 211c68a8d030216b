//! Incremental decoding of a chat-completion event stream.
//!
//! The upstream provider frames every event as a `data: ` line followed by a
//! JSON payload or the literal `[DONE]` sentinel. Chunks arrive at arbitrary
//! byte boundaries, so the decoder carries the trailing incomplete line of
//! each chunk and re-splits once more bytes arrive. Decoding is therefore
//! independent of how the transport slices the stream.

use serde::Deserialize;
use tracing::debug;

/// One increment of a proofreading stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofreadEvent {
    /// Partial corrected text, in arrival order.
    Content(String),
    /// The provider finished normally.
    Done,
    /// The stream failed; no further events follow.
    Error(String),
}

impl ProofreadEvent {
    /// `Done` and `Error` end the stream; nothing may be emitted after them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProofreadEvent::Done | ProofreadEvent::Error(_))
    }
}

/// Splits an unbounded byte stream into complete lines.
///
/// The last (possibly incomplete) line of each chunk is held back and
/// prepended to the next chunk before re-splitting.
#[derive(Debug, Default)]
pub struct LineDecoder {
    carry: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&byte| byte == b'\n') {
            let mut line: Vec<u8> = self.carry.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }
}

/// Turns raw upstream bytes into [`ProofreadEvent`]s.
///
/// Terminal events latch: once `Done` or `Error` has been produced, further
/// input yields nothing.
#[derive(Debug, Default)]
pub struct EventDecoder {
    lines: LineDecoder,
    closed: bool,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the events it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ProofreadEvent> {
        let mut events = Vec::new();
        if self.closed {
            return events;
        }
        for line in self.lines.push(chunk) {
            let Some(payload) = data_payload(&line) else {
                continue;
            };
            if let Some(event) = decode_data_payload(payload) {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    self.closed = true;
                    break;
                }
            }
        }
        events
    }

    /// True once a terminal event has been emitted.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn data_payload(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

fn decode_data_payload(payload: &str) -> Option<ProofreadEvent> {
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(ProofreadEvent::Done);
    }
    let chunk: ChatChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(err) => {
            // A parse failure after a correct line split means a genuinely
            // malformed payload; drop it rather than kill the stream.
            debug!("dropping malformed stream payload: {}", err);
            return None;
        }
    };
    if let Some(error) = chunk.error {
        return Some(ProofreadEvent::Error(error.message()));
    }
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
        .map(ProofreadEvent::Content)
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChunkError {
    Object { message: String },
    Text(String),
}

impl ChunkError {
    fn message(self) -> String {
        match self {
            ChunkError::Object { message } => message,
            ChunkError::Text(text) => text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSCRIPT: &[u8] = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\" W\xc3\xb6rld\"}}]}\n\n\
data: [DONE]\n\n";

    fn decode_all(chunks: &[&[u8]]) -> Vec<ProofreadEvent> {
        let mut decoder = EventDecoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.push(chunk));
        }
        events
    }

    fn expected_events() -> Vec<ProofreadEvent> {
        vec![
            ProofreadEvent::Content("Hello".to_string()),
            ProofreadEvent::Content(" Wörld".to_string()),
            ProofreadEvent::Done,
        ]
    }

    #[test]
    fn whole_transcript_decodes() {
        assert_eq!(decode_all(&[TRANSCRIPT]), expected_events());
    }

    #[test]
    fn decoding_is_chunk_boundary_invariant_for_all_two_way_splits() {
        for split in 0..=TRANSCRIPT.len() {
            let (head, tail) = TRANSCRIPT.split_at(split);
            assert_eq!(
                decode_all(&[head, tail]),
                expected_events(),
                "split at byte {}",
                split
            );
        }
    }

    #[test]
    fn decoding_is_chunk_boundary_invariant_for_three_way_splits() {
        // Every three-way partition; also covers splits inside the multi-byte
        // UTF-8 sequence and inside the [DONE] sentinel.
        for first in 0..=TRANSCRIPT.len() {
            for second in first..=TRANSCRIPT.len() {
                let chunks = [
                    &TRANSCRIPT[..first],
                    &TRANSCRIPT[first..second],
                    &TRANSCRIPT[second..],
                ];
                assert_eq!(
                    decode_all(&chunks),
                    expected_events(),
                    "splits at {} and {}",
                    first,
                    second
                );
            }
        }
    }

    #[test]
    fn byte_at_a_time_decodes_identically() {
        let mut decoder = EventDecoder::new();
        let mut events = Vec::new();
        for byte in TRANSCRIPT {
            events.extend(decoder.push(std::slice::from_ref(byte)));
        }
        assert_eq!(events, expected_events());
    }

    #[test]
    fn events_after_done_are_ignored() {
        let mut decoder = EventDecoder::new();
        let events = decoder
            .push(b"data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n");
        assert_eq!(events, vec![ProofreadEvent::Done]);
        assert!(decoder.is_closed());
        assert!(
            decoder
                .push(b"data: {\"choices\":[{\"delta\":{\"content\":\"later\"}}]}\n\n")
                .is_empty()
        );
    }

    #[test]
    fn error_payload_ends_the_stream() {
        let mut decoder = EventDecoder::new();
        let events =
            decoder.push(b"data: {\"error\":{\"message\":\"quota exceeded\"}}\n\ndata: [DONE]\n\n");
        assert_eq!(
            events,
            vec![ProofreadEvent::Error("quota exceeded".to_string())]
        );
        assert!(decoder.is_closed());
    }

    #[test]
    fn string_error_payload_is_accepted() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push(b"data: {\"error\":\"boom\"}\n\n");
        assert_eq!(events, vec![ProofreadEvent::Error("boom".to_string())]);
    }

    #[test]
    fn malformed_json_is_dropped_without_ending_the_stream() {
        let mut decoder = EventDecoder::new();
        let events = decoder
            .push(b"data: {not json\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n");
        assert_eq!(events, vec![ProofreadEvent::Content("ok".to_string())]);
        assert!(!decoder.is_closed());
    }

    #[test]
    fn crlf_lines_and_tight_data_prefix_decode() {
        let mut decoder = EventDecoder::new();
        let events = decoder
            .push(b"data:{\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\r\n\r\ndata: [DONE]\r\n");
        assert_eq!(
            events,
            vec![
                ProofreadEvent::Content("hi".to_string()),
                ProofreadEvent::Done
            ]
        );
    }

    #[test]
    fn non_data_lines_and_empty_deltas_are_skipped() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push(
            b": keep-alive\n\
event: ping\n\
data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n\
data: {\"choices\":[{\"delta\":{}}]}\n\
data: {\"choices\":[{\"delta\":{\"content\":\"text\"}}]}\n",
        );
        assert_eq!(events, vec![ProofreadEvent::Content("text".to_string())]);
    }

    #[test]
    fn incomplete_trailing_line_stays_buffered() {
        let mut decoder = EventDecoder::new();
        assert!(
            decoder
                .push(b"data: {\"choices\":[{\"delta\":{\"content\":\"par")
                .is_empty()
        );
        let events = decoder.push(b"tial\"}}]}\n");
        assert_eq!(events, vec![ProofreadEvent::Content("partial".to_string())]);
    }
}
