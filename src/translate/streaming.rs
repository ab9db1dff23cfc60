//! Incremental decoder for the upstream event stream.
//!
//! The upstream speaks newline-delimited, SSE-like framing: `data: {json}`
//! lines terminated by a `data: [DONE]` sentinel. [`DeltaDecoder`] consumes
//! raw byte chunks exactly as they arrive off the wire and emits
//! [`StreamEvent`]s. Buffering and line-splitting happen at the byte level
//! (`\n` is ASCII), so a multi-byte UTF-8 character split across two reads is
//! reassembled before any text decoding takes place.
//!
//! Usage:
//!   let mut decoder = DeltaDecoder::new();
//!   while let Some(chunk) = body.next().await {
//!       for event in decoder.feed(&chunk) { /* forward */ }
//!   }
//!   for event in decoder.finish() { /* forward */ }

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use super::chat_types::TokenUsage;
use super::upstream_types::CompletionChunk;

/// What the caller-facing relay emits, in arrival order. Finish is terminal:
/// the decoder emits it at most once and nothing after it, even though the
/// upstream may signal completion twice (`finish_reason` and `[DONE]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta { text: String },
    Finish { reason: FinishReason, usage: TokenUsage },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Other,
}

impl FinishReason {
    fn from_upstream(reason: &str) -> Self {
        match reason {
            "stop" => Self::Stop,
            "length" => Self::Length,
            _ => Self::Other,
        }
    }
}

impl StreamEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::TextDelta { .. } => "text_delta",
            StreamEvent::Finish { .. } => "finish",
        }
    }
}

/// Stateful decoder for the upstream byte stream. One per relay; carries
/// partial lines (and therefore partial UTF-8 sequences) across reads.
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    buf: BytesMut,
    finished: bool,
    usage: TokenUsage,
    frames_skipped: u64,
}

impl DeltaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk of raw upstream bytes, returning the events it
    /// completes. A chunk may complete zero, one, or many lines.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line[..pos]);
            self.process_line(line.trim(), &mut events);
            if self.finished {
                break;
            }
        }
        events
    }

    /// Call at upstream end-of-stream: a trailing data line without a final
    /// newline is still processed. End-of-stream itself closes the sequence
    /// without synthesizing a Finish.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished || self.buf.is_empty() {
            return Vec::new();
        }

        let tail = self.buf.split();
        let line = String::from_utf8_lossy(&tail);
        let mut events = Vec::new();
        self.process_line(line.trim(), &mut events);
        events
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of malformed data frames skipped so far. Skipping is policy,
    /// not failure; the count keeps it observable.
    pub fn skipped(&self) -> u64 {
        self.frames_skipped
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        if line.is_empty() {
            return;
        }

        if line.contains("[DONE]") {
            self.push_finish(FinishReason::Stop, events);
            return;
        }

        // SSE data lines; anything else (comments, event names) is ignored
        let data = if let Some(stripped) = line.strip_prefix("data: ") {
            stripped.trim()
        } else if let Some(stripped) = line.strip_prefix("data:") {
            stripped.trim()
        } else {
            return;
        };

        let chunk: CompletionChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable frame");
                self.frames_skipped += 1;
                return;
            }
        };

        if let Some(ref usage) = chunk.usage {
            self.usage = TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            };
        }

        let Some(choice) = chunk.choices.first() else {
            return;
        };

        if let Some(text) = choice.delta.content.as_deref().filter(|s| !s.is_empty()) {
            events.push(StreamEvent::TextDelta {
                text: text.to_string(),
            });
        }

        if let Some(ref reason) = choice.finish_reason {
            self.push_finish(FinishReason::from_upstream(reason), events);
        }
    }

    fn push_finish(&mut self, reason: FinishReason, events: &mut Vec<StreamEvent>) {
        if self.finished {
            return;
        }
        self.finished = true;
        events.push(StreamEvent::Finish {
            reason,
            usage: self.usage,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::TextDelta {
            text: text.to_string(),
        }
    }

    fn feed_all(decoder: &mut DeltaDecoder, frames: &[&str]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for frame in frames {
            events.extend(decoder.feed(frame.as_bytes()));
        }
        events.extend(decoder.finish());
        events
    }

    #[test]
    fn test_basic_delta_sequence() {
        let mut decoder = DeltaDecoder::new();
        let events = feed_all(
            &mut decoder,
            &[
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n",
                "data: [DONE]\n",
            ],
        );

        assert_eq!(
            events,
            vec![
                delta("Hel"),
                delta("lo"),
                StreamEvent::Finish {
                    reason: FinishReason::Stop,
                    usage: TokenUsage::default(),
                },
            ]
        );
    }

    #[test]
    fn test_malformed_frame_is_skipped_and_counted() {
        let mut decoder = DeltaDecoder::new();
        let events = feed_all(
            &mut decoder,
            &[
                "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
                "data: {not json\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
            ],
        );

        assert_eq!(events, vec![delta("a"), delta("b")]);
        assert_eq!(decoder.skipped(), 1);
    }

    #[test]
    fn test_multibyte_character_split_across_reads() {
        // "é" is 0xC3 0xA9; split the line between the two bytes
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"caf\u{e9}\"}}]}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = DeltaDecoder::new();
        let mut events = decoder.feed(&line[..split]);
        assert!(events.is_empty());
        events.extend(decoder.feed(&line[split..]));

        assert_eq!(events, vec![delta("caf\u{e9}")]);
    }

    #[test]
    fn test_finish_reason_stop_emits_finish() {
        let mut decoder = DeltaDecoder::new();
        let events =
            decoder.feed(b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n");

        assert_eq!(
            events,
            vec![StreamEvent::Finish {
                reason: FinishReason::Stop,
                usage: TokenUsage::default(),
            }]
        );
    }

    #[test]
    fn test_done_after_finish_reason_is_not_duplicated() {
        let mut decoder = DeltaDecoder::new();
        let events = feed_all(
            &mut decoder,
            &[
                "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n",
                "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
                "data: [DONE]\n",
            ],
        );

        let finishes = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Finish { .. }))
            .count();
        assert_eq!(finishes, 1);
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_nothing_emitted_after_done() {
        let mut decoder = DeltaDecoder::new();
        decoder.feed(b"data: [DONE]\n");
        let events =
            decoder.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n");
        assert!(events.is_empty());
    }

    #[test]
    fn test_end_of_stream_without_done_closes_without_finish() {
        let mut decoder = DeltaDecoder::new();
        let mut events =
            decoder.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n");
        events.extend(decoder.finish());

        assert_eq!(events, vec![delta("a")]);
        assert!(!decoder.is_finished());
    }

    #[test]
    fn test_trailing_line_without_newline_is_processed_at_eof() {
        let mut decoder = DeltaDecoder::new();
        let events = decoder.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}");
        assert!(events.is_empty());

        assert_eq!(decoder.finish(), vec![delta("tail")]);
    }

    #[test]
    fn test_crlf_lines_and_usage_capture() {
        let mut decoder = DeltaDecoder::new();
        let mut events = decoder.feed(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":3}}\r\n",
        );
        events.extend(decoder.feed(b"data: [DONE]\r\n"));

        assert_eq!(
            events,
            vec![
                delta("ok"),
                StreamEvent::Finish {
                    reason: FinishReason::Stop,
                    usage: TokenUsage {
                        prompt_tokens: 7,
                        completion_tokens: 3,
                    },
                },
            ]
        );
    }

    #[test]
    fn test_non_data_lines_are_ignored() {
        let mut decoder = DeltaDecoder::new();
        let events = feed_all(
            &mut decoder,
            &[
                ": keep-alive\n",
                "event: completion\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n",
            ],
        );

        assert_eq!(events, vec![delta("hi")]);
        assert_eq!(decoder.skipped(), 0);
    }
}
