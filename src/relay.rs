//! Streaming relay to the upstream completions endpoint.
//!
//! One inbound chat request maps to exactly one upstream HTTP call and one
//! caller-facing event stream. There are no retries and no shared state
//! between requests: failure is terminal and surfaced once. The upstream
//! connection's lifetime is bounded by the returned stream's lifetime; a
//! guard releases it on every exit path, including the caller dropping the
//! stream mid-flight.

use crate::config::ResolvedProvider;
use crate::error::{AppError, Result};
use crate::logging::SharedLogger;
use crate::translate::streaming::{DeltaDecoder, StreamEvent};
use crate::translate::upstream_types::{
    CompletionRequest, CompletionResponse, UpstreamErrorResponse,
};

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// The caller-facing relay stream: lazy, finite, forward-only.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Counters covering every relay this process has run. `streams_opened`
/// equals `streams_closed` whenever no stream is in flight.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    streams_opened: AtomicU64,
    streams_closed: AtomicU64,
    frames_skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub streams_opened: u64,
    pub streams_closed: u64,
    pub frames_skipped: u64,
}

impl RelayMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            streams_closed: self.streams_closed.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
        }
    }

    fn record_open(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
    }

    fn record_skipped(&self, count: u64) {
        self.frames_skipped.fetch_add(count, Ordering::Relaxed);
    }
}

/// Releases the upstream connection accounting when the relay stream goes
/// away, however it goes away.
struct StreamGuard {
    metrics: Arc<RelayMetrics>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.metrics.streams_closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Open a single streaming call upstream and relay its text deltas.
///
/// Returns `Err` if the connection fails or the initial response status is
/// not successful; in that case no events were produced and the caller can
/// still answer with an error status. After `Ok`, failures travel inside the
/// stream as a terminal `Err` item.
pub async fn open_stream(
    req: &CompletionRequest,
    provider: &ResolvedProvider,
    idle_timeout: Duration,
    client: &reqwest::Client,
    logger: &SharedLogger,
    metrics: &Arc<RelayMetrics>,
) -> Result<EventStream> {
    let url = completions_url(&provider.base_url);
    let request_id = Uuid::new_v4();

    logger.info(
        "relay",
        format!("POST {} model={} id={} (streaming)", url, req.model, request_id),
    );

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", provider.api_key))
        .header("Content-Type", "application/json")
        .json(req)
        .send()
        .await
        .map_err(|e| AppError::upstream(format!("Streaming request failed: {e}")))?;

    let status = response.status().as_u16();
    if status >= 400 {
        let body = response.text().await.unwrap_or_default();
        let message = upstream_error_message(status, &body);
        logger.warn("relay", format!("id={} {}", request_id, message));
        return Err(AppError::upstream(message));
    }

    metrics.record_open();
    let guard = StreamGuard {
        metrics: Arc::clone(metrics),
    };

    let byte_stream = response.bytes_stream();
    let events = relay_events(
        byte_stream,
        idle_timeout,
        logger.clone(),
        Arc::clone(metrics),
        request_id,
        guard,
    );

    Ok(Box::pin(events))
}

/// Forward a non-streaming completion call upstream and return the parsed
/// response.
pub async fn complete(
    req: &CompletionRequest,
    provider: &ResolvedProvider,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<CompletionResponse> {
    let url = completions_url(&provider.base_url);

    logger.info("relay", format!("POST {} model={}", url, req.model));

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", provider.api_key))
        .header("Content-Type", "application/json")
        .json(req)
        .send()
        .await
        .map_err(|e| AppError::upstream(format!("Request failed: {e}")))?;

    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| AppError::upstream(format!("Failed to read response body: {e}")))?;

    if status >= 400 {
        let message = upstream_error_message(status, &body);
        logger.warn("relay", message.clone());
        return Err(AppError::upstream(message));
    }

    let parsed: CompletionResponse = serde_json::from_str(&body).map_err(|e| {
        AppError::upstream(format!(
            "Failed to parse upstream response: {}. Body: {}",
            e,
            truncate(&body, 300)
        ))
    })?;

    if let Some(ref usage) = parsed.usage {
        logger.info(
            "relay",
            format!(
                "Completed: in={} out={} tokens",
                usage.prompt_tokens, usage.completion_tokens
            ),
        );
    }

    Ok(parsed)
}

/// Read upstream bytes and decode them into relay events as they arrive.
fn relay_events(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    idle_timeout: Duration,
    logger: SharedLogger,
    metrics: Arc<RelayMetrics>,
    request_id: Uuid,
    guard: StreamGuard,
) -> impl Stream<Item = Result<StreamEvent>> + Send + 'static {
    async_stream::stream! {
        // Held across every yield so dropping the stream releases the
        // upstream accounting as well.
        let _guard = guard;
        let mut decoder = DeltaDecoder::new();
        let mut errored = false;

        tokio::pin!(byte_stream);

        loop {
            let chunk = match tokio::time::timeout(idle_timeout, byte_stream.next()).await {
                Err(_) => {
                    logger.error(
                        "relay",
                        format!("id={} idle for {:?}, aborting stream", request_id, idle_timeout),
                    );
                    errored = true;
                    yield Err(AppError::stream("Upstream idle timeout exceeded"));
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    logger.error("relay", format!("id={} read failed: {}", request_id, e));
                    errored = true;
                    yield Err(AppError::stream(format!("Upstream read failed: {e}")));
                    break;
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            for event in decoder.feed(&chunk) {
                yield Ok(event);
            }

            // Terminal frame seen; stop reading so the connection drops now
            if decoder.is_finished() {
                break;
            }
        }

        // The error is terminal; only a clean end-of-stream flushes the tail
        if !errored {
            for event in decoder.finish() {
                yield Ok(event);
            }
        }

        let skipped = decoder.skipped();
        if skipped > 0 {
            metrics.record_skipped(skipped);
            logger.warn(
                "relay",
                format!("id={} skipped {} malformed frames", request_id, skipped),
            );
        }

        logger.info("relay", format!("id={} stream completed", request_id));
    }
}

fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn upstream_error_message(status: u16, body: &str) -> String {
    if let Ok(err) = serde_json::from_str::<UpstreamErrorResponse>(body) {
        format!("Upstream returned status {}: {}", status, err.error.message)
    } else {
        format!(
            "Upstream returned status {}: {}",
            status,
            truncate(body, 300)
        )
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completions_url_trims_trailing_slash() {
        assert_eq!(
            completions_url("http://localhost:8123/v1/"),
            "http://localhost:8123/v1/chat/completions"
        );
    }

    #[test]
    fn test_upstream_error_message_prefers_parsed_body() {
        let body = r#"{"error":{"message":"model not found","type":"invalid_request_error"}}"#;
        assert_eq!(
            upstream_error_message(404, body),
            "Upstream returned status 404: model not found"
        );

        let msg = upstream_error_message(502, "<html>gateway</html>");
        assert!(msg.contains("502"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("ab", 5), "ab");
        // must not panic mid-character
        assert_eq!(truncate("\u{e9}\u{e9}\u{e9}", 2), "\u{e9}\u{e9}");
    }

    #[test]
    fn test_relay_events_decodes_and_closes() {
        let metrics = Arc::new(RelayMetrics::default());
        metrics.record_open();
        let guard = StreamGuard {
            metrics: Arc::clone(&metrics),
        };
        let dir = tempfile::tempdir().unwrap();
        let logger = SharedLogger::new(dir.path().join("relay-test.log")).unwrap();

        let chunks: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n",
            )),
            Ok(Bytes::from_static(b"data: [DONE]\n")),
        ];

        let events: Vec<_> = tokio_test::block_on(
            relay_events(
                tokio_stream::iter(chunks),
                Duration::from_secs(5),
                logger,
                Arc::clone(&metrics),
                Uuid::new_v4(),
                guard,
            )
            .collect::<Vec<_>>(),
        );

        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            Ok(StreamEvent::TextDelta { ref text }) if text == "Hi"
        ));
        assert!(matches!(events[1], Ok(StreamEvent::Finish { .. })));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.streams_opened, snapshot.streams_closed);
    }
}
