//! Relays the host's SSE byte stream to the browser.
//!
//! Chunks are forwarded as they arrive. Upstream failures are reported in-band
//! as a single `data: {"error": ...}` frame followed by end-of-stream, since
//! the response headers have already been sent by then.

use std::convert::Infallible;
use std::fmt::Display;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde_json::json;
use tracing::warn;

/// Longest upstream error body echoed back to the client, in chars.
const ERROR_BODY_EXCERPT: usize = 500;

pub type FrameStream = BoxStream<'static, Result<String, Infallible>>;

/// One SSE frame carrying `{"error": message}`.
pub fn error_frame(message: &str) -> String {
    format!("data: {}\n\n", json!({ "error": message }))
}

/// Relay an upstream response. A non-success status becomes one error frame.
pub fn relay_response(response: reqwest::Response) -> FrameStream {
    let status = response.status();
    if status.is_success() {
        return relay_chunks(response.bytes_stream()).boxed();
    }

    async_stream::stream! {
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                warn!(err = %err, "failed to read upstream error body");
                String::new()
            }
        };
        let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
        warn!(status = status.as_u16(), "orchestrator returned error");
        yield Ok::<_, Infallible>(error_frame(&format!(
            "Orchestrator returned error ({}): {excerpt}",
            status.as_u16()
        )));
    }
    .boxed()
}

/// Forward decoded chunks in order, ending with one error frame if the
/// underlying stream fails.
pub fn relay_chunks<S, B, E>(
    chunks: S,
) -> impl Stream<Item = Result<String, Infallible>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let mut chunks = Box::pin(chunks);
        let mut decoder = Utf8ChunkDecoder::default();
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    let text = decoder.push(bytes.as_ref());
                    if !text.is_empty() {
                        yield Ok::<_, Infallible>(text);
                    }
                }
                Err(err) => {
                    let message = format!("Stream error: {err}");
                    warn!(err = %message, "upstream stream failed");
                    yield Ok(error_frame(&message));
                    break;
                }
            }
        }
    }
}

/// Incremental UTF-8 decoder.
///
/// A multi-byte sequence split across chunks is held back until it
/// completes. Invalid bytes are dropped.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        out.push_str(valid);
                    }
                    match err.error_len() {
                        Some(invalid) => rest = &after[invalid..],
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let carry = rest.to_vec();
        self.pending = carry;
        out
    }
}
