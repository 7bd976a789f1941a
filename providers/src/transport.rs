//! The HTTP transport seam.
//!
//! Vendors are reached through [`SdkTransport`], so the pipeline never
//! depends on a concrete HTTP stack. The provided [`HttpTransport`] speaks
//! JSON-over-SSE; responses surface as a pull-stream of vendor chunk JSON
//! values, framed line-by-line as the bytes arrive.

use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::Value;

use crate::error::SdkError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Ceiling on unframed SSE bytes held in memory (8 MiB). A server that
/// streams this much without a frame boundary is misbehaving.
const SSE_PENDING_CAP: usize = 8 << 20;

/// Ceiling on error-body bytes read back for diagnostics (16 KiB).
const ERROR_BODY_CAP: usize = 16 << 10;

/// Pull-stream of vendor chunk values.
pub type RawChunkStream = Pin<Box<dyn Stream<Item = Result<Value, SdkError>> + Send>>;

/// Native vendor output: a chunk stream or one response object.
pub enum RawSdkOutput {
    Stream(RawChunkStream),
    Single(Value),
}

impl std::fmt::Debug for RawSdkOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawSdkOutput::Stream(_) => f.write_str("RawSdkOutput::Stream(..)"),
            RawSdkOutput::Single(value) => write!(f, "RawSdkOutput::Single({value})"),
        }
    }
}

/// One outbound vendor request.
#[derive(Debug, Clone)]
pub struct SdkRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
    /// Whether the endpoint will answer with an SSE stream.
    pub stream: bool,
}

/// Named transport seam; the default implementation is [`HttpTransport`].
#[async_trait]
pub trait SdkTransport: Send + Sync {
    async fn send(&self, request: SdkRequest) -> Result<RawSdkOutput, SdkError>;
}

/// Shared HTTP client. Only the connect phase is bounded; SSE streams run
/// for as long as the model generates. Redirects are refused (API
/// endpoints never redirect) and plain HTTP is rejected outright.
fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .https_only(true)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("build shared HTTP client")
    })
}

/// reqwest-backed [`SdkTransport`].
#[derive(Debug, Default, Clone)]
pub struct HttpTransport;

#[async_trait]
impl SdkTransport for HttpTransport {
    async fn send(&self, request: SdkRequest) -> Result<RawSdkOutput, SdkError> {
        let mut builder = http_client().post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        let response = builder.json(&request.body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = error_body_excerpt(response).await;
            return Err(SdkError::Api { status, message });
        }

        if request.stream {
            Ok(RawSdkOutput::Stream(sse_value_stream(
                response.bytes_stream(),
            )))
        } else {
            let value = response.json::<Value>().await?;
            Ok(RawSdkOutput::Single(value))
        }
    }
}

/// Drain an error response into a bounded excerpt for the error message.
async fn error_body_excerpt(response: reqwest::Response) -> String {
    let mut stream = response.bytes_stream();
    let mut collected: Vec<u8> = Vec::with_capacity(1024);
    let mut truncated = false;

    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        let room = ERROR_BODY_CAP - collected.len();
        if chunk.len() >= room {
            collected.extend_from_slice(&chunk[..room]);
            truncated = true;
            break;
        }
        collected.extend_from_slice(&chunk);
    }

    let mut text = String::from_utf8_lossy(&collected).into_owned();
    if truncated {
        text.push_str("…(truncated)");
    }
    text
}

// ── SSE framing ─────────────────────────────────────────────────────────

/// Locate the first complete event frame in `buf`.
///
/// An SSE frame ends at a blank line; line terminators may be LF or CRLF,
/// mixed freely. Returns `(body_len, consumed)`: the frame body runs to
/// `body_len`, and `consumed` bytes (body plus blank line) are done with.
fn frame_split(buf: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if byte != b'\n' {
            continue;
        }
        let line = &buf[line_start..i];
        if line.is_empty() || line == b"\r" {
            return Some((line_start, i + 1));
        }
        line_start = i + 1;
    }
    None
}

/// Collect the `data:` payload of one frame. Frames carrying no data
/// lines (comments, event names, retry hints) yield `None`; multiple data
/// lines rejoin with newlines per the SSE spec.
fn frame_data(frame: &str) -> Option<String> {
    let payload: Vec<&str> = frame
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("data:")?;
            Some(rest.strip_prefix(' ').unwrap_or(rest))
        })
        .collect();
    if payload.is_empty() {
        None
    } else {
        Some(payload.join("\n"))
    }
}

struct SseState<S> {
    stream: Pin<Box<S>>,
    /// Bytes received but not yet framed.
    pending: Vec<u8>,
    closed: bool,
}

impl<S> SseState<S> {
    /// Split the next complete frame off the front of `pending`.
    fn take_frame(&mut self) -> Option<String> {
        let (body_len, consumed) = frame_split(&self.pending)?;
        let rest = self.pending.split_off(consumed);
        let mut frame = std::mem::replace(&mut self.pending, rest);
        frame.truncate(body_len);
        match String::from_utf8(frame) {
            Ok(frame) => Some(frame),
            Err(_) => {
                // A garbled frame is dropped; the stream itself goes on.
                tracing::warn!("Dropping SSE frame with invalid UTF-8");
                Some(String::new())
            }
        }
    }
}

/// Adapt a byte stream carrying SSE events into a stream of parsed JSON
/// chunk values. `[DONE]` sentinels and EOF both end the stream; vendor
/// end-of-message events are the chunk transformer's business.
pub fn sse_value_stream<S, B>(byte_stream: S) -> RawChunkStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]>,
{
    let state = SseState {
        stream: Box::pin(byte_stream),
        pending: Vec::new(),
        closed: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if state.closed {
                return None;
            }

            while let Some(frame) = state.take_frame() {
                let Some(data) = frame_data(&frame) else {
                    continue;
                };
                if data == "[DONE]" {
                    state.closed = true;
                    return None;
                }
                match serde_json::from_str::<Value>(&data) {
                    Ok(value) => return Some((Ok(value), state)),
                    // Tolerate non-JSON data lines (pings, keepalives).
                    Err(e) => tracing::debug!("Skipping unparseable SSE data: {e}"),
                }
            }

            match state.stream.next().await {
                Some(Ok(chunk)) => {
                    state.pending.extend_from_slice(chunk.as_ref());
                    if state.pending.len() > SSE_PENDING_CAP {
                        state.closed = true;
                        return Some((Err(SdkError::StreamTooLarge), state));
                    }
                }
                Some(Err(e)) => {
                    state.closed = true;
                    return Some((Err(SdkError::Network(e)), state));
                }
                None => {
                    state.closed = true;
                    return None;
                }
            }
        }
    }))
}
