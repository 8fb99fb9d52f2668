//! Server-sent event framing
//!
//! Upstreams deliver SSE bodies in arbitrary network chunks: one chunk may hold
//! half an event or several events. [`SseEvents`] re-frames the byte stream into
//! whole events (terminated by a blank line) and yields each one with its bytes
//! untouched, so the relay can forward events verbatim and count them.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use serde_json::json;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Terminal sentinel payload of an OpenAI-compatible stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Stream adapter yielding one complete SSE event per item
pub struct SseEvents<S> {
    inner: S,
    buffer: BytesMut,
    finished: bool,
}

impl<S> SseEvents<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for SseEvents<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if let Some(end) = event_end(&this.buffer) {
                let event = this.buffer.split_to(end).freeze();
                return Poll::Ready(Some(Ok(event)));
            }

            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.buffer.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    this.finished = true;
                    // Unterminated trailing event: hand it over as-is
                    if this.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                        let rest = this.buffer.split().freeze();
                        return Poll::Ready(Some(Ok(rest)));
                    }
                    this.buffer.clear();
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Index just past the first event terminator (`\n\n` or `\r\n\r\n`)
fn event_end(buf: &[u8]) -> Option<usize> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| p + 2);
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4);
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// True if the event carries the `[DONE]` sentinel as its data
pub fn is_done_event(event: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(event) else {
        return false;
    };
    text.lines().any(|line| {
        line.strip_prefix("data:")
            .map(|data| data.trim() == DONE_SENTINEL)
            .unwrap_or(false)
    })
}

/// True if the event contains no `data:` field (comment or keep-alive)
pub fn is_comment_only(event: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(event) else {
        return false;
    };
    text.lines()
        .all(|line| line.trim().is_empty() || line.starts_with(':'))
}

/// Closing event emitted when a relayed stream is cut short
pub fn error_event(message: &str) -> Bytes {
    let payload = json!({
        "error": {
            "message": message,
            "type": "partial_stream_failure",
            "param": null,
            "code": "upstream_disconnected",
        }
    });
    Bytes::from(format!("event: error\ndata: {}\n\n", payload))
}
