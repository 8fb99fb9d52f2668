//! Streaming relay from a committed upstream to the caller
//!
//! Once the first upstream event has been received the stream is committed:
//! a background task forwards the remaining events, in order and unmodified,
//! through a bounded channel whose receiving end is the downstream body. The
//! channel bound gives backpressure; when the caller goes away the receiver is
//! dropped, the task notices and drops the upstream stream, which closes the
//! upstream connection.
//!
//! A committed stream is never retried. If the upstream fails part-way, the
//! caller gets the events already relayed followed by one `event: error`.

use crate::error::GatewayError;
use crate::gateway::attempt::AttemptOutcome;
use crate::gateway::sse::{SseEvents, error_event, is_done_event};
use crate::metrics::Metrics;
use crate::middleware::request_id::RequestId;
use crate::models::{EndpointName, HealthTracker};
use crate::upstream::ForwardError;
use axum::body::Body;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Downstream side of a committed stream
#[derive(Debug)]
pub struct StreamSession {
    endpoint: EndpointName,
    receiver: mpsc::Receiver<Result<Bytes, Infallible>>,
}

impl StreamSession {
    /// Endpoint this stream is pinned to
    pub fn endpoint(&self) -> &EndpointName {
        &self.endpoint
    }

    /// Body yielding each relayed SSE event as one frame
    pub fn into_body(self) -> Body {
        Body::from_stream(ReceiverStream::new(self.receiver))
    }
}

impl IntoResponse for StreamSession {
    fn into_response(self) -> Response {
        let mut response = self.into_body().into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
        response
    }
}

/// Everything the relay task needs besides the stream itself
pub(crate) struct RelayContext {
    pub endpoint: EndpointName,
    pub request_id: RequestId,
    pub health: Arc<HealthTracker>,
    pub metrics: Arc<Metrics>,
    pub idle_timeout: Duration,
    pub buffer: usize,
}

/// Start relaying a committed stream
///
/// `prelude` holds the events already read from upstream (the commit event and
/// any keep-alive comments before it); `events` is the rest of the stream.
pub(crate) fn spawn_relay<S>(
    ctx: RelayContext,
    prelude: Vec<Bytes>,
    events: SseEvents<S>,
) -> StreamSession
where
    S: Stream<Item = Result<Bytes, ForwardError>> + Unpin + Send + 'static,
{
    let (tx, receiver) = mpsc::channel(ctx.buffer.max(1));
    let endpoint = ctx.endpoint.clone();
    tokio::spawn(relay(ctx, prelude, events, tx));
    StreamSession { endpoint, receiver }
}

async fn relay<S>(
    ctx: RelayContext,
    prelude: Vec<Bytes>,
    mut events: SseEvents<S>,
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
) where
    S: Stream<Item = Result<Bytes, ForwardError>> + Unpin,
{
    let mut relayed = 0usize;

    for event in prelude {
        let done = is_done_event(&event);
        if tx.send(Ok(event)).await.is_err() {
            downstream_gone(&ctx, relayed);
            return;
        }
        relayed += 1;
        if done {
            finished(&ctx, relayed);
            return;
        }
    }

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                downstream_gone(&ctx, relayed);
                return;
            }
            next = tokio::time::timeout(ctx.idle_timeout, events.next()) => next,
        };

        let reason = match next {
            Ok(Some(Ok(event))) => {
                let done = is_done_event(&event);
                if tx.send(Ok(event)).await.is_err() {
                    downstream_gone(&ctx, relayed);
                    return;
                }
                relayed += 1;
                if done {
                    finished(&ctx, relayed);
                    return;
                }
                continue;
            }
            Ok(Some(Err(e))) => e.to_string(),
            Ok(None) => "upstream closed the stream before [DONE]".to_string(),
            Err(_) => format!(
                "no data from upstream for {}s",
                ctx.idle_timeout.as_secs_f64()
            ),
        };

        let failure = GatewayError::PartialStreamFailure {
            endpoint: ctx.endpoint.to_string(),
            events_relayed: relayed,
            reason,
        };
        tracing::warn!(
            request_id = %ctx.request_id,
            endpoint_name = %ctx.endpoint,
            events_relayed = relayed,
            error = %failure,
            "Stream failed after commit, closing with error event"
        );

        ctx.metrics.record_mid_stream_failure(ctx.endpoint.as_str());
        if let Err(e) = ctx
            .health
            .record(ctx.endpoint.as_str(), AttemptOutcome::ConnectionError)
            .await
        {
            tracing::warn!(error = %e, "Failed to record mid-stream failure");
        }

        // Best effort: the caller may already be gone
        let _ = tx.send(Ok(error_event(&failure.to_string()))).await;
        return;
    }
}

fn finished(ctx: &RelayContext, relayed: usize) {
    tracing::debug!(
        request_id = %ctx.request_id,
        endpoint_name = %ctx.endpoint,
        events_relayed = relayed,
        "Stream completed"
    );
}

fn downstream_gone(ctx: &RelayContext, relayed: usize) {
    tracing::info!(
        request_id = %ctx.request_id,
        endpoint_name = %ctx.endpoint,
        events_relayed = relayed,
        "Caller disconnected, cancelling upstream stream"
    );
}
