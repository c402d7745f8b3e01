use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName, HeaderValue},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use docsight::client::Invocation;
use docsight::transport::{self, STREAM_PROTOCOL_HEADER, STREAM_PROTOCOL_VERSION};
use docsight::validator::RawRequest;
use futures::{stream::StreamExt, Stream};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// How often the relay checks for a disconnected client while the model is
/// quiet.
const HEARTBEAT: Duration = Duration::from_millis(500);

// Streamed body carrying data stream protocol lines as they are produced
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        (
            [
                (
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                ),
                (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
                (
                    HeaderName::from_static(STREAM_PROTOCOL_HEADER),
                    HeaderValue::from_static(STREAM_PROTOCOL_VERSION),
                ),
            ],
            Body::from_stream(self),
        )
            .into_response()
    }
}

/// Forward encoded lines to the client until the invocation ends or the
/// client goes away, in which case the invocation is cancelled.
async fn relay(invocation: Invocation, tx: mpsc::Sender<String>) {
    let message_id = invocation.message_id();
    let cancel = invocation.cancel_handle();
    let mut lines = Box::pin(transport::encode(invocation));

    loop {
        match timeout(HEARTBEAT, lines.next()).await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    info!(message_id = %message_id, "client disconnected, cancelling generation");
                    cancel.cancel();
                    break;
                }
            }
            Ok(None) => {
                debug!(message_id = %message_id, "stream relayed");
                break;
            }
            Err(_) => {
                // Heartbeat, used to detect disconnected clients
                if tx.is_closed() {
                    info!(message_id = %message_id, "client disconnected, cancelling generation");
                    cancel.cancel();
                    break;
                }
            }
        }
    }
}

async fn handler(
    State(state): State<AppState>,
    payload: Result<Json<RawRequest>, JsonRejection>,
) -> Result<SseResponse, ApiError> {
    let Json(request) = payload?;
    let invocation = state.analyzer.analyze(request)?;

    let (tx, rx) = mpsc::channel(100);
    tokio::spawn(relay(invocation, tx));

    Ok(SseResponse::new(ReceiverStream::new(rx)))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(handler))
        .with_state(state)
}
