//! Legacy two-endpoint transport.
//!
//! `GET /sse` opens a long-lived event stream whose first event names the URL
//! to POST messages to. `POST /messages?sessionId=<id>` hands one JSON message
//! to that session; replies travel back over the event stream.

use super::body::{sse_response, text_response, HttpBody};
use super::{is_json_content, read_body, register_session, AppContext};
use crate::error::MuxError;
use crate::session::ProtocolVariant;
use crate::transport::sse::{self, SseBody};
use crate::transport::{SessionTransport, STREAM_CAPACITY};
use bytes::Bytes;
use http::{Request, Response, StatusCode, Uri};
use http_body::Body;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Query parameter naming the target session on the message endpoint.
pub const SESSION_ID_PARAM: &str = "sessionId";

/// Open a legacy session and its event stream.
///
/// The session lives exactly as long as the stream: dropping the response
/// body closes the transport, which unregisters it before the drop returns.
/// Closing the transport from the engine side drops the stream's only sender
/// and ends the body.
pub(crate) fn establish(ctx: &Arc<AppContext>) -> Result<Response<HttpBody>, MuxError> {
    let (transport, link) = SessionTransport::new_legacy();
    let (tx, rx) = mpsc::channel(STREAM_CAPACITY);

    let endpoint = ctx.config.legacy_endpoint(transport.id());
    tx.try_send(sse::endpoint_event(&endpoint))
        .map_err(|e| MuxError::Internal(format!("failed to queue endpoint event: {e}")))?;
    transport.attach_standalone(tx)?;
    register_session(ctx, &transport, link)?;

    let body = SseBody::new(rx, ctx.config.sse_keep_alive).on_drop(move || {
        if !transport.is_closed() {
            debug!(session_id = %transport.id(), "Legacy event stream disconnected");
            transport.close();
        }
    });
    Ok(sse_response(body))
}

/// Forward one message to a legacy session.
pub(crate) async fn deliver<B>(
    ctx: &Arc<AppContext>,
    req: Request<B>,
) -> Result<Response<HttpBody>, MuxError>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let transport = session_param(req.uri())
        .and_then(|id| ctx.registry.get(ProtocolVariant::LegacySse, &id).ok())
        .ok_or(MuxError::NoTransportFound)?;

    if !is_json_content(req.headers()) {
        return Err(MuxError::UnsupportedMediaType);
    }
    let body = read_body(req.into_body(), ctx.config.max_body_bytes).await?;
    let message: Value =
        serde_json::from_slice(&body).map_err(|e| MuxError::Parse(e.to_string()))?;

    transport.deliver(message).await?;
    Ok(text_response(StatusCode::ACCEPTED, "Accepted"))
}

fn session_param(uri: &Uri) -> Option<String> {
    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == SESSION_ID_PARAM)
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
        .filter(|value| !value.is_empty())
}
