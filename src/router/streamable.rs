//! Streamable HTTP endpoint (`/mcp`).
//!
//! A POST either attaches to the session named in `mcp-session-id`, creates a
//! session when the body is an `initialize` request without that header, or
//! is rejected. Requests are answered on an SSE stream scoped to the POST, or
//! as one JSON body when the server runs in JSON-response mode.

use super::body::{
    empty_response, json_response, sse_response, HttpBody, CONTENT_TYPE_JSON, CONTENT_TYPE_SSE,
};
use super::{accepts, is_json_content, read_body, register_session, AppContext};
use crate::error::MuxError;
use crate::session::ProtocolVariant;
use crate::transport::jsonrpc::InboundBatch;
use crate::transport::sse::SseBody;
use crate::transport::{SessionTransport, STREAM_CAPACITY};
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use http_body::Body;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Header carrying the streamable session id in both directions.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

const ALLOWED_METHODS: &str = "GET, POST, DELETE";

pub(crate) async fn handle<B>(
    ctx: &Arc<AppContext>,
    req: Request<B>,
) -> Result<Response<HttpBody>, MuxError>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match *req.method() {
        Method::POST => post(ctx, req).await,
        Method::GET => open_standalone(ctx, req.headers()),
        Method::DELETE => terminate(ctx, req.headers()),
        _ => Err(MuxError::MethodNotAllowed(ALLOWED_METHODS)),
    }
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Resolve the session named by the header for GET and DELETE.
fn resolve(ctx: &AppContext, headers: &HeaderMap) -> Result<Arc<SessionTransport>, MuxError> {
    session_header(headers)
        .and_then(|id| ctx.registry.get(ProtocolVariant::Streamable, &id).ok())
        .ok_or(MuxError::InvalidOrMissingSession)
}

fn with_session(mut response: Response<HttpBody>, session_id: &str) -> Response<HttpBody> {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    response
}

async fn post<B>(ctx: &Arc<AppContext>, req: Request<B>) -> Result<Response<HttpBody>, MuxError>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let headers = req.headers();
    if !accepts(headers, CONTENT_TYPE_JSON) || !accepts(headers, CONTENT_TYPE_SSE) {
        return Err(MuxError::NotAcceptable(
            "Client must accept both application/json and text/event-stream",
        ));
    }
    if !is_json_content(headers) {
        return Err(MuxError::UnsupportedMediaType);
    }
    let session_id = session_header(headers);

    let body = read_body(req.into_body(), ctx.config.max_body_bytes).await?;
    let batch = InboundBatch::parse(&body)?;

    let transport = match session_id {
        Some(id) => {
            let transport = ctx
                .registry
                .get(ProtocolVariant::Streamable, &id)
                .map_err(|_| MuxError::NoValidSession)?;
            if batch.has_initialize() {
                return Err(MuxError::InvalidRequest(
                    "Server already initialized".to_string(),
                ));
            }
            debug!(session_id = %id, messages = batch.len(), "Routing POST to existing session");
            transport
        }
        None if batch.has_initialize() => {
            if batch.len() > 1 {
                return Err(MuxError::InvalidRequest(
                    "Only one initialization request is allowed".to_string(),
                ));
            }
            open_session(ctx)?
        }
        None => return Err(MuxError::NoValidSession),
    };

    respond(ctx, &transport, batch).await
}

fn open_session(ctx: &AppContext) -> Result<Arc<SessionTransport>, MuxError> {
    let id = ctx.ids.generate();
    let (transport, link) = SessionTransport::new(id, ProtocolVariant::Streamable);
    register_session(ctx, &transport, link)?;
    Ok(transport)
}

async fn respond(
    ctx: &AppContext,
    transport: &Arc<SessionTransport>,
    batch: InboundBatch,
) -> Result<Response<HttpBody>, MuxError> {
    let keys = batch.request_keys();
    let is_batch = batch.is_batch();

    // Notifications and responses only: nothing to wait for.
    if keys.is_empty() {
        transport.deliver_all(batch.into_messages()).await?;
        return Ok(with_session(
            empty_response(StatusCode::ACCEPTED),
            transport.id(),
        ));
    }

    if ctx.config.json_response {
        let replies = transport.open_json_stream(keys)?;
        transport.deliver_all(batch.into_messages()).await?;
        let mut replies = replies.await.map_err(|_| MuxError::SessionClosed)?;
        let value = if is_batch {
            Value::Array(replies)
        } else {
            replies.pop().unwrap_or(Value::Null)
        };
        return Ok(with_session(
            json_response(StatusCode::OK, &value),
            transport.id(),
        ));
    }

    let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
    transport.open_sse_stream(keys, tx)?;
    transport.deliver_all(batch.into_messages()).await?;
    Ok(with_session(
        sse_response(SseBody::new(rx, ctx.config.sse_keep_alive)),
        transport.id(),
    ))
}

fn open_standalone(
    ctx: &AppContext,
    headers: &HeaderMap,
) -> Result<Response<HttpBody>, MuxError> {
    let transport = resolve(ctx, headers)?;
    if !accepts(headers, CONTENT_TYPE_SSE) {
        return Err(MuxError::NotAcceptable(
            "Client must accept text/event-stream",
        ));
    }
    let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
    transport.attach_standalone(tx)?;
    debug!(session_id = %transport.id(), "Standalone event stream opened");
    Ok(with_session(
        sse_response(SseBody::new(rx, ctx.config.sse_keep_alive)),
        transport.id(),
    ))
}

fn terminate(ctx: &AppContext, headers: &HeaderMap) -> Result<Response<HttpBody>, MuxError> {
    let transport = resolve(ctx, headers)?;
    transport.close();
    Ok(with_session(empty_response(StatusCode::OK), transport.id()))
}
