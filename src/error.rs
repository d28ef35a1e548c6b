//! Error types for request routing.
//!
//! Every rejection is rendered as a JSON-RPC error envelope with a null id.
//! Client-attributable routing failures use `-32000`; unexpected failures use
//! `-32603` and never leak their detail to the client.

use crate::router::body::{self, HttpBody};
use crate::session::RegistryError;
use crate::transport::TransportError;
use http::{header, HeaderValue, Response, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;

/// Request-routing or session error.
pub const ROUTING_ERROR: i32 = -32000;
/// Invalid JSON was received.
pub const PARSE_ERROR: i32 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i32 = -32600;
/// Unexpected internal failure.
pub const INTERNAL_ERROR: i32 = -32603;

/// Errors surfaced to HTTP clients, classified by status and JSON-RPC code.
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("Bad Request: No valid session ID provided")]
    NoValidSession,

    #[error("Bad Request: Invalid or missing session ID")]
    InvalidOrMissingSession,

    #[error("No transport found for sessionId")]
    NoTransportFound,

    #[error("Bad Request: Session is closed")]
    SessionClosed,

    #[error("Not Acceptable: {0}")]
    NotAcceptable(&'static str),

    #[error("Unsupported Media Type: Content-Type must be application/json")]
    UnsupportedMediaType,

    #[error("Payload Too Large: body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid Request: {0}")]
    InvalidRequest(String),

    #[error("Conflict: Only one SSE stream is allowed per session")]
    StreamConflict,

    #[error("Method not allowed")]
    MethodNotAllowed(&'static str),

    #[error("Not Found")]
    NotFound,

    #[error("Duplicate session id: {0}")]
    DuplicateSession(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MuxError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoValidSession
            | Self::InvalidOrMissingSession
            | Self::NoTransportFound
            | Self::SessionClosed
            | Self::Parse(_)
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::StreamConflict => StatusCode::CONFLICT,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::DuplicateSession(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => PARSE_ERROR,
            Self::InvalidRequest(_) => INVALID_REQUEST,
            Self::DuplicateSession(_) | Self::Internal(_) => INTERNAL_ERROR,
            _ => ROUTING_ERROR,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.code() == INTERNAL_ERROR
    }

    /// Message shown to the client. Internal details stay in the logs.
    pub fn client_message(&self) -> String {
        if self.is_internal() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "jsonrpc": "2.0",
            "error": {
                "code": self.code(),
                "message": self.client_message(),
            },
            "id": Value::Null,
        })
    }

    pub fn into_response(self) -> Response<HttpBody> {
        let mut response = body::json_response(self.status(), &self.to_json());
        if let Self::MethodNotAllowed(allow) = self {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static(allow));
        }
        response
    }
}

impl From<RegistryError> for MuxError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::DuplicateSession { id, .. } => MuxError::DuplicateSession(id),
            RegistryError::NotFound { .. } => MuxError::NoValidSession,
        }
    }
}

impl From<TransportError> for MuxError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Closed => MuxError::SessionClosed,
            TransportError::StreamConflict => MuxError::StreamConflict,
            TransportError::DuplicateRequestId(id) => {
                MuxError::InvalidRequest(format!("request id {id} is already in flight"))
            }
        }
    }
}
