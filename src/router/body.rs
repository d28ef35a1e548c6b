//! Response body helpers.

use crate::transport::sse::SseBody;
use bytes::Bytes;
use http::{header, HeaderValue, Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use serde_json::Value;
use std::convert::Infallible;

pub type HttpBody = BoxBody<Bytes, Infallible>;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_SSE: &str = "text/event-stream";

pub fn full(bytes: impl Into<Bytes>) -> HttpBody {
    Full::new(bytes.into()).boxed()
}

pub fn empty() -> HttpBody {
    Empty::<Bytes>::new().boxed()
}

fn with_body(status: StatusCode, body: HttpBody) -> Response<HttpBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

pub fn json_response(status: StatusCode, value: &Value) -> Response<HttpBody> {
    let mut response = with_body(status, full(value.to_string()));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(CONTENT_TYPE_JSON),
    );
    response
}

pub fn text_response(status: StatusCode, text: &'static str) -> Response<HttpBody> {
    let mut response = with_body(status, full(Bytes::from_static(text.as_bytes())));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub fn empty_response(status: StatusCode) -> Response<HttpBody> {
    with_body(status, empty())
}

pub fn sse_response(body: SseBody) -> Response<HttpBody> {
    let mut response = with_body(StatusCode::OK, body.boxed());
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_SSE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}
