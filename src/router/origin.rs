//! `Origin` header allow-list applied in front of the router.

use super::body::{text_response, HttpBody};
use http::header::ORIGIN;
use http::{Request, Response, StatusCode};
use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_service::Service;
use tracing::debug;

/// Rejects browser requests from origins outside the allow list with 403.
/// Requests without an `Origin` header pass through.
#[derive(Clone)]
pub struct OriginCheckService<S> {
    inner: S,
    allowed_origins: Arc<HashSet<String>>,
}

impl<S> OriginCheckService<S> {
    pub fn new(inner: S, allowed_origins: Arc<HashSet<String>>) -> Self {
        Self {
            inner,
            allowed_origins,
        }
    }
}

/// `*` allows everything. An entry without a port matches that origin on any
/// port, so `http://localhost` admits `http://localhost:3000`.
fn origin_allowed(allowed: &HashSet<String>, origin: &str) -> bool {
    if allowed.contains("*") || allowed.contains(origin) {
        return true;
    }
    match origin.rsplit_once(':') {
        Some((base, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            allowed.contains(base)
        }
        _ => false,
    }
}

impl<B, S> Service<Request<B>> for OriginCheckService<S>
where
    B: Send + 'static,
    S: Service<Request<B>, Response = Response<HttpBody>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<HttpBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let allowed_origins = self.allowed_origins.clone();
        let mut inner = self.inner.clone();
        Box::pin(async move {
            if let Some(origin) = req.headers().get(ORIGIN).and_then(|v| v.to_str().ok()) {
                if !origin_allowed(&allowed_origins, origin) {
                    debug!(%origin, "Rejected request from disallowed origin");
                    return Ok(text_response(StatusCode::FORBIDDEN, "Forbidden"));
                }
            }
            inner.call(req).await
        })
    }
}
