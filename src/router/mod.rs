//! HTTP front door: dispatches requests to the streamable and legacy handlers.
//!
//! | Route                     | Method | Handler                         |
//! |---------------------------|--------|---------------------------------|
//! | `/mcp`                    | POST   | [`streamable`] attach/create/reject |
//! | `/mcp`                    | GET    | [`streamable`] standalone stream |
//! | `/mcp`                    | DELETE | [`streamable`] terminate session |
//! | `/sse`                    | GET    | [`legacy`] establish            |
//! | `/messages?sessionId=<id>`| POST   | [`legacy`] deliver              |

pub mod body;
pub mod legacy;
mod origin;
pub mod streamable;

pub use origin::OriginCheckService;

use self::body::HttpBody;
use crate::config::MuxConfig;
use crate::engine::{EngineLink, ProtocolEngine};
use crate::error::MuxError;
use crate::session::{SessionIdGenerator, SessionRegistry, TimeRandomIdGenerator};
use crate::transport::SessionTransport;
use bytes::Bytes;
use http::{header, HeaderMap, Method, Request, Response};
use http_body::Body;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_service::Service;
use tracing::{debug, error, info, warn};

/// Everything a request handler needs, built once at startup.
pub struct AppContext {
    pub config: MuxConfig,
    pub registry: Arc<SessionRegistry>,
    pub engine: Arc<dyn ProtocolEngine>,
    pub ids: Arc<dyn SessionIdGenerator>,
}

impl AppContext {
    pub fn new(config: MuxConfig, engine: Arc<dyn ProtocolEngine>) -> Self {
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            engine,
            ids: Arc::new(TimeRandomIdGenerator),
        }
    }

    /// Share an existing registry, e.g. one the engine also reports on.
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn SessionIdGenerator>) -> Self {
        self.ids = ids;
        self
    }
}

/// Tower service wrapping [`route`]. Each request runs on its own task so a
/// panicking handler only fails that request.
#[derive(Clone)]
pub struct MuxService {
    ctx: Arc<AppContext>,
}

impl MuxService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

impl<B> Service<Request<B>> for MuxService
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = Response<HttpBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let ctx = Arc::clone(&self.ctx);
        Box::pin(async move {
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            match tokio::spawn(route(ctx, req)).await {
                Ok(response) => Ok(response),
                Err(e) => {
                    error!(%method, %path, "Request handler aborted: {e}");
                    Ok(MuxError::Internal(e.to_string()).into_response())
                }
            }
        })
    }
}

/// Dispatch one request and turn any error into a JSON-RPC rejection.
pub async fn route<B>(ctx: Arc<AppContext>, req: Request<B>) -> Response<HttpBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let result = if path == ctx.config.mcp_path {
        streamable::handle(&ctx, req).await
    } else if path == ctx.config.sse_path {
        if method == Method::GET {
            legacy::establish(&ctx)
        } else {
            Err(MuxError::MethodNotAllowed("GET"))
        }
    } else if path == ctx.config.messages_path {
        if method == Method::POST {
            legacy::deliver(&ctx, req).await
        } else {
            Err(MuxError::MethodNotAllowed("POST"))
        }
    } else {
        Err(MuxError::NotFound)
    };

    result.unwrap_or_else(|e| {
        if e.is_internal() {
            error!(%method, %path, "Request failed: {e}");
        } else {
            debug!(%method, %path, status = %e.status(), "Request rejected: {e}");
        }
        e.into_response()
    })
}

/// Register a freshly built transport, wire its close callback to registry
/// removal and bind it to the engine.
///
/// On a duplicate id the new transport is closed without a callback, so the
/// live session holding that id is left untouched.
pub(crate) fn register_session(
    ctx: &AppContext,
    transport: &Arc<SessionTransport>,
    link: EngineLink,
) -> Result<(), MuxError> {
    let variant = transport.variant();
    let id = transport.id().to_string();

    if let Err(e) = ctx.registry.put(variant, &id, Arc::clone(transport)) {
        transport.close();
        return Err(e.into());
    }

    let registry = Arc::downgrade(&ctx.registry);
    transport.set_on_close(move |id| {
        if let Some(registry) = registry.upgrade() {
            registry.remove(variant, id);
        }
    });

    let engine = Arc::clone(&ctx.engine);
    let session = Arc::clone(transport);
    tokio::spawn(async move {
        match engine.connect(link).await {
            Ok(()) => debug!(session_id = %session.id(), "Engine released session"),
            Err(e) => warn!(session_id = %session.id(), "Engine connection ended: {e}"),
        }
        session.close();
    });

    info!(session_id = %id, %variant, "Session opened");
    Ok(())
}

/// Collect a request body, enforcing the size cap.
pub(crate) async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, MuxError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(MuxError::PayloadTooLarge(limit))
        }
        Err(e) => Err(MuxError::Internal(format!("failed to read request body: {e}"))),
    }
}

/// True if the `Content-Type` media type is `application/json`.
pub(crate) fn is_json_content(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case(body::CONTENT_TYPE_JSON))
}

/// True if the `Accept` header lists `media_type`.
pub(crate) fn accepts(headers: &HeaderMap, media_type: &str) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|item| item.split(';').next())
        .any(|item| item.trim().eq_ignore_ascii_case(media_type))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::engine::EngineFuture;
    use crate::transport::jsonrpc::{self, MessageKind};
    use http_body_util::Full;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Records every inbound message and answers requests with their method
    /// and the session that handled them.
    #[derive(Default, Clone)]
    pub struct EchoEngine {
        pub seen: Arc<Mutex<Vec<(String, Value)>>>,
    }

    impl EchoEngine {
        pub fn seen(&self) -> Vec<(String, Value)> {
            self.seen.lock().expect("lock").clone()
        }
    }

    impl ProtocolEngine for EchoEngine {
        fn connect(&self, mut link: EngineLink) -> EngineFuture {
            let seen = self.seen.clone();
            Box::pin(async move {
                while let Some(message) = link.recv().await {
                    seen.lock()
                        .expect("lock")
                        .push((link.session_id().to_string(), message.clone()));
                    if jsonrpc::classify(&message) == Some(MessageKind::Request) {
                        let reply = json!({
                            "jsonrpc": "2.0",
                            "id": message["id"].clone(),
                            "result": {
                                "method": message["method"].clone(),
                                "session": link.session_id(),
                            },
                        });
                        link.send(reply).await?;
                    }
                }
                Ok(())
            })
        }
    }

    pub fn context_with(engine: EchoEngine, config: MuxConfig) -> Arc<AppContext> {
        Arc::new(AppContext::new(config, Arc::new(engine)))
    }

    pub fn context(engine: EchoEngine) -> Arc<AppContext> {
        context_with(engine, MuxConfig::default().with_sse_keep_alive_secs(0))
    }

    pub fn request(method: &str, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    pub fn streamable_post(session: Option<&str>, body: Value) -> Request<Full<Bytes>> {
        let mut builder = request("POST", "/mcp")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json, text/event-stream");
        if let Some(id) = session {
            builder = builder.header(streamable::SESSION_ID_HEADER, id);
        }
        builder
            .body(Full::new(Bytes::from(body.to_string())))
            .expect("valid request")
    }

    pub fn empty_body() -> Full<Bytes> {
        Full::new(Bytes::new())
    }

    pub async fn body_text(response: Response<HttpBody>) -> String {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("infallible")
            .to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    pub async fn body_json(response: Response<HttpBody>) -> Value {
        serde_json::from_str(&body_text(response).await).expect("json body")
    }

    /// JSON payloads of every `data:` line in an SSE transcript.
    pub fn sse_data(text: &str) -> Vec<Value> {
        text.lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .filter_map(|data| serde_json::from_str(data).ok())
            .collect()
    }

    pub fn initialize(id: i64) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "0"}
            }
        })
    }

    pub fn call(id: i64, method: &str) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "method": method})
    }

    pub async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not met in time");
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::session::ProtocolVariant;
    use http::StatusCode;

    struct PanickingIds;

    impl SessionIdGenerator for PanickingIds {
        fn generate(&self) -> String {
            panic!("entropy source unavailable")
        }
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let ctx = context(EchoEngine::default());
        let response = route(
            ctx,
            request("GET", "/nope").body(empty_body()).expect("request"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], -32000);
    }

    #[tokio::test]
    async fn legacy_routes_reject_wrong_methods() {
        let ctx = context(EchoEngine::default());
        let response = route(
            ctx.clone(),
            request("POST", "/sse").body(empty_body()).expect("request"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = route(
            ctx,
            request("GET", "/messages?sessionId=x")
                .body(empty_body())
                .expect("request"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn panicking_handler_degrades_to_500() {
        let engine = EchoEngine::default();
        let ctx = Arc::new(
            AppContext::new(MuxConfig::default(), Arc::new(engine))
                .with_id_generator(Arc::new(PanickingIds)),
        );
        let mut service = MuxService::new(ctx.clone());

        let response = service
            .call(streamable_post(None, initialize(1)))
            .await
            .expect("infallible");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32603);
        assert_eq!(ctx.registry.len(ProtocolVariant::Streamable), 0);
    }

    #[tokio::test]
    async fn engine_exit_closes_and_unregisters_session() {
        struct QuitEngine;
        impl ProtocolEngine for QuitEngine {
            fn connect(&self, _link: EngineLink) -> crate::engine::EngineFuture {
                Box::pin(async { Ok(()) })
            }
        }

        let ctx = Arc::new(AppContext::new(MuxConfig::default(), Arc::new(QuitEngine)));
        let (transport, link) = SessionTransport::new("s".into(), ProtocolVariant::Streamable);
        register_session(&ctx, &transport, link).expect("register");

        let registry = ctx.registry.clone();
        wait_until(|| !registry.contains(ProtocolVariant::Streamable, "s")).await;
        assert!(transport.is_closed());
    }

    #[test]
    fn accept_and_content_type_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            "application/json;q=0.9, Text/Event-Stream".parse().expect("header"),
        );
        headers.insert(
            header::CONTENT_TYPE,
            "application/json; charset=utf-8".parse().expect("header"),
        );
        assert!(accepts(&headers, "application/json"));
        assert!(accepts(&headers, "text/event-stream"));
        assert!(!accepts(&headers, "text/html"));
        assert!(is_json_content(&headers));

        headers.insert(header::CONTENT_TYPE, "text/plain".parse().expect("header"));
        assert!(!is_json_content(&headers));
    }
}
