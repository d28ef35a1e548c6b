//! Session transports: the per-session object that frames messages between
//! HTTP connections and the protocol engine.
//!
//! Every transport owns two channels. Inbound messages decoded from POST
//! bodies flow to the engine through [`EngineLink`]; outbound engine messages
//! are dispatched by a background task to whichever HTTP stream is waiting
//! for them:
//!
//! - a response to a pending request goes to the stream opened by the POST
//!   that carried that request (SSE or buffered JSON);
//! - anything else goes to the session's standalone event stream (the legacy
//!   `/sse` connection, or a streamable GET), or is dropped if none is open.

pub mod jsonrpc;
pub mod sse;

use crate::engine::EngineLink;
use crate::session::{ProtocolVariant, SessionInfo};
use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Capacity of the inbound and outbound message channels of a session.
pub const MESSAGE_QUEUE_CAPACITY: usize = 64;
/// Capacity of a single SSE response stream.
pub const STREAM_CAPACITY: usize = 32;

/// Error type for transport operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Session transport is closed")]
    Closed,
    #[error("Only one SSE stream is allowed per session")]
    StreamConflict,
    #[error("Request id {0} is already awaiting a response")]
    DuplicateRequestId(String),
}

type OnClose = Box<dyn FnOnce(&str) + Send>;

enum ResponseSink {
    Sse(mpsc::Sender<Bytes>),
    Json {
        collected: Vec<Value>,
        reply: Option<oneshot::Sender<Vec<Value>>>,
    },
}

struct ResponseStream {
    sink: ResponseSink,
    remaining: usize,
}

/// Where an outbound message ended up after routing.
enum Delivery {
    /// A per-POST response stream, identified so it can be abandoned.
    Response(u64, mpsc::Sender<Bytes>, Bytes),
    Standalone(mpsc::Sender<Bytes>, Bytes),
    Buffered,
    Dropped,
}

#[derive(Default)]
struct Routes {
    /// Request id key -> response stream waiting for it.
    pending: HashMap<String, u64>,
    streams: HashMap<u64, ResponseStream>,
    standalone: Option<mpsc::Sender<Bytes>>,
    next_stream: u64,
}

impl Routes {
    fn open(&mut self, keys: Vec<String>, sink: ResponseSink) -> Result<(), TransportError> {
        let mut seen = HashSet::new();
        if let Some(taken) = keys
            .iter()
            .find(|k| self.pending.contains_key(*k) || !seen.insert(k.as_str()))
        {
            return Err(TransportError::DuplicateRequestId(taken.clone()));
        }
        let stream_id = self.next_stream;
        self.next_stream += 1;
        for key in &keys {
            self.pending.insert(key.clone(), stream_id);
        }
        self.streams.insert(
            stream_id,
            ResponseStream {
                sink,
                remaining: keys.len(),
            },
        );
        Ok(())
    }

    fn route(&mut self, message: Value) -> Delivery {
        let stream_id = jsonrpc::response_key(&message).and_then(|key| self.pending.remove(&key));
        if let Some(stream_id) = stream_id {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.remaining = stream.remaining.saturating_sub(1);
                let finished = stream.remaining == 0;
                let delivery = match &mut stream.sink {
                    ResponseSink::Sse(tx) => {
                        Delivery::Response(stream_id, tx.clone(), sse::message_event(&message))
                    }
                    ResponseSink::Json { collected, reply } => {
                        collected.push(message);
                        if finished {
                            if let Some(reply) = reply.take() {
                                let _ = reply.send(std::mem::take(collected));
                            }
                        }
                        Delivery::Buffered
                    }
                };
                if finished {
                    self.streams.remove(&stream_id);
                }
                return delivery;
            }
        }
        match &self.standalone {
            Some(tx) if !tx.is_closed() => {
                Delivery::Standalone(tx.clone(), sse::message_event(&message))
            }
            _ => Delivery::Dropped,
        }
    }

    /// Forget a response stream whose client went away, releasing the
    /// request ids still waiting on it.
    fn abandon(&mut self, stream_id: u64) -> usize {
        self.streams.remove(&stream_id);
        let before = self.pending.len();
        self.pending.retain(|_, id| *id != stream_id);
        before - self.pending.len()
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.streams.clear();
        self.standalone = None;
    }
}

/// Live connection object for one session.
pub struct SessionTransport {
    info: SessionInfo,
    inbound: mpsc::Sender<Value>,
    routes: Mutex<Routes>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    on_close: Mutex<Option<OnClose>>,
}

impl SessionTransport {
    /// Construct a transport for `id` and the engine link bound to it.
    ///
    /// Spawns the outbound dispatcher, so this must run inside a tokio runtime.
    pub fn new(id: String, variant: ProtocolVariant) -> (Arc<Self>, EngineLink) {
        let (inbound_tx, inbound_rx) = mpsc::channel(MESSAGE_QUEUE_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(MESSAGE_QUEUE_CAPACITY);
        let shutdown = CancellationToken::new();

        let transport = Arc::new(Self {
            info: SessionInfo {
                id: id.clone(),
                variant,
                created_at: Utc::now(),
            },
            inbound: inbound_tx,
            routes: Mutex::new(Routes::default()),
            shutdown: shutdown.clone(),
            closed: AtomicBool::new(false),
            on_close: Mutex::new(None),
        });
        let link = EngineLink::new(id, variant, inbound_rx, outbound_tx, shutdown.clone());
        tokio::spawn(dispatch_outbound(
            Arc::downgrade(&transport),
            outbound_rx,
            shutdown,
        ));
        (transport, link)
    }

    /// Construct a legacy SSE transport. The transport picks its own id.
    pub fn new_legacy() -> (Arc<Self>, EngineLink) {
        Self::new(Uuid::new_v4().to_string(), ProtocolVariant::LegacySse)
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.info.variant
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the transport has been closed.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    fn lock_routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register the callback run exactly once when the transport closes.
    /// Runs immediately if the transport is already closed.
    pub fn set_on_close(&self, callback: impl FnOnce(&str) + Send + 'static) {
        {
            let mut slot = self.on_close.lock().unwrap_or_else(|e| e.into_inner());
            if !self.is_closed() {
                *slot = Some(Box::new(callback));
                return;
            }
        }
        callback(self.id());
    }

    /// Hand one decoded client message to the engine.
    pub async fn deliver(&self, message: Value) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(TransportError::Closed),
            sent = self.inbound.send(message) => sent.map_err(|_| TransportError::Closed),
        }
    }

    /// Deliver messages in order, stopping at the first failure.
    pub async fn deliver_all(&self, messages: Vec<Value>) -> Result<(), TransportError> {
        for message in messages {
            self.deliver(message).await?;
        }
        Ok(())
    }

    /// Route responses for `request_keys` to an SSE stream. The sender is
    /// dropped once every request has been answered, ending the stream.
    pub fn open_sse_stream(
        &self,
        request_keys: Vec<String>,
        tx: mpsc::Sender<Bytes>,
    ) -> Result<(), TransportError> {
        let mut routes = self.lock_routes();
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        routes.open(request_keys, ResponseSink::Sse(tx))
    }

    /// Buffer responses for `request_keys`; the receiver resolves with all of
    /// them once the last one arrives.
    pub fn open_json_stream(
        &self,
        request_keys: Vec<String>,
    ) -> Result<oneshot::Receiver<Vec<Value>>, TransportError> {
        let (reply, rx) = oneshot::channel();
        let mut routes = self.lock_routes();
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        routes.open(
            request_keys,
            ResponseSink::Json {
                collected: Vec::new(),
                reply: Some(reply),
            },
        )?;
        Ok(rx)
    }

    /// Attach the stream that receives messages not answering a pending
    /// request. A stream whose client has gone away may be replaced.
    pub fn attach_standalone(&self, tx: mpsc::Sender<Bytes>) -> Result<(), TransportError> {
        let mut routes = self.lock_routes();
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if routes.standalone.as_ref().is_some_and(|s| !s.is_closed()) {
            return Err(TransportError::StreamConflict);
        }
        routes.standalone = Some(tx);
        Ok(())
    }

    /// Close the transport: stop the engine link, end every open stream and
    /// fire the close callback. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        self.lock_routes().clear();
        let callback = self
            .on_close
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(callback) = callback {
            callback(self.id());
        }
        info!(session_id = %self.id(), variant = %self.variant(), "Session transport closed");
    }

    async fn dispatch(&self, message: Value) {
        let delivery = self.lock_routes().route(message);
        match delivery {
            Delivery::Response(stream_id, tx, event) => {
                if tx.send(event).await.is_err() {
                    let released = self.lock_routes().abandon(stream_id);
                    debug!(
                        session_id = %self.id(),
                        released,
                        "Response stream dropped by client; pending requests released"
                    );
                }
            }
            Delivery::Standalone(tx, event) => {
                if tx.send(event).await.is_err() {
                    debug!(session_id = %self.id(), "Event stream dropped before delivery");
                }
            }
            Delivery::Buffered => {}
            Delivery::Dropped => {
                debug!(
                    session_id = %self.id(),
                    "No open stream for outbound message; dropped"
                );
            }
        }
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dispatch_outbound(
    transport: Weak<SessionTransport>,
    mut outbound: mpsc::Receiver<Value>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        let Some(transport) = transport.upgrade() else {
            break;
        };
        transport.dispatch(message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn response(id: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "result": {}})
    }

    #[tokio::test]
    async fn delivers_inbound_to_engine_in_order() {
        let (transport, mut link) = SessionTransport::new("s".into(), ProtocolVariant::Streamable);
        transport
            .deliver_all(vec![json!(1), json!(2), json!(3)])
            .await
            .expect("deliver should succeed");
        assert_eq!(link.recv().await, Some(json!(1)));
        assert_eq!(link.recv().await, Some(json!(2)));
        assert_eq!(link.recv().await, Some(json!(3)));
    }

    #[tokio::test]
    async fn sse_stream_ends_after_last_response() {
        let (transport, link) = SessionTransport::new("s".into(), ProtocolVariant::Streamable);
        let (tx, mut rx) = mpsc::channel(STREAM_CAPACITY);
        transport
            .open_sse_stream(vec!["1".into(), "2".into()], tx)
            .expect("stream should open");

        link.send(response(json!(2))).await.expect("send");
        link.send(response(json!(1))).await.expect("send");

        let first = rx.recv().await.expect("first event");
        assert!(std::str::from_utf8(&first).expect("utf8").contains("\"id\":2"));
        let second = rx.recv().await.expect("second event");
        assert!(std::str::from_utf8(&second).expect("utf8").contains("\"id\":1"));
        assert!(rx.recv().await.is_none(), "stream should end");
    }

    #[tokio::test]
    async fn json_stream_collects_responses() {
        let (transport, link) = SessionTransport::new("s".into(), ProtocolVariant::Streamable);
        let rx = transport
            .open_json_stream(vec!["\"a\"".into()])
            .expect("stream should open");
        link.send(response(json!("a"))).await.expect("send");
        let responses = rx.await.expect("responses");
        assert_eq!(responses, vec![response(json!("a"))]);
    }

    #[tokio::test]
    async fn unmatched_messages_go_to_standalone_stream() {
        let (transport, link) = SessionTransport::new("s".into(), ProtocolVariant::LegacySse);
        let (tx, mut rx) = mpsc::channel(STREAM_CAPACITY);
        transport.attach_standalone(tx).expect("attach");

        link.send(json!({"jsonrpc": "2.0", "method": "notifications/message"}))
            .await
            .expect("send");
        let event = rx.recv().await.expect("event");
        assert!(std::str::from_utf8(&event)
            .expect("utf8")
            .contains("notifications/message"));
    }

    #[tokio::test]
    async fn second_standalone_stream_conflicts_until_first_drops() {
        let (transport, _link) = SessionTransport::new("s".into(), ProtocolVariant::Streamable);
        let (tx1, rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        transport.attach_standalone(tx1).expect("first attach");
        assert_eq!(
            transport.attach_standalone(tx2.clone()),
            Err(TransportError::StreamConflict)
        );
        drop(rx1);
        transport
            .attach_standalone(tx2)
            .expect("dead stream may be replaced");
    }

    #[tokio::test]
    async fn duplicate_pending_request_id_is_rejected() {
        let (transport, _link) = SessionTransport::new("s".into(), ProtocolVariant::Streamable);
        let (tx, _rx) = mpsc::channel(1);
        transport
            .open_sse_stream(vec!["1".into()], tx.clone())
            .expect("first open");
        assert_eq!(
            transport.open_sse_stream(vec!["1".into()], tx),
            Err(TransportError::DuplicateRequestId("1".into()))
        );
    }

    #[tokio::test]
    async fn repeated_request_id_in_one_stream_is_rejected() {
        let (transport, _link) = SessionTransport::new("s".into(), ProtocolVariant::Streamable);
        let (tx, _rx) = mpsc::channel(1);
        assert_eq!(
            transport.open_sse_stream(vec!["5".into(), "5".into()], tx.clone()),
            Err(TransportError::DuplicateRequestId("5".into()))
        );
        transport
            .open_sse_stream(vec!["5".into()], tx)
            .expect("rejected open must not reserve the id");
    }

    #[tokio::test]
    async fn abandoned_response_stream_releases_pending_ids() {
        let (transport, link) = SessionTransport::new("s".into(), ProtocolVariant::Streamable);
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        transport
            .open_sse_stream(vec!["1".into(), "2".into()], tx)
            .expect("stream should open");
        drop(rx);

        link.send(response(json!(1))).await.expect("send");

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                let (tx, _rx) = mpsc::channel(1);
                if transport.open_sse_stream(vec!["2".into()], tx).is_ok() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("id 2 should be released once the stream is abandoned");
    }

    #[tokio::test]
    async fn close_runs_callback_once_and_stops_link() {
        let (transport, mut link) = SessionTransport::new("s".into(), ProtocolVariant::Streamable);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        transport.set_on_close(move |id| {
            assert_eq!(id, "s");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        transport.close();
        transport.close();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(transport.is_closed());
        assert_eq!(link.recv().await, None);
        assert_eq!(
            transport.deliver(json!({})).await,
            Err(TransportError::Closed)
        );
        assert!(link.send(json!({})).await.is_err());
    }

    #[tokio::test]
    async fn close_callback_registered_late_runs_immediately() {
        let (transport, _link) = SessionTransport::new("s".into(), ProtocolVariant::Streamable);
        transport.close();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        transport.set_on_close(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_ends_open_streams() {
        let (transport, _link) = SessionTransport::new("s".into(), ProtocolVariant::Streamable);
        let json_rx = transport
            .open_json_stream(vec!["1".into()])
            .expect("stream should open");
        let (tx, mut sse_rx) = mpsc::channel(1);
        transport
            .open_sse_stream(vec!["2".into()], tx)
            .expect("stream should open");

        transport.close();
        assert!(json_rx.await.is_err());
        assert!(sse_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn legacy_transports_mint_distinct_ids() {
        let (a, _la) = SessionTransport::new_legacy();
        let (b, _lb) = SessionTransport::new_legacy();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.variant(), ProtocolVariant::LegacySse);
        assert!(Uuid::parse_str(a.id()).is_ok());
    }
}
