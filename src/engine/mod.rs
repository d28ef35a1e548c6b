//! The seam between session transports and the shared protocol engine.
//!
//! A transport owns the HTTP side of a session. The engine sees only an
//! [`EngineLink`]: a stream of decoded inbound messages and a sink for
//! outbound ones. [`ProtocolEngine::connect`] is called exactly once per new
//! session and resolves when the session's lifecycle is over.

mod rmcp_bridge;

pub use rmcp_bridge::RmcpEngine;

use crate::session::ProtocolVariant;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Engine failure while serving a session.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Session transport closed")]
    TransportClosed,
    #[error("Engine failed: {0}")]
    Failed(String),
}

pub type EngineFuture = Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send>>;

/// Shared message-processing logic bound to each new session.
pub trait ProtocolEngine: Send + Sync + 'static {
    /// Bind a session's link to the engine. The returned future completes
    /// when the link closes or the engine gives up on the session.
    fn connect(&self, link: EngineLink) -> EngineFuture;
}

/// The engine's end of a session transport.
pub struct EngineLink {
    session_id: String,
    variant: ProtocolVariant,
    inbound: LinkReceiver,
    outbound: LinkSender,
}

impl EngineLink {
    pub(crate) fn new(
        session_id: String,
        variant: ProtocolVariant,
        inbound: mpsc::Receiver<Value>,
        outbound: mpsc::Sender<Value>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            variant,
            inbound: LinkReceiver {
                rx: inbound,
                shutdown: shutdown.clone(),
            },
            outbound: LinkSender {
                tx: outbound,
                shutdown,
            },
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    /// Next message delivered by the client, or `None` once the transport closed.
    pub async fn recv(&mut self) -> Option<Value> {
        self.inbound.recv().await
    }

    /// Queue a message for delivery to the client.
    pub async fn send(&self, message: Value) -> Result<(), EngineError> {
        self.outbound.send(message).await
    }

    /// Split into independently owned halves so reading and writing can run
    /// on separate tasks.
    pub fn split(self) -> (LinkReceiver, LinkSender) {
        (self.inbound, self.outbound)
    }
}

/// Inbound half of an [`EngineLink`].
pub struct LinkReceiver {
    rx: mpsc::Receiver<Value>,
    shutdown: CancellationToken,
}

impl LinkReceiver {
    pub async fn recv(&mut self) -> Option<Value> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            message = self.rx.recv() => message,
        }
    }
}

/// Outbound half of an [`EngineLink`].
#[derive(Clone)]
pub struct LinkSender {
    tx: mpsc::Sender<Value>,
    shutdown: CancellationToken,
}

impl LinkSender {
    pub async fn send(&self, message: Value) -> Result<(), EngineError> {
        if self.shutdown.is_cancelled() {
            return Err(EngineError::TransportClosed);
        }
        self.tx
            .send(message)
            .await
            .map_err(|_| EngineError::TransportClosed)
    }
}
