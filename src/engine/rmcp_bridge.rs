//! Runs an rmcp `ServerHandler` as the protocol engine.
//!
//! rmcp speaks newline-delimited JSON over any `AsyncRead`/`AsyncWrite` pair
//! (the same framing as its stdio transport). Each session gets an in-memory
//! duplex pipe: one end is served by rmcp, the other is pumped to and from the
//! session's [`EngineLink`].

use super::{EngineError, EngineFuture, EngineLink, LinkReceiver, LinkSender, ProtocolEngine};
use crate::transport::jsonrpc;
use rmcp::{ServerHandler, ServiceExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// Per-direction buffer of the in-memory pipe between a session and rmcp.
const DUPLEX_BUFFER_BYTES: usize = 64 * 1024;

/// Protocol engine that serves each session with a fresh rmcp handler.
pub struct RmcpEngine<F> {
    factory: F,
}

impl<F, S> RmcpEngine<F>
where
    F: Fn(&EngineLink) -> S + Send + Sync + 'static,
    S: ServerHandler,
{
    /// `factory` builds the handler for a session; it sees the link so the
    /// handler can know which session it serves.
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<F, S> ProtocolEngine for RmcpEngine<F>
where
    F: Fn(&EngineLink) -> S + Send + Sync + 'static,
    S: ServerHandler,
{
    fn connect(&self, link: EngineLink) -> EngineFuture {
        let handler = (self.factory)(&link);
        Box::pin(async move {
            let session_id = link.session_id().to_string();
            let (engine_io, bridge_io) = tokio::io::duplex(DUPLEX_BUFFER_BYTES);
            let (engine_read, engine_write) = tokio::io::split(engine_io);
            let (bridge_read, bridge_write) = tokio::io::split(bridge_io);
            let (inbound, outbound) = link.split();

            let to_engine = tokio::spawn(pump_inbound(inbound, bridge_write));
            let from_engine = tokio::spawn(pump_outbound(bridge_read, outbound));

            let result = match handler.serve((engine_read, engine_write)).await {
                Ok(running) => {
                    info!(session_id = %session_id, "Engine session initialized");
                    match running.waiting().await {
                        Ok(reason) => {
                            debug!(session_id = %session_id, ?reason, "Engine session ended");
                            Ok(())
                        }
                        Err(e) => Err(EngineError::Failed(e.to_string())),
                    }
                }
                Err(e) => Err(EngineError::Failed(e.to_string())),
            };

            to_engine.abort();
            from_engine.abort();
            result
        })
    }
}

/// Client messages -> rmcp, one JSON document per line.
async fn pump_inbound<W>(mut inbound: LinkReceiver, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = inbound.recv().await {
        if jsonrpc::classify(&message).is_none() {
            warn!("Dropping inbound value that is not a JSON-RPC 2.0 message");
            continue;
        }
        let mut line = match serde_json::to_vec(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode inbound message: {e}");
                continue;
            }
        };
        line.push(b'\n');
        if writer.write_all(&line).await.is_err() || writer.flush().await.is_err() {
            break;
        }
    }
    // EOF tells rmcp the session is over.
    let _ = writer.shutdown().await;
}

/// rmcp output -> session transport.
async fn pump_outbound<R>(reader: R, outbound: LinkSender)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Engine output read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let message: Value = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Engine produced invalid JSON: {e}");
                continue;
            }
        };
        if outbound.send(message).await.is_err() {
            break;
        }
    }
}
