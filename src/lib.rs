//! MCP session transport multiplexer
//!
//! This library serves the Model Context Protocol over HTTP in two wire
//! protocols at once and binds every session to a protocol engine.
//!
//! # Architecture
//!
//! - **Router** (`router`): the HTTP front door. `/mcp` implements the
//!   streamable protocol (POST/GET/DELETE, session id in the
//!   `mcp-session-id` header). `/sse` and `/messages?sessionId=` implement the
//!   legacy two-endpoint protocol.
//!
//! - **SessionRegistry** (`session`): two independent maps from session id to
//!   live transport, one per protocol variant. A transport is removed as soon
//!   as it closes.
//!
//! - **SessionTransport** (`transport`): the per-session connection object.
//!   Inbound messages flow to the engine; outbound messages are routed back to
//!   the HTTP stream awaiting them.
//!
//! - **ProtocolEngine** (`engine`): the seam a session is connected to. The
//!   bundled engine runs [`MuxServer`], an `rmcp` server handler, per session.
//!
//! # Tools
//!
//! The bundled server exposes:
//! - `echo`: Echo a message with the serving session id
//! - `session_stats`: Count live sessions per transport
//! - `capability_catalog`: Search the available tools

pub mod capability_registry;
pub mod config;
pub mod engine;
pub mod error;
pub mod router;
pub mod server;
pub mod session;
pub mod transport;

pub use capability_registry::{CapabilityCategory, CapabilityInfo, CAPABILITY_REGISTRY};
pub use config::MuxConfig;
pub use engine::{EngineError, EngineLink, ProtocolEngine, RmcpEngine};
pub use error::MuxError;
pub use router::{AppContext, MuxService, OriginCheckService};
pub use server::MuxServer;
pub use session::{ProtocolVariant, SessionIdGenerator, SessionRegistry, TimeRandomIdGenerator};
pub use transport::SessionTransport;
