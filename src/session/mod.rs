//! Session bookkeeping shared by both wire protocols.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     SessionRegistry                       │
//! │                                                           │
//! │  streamable: Mutex<HashMap<id, Arc<SessionTransport>>>    │
//! │      ids from SessionIdGenerator (UUIDv7)                 │
//! │                                                           │
//! │  legacy_sse: Mutex<HashMap<id, Arc<SessionTransport>>>    │
//! │      ids from SessionTransport::new_legacy (UUIDv4)       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries are inserted once a transport is constructed and removed by the
//! transport's close callback, so a closed transport is never resolvable.

mod id;
mod registry;
mod types;

pub use id::{SessionIdGenerator, TimeRandomIdGenerator};
pub use registry::{RegistryError, SessionRegistry};
pub use types::{ProtocolVariant, SessionInfo, SessionStats};
