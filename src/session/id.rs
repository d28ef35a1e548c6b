//! Session identifier generation for streamable sessions.
//!
//! Legacy SSE sessions do not use this module; their transport constructor
//! mints its own ids (see [`crate::transport::SessionTransport::new_legacy`]).

use uuid::Uuid;

/// Produces identifiers for new streamable sessions.
///
/// Implementations must not block and must not hand out an id that can be
/// derived from another session's id.
pub trait SessionIdGenerator: Send + Sync + 'static {
    fn generate(&self) -> String;
}

/// Default generator: UUIDv7, a millisecond timestamp followed by 74 random bits.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeRandomIdGenerator;

impl SessionIdGenerator for TimeRandomIdGenerator {
    fn generate(&self) -> String {
        Uuid::now_v7().as_simple().to_string()
    }
}
