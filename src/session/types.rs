//! Session and session info types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire protocol a session was established over.
///
/// Each variant owns a separate id namespace in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// Single-endpoint protocol, session id carried in the `mcp-session-id` header.
    Streamable,
    /// Event stream plus message endpoint, session id carried in the query string.
    LegacySse,
}

impl ProtocolVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streamable => "streamable",
            Self::LegacySse => "legacy_sse",
        }
    }
}

impl std::fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Information about a session (serializable for diagnostics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier, unique within its variant.
    pub id: String,
    /// Protocol the session was established over.
    pub variant: ProtocolVariant,
    /// When the session transport was constructed.
    pub created_at: DateTime<Utc>,
}

/// Live session counts per partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub streamable: usize,
    pub legacy_sse: usize,
}

impl SessionStats {
    pub fn total(&self) -> usize {
        self.streamable + self.legacy_sse
    }
}
