//! In-memory session registry, one map per protocol variant.

use super::types::{ProtocolVariant, SessionInfo, SessionStats};
use crate::transport::SessionTransport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error};

/// Error type for registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Session already registered: {variant}/{id}")]
    DuplicateSession { variant: ProtocolVariant, id: String },
    #[error("Session not found: {variant}/{id}")]
    NotFound { variant: ProtocolVariant, id: String },
}

type Partition = Mutex<HashMap<String, Arc<SessionTransport>>>;

/// Maps session ids to live transports.
///
/// Streamable and legacy sessions live in two independent maps, so an id
/// minted for one protocol can never resolve a session of the other.
#[derive(Default)]
pub struct SessionRegistry {
    streamable: Partition,
    legacy_sse: Partition,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(
        &self,
        variant: ProtocolVariant,
    ) -> MutexGuard<'_, HashMap<String, Arc<SessionTransport>>> {
        let partition = match variant {
            ProtocolVariant::Streamable => &self.streamable,
            ProtocolVariant::LegacySse => &self.legacy_sse,
        };
        partition.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a transport. Never overwrites an existing entry.
    pub fn put(
        &self,
        variant: ProtocolVariant,
        id: &str,
        transport: Arc<SessionTransport>,
    ) -> Result<(), RegistryError> {
        let mut sessions = self.partition(variant);
        if sessions.contains_key(id) {
            error!(session_id = %id, %variant, "Refusing to overwrite live session");
            return Err(RegistryError::DuplicateSession {
                variant,
                id: id.to_string(),
            });
        }
        sessions.insert(id.to_string(), transport);
        debug!(session_id = %id, %variant, live = sessions.len(), "Session registered");
        Ok(())
    }

    /// Look up the transport for a session.
    pub fn get(
        &self,
        variant: ProtocolVariant,
        id: &str,
    ) -> Result<Arc<SessionTransport>, RegistryError> {
        self.partition(variant)
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                variant,
                id: id.to_string(),
            })
    }

    /// Remove a session. Removing an absent id is a no-op, since close
    /// notifications can race each other.
    pub fn remove(&self, variant: ProtocolVariant, id: &str) -> Option<Arc<SessionTransport>> {
        let removed = self.partition(variant).remove(id);
        if removed.is_some() {
            debug!(session_id = %id, %variant, "Session removed");
        }
        removed
    }

    pub fn contains(&self, variant: ProtocolVariant, id: &str) -> bool {
        self.partition(variant).contains_key(id)
    }

    pub fn len(&self, variant: ProtocolVariant) -> usize {
        self.partition(variant).len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats().total() == 0
    }

    /// Snapshot of the sessions registered under `variant`, oldest first.
    pub fn sessions(&self, variant: ProtocolVariant) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .partition(variant)
            .values()
            .map(|t| t.info().clone())
            .collect();
        sessions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        sessions
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            streamable: self.len(ProtocolVariant::Streamable),
            legacy_sse: self.len(ProtocolVariant::LegacySse),
        }
    }

    /// Take every transport out of `variant`'s map.
    ///
    /// The lock is released before the caller touches the transports, so
    /// closing them (which re-enters `remove`) cannot deadlock.
    pub fn drain(&self, variant: ProtocolVariant) -> Vec<Arc<SessionTransport>> {
        self.partition(variant).drain().map(|(_, t)| t).collect()
    }

    /// Close every registered transport in both partitions.
    pub fn close_all(&self) {
        for variant in [ProtocolVariant::Streamable, ProtocolVariant::LegacySse] {
            for transport in self.drain(variant) {
                transport.close();
            }
        }
    }
}
