//! Runtime configuration for the HTTP front door.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 3000;
/// Default cap on request bodies (4 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
/// Default interval between SSE keep-alive comments.
pub const DEFAULT_SSE_KEEP_ALIVE_SECS: u64 = 15;

pub const DEFAULT_MCP_PATH: &str = "/mcp";
pub const DEFAULT_SSE_PATH: &str = "/sse";
pub const DEFAULT_MESSAGES_PATH: &str = "/messages";

/// Origins allowed when none are configured.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &["http://localhost", "http://127.0.0.1"];

#[derive(Debug, Clone)]
pub struct MuxConfig {
    pub port: u16,
    /// Streamable endpoint (POST/GET/DELETE).
    pub mcp_path: String,
    /// Legacy event-stream endpoint (GET).
    pub sse_path: String,
    /// Legacy message endpoint (POST).
    pub messages_path: String,
    /// Answer streamable POSTs with a JSON body instead of an SSE stream.
    pub json_response: bool,
    /// `None` disables keep-alive comments.
    pub sse_keep_alive: Option<Duration>,
    pub max_body_bytes: usize,
    /// Allowed `Origin` values; `*` allows any origin.
    pub allowed_origins: HashSet<String>,
}

impl MuxConfig {
    /// Listening address. Always loopback.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_json_response(mut self, enabled: bool) -> Self {
        self.json_response = enabled;
        self
    }

    /// Zero seconds disables keep-alive.
    pub fn with_sse_keep_alive_secs(mut self, secs: u64) -> Self {
        self.sse_keep_alive = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    /// Replace the allow list; blank entries are ignored.
    pub fn with_allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_origins = origins
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    /// URL path the legacy `endpoint` event tells clients to POST to.
    pub fn legacy_endpoint(&self, session_id: &str) -> String {
        format!(
            "{}?sessionId={}",
            self.messages_path,
            urlencoding::encode(session_id)
        )
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            mcp_path: DEFAULT_MCP_PATH.to_string(),
            sse_path: DEFAULT_SSE_PATH.to_string(),
            messages_path: DEFAULT_MESSAGES_PATH.to_string(),
            json_response: false,
            sse_keep_alive: Some(Duration::from_secs(DEFAULT_SSE_KEEP_ALIVE_SECS)),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_loopback_only() {
        let config = MuxConfig::default().with_port(8123);
        let addr = config.bind_addr();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 8123);
    }

    #[test]
    fn zero_keep_alive_disables_pings() {
        let config = MuxConfig::default().with_sse_keep_alive_secs(0);
        assert!(config.sse_keep_alive.is_none());
        let config = config.with_sse_keep_alive_secs(5);
        assert_eq!(config.sse_keep_alive, Some(Duration::from_secs(5)));
    }

    #[test]
    fn allowed_origins_skip_blank_entries() {
        let config = MuxConfig::default().with_allowed_origins([" http://a ", "", "  "]);
        assert_eq!(config.allowed_origins.len(), 1);
        assert!(config.allowed_origins.contains("http://a"));
    }

    #[test]
    fn legacy_endpoint_carries_session_id() {
        let config = MuxConfig::default();
        assert_eq!(config.legacy_endpoint("abc-123"), "/messages?sessionId=abc-123");
    }
}
