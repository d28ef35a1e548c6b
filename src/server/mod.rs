//! MCP server bundled as the default protocol engine.
//!
//! One `MuxServer` is built per session. Its tools report on the session it
//! serves and on the shared registry.

use crate::capability_registry::{self, CapabilityCategory, CapabilityInfo};
use crate::engine::EngineLink;
use crate::session::{ProtocolVariant, SessionRegistry};
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, JsonObject, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData as McpError, ServerHandler};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

const ECHO: &str = "echo";
const SESSION_STATS: &str = "session_stats";
const CAPABILITY_CATALOG: &str = "capability_catalog";

const DEFAULT_CATALOG_LIMIT: usize = 10;

#[derive(Clone)]
pub struct MuxServer {
    registry: Arc<SessionRegistry>,
    session_id: String,
    variant: ProtocolVariant,
}

impl MuxServer {
    pub fn new(registry: Arc<SessionRegistry>, link: &EngineLink) -> Self {
        Self {
            registry,
            session_id: link.session_id().to_string(),
            variant: link.variant(),
        }
    }

    fn instructions(&self) -> String {
        "Session multiplexer diagnostics.\n\n\
         Tools:\n\
         - echo: Echo a message back with the id of the session that served it\n\
         - session_stats: Count live sessions per transport\n\
         - capability_catalog: Search available tools by keyword or category"
            .to_string()
    }

    fn make_tool(info: &CapabilityInfo) -> Tool {
        let schema: JsonObject = serde_json::from_str(info.input_schema).unwrap_or_default();
        Tool::new(info.name, info.full_desc, Arc::new(schema))
    }

    fn tools() -> Vec<Tool> {
        capability_registry::all_capabilities()
            .map(Self::make_tool)
            .collect()
    }

    async fn dispatch(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, McpError> {
        let args = arguments
            .map(Value::Object)
            .unwrap_or(Value::Object(Map::new()));

        debug!(session_id = %self.session_id, tool = %name, "Tool call");
        match name {
            ECHO => self.handle_echo(&args),
            SESSION_STATS => self.handle_session_stats(&args),
            CAPABILITY_CATALOG => self.handle_capability_catalog(&args),
            _ => Err(McpError::invalid_params(
                format!("Unknown tool: {}", name),
                None,
            )),
        }
    }

    fn handle_echo(&self, args: &Value) -> Result<CallToolResult, McpError> {
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| McpError::invalid_params("Missing required parameter: message", None))?;

        let response = json!({
            "message": message,
            "session_id": self.session_id,
            "variant": self.variant,
        });
        Ok(CallToolResult::success(vec![Content::text(
            response.to_string(),
        )]))
    }

    fn handle_session_stats(&self, args: &Value) -> Result<CallToolResult, McpError> {
        let include_ids = args
            .get("include_ids")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let stats = self.registry.stats();
        let mut response = json!({
            "streamable": stats.streamable,
            "legacy_sse": stats.legacy_sse,
            "total": stats.total(),
        });
        if include_ids {
            response["sessions"] = json!({
                "streamable": self.registry.sessions(ProtocolVariant::Streamable),
                "legacy_sse": self.registry.sessions(ProtocolVariant::LegacySse),
            });
        }
        Ok(CallToolResult::success(vec![Content::text(
            response.to_string(),
        )]))
    }

    fn handle_capability_catalog(&self, args: &Value) -> Result<CallToolResult, McpError> {
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n.max(1) as usize)
            .unwrap_or(DEFAULT_CATALOG_LIMIT);
        let query = args.get("query").and_then(|v| v.as_str()).map(str::trim);

        let category = match args.get("category").and_then(|v| v.as_str()) {
            Some(raw) => Some(raw.parse::<CapabilityCategory>().map_err(|_| {
                let known: Vec<&str> = CapabilityCategory::all()
                    .iter()
                    .map(|c| c.as_str())
                    .collect();
                McpError::invalid_params(
                    format!("Unknown category: {raw}. Expected one of: {}", known.join(", ")),
                    None,
                )
            })?),
            None => None,
        };

        let matches: Vec<(&CapabilityInfo, Vec<String>)> = match query {
            Some(q) if !q.is_empty() => capability_registry::search_capabilities(q)
                .into_iter()
                .map(|m| (m.capability, m.terms))
                .collect(),
            _ => capability_registry::all_capabilities()
                .map(|c| (c, Vec::new()))
                .collect(),
        };

        let results: Vec<Value> = matches
            .into_iter()
            .filter(|(c, _)| category.map_or(true, |cat| c.category == cat))
            .take(limit)
            .map(|(c, matched)| {
                json!({
                    "name": c.name,
                    "category": c.category,
                    "description": c.short_desc,
                    "example": c.example,
                    "matched": matched,
                })
            })
            .collect();

        let response = json!({
            "count": results.len(),
            "tools": results,
        });
        Ok(CallToolResult::success(vec![Content::text(
            response.to_string(),
        )]))
    }
}

impl ServerHandler for MuxServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(self.instructions()),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: Self::tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        _ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.dispatch(&params.name, params.arguments).await
    }
}
