/// MCP tool handlers for the agent hub.
///
/// 1. list_agents – enabled agents
/// 2. ask_agent   – one-shot question to an agent, nothing persisted
/// 3. list_tools  – dispatcher tools, optionally by category
/// 4. call_tool   – run any dispatcher tool with JSON parameters
/// 5. tool_status – server readiness, credentials and execution stats
use crate::error::AppError;
use crate::mcp::server::McpContext;
use crate::tools::catalog;
use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct ListAgentsParams {
    /// Category filter (e.g. general, custom, migrated)
    category: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct AskAgentParams {
    /// Agent id (e.g. posiAgent, minutaMaker)
    agent_id: String,
    /// Message for the agent
    message: String,
    /// Optional client context injected into the agent prompt
    client_context: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct ListToolsParams {
    /// Category filter: github | jira | google_drive | web_search | email | calendar | other
    category: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct CallToolParams {
    /// Tool name or alias
    name: String,
    /// Tool parameters as a JSON object
    parameters: Option<serde_json::Value>,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&value).unwrap_or_default(),
    )]))
}

fn error_result(msg: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

fn internal(e: AppError) -> McpError {
    McpError::internal_error(e.to_string(), None)
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct HubTools {
    pub ctx: McpContext,
    pub tool_router: ToolRouter<Self>,
}

impl ServerHandler for HubTools {}

#[tool_router]
impl HubTools {
    pub fn new(ctx: McpContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "List the enabled agents of the hub, optionally by category")]
    async fn list_agents(
        &self,
        params: Parameters<ListAgentsParams>,
    ) -> Result<CallToolResult, McpError> {
        let manager = self.ctx.chat.agents();
        let agents = match params.0.category.filter(|c| !c.is_empty()) {
            Some(category) => manager.by_category(Some(&category)).await,
            None => manager.enabled().await,
        }
        .map_err(internal)?;
        let agents: Vec<serde_json::Value> = agents
            .iter()
            .map(|a| {
                serde_json::json!({
                    "id": a.id,
                    "name": a.name,
                    "description": a.description,
                    "avatar": a.avatar,
                    "category": a.category,
                    "tools": a.tools,
                })
            })
            .collect();
        json_result(serde_json::json!({ "count": agents.len(), "agents": agents }))
    }

    #[tool(
        description = "Ask an agent a single question. The agent may run its tools; no conversation is stored."
    )]
    async fn ask_agent(&self, params: Parameters<AskAgentParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.agent_id.is_empty() {
            return error_result("agent_id is required");
        }
        info!("MCP ask_agent: {}", p.agent_id);
        match self
            .ctx
            .chat
            .ask(&p.agent_id, &p.message, p.client_context.as_deref())
            .await
        {
            Ok(answer) => json_result(serde_json::to_value(&answer).unwrap_or_default()),
            Err(e @ (AppError::NotFound(_) | AppError::BadRequest(_))) => error_result(&e.to_string()),
            Err(e) => Err(internal(e)),
        }
    }

    #[tool(description = "List the tools available to agents, with aliases, servers and parameters")]
    async fn list_tools(&self, params: Parameters<ListToolsParams>) -> Result<CallToolResult, McpError> {
        let dispatcher = self.ctx.chat.executor().dispatcher();
        let names = match params.0.category.as_deref() {
            Some(category) => match dispatcher.by_category().remove(category) {
                Some(names) => names,
                None => return error_result(&format!("unknown category: {category}")),
            },
            None => dispatcher.tool_names(),
        };
        let tools: Vec<_> = names.iter().filter_map(|n| dispatcher.tool_info(n)).collect();
        json_result(serde_json::json!({ "total": tools.len(), "tools": tools }))
    }

    #[tool(description = "Run one tool by name or alias with a JSON object of parameters")]
    async fn call_tool(&self, params: Parameters<CallToolParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.name.is_empty() {
            return error_result("name is required");
        }
        let parameters = p.parameters.unwrap_or_else(|| serde_json::json!({}));
        if !parameters.is_object() {
            return error_result("parameters must be a JSON object");
        }
        let result = self.ctx.chat.executor().run_tool(&p.name, parameters).await;
        let body = serde_json::to_string_pretty(&result).unwrap_or_default();
        if result.success {
            Ok(CallToolResult::success(vec![Content::text(body)]))
        } else {
            Ok(CallToolResult::error(vec![Content::text(body)]))
        }
    }

    #[tool(description = "Readiness of each service integration, credential status and execution stats")]
    async fn tool_status(&self) -> Result<CallToolResult, McpError> {
        let executor = self.ctx.chat.executor();
        json_result(serde_json::json!({
            "health": executor.health(),
            "servers": catalog::installation_status(executor.dispatcher(), &self.ctx.credentials),
            "credentials": self.ctx.credentials.status().await,
        }))
    }
}
