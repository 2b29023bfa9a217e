/// Stdio MCP endpoint of the hub.
///
/// MCP clients get the same agents and tool dispatcher as the HTTP API,
/// without the company login: whoever can spawn the process is trusted.
use crate::mcp::tools::HubTools;
use anyhow::{Context, Result};
use rmcp::{ServiceExt, handler::server::router::Router, transport::io::stdio};
use std::sync::Arc;
use tracing::info;

use crate::chat::ChatService;
use crate::tools::credentials::CredentialStore;

/// Services the MCP tools call into.
#[derive(Clone)]
pub struct McpContext {
    pub chat: ChatService,
    pub credentials: Arc<CredentialStore>,
}

pub struct McpServer {
    pub ctx: McpContext,
}

impl McpServer {
    pub fn new(ctx: McpContext) -> Self {
        Self { ctx }
    }

    /// Hub tools registered on an rmcp router.
    pub fn router(&self) -> Router<HubTools> {
        let hub_tools = HubTools::new(self.ctx.clone());
        Router::new(hub_tools.clone()).with_tools(hub_tools.tool_router.clone())
    }

    /// Serve on stdin/stdout until the client hangs up.
    pub async fn start(self) -> Result<()> {
        info!(
            "Serving {} agents over MCP on stdio",
            self.ctx.chat.agents().enabled().await?.len()
        );
        let service = self
            .router()
            .serve(stdio())
            .await
            .context("MCP handshake on stdio failed")?;
        service.waiting().await.context("MCP stdio session ended with an error")?;
        info!("MCP client disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::knowledge::WebsiteContext;
    use crate::tools::Dispatcher;
    use crate::tools::executor::ToolExecutor;
    use crate::tools::mock::mock_handlers;
    use tokio::sync::Mutex;

    #[test]
    fn test_router_exposes_hub_tools() {
        let credentials = Arc::new(CredentialStore::from_lookup(|_| None).unwrap());
        let executor = Arc::new(ToolExecutor::new(
            Arc::new(Dispatcher::new(mock_handlers())),
            credentials.clone(),
        ));
        let chat = ChatService::new(
            Arc::new(Mutex::new(Db::open_in_memory().unwrap())),
            None,
            executor,
            Arc::new(WebsiteContext::disabled()),
        );
        let server = McpServer::new(McpContext { chat, credentials });

        let mut names: Vec<String> = HubTools::new(server.ctx.clone())
            .tool_router
            .list_all()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["ask_agent", "call_tool", "list_agents", "list_tools", "tool_status"]
        );
    }
}
