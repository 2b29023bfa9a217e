//! Test-mode stand-ins for the service handlers. They publish the real tool
//! specs and echo their input instead of calling out.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::{ToolError, ToolHandler, ToolSpec, calendar, email, gdrive, github, jira, web_search};

pub struct MockHandler {
    server: &'static str,
    specs: fn() -> Vec<ToolSpec>,
}

impl MockHandler {
    pub fn new(server: &'static str, specs: fn() -> Vec<ToolSpec>) -> Self {
        Self { server, specs }
    }
}

#[async_trait]
impl ToolHandler for MockHandler {
    fn server(&self) -> &'static str {
        self.server
    }

    fn specs(&self) -> Vec<ToolSpec> {
        (self.specs)()
    }

    async fn call(&self, tool: &str, params: &Value) -> Result<Value, ToolError> {
        debug!("Mock {} handling {tool}", self.server);
        Ok(json!({
            "success": true,
            "mock": true,
            "tool": tool,
            "parameters": params,
        }))
    }
}

/// One mock per service. Calendar keeps its real handler since it never
/// calls out.
pub fn mock_handlers() -> Vec<Arc<dyn ToolHandler>> {
    vec![
        Arc::new(MockHandler::new("web_search", web_search::specs)),
        Arc::new(MockHandler::new("github", github::specs)),
        Arc::new(MockHandler::new("jira", jira::specs)),
        Arc::new(MockHandler::new("google_drive", gdrive::specs)),
        Arc::new(MockHandler::new("email", email::specs)),
        Arc::new(calendar::CalendarHandler),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Dispatcher, ToolCall};

    #[tokio::test]
    async fn test_mock_dispatcher_covers_every_tool() {
        let d = Dispatcher::new(mock_handlers());
        assert_eq!(d.canonical_names().len(), 30);
        assert_eq!(d.resolve("create_jira_issue"), Some("jira_create_issue"));
        assert_eq!(d.resolve("search_files"), Some("list_files"));

        let result = d
            .dispatch(&ToolCall::new("search_web", json!({"query": "rust"})))
            .await;
        assert!(result.success);
        let content = result.content.unwrap();
        assert_eq!(content["tool"], "web_search");
        assert_eq!(content["parameters"]["query"], "rust");
    }
}
