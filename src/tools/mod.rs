//! Tool dispatch over service integrations.
//!
//! Each service (web search, GitHub, JIRA, Google Drive, Gmail, calendar)
//! is a [`ToolHandler`] that publishes its [`ToolSpec`]s. The [`Dispatcher`]
//! routes calls by tool name or alias and turns every outcome, including
//! handler errors, into a [`ToolResult`].

pub mod calendar;
pub mod catalog;
pub mod credentials;
pub mod email;
pub mod executor;
pub mod gdrive;
pub mod github;
pub mod jira;
pub mod mock;
pub mod parser;
pub mod web_search;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use credentials::CredentialStore;

// ── Core types ───────────────────────────────────────────────────────

/// A function call to be executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub parameters: Value,
}

impl ToolCall {
    /// New call with a random `call_xxxxxxxx` id.
    pub fn new(name: impl Into<String>, parameters: Value) -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("call_{}", &hex[..8]),
            name: name.into(),
            parameters,
        }
    }
}

/// Outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    pub content: Option<Value>,
    pub error: Option<String>,
    pub tool_name: String,
    /// Seconds.
    pub execution_time: f64,
}

impl ToolResult {
    pub fn ok(tool_name: impl Into<String>, content: Value, elapsed: Duration) -> Self {
        Self {
            success: true,
            content: Some(content),
            error: None,
            tool_name: tool_name.into(),
            execution_time: elapsed.as_secs_f64(),
        }
    }

    pub fn failed(tool_name: impl Into<String>, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error.into()),
            tool_name: tool_name.into(),
            execution_time: elapsed.as_secs_f64(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("{0} credentials are not configured")]
    NotConfigured(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Github,
    Jira,
    GoogleDrive,
    WebSearch,
    Email,
    Calendar,
    Other,
}

impl ToolCategory {
    pub const ALL: [ToolCategory; 7] = [
        ToolCategory::Github,
        ToolCategory::Jira,
        ToolCategory::GoogleDrive,
        ToolCategory::WebSearch,
        ToolCategory::Email,
        ToolCategory::Calendar,
        ToolCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Github => "github",
            ToolCategory::Jira => "jira",
            ToolCategory::GoogleDrive => "google_drive",
            ToolCategory::WebSearch => "web_search",
            ToolCategory::Email => "email",
            ToolCategory::Calendar => "calendar",
            ToolCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

/// Static description of one tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
    pub category: ToolCategory,
    /// JSON schema of the parameters object.
    pub parameters: Value,
}

impl ToolSpec {
    pub fn required_params(&self) -> Vec<&str> {
        self.parameters["required"]
            .as_array()
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Declaration in the shape the LLM function-calling API expects.
    pub fn declaration(&self) -> Value {
        let has_props = self.parameters["properties"]
            .as_object()
            .is_some_and(|p| !p.is_empty());
        if has_props {
            serde_json::json!({
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            })
        } else {
            serde_json::json!({"name": self.name, "description": self.description})
        }
    }
}

/// A service integration exposing one or more tools.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Catalogue server id (`github`, `jira`, ...).
    fn server(&self) -> &'static str;

    fn specs(&self) -> Vec<ToolSpec>;

    /// Credentials the handler needs before it can call out.
    fn credentials(&self) -> Option<credentials::Service> {
        None
    }

    /// Run `tool` (a canonical name from [`ToolHandler::specs`]).
    async fn call(&self, tool: &str, params: &Value) -> Result<Value, ToolError>;
}

// ── Parameter helpers ────────────────────────────────────────────────

pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    params[key]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidParameters(format!("{key} is required")))
}

pub(crate) fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params[key].as_str().filter(|s| !s.trim().is_empty())
}

pub(crate) fn optional_u64(params: &Value, key: &str) -> Option<u64> {
    match &params[key] {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts a JSON array of strings or a comma separated string.
pub(crate) fn string_list(params: &Value, key: &str) -> Vec<String> {
    match &params[key] {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Turn a non-2xx response into [`ToolError::Api`], preferring the API's
/// own error message.
pub(crate) async fn check_response(response: reqwest::Response) -> Result<Value, ToolError> {
    let status = response.status();
    let text = response.text().await?;
    let body: Value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    if status.is_success() {
        return Ok(body);
    }
    let message = body["error"]["message"]
        .as_str()
        .or_else(|| body["message"].as_str())
        .or_else(|| body["errorMessages"][0].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    Err(ToolError::Api {
        status: status.as_u16(),
        message,
    })
}

// ── Dispatcher ───────────────────────────────────────────────────────

struct Route {
    handler: Arc<dyn ToolHandler>,
    spec: ToolSpec,
}

/// Metadata about one registered tool name.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    /// Canonical name when `name` is an alias.
    pub canonical: String,
    pub description: String,
    pub category: ToolCategory,
    pub server: String,
    pub parameters: Value,
}

pub struct Dispatcher {
    handlers: Vec<Arc<dyn ToolHandler>>,
    routes: HashMap<String, Route>,
    aliases: HashMap<String, String>,
}

impl Dispatcher {
    pub fn new(handlers: Vec<Arc<dyn ToolHandler>>) -> Self {
        let mut routes = HashMap::new();
        let mut aliases = HashMap::new();
        for handler in &handlers {
            for spec in handler.specs() {
                for alias in spec.aliases {
                    aliases.insert(alias.to_string(), spec.name.to_string());
                }
                routes.insert(
                    spec.name.to_string(),
                    Route {
                        handler: handler.clone(),
                        spec,
                    },
                );
            }
        }
        info!(
            "Tool dispatcher initialized with {} tools and {} aliases",
            routes.len(),
            aliases.len()
        );
        Self {
            handlers,
            routes,
            aliases,
        }
    }

    /// Real service handlers in production mode, echoing mocks in test mode.
    pub fn from_config(config: &Config, credentials: Arc<CredentialStore>) -> Result<Self, ToolError> {
        if config.is_test_mode() {
            return Ok(Self::new(mock::mock_handlers()));
        }
        let handlers: Vec<Arc<dyn ToolHandler>> = vec![
            Arc::new(web_search::WebSearchHandler::new(&config.tools, credentials.clone())?),
            Arc::new(github::GithubHandler::new(credentials.clone())?),
            Arc::new(jira::JiraHandler::new(credentials.clone())?),
            Arc::new(gdrive::DriveHandler::new(credentials.clone())?),
            Arc::new(email::GmailHandler::new(credentials)?),
            Arc::new(calendar::CalendarHandler),
        ];
        Ok(Self::new(handlers))
    }

    pub fn handlers(&self) -> &[Arc<dyn ToolHandler>] {
        &self.handlers
    }

    /// Canonical tool name for a name or alias.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        if let Some((key, _)) = self.routes.get_key_value(name) {
            return Some(key.as_str());
        }
        self.aliases.get(name).map(String::as_str)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.resolve(name)
            .and_then(|n| self.routes.get(n))
            .map(|r| &r.spec)
    }

    /// Every callable name, canonical names and aliases, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .routes
            .keys()
            .chain(self.aliases.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn canonical_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn tool_info(&self, name: &str) -> Option<ToolInfo> {
        let canonical = self.resolve(name)?;
        let route = self.routes.get(canonical)?;
        Some(ToolInfo {
            name: name.to_string(),
            canonical: canonical.to_string(),
            description: route.spec.description.to_string(),
            category: route.spec.category,
            server: route.handler.server().to_string(),
            parameters: route.spec.parameters.clone(),
        })
    }

    /// All names (aliases included) grouped by category. Every category key
    /// is present, possibly empty.
    pub fn by_category(&self) -> BTreeMap<&'static str, Vec<String>> {
        let mut groups: BTreeMap<&'static str, Vec<String>> = ToolCategory::ALL
            .iter()
            .map(|c| (c.as_str(), Vec::new()))
            .collect();
        for name in self.tool_names() {
            if let Some(spec) = self.spec(&name) {
                groups
                    .entry(spec.category.as_str())
                    .or_default()
                    .push(name);
            }
        }
        groups
    }

    /// Execute one call. Never fails: errors become failed results.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();

        let Some(route) = self.resolve(&call.name).and_then(|n| self.routes.get(n)) else {
            return ToolResult::failed(
                &call.name,
                format!(
                    "Tool '{}' not found. Available tools: {}",
                    call.name,
                    self.tool_names().join(", ")
                ),
                start.elapsed(),
            );
        };

        info!("Dispatching tool: {} ({})", call.name, call.id);

        let params = if call.parameters.is_null() {
            Value::Object(Default::default())
        } else {
            call.parameters.clone()
        };

        match route.handler.call(route.spec.name, &params).await {
            Ok(content) => {
                let failed = content.get("error").is_some()
                    || content.get("success").and_then(Value::as_bool) == Some(false);
                if failed {
                    let error = match &content["error"] {
                        Value::String(s) => s.clone(),
                        Value::Null => "Unknown error".to_string(),
                        other => other.to_string(),
                    };
                    ToolResult {
                        success: false,
                        content: Some(content),
                        error: Some(error),
                        tool_name: call.name.clone(),
                        execution_time: start.elapsed().as_secs_f64(),
                    }
                } else {
                    ToolResult::ok(&call.name, content, start.elapsed())
                }
            }
            Err(e) => {
                warn!("Tool {} failed: {e}", call.name);
                ToolResult::failed(&call.name, e.to_string(), start.elapsed())
            }
        }
    }

    /// Execute calls concurrently; results keep the order of `calls`.
    pub async fn dispatch_batch(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        info!("Dispatching {} tools in batch", calls.len());
        futures::future::join_all(calls.iter().map(|c| self.dispatch(c))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed;

    #[async_trait]
    impl ToolHandler for Fixed {
        fn server(&self) -> &'static str {
            "fixed"
        }

        fn specs(&self) -> Vec<ToolSpec> {
            vec![
                ToolSpec {
                    name: "ok_tool",
                    aliases: &["ok_alias"],
                    description: "always works",
                    category: ToolCategory::Other,
                    parameters: json!({"type": "object", "properties": {"x": {"type": "string"}}, "required": ["x"]}),
                },
                ToolSpec {
                    name: "soft_fail",
                    aliases: &[],
                    description: "reports an error",
                    category: ToolCategory::Calendar,
                    parameters: json!({"type": "object", "properties": {}}),
                },
                ToolSpec {
                    name: "hard_fail",
                    aliases: &[],
                    description: "returns Err",
                    category: ToolCategory::Other,
                    parameters: json!({"type": "object", "properties": {}}),
                },
            ]
        }

        async fn call(&self, tool: &str, params: &Value) -> Result<Value, ToolError> {
            match tool {
                "ok_tool" => Ok(json!({"echo": required_str(params, "x")?})),
                "soft_fail" => Ok(json!({"error": "not yet", "available_soon": true})),
                _ => Err(ToolError::ExecutionFailed("boom".into())),
            }
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(vec![Arc::new(Fixed)])
    }

    #[test]
    fn test_tool_call_ids() {
        let call = ToolCall::new("x", json!({}));
        assert!(call.id.starts_with("call_"));
        assert_eq!(call.id.len(), 13);
    }

    #[test]
    fn test_resolve_aliases() {
        let d = dispatcher();
        assert_eq!(d.resolve("ok_alias"), Some("ok_tool"));
        assert_eq!(d.resolve("ok_tool"), Some("ok_tool"));
        assert!(d.resolve("nope").is_none());
        assert_eq!(d.tool_names().len(), 4);
        assert_eq!(d.canonical_names().len(), 3);

        let info = d.tool_info("ok_alias").unwrap();
        assert_eq!(info.canonical, "ok_tool");
        assert_eq!(info.server, "fixed");
    }

    #[test]
    fn test_by_category_has_every_key() {
        let groups = dispatcher().by_category();
        assert_eq!(groups.len(), 7);
        assert_eq!(groups["calendar"], vec!["soft_fail"]);
        assert!(groups["github"].is_empty());
        assert_eq!(groups["other"].len(), 3);
    }

    #[test]
    fn test_declaration_omits_empty_parameters() {
        let d = dispatcher();
        let decl = d.spec("ok_tool").unwrap().declaration();
        assert_eq!(decl["parameters"]["required"][0], "x");
        let decl = d.spec("soft_fail").unwrap().declaration();
        assert!(decl.get("parameters").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_outcomes() {
        let d = dispatcher();

        let ok = d.dispatch(&ToolCall::new("ok_alias", json!({"x": "hi"}))).await;
        assert!(ok.success);
        assert_eq!(ok.tool_name, "ok_alias");
        assert_eq!(ok.content.unwrap()["echo"], "hi");

        let bad_params = d.dispatch(&ToolCall::new("ok_tool", Value::Null)).await;
        assert!(!bad_params.success);
        assert_eq!(bad_params.error.as_deref(), Some("Invalid parameters: x is required"));

        let soft = d.dispatch(&ToolCall::new("soft_fail", json!({}))).await;
        assert!(!soft.success);
        assert_eq!(soft.error.as_deref(), Some("not yet"));
        assert_eq!(soft.content.unwrap()["available_soon"], true);

        let hard = d.dispatch(&ToolCall::new("hard_fail", json!({}))).await;
        assert_eq!(hard.error.as_deref(), Some("Execution failed: boom"));

        let missing = d.dispatch(&ToolCall::new("missing", json!({}))).await;
        assert!(missing.error.unwrap().starts_with("Tool 'missing' not found"));
    }

    #[tokio::test]
    async fn test_dispatch_batch_preserves_order() {
        let d = dispatcher();
        let calls = vec![
            ToolCall::new("hard_fail", json!({})),
            ToolCall::new("ok_tool", json!({"x": "1"})),
            ToolCall::new("soft_fail", json!({})),
        ];
        let results = d.dispatch_batch(&calls).await;
        let names: Vec<&str> = results.iter().map(|r| r.tool_name.as_str()).collect();
        assert_eq!(names, vec!["hard_fail", "ok_tool", "soft_fail"]);
        assert!(results[1].success);
    }

    #[test]
    fn test_param_helpers() {
        let params = json!({"a": " ", "n": "7", "list": "x, y,,z", "arr": ["p", 1, "q"]});
        assert!(required_str(&params, "a").is_err());
        assert_eq!(optional_u64(&params, "n"), Some(7));
        assert_eq!(string_list(&params, "list"), vec!["x", "y", "z"]);
        assert_eq!(string_list(&params, "arr"), vec!["p", "q"]);
        assert!(string_list(&params, "missing").is_empty());
    }
}
