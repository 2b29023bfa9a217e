//! Runs the tool calls an agent asks for and reports them back to the LLM.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::catalog;
use super::credentials::CredentialStore;
use super::parser::FunctionCallParser;
use super::{Dispatcher, ToolCall, ToolResult};

/// Who is asking for a batch of tool calls.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub agent_id: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
    /// Tool names (canonical or alias) the agent may call.
    pub allowed_tools: Vec<String>,
}

impl ExecutionContext {
    fn allows(&self, name: &str) -> bool {
        self.allowed_tools.iter().any(|t| t == name)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub total_execution_time: f64,
    pub success_rate: f64,
    pub average_execution_time: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub servers: std::collections::BTreeMap<String, bool>,
    pub tools: Vec<String>,
    pub total_tools: usize,
    pub healthy_servers: String,
    pub stats: ExecutionStats,
}

pub struct ToolExecutor {
    dispatcher: Arc<Dispatcher>,
    credentials: Arc<CredentialStore>,
    parser: FunctionCallParser,
    stats: Mutex<ExecutionStats>,
}

impl ToolExecutor {
    pub fn new(dispatcher: Arc<Dispatcher>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            dispatcher,
            credentials,
            parser: FunctionCallParser::new(),
            stats: Mutex::new(ExecutionStats::default()),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Run the calls the agent is allowed to make. Disallowed calls come
    /// back as failed results, ahead of the executed ones.
    pub async fn execute(&self, calls: Vec<ToolCall>, ctx: &ExecutionContext) -> Vec<ToolResult> {
        let mut results = Vec::new();
        let mut allowed = Vec::new();
        for call in calls {
            if ctx.allows(&call.name) {
                debug!("Validated tool call: {}", call.name);
                allowed.push(call);
            } else {
                warn!("Tool not allowed for agent {}: {}", ctx.agent_id, call.name);
                results.push(ToolResult::failed(
                    &call.name,
                    format!("Tool '{}' not available for agent '{}'", call.name, ctx.agent_id),
                    Duration::ZERO,
                ));
            }
        }

        match allowed.len() {
            0 => {}
            1 => results.push(self.dispatcher.dispatch(&allowed[0]).await),
            _ => results.extend(self.dispatcher.dispatch_batch(&allowed).await),
        }

        self.record(&results);
        let ok = results.iter().filter(|r| r.success).count();
        let total_time: f64 = results.iter().map(|r| r.execution_time).sum();
        info!(
            "Tool execution complete: {ok} success, {} failed, {total_time:.2}s total",
            results.len() - ok
        );
        results
    }

    /// Execute the calls found in an LLM reply. Native function calls win;
    /// the text is parsed only when there are none. Returns the reply with
    /// the formatted results appended.
    pub async fn process_llm_response(
        &self,
        text: &str,
        native_calls: Vec<ToolCall>,
        ctx: &ExecutionContext,
    ) -> (String, Vec<ToolResult>) {
        if ctx.allowed_tools.is_empty() {
            debug!("No tools available for agent: {}", ctx.agent_id);
            return (text.to_string(), Vec::new());
        }

        let calls = if native_calls.is_empty() {
            let parsed = self.parser.parse(text, &ctx.allowed_tools);
            self.parser.to_tool_calls(&parsed)
        } else {
            native_calls
        };
        if calls.is_empty() {
            return (text.to_string(), Vec::new());
        }

        info!("Found {} function calls to execute", calls.len());
        let results = self.execute(calls, ctx).await;
        let formatted = format_results(&results);
        let enhanced = match (text.trim().is_empty(), formatted.is_empty()) {
            (_, true) => text.to_string(),
            (true, false) => formatted,
            (false, false) => format!("{text}\n\n{formatted}"),
        };
        (enhanced, results)
    }

    /// Run one tool outside any agent, as the CLI and MCP surfaces do.
    pub async fn run_tool(&self, name: &str, parameters: Value) -> ToolResult {
        let result = self.dispatcher.dispatch(&ToolCall::new(name, parameters)).await;
        self.record(std::slice::from_ref(&result));
        result
    }

    fn record(&self, results: &[ToolResult]) {
        if results.is_empty() {
            return;
        }
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let ok = results.iter().filter(|r| r.success).count() as u64;
        stats.total_executions += results.len() as u64;
        stats.successful_executions += ok;
        stats.failed_executions += results.len() as u64 - ok;
        stats.total_execution_time += results.iter().map(|r| r.execution_time).sum::<f64>();
    }

    pub fn stats(&self) -> ExecutionStats {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if stats.total_executions > 0 {
            let total = stats.total_executions as f64;
            stats.success_rate = stats.successful_executions as f64 / total;
            stats.average_execution_time = stats.total_execution_time / total;
        }
        stats
    }

    pub fn health(&self) -> HealthReport {
        let servers: std::collections::BTreeMap<String, bool> =
            catalog::installation_status(&self.dispatcher, &self.credentials)
                .into_iter()
                .map(|(id, s)| (id, s.ready))
                .collect();
        let healthy = servers.values().filter(|ready| **ready).count();
        let status = if healthy == servers.len() {
            "healthy"
        } else if healthy > 0 {
            "partial"
        } else {
            "unhealthy"
        };
        let tools = self.dispatcher.canonical_names();
        HealthReport {
            status,
            healthy_servers: format!("{healthy}/{}", servers.len()),
            servers,
            total_tools: tools.len(),
            tools,
            stats: self.stats(),
        }
    }
}

/// One result as a block of LLM-readable text.
pub fn format_result(result: &ToolResult) -> String {
    if result.success {
        let content = match &result.content {
            Some(Value::String(s)) => s.clone(),
            Some(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()),
            None => "null".to_string(),
        };
        format!(
            "🔧 **Tool: {}** (✅ Success - {:.2}s)\n\nResult:\n```\n{content}\n```",
            result.tool_name, result.execution_time
        )
    } else {
        format!(
            "🔧 **Tool: {}** (❌ Failed - {:.2}s)\n\nError: {}",
            result.tool_name,
            result.execution_time,
            result.error.as_deref().unwrap_or("Unknown error")
        )
    }
}

pub fn format_results(results: &[ToolResult]) -> String {
    results
        .iter()
        .map(format_result)
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
