//! Service servers and what they need to run.
//!
//! Each server groups the tools of one [`ToolHandler`](super::ToolHandler).
//! A server is ready when it has tools registered and its credentials, if
//! any, are available.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::Value;

use super::Dispatcher;
use super::credentials::CredentialStore;

pub struct ServerInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub requirements: &'static [&'static str],
}

pub const SERVERS: &[ServerInfo] = &[
    ServerInfo {
        id: "github",
        name: "GitHub Integration",
        description: "Manage GitHub repositories, issues and files",
        requirements: &["GitHub Token"],
    },
    ServerInfo {
        id: "google_drive",
        name: "Google Drive Integration",
        description: "Create, read and manage Google Drive documents",
        requirements: &["Google API Credentials"],
    },
    ServerInfo {
        id: "jira",
        name: "JIRA Integration",
        description: "Create and manage JIRA tickets and projects",
        requirements: &["JIRA API Token", "JIRA URL", "Username"],
    },
    ServerInfo {
        id: "web_search",
        name: "Web Search",
        description: "Search the web for current information",
        requirements: &["Search API Key (optional, SerpAPI)"],
    },
    ServerInfo {
        id: "email",
        name: "Email Integration",
        description: "Send emails and drafts through Gmail",
        requirements: &["Google API Credentials"],
    },
    ServerInfo {
        id: "calendar",
        name: "Google Calendar",
        description: "Manage Google Calendar events and schedules",
        requirements: &["Google API Credentials"],
    },
];

pub fn server_info(id: &str) -> Option<&'static ServerInfo> {
    SERVERS.iter().find(|s| s.id == id)
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub has_credentials: bool,
    pub ready: bool,
    pub requirements: Vec<String>,
    pub tools: Vec<String>,
    pub tools_count: usize,
}

/// Server id for every tool name and alias.
pub fn tool_to_server(dispatcher: &Dispatcher) -> BTreeMap<String, String> {
    dispatcher
        .tool_names()
        .into_iter()
        .filter_map(|name| {
            let server = dispatcher.tool_info(&name)?.server;
            Some((name, server))
        })
        .collect()
}

/// Readiness of every registered server.
pub fn installation_status(
    dispatcher: &Dispatcher,
    credentials: &CredentialStore,
) -> BTreeMap<String, ServerStatus> {
    let mut out = BTreeMap::new();
    for handler in dispatcher.handlers() {
        let id = handler.server();
        let tools: Vec<String> = handler.specs().iter().map(|s| s.name.to_string()).collect();
        let has_credentials = handler
            .credentials()
            .is_none_or(|service| credentials.has(service));
        let (name, description, requirements) = match server_info(id) {
            Some(info) => (
                info.name.to_string(),
                info.description.to_string(),
                info.requirements.iter().map(|r| r.to_string()).collect(),
            ),
            None => (id.to_string(), String::new(), Vec::new()),
        };
        let enabled = !tools.is_empty();
        out.insert(
            id.to_string(),
            ServerStatus {
                name,
                description,
                enabled,
                has_credentials,
                ready: enabled && has_credentials,
                requirements,
                tools_count: tools.len(),
                tools,
            },
        );
    }
    out
}

/// LLM function declarations for `tools`, one per canonical tool, in the
/// order first requested. Unknown names are skipped.
pub fn function_declarations(dispatcher: &Dispatcher, tools: &[String]) -> Vec<Value> {
    let mut seen = HashSet::new();
    tools
        .iter()
        .filter_map(|name| dispatcher.spec(name))
        .filter(|spec| seen.insert(spec.name))
        .map(|spec| spec.declaration())
        .collect()
}
