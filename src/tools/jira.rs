//! JIRA tools over the REST API v2.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::info;

use super::credentials::{CredentialStore, Service};
use super::{
    ToolCategory, ToolError, ToolHandler, ToolSpec, check_response, optional_str, optional_u64,
    required_str, string_list,
};

const DEFAULT_LIMIT: u64 = 10;

pub fn specs() -> Vec<ToolSpec> {
    let key = json!({"type": "string", "description": "Issue key, e.g. PROJ-123"});
    vec![
        ToolSpec {
            name: "jira_create_issue",
            aliases: &["create_jira_issue"],
            description: "Create a new JIRA issue",
            category: ToolCategory::Jira,
            parameters: json!({
                "type": "object",
                "properties": {
                    "project": {"type": "string", "description": "Project key"},
                    "issue_type": {"type": "string", "description": "Story, Bug, Task or Epic"},
                    "summary": {"type": "string"},
                    "description": {"type": "string"},
                    "priority": {"type": "string"},
                    "assignee": {"type": "string"},
                    "labels": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["project", "issue_type", "summary"]
            }),
        },
        ToolSpec {
            name: "get_issue",
            aliases: &["jira_get_issue"],
            description: "Get the details of a JIRA issue",
            category: ToolCategory::Jira,
            parameters: json!({
                "type": "object",
                "properties": {"issue_key": key},
                "required": ["issue_key"]
            }),
        },
        ToolSpec {
            name: "update_issue",
            aliases: &["jira_update_issue"],
            description: "Update fields of a JIRA issue",
            category: ToolCategory::Jira,
            parameters: json!({
                "type": "object",
                "properties": {
                    "issue_key": key,
                    "summary": {"type": "string"},
                    "description": {"type": "string"},
                    "assignee": {"type": "string"},
                    "priority": {"type": "string"}
                },
                "required": ["issue_key"]
            }),
        },
        ToolSpec {
            name: "search_issues",
            aliases: &["jira_search_issues"],
            description: "Search JIRA issues with JQL",
            category: ToolCategory::Jira,
            parameters: json!({
                "type": "object",
                "properties": {
                    "jql": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": ["jql"]
            }),
        },
        ToolSpec {
            name: "add_comment",
            aliases: &["jira_add_comment"],
            description: "Comment on a JIRA issue",
            category: ToolCategory::Jira,
            parameters: json!({
                "type": "object",
                "properties": {
                    "issue_key": key,
                    "comment": {"type": "string"}
                },
                "required": ["issue_key", "comment"]
            }),
        },
        ToolSpec {
            name: "transition_issue",
            aliases: &["jira_transition_issue"],
            description: "Move a JIRA issue to another status",
            category: ToolCategory::Jira,
            parameters: json!({
                "type": "object",
                "properties": {
                    "issue_key": key,
                    "transition": {"type": "string", "description": "Transition name"}
                },
                "required": ["issue_key", "transition"]
            }),
        },
        ToolSpec {
            name: "list_projects",
            aliases: &["jira_list_projects"],
            description: "List JIRA projects",
            category: ToolCategory::Jira,
            parameters: json!({"type": "object", "properties": {}}),
        },
    ]
}

pub struct JiraHandler {
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
}

impl JiraHandler {
    pub fn new(credentials: Arc<CredentialStore>) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, credentials })
    }

    fn base_url(&self) -> Result<&str, ToolError> {
        self.credentials
            .var("JIRA_URL")
            .map(|u| u.trim_end_matches('/'))
            .ok_or(ToolError::NotConfigured("jira"))
    }

    fn api(&self, path: &str) -> Result<String, ToolError> {
        Ok(format!("{}/rest/api/2{path}", self.base_url()?))
    }

    fn browse_url(&self, key: &str) -> String {
        format!("{}/browse/{key}", self.base_url().unwrap_or_default())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ToolError> {
        let request = self.credentials.apply(Service::Jira, request).await?;
        check_response(request.send().await?).await
    }

    fn issue_view(&self, issue: &Value) -> Value {
        let key = issue["key"].as_str().unwrap_or_default();
        let fields = &issue["fields"];
        json!({
            "key": key,
            "summary": fields["summary"],
            "description": fields["description"].as_str().unwrap_or_default(),
            "status": fields["status"]["name"],
            "priority": fields["priority"]["name"],
            "assignee": fields["assignee"]["displayName"],
            "reporter": fields["reporter"]["displayName"],
            "created": fields["created"],
            "updated": fields["updated"],
            "project": fields["project"]["name"],
            "issue_type": fields["issuetype"]["name"],
            "labels": fields.get("labels").cloned().unwrap_or(json!([])),
            "url": self.browse_url(key),
        })
    }

    async fn fetch_issue(&self, key: &str) -> Result<Value, ToolError> {
        let issue = self.send(self.http.get(self.api(&format!("/issue/{key}"))?)).await?;
        Ok(json!({"success": true, "issue": self.issue_view(&issue)}))
    }

    async fn create_issue(&self, params: &Value) -> Result<Value, ToolError> {
        let mut fields = Map::new();
        fields.insert("project".into(), json!({"key": required_str(params, "project")?}));
        fields.insert("issuetype".into(), json!({"name": required_str(params, "issue_type")?}));
        let summary = required_str(params, "summary")?;
        fields.insert("summary".into(), json!(summary));
        fields.insert(
            "description".into(),
            json!(optional_str(params, "description").unwrap_or_default()),
        );
        if let Some(priority) = optional_str(params, "priority") {
            fields.insert("priority".into(), json!({"name": priority}));
        }
        if let Some(assignee) = optional_str(params, "assignee") {
            fields.insert("assignee".into(), json!({"name": assignee}));
        }
        let labels = string_list(params, "labels");
        if !labels.is_empty() {
            fields.insert("labels".into(), json!(labels));
        }

        let created = self
            .send(self.http.post(self.api("/issue")?).json(&json!({"fields": fields})))
            .await?;
        let key = created["key"].as_str().unwrap_or_default().to_string();
        info!("Created JIRA issue {key}: {summary}");

        let mut result = self.fetch_issue(&key).await?;
        result["issue"]["id"] = created["id"].clone();
        Ok(result)
    }

    async fn update_issue(&self, params: &Value) -> Result<Value, ToolError> {
        let key = required_str(params, "issue_key")?;
        let mut fields = Map::new();
        for name in ["summary", "description"] {
            if let Some(v) = optional_str(params, name) {
                fields.insert(name.into(), json!(v));
            }
        }
        for name in ["assignee", "priority"] {
            if let Some(v) = optional_str(params, name) {
                fields.insert(name.into(), json!({"name": v}));
            }
        }
        if fields.is_empty() {
            return Ok(json!({"error": "No fields to update"}));
        }

        self.send(
            self.http
                .put(self.api(&format!("/issue/{key}"))?)
                .json(&json!({"fields": fields})),
        )
        .await?;
        info!("Updated JIRA issue {key}");
        self.fetch_issue(key).await
    }

    async fn search_issues(&self, params: &Value) -> Result<Value, ToolError> {
        let jql = required_str(params, "jql")?;
        let limit = optional_u64(params, "limit").unwrap_or(DEFAULT_LIMIT);
        let body = json!({"jql": jql, "maxResults": limit});
        let data = self.send(self.http.post(self.api("/search")?).json(&body)).await?;
        let issues: Vec<Value> = data["issues"]
            .as_array()
            .map(|items| items.iter().map(|i| self.issue_view(i)).collect())
            .unwrap_or_default();
        Ok(json!({
            "success": true,
            "total": data["total"].as_u64().unwrap_or(issues.len() as u64),
            "count": issues.len(),
            "issues": issues,
        }))
    }

    async fn add_comment(&self, params: &Value) -> Result<Value, ToolError> {
        let key = required_str(params, "issue_key")?;
        let comment = required_str(params, "comment")?;
        let result = self
            .send(
                self.http
                    .post(self.api(&format!("/issue/{key}/comment"))?)
                    .json(&json!({"body": comment})),
            )
            .await?;
        info!("Added comment to JIRA issue {key}");
        Ok(json!({
            "success": true,
            "comment": {
                "id": result["id"],
                "body": comment,
                "author": result["author"]["displayName"],
                "created": result["created"],
                "updated": result["updated"],
            }
        }))
    }

    async fn transition_issue(&self, params: &Value) -> Result<Value, ToolError> {
        let key = required_str(params, "issue_key")?;
        let wanted = required_str(params, "transition")?;
        let url = self.api(&format!("/issue/{key}/transitions"))?;
        let available = self.send(self.http.get(&url)).await?;
        let transitions = available["transitions"].as_array().cloned().unwrap_or_default();

        let Some(id) = transitions
            .iter()
            .find(|t| {
                t["name"]
                    .as_str()
                    .is_some_and(|n| n.eq_ignore_ascii_case(wanted))
            })
            .map(|t| t["id"].clone())
        else {
            let names: Vec<&str> = transitions.iter().filter_map(|t| t["name"].as_str()).collect();
            return Ok(json!({
                "error": format!(
                    "Transition '{wanted}' not found. Available transitions: {}",
                    names.join(", ")
                )
            }));
        };

        self.send(self.http.post(&url).json(&json!({"transition": {"id": id}})))
            .await?;
        info!("Transitioned JIRA issue {key} to {wanted}");
        self.fetch_issue(key).await
    }

    async fn list_projects(&self) -> Result<Value, ToolError> {
        let data = self.send(self.http.get(self.api("/project")?)).await?;
        let projects: Vec<Value> = data
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|p| {
                        let key = p["key"].as_str().unwrap_or_default();
                        json!({
                            "key": key,
                            "name": p["name"],
                            "project_type": p["projectTypeKey"].as_str().unwrap_or("unknown"),
                            "lead": p["lead"]["displayName"].as_str().unwrap_or("Unknown"),
                            "url": self.browse_url(key),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({"success": true, "count": projects.len(), "projects": projects}))
    }
}

#[async_trait]
impl ToolHandler for JiraHandler {
    fn server(&self) -> &'static str {
        "jira"
    }

    fn specs(&self) -> Vec<ToolSpec> {
        specs()
    }

    fn credentials(&self) -> Option<Service> {
        Some(Service::Jira)
    }

    async fn call(&self, tool: &str, params: &Value) -> Result<Value, ToolError> {
        match tool {
            "jira_create_issue" => self.create_issue(params).await,
            "get_issue" => self.fetch_issue(required_str(params, "issue_key")?).await,
            "update_issue" => self.update_issue(params).await,
            "search_issues" => self.search_issues(params).await,
            "add_comment" => self.add_comment(params).await,
            "transition_issue" => self.transition_issue(params).await,
            "list_projects" => self.list_projects().await,
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}
