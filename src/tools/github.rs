//! GitHub REST API tools.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tracing::info;

use super::credentials::{CredentialStore, Service};
use super::{
    ToolCategory, ToolError, ToolHandler, ToolSpec, check_response, optional_str, optional_u64,
    required_str, string_list,
};

const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_LIMIT: u64 = 10;

pub fn specs() -> Vec<ToolSpec> {
    let repo = json!({"type": "string", "description": "Repository as owner/name"});
    vec![
        ToolSpec {
            name: "create_issue",
            aliases: &["github_create_issue"],
            description: "Create a new GitHub issue",
            category: ToolCategory::Github,
            parameters: json!({
                "type": "object",
                "properties": {
                    "repository": repo,
                    "title": {"type": "string", "description": "Issue title"},
                    "body": {"type": "string", "description": "Issue body"},
                    "labels": {"type": "array", "items": {"type": "string"}},
                    "assignees": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["repository", "title", "body"]
            }),
        },
        ToolSpec {
            name: "get_repository",
            aliases: &["github_get_repository"],
            description: "Get information about a GitHub repository",
            category: ToolCategory::Github,
            parameters: json!({
                "type": "object",
                "properties": {"repository": repo},
                "required": ["repository"]
            }),
        },
        ToolSpec {
            name: "list_issues",
            aliases: &["github_list_issues"],
            description: "List issues of a GitHub repository",
            category: ToolCategory::Github,
            parameters: json!({
                "type": "object",
                "properties": {
                    "repository": repo,
                    "state": {"type": "string", "enum": ["open", "closed", "all"]},
                    "limit": {"type": "integer"}
                },
                "required": ["repository"]
            }),
        },
        ToolSpec {
            name: "get_file_contents",
            aliases: &["github_get_file_contents"],
            description: "Read a file from a GitHub repository",
            category: ToolCategory::Github,
            parameters: json!({
                "type": "object",
                "properties": {
                    "repository": repo,
                    "file_path": {"type": "string"},
                    "branch": {"type": "string"}
                },
                "required": ["repository", "file_path"]
            }),
        },
        ToolSpec {
            name: "create_file",
            aliases: &["github_create_file"],
            description: "Commit a new file to a GitHub repository",
            category: ToolCategory::Github,
            parameters: json!({
                "type": "object",
                "properties": {
                    "repository": repo,
                    "file_path": {"type": "string"},
                    "content": {"type": "string"},
                    "commit_message": {"type": "string"},
                    "branch": {"type": "string"}
                },
                "required": ["repository", "file_path", "content", "commit_message"]
            }),
        },
        ToolSpec {
            name: "search_repositories",
            aliases: &["github_search_repositories"],
            description: "Search GitHub repositories",
            category: ToolCategory::Github,
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": ["query"]
            }),
        },
    ]
}

pub struct GithubHandler {
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
    api_url: String,
}

impl GithubHandler {
    pub fn new(credentials: Arc<CredentialStore>) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("agent-hub/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let api_url = credentials
            .var("GITHUB_API_URL")
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            http,
            credentials,
            api_url,
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ToolError> {
        let request = request.header(reqwest::header::ACCEPT, "application/vnd.github+json");
        let request = self.credentials.apply(Service::Github, request).await?;
        check_response(request.send().await?).await
    }

    fn repo_url(&self, repository: &str, rest: &str) -> Result<String, ToolError> {
        if !repository.contains('/') {
            return Err(ToolError::InvalidParameters(format!(
                "repository must be owner/name, got '{repository}'"
            )));
        }
        Ok(format!("{}/repos/{repository}{rest}", self.api_url))
    }

    async fn create_issue(&self, params: &Value) -> Result<Value, ToolError> {
        let repository = required_str(params, "repository")?;
        let title = required_str(params, "title")?;
        let body = json!({
            "title": title,
            "body": optional_str(params, "body").unwrap_or_default(),
            "labels": string_list(params, "labels"),
            "assignees": string_list(params, "assignees"),
        });
        let url = self.repo_url(repository, "/issues")?;
        let issue = self.send(self.http.post(url).json(&body)).await?;
        info!("Created GitHub issue #{} in {repository}", issue["number"]);
        Ok(json!({"success": true, "issue": issue_summary(&issue)}))
    }

    async fn get_repository(&self, params: &Value) -> Result<Value, ToolError> {
        let url = self.repo_url(required_str(params, "repository")?, "")?;
        let repo = self.send(self.http.get(url)).await?;
        Ok(json!({
            "success": true,
            "repository": {
                "name": repo["name"],
                "full_name": repo["full_name"],
                "description": repo["description"],
                "url": repo["html_url"],
                "clone_url": repo["clone_url"],
                "language": repo["language"],
                "stars": repo["stargazers_count"],
                "forks": repo["forks_count"],
                "open_issues": repo["open_issues_count"],
                "created_at": repo["created_at"],
                "updated_at": repo["updated_at"],
            }
        }))
    }

    async fn list_issues(&self, params: &Value) -> Result<Value, ToolError> {
        let url = self.repo_url(required_str(params, "repository")?, "/issues")?;
        let state = optional_str(params, "state").unwrap_or("open");
        let limit = optional_u64(params, "limit").unwrap_or(DEFAULT_LIMIT).min(100);
        let per_page = limit.to_string();
        let data = self
            .send(self.http.get(url).query(&[("state", state), ("per_page", per_page.as_str())]))
            .await?;
        let issues: Vec<Value> = data
            .as_array()
            .map(|items| items.iter().take(limit as usize).map(issue_summary).collect())
            .unwrap_or_default();
        Ok(json!({"success": true, "count": issues.len(), "issues": issues}))
    }

    async fn get_file_contents(&self, params: &Value) -> Result<Value, ToolError> {
        let repository = required_str(params, "repository")?;
        let path = required_str(params, "file_path")?;
        let branch = optional_str(params, "branch").unwrap_or("main");
        let url = self.repo_url(repository, &format!("/contents/{}", path.trim_start_matches('/')))?;
        let file = self.send(self.http.get(url).query(&[("ref", branch)])).await?;

        let encoded: String = file["content"]
            .as_str()
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| ToolError::ExecutionFailed(format!("invalid file encoding: {e}")))?;

        Ok(json!({
            "success": true,
            "file": {
                "path": file["path"],
                "name": file["name"],
                "size": file["size"],
                "content": String::from_utf8_lossy(&bytes),
                "sha": file["sha"],
                "url": file["html_url"],
            }
        }))
    }

    async fn create_file(&self, params: &Value) -> Result<Value, ToolError> {
        let repository = required_str(params, "repository")?;
        let path = required_str(params, "file_path")?;
        let message = required_str(params, "commit_message")?;
        let content = params["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidParameters("content is required".into()))?;
        let branch = optional_str(params, "branch").unwrap_or("main");

        let url = self.repo_url(repository, &format!("/contents/{}", path.trim_start_matches('/')))?;
        let body = json!({
            "message": message,
            "content": STANDARD.encode(content),
            "branch": branch,
        });
        let result = self.send(self.http.put(url).json(&body)).await?;
        info!("Created file {path} in {repository}");

        Ok(json!({
            "success": true,
            "file": {
                "path": path,
                "sha": result["content"]["sha"],
                "url": result["content"]["html_url"],
                "commit": {
                    "sha": result["commit"]["sha"],
                    "message": message,
                    "url": result["commit"]["html_url"],
                }
            }
        }))
    }

    async fn search_repositories(&self, params: &Value) -> Result<Value, ToolError> {
        let query = required_str(params, "query")?;
        let limit = optional_u64(params, "limit").unwrap_or(DEFAULT_LIMIT).min(100);
        let per_page = limit.to_string();
        let url = format!("{}/search/repositories", self.api_url);
        let data = self
            .send(self.http.get(url).query(&[("q", query), ("per_page", per_page.as_str())]))
            .await?;
        let repos: Vec<Value> = data["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .take(limit as usize)
                    .map(|r| {
                        json!({
                            "name": r["name"],
                            "full_name": r["full_name"],
                            "description": r["description"],
                            "url": r["html_url"],
                            "language": r["language"],
                            "stars": r["stargazers_count"],
                            "forks": r["forks_count"],
                            "updated_at": r["updated_at"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({"success": true, "count": repos.len(), "repositories": repos}))
    }
}

fn issue_summary(issue: &Value) -> Value {
    let names = |key: &str, field: &str| -> Vec<Value> {
        issue[key]
            .as_array()
            .map(|items| items.iter().map(|i| i[field].clone()).collect())
            .unwrap_or_default()
    };
    json!({
        "number": issue["number"],
        "title": issue["title"],
        "state": issue["state"],
        "url": issue["html_url"],
        "created_at": issue["created_at"],
        "author": issue["user"]["login"],
        "labels": names("labels", "name"),
        "assignees": names("assignees", "login"),
    })
}

#[async_trait]
impl ToolHandler for GithubHandler {
    fn server(&self) -> &'static str {
        "github"
    }

    fn specs(&self) -> Vec<ToolSpec> {
        specs()
    }

    fn credentials(&self) -> Option<Service> {
        Some(Service::Github)
    }

    async fn call(&self, tool: &str, params: &Value) -> Result<Value, ToolError> {
        match tool {
            "create_issue" => self.create_issue(params).await,
            "get_repository" => self.get_repository(params).await,
            "list_issues" => self.list_issues(params).await,
            "get_file_contents" => self.get_file_contents(params).await,
            "create_file" => self.create_file(params).await,
            "search_repositories" => self.search_repositories(params).await,
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}
