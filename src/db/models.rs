use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_AVATAR: &str = "🤖";
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Persisted agent definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "default_context_type")]
    pub context_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_avatar")]
    pub avatar: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

fn default_context_type() -> String {
    "general".to_string()
}

fn default_true() -> bool {
    true
}

fn default_avatar() -> String {
    DEFAULT_AVATAR.to_string()
}

fn default_category() -> String {
    "general".to_string()
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

/// Partial update of an agent; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub tools: Option<Vec<String>>,
    pub context_type: Option<String>,
    pub enabled: Option<bool>,
    pub avatar: Option<String>,
    pub category: Option<String>,
}

impl AgentPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.system_prompt.is_none()
            && self.tools.is_none()
            && self.context_type.is_none()
            && self.enabled.is_none()
            && self.avatar.is_none()
            && self.category.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Anything that is not `user` is treated as the assistant side.
    pub fn parse(s: &str) -> Self {
        if s == "user" { Role::User } else { Role::Assistant }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub agent_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}
