//! Agent management: stored agents layered over the built-in defaults.
//!
//! A built-in agent lives only in code until someone edits it; the first
//! write materialises it into the store and the stored row wins from then on.

pub mod defaults;

pub use defaults::CatalogEntry;

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::info;

use crate::db::Db;
use crate::db::models::{Agent, AgentPatch, DEFAULT_AVATAR, DEFAULT_VERSION};
use crate::error::{AppError, AppResult};
use crate::tools::Dispatcher;
use defaults::{AVAILABLE_TOOLS, builtin_agent, builtin_agents, catalog_entry, catalog_json};

static AGENT_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").unwrap());

pub const MIGRATION_USER: &str = "system_migration";

/// Body of a create request, in the legacy API's camelCase shape.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewAgent {
    #[serde(rename = "agentId")]
    pub id: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub tools: Vec<String>,
    pub context_type: Option<String>,
    pub avatar: Option<String>,
    pub category: Option<String>,
}

impl NewAgent {
    fn into_agent(self) -> Agent {
        Agent {
            id: self.id,
            name: self.name,
            description: self.description,
            system_prompt: self.system_prompt,
            tools: self.tools,
            context_type: self.context_type.unwrap_or_else(|| "general".to_string()),
            enabled: true,
            avatar: self.avatar.unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
            category: self.category.unwrap_or_else(|| "custom".to_string()),
            version: DEFAULT_VERSION.to_string(),
            created_at: None,
            updated_at: None,
            created_by: None,
            updated_by: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolValidation {
    pub valid: bool,
    pub agent_tools: Vec<String>,
    pub invalid_tools: Vec<String>,
}

pub fn is_valid_agent_id(id: &str) -> bool {
    AGENT_ID_RE.is_match(id)
}

/// Concrete tool names an agent may call. Catalogue ids expand to every
/// dispatcher tool of their category; other entries are kept when the
/// dispatcher knows them.
pub fn allowed_tools(agent: &Agent, dispatcher: &Dispatcher) -> Vec<String> {
    let groups = dispatcher.by_category();
    let mut out: Vec<String> = Vec::new();
    for entry in &agent.tools {
        let names: Vec<String> = match catalog_entry(entry) {
            Some(cat) => groups.get(cat.category).cloned().unwrap_or_default(),
            None if dispatcher.has_tool(entry) => vec![entry.clone()],
            None => Vec::new(),
        };
        for name in names {
            if !out.contains(&name) {
                out.push(name);
            }
        }
    }
    out
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AgentFile {
    List(Vec<Agent>),
    Wrapped { agents: Vec<Agent> },
}

/// Agent definitions from YAML: either a bare list or an `agents:` key.
pub fn parse_agents_yaml(text: &str) -> anyhow::Result<Vec<Agent>> {
    let file: AgentFile = serde_yaml::from_str(text)?;
    let agents = match file {
        AgentFile::List(agents) | AgentFile::Wrapped { agents } => agents,
    };
    if let Some(bad) = agents.iter().find(|a| !is_valid_agent_id(&a.id)) {
        anyhow::bail!("invalid agent id: {:?}", bad.id);
    }
    Ok(agents)
}

#[derive(Clone)]
pub struct AgentManager {
    db: Arc<Mutex<Db>>,
}

impl AgentManager {
    pub fn new(db: Arc<Mutex<Db>>) -> Self {
        Self { db }
    }

    /// Stored agents plus the built-ins not yet stored, ordered by id.
    pub async fn all(&self) -> AppResult<Vec<Agent>> {
        let mut agents = self.db.lock().await.list_agents()?;
        for builtin in builtin_agents() {
            if !agents.iter().any(|a| a.id == builtin.id) {
                agents.push(builtin);
            }
        }
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    pub async fn get(&self, id: &str) -> AppResult<Option<Agent>> {
        let stored = self.db.lock().await.get_agent(id)?;
        Ok(stored.or_else(|| builtin_agent(id)))
    }

    pub async fn enabled(&self) -> AppResult<Vec<Agent>> {
        self.by_category(None).await
    }

    /// Enabled agents in `category` (all categories when `None`), including
    /// built-ins that are not stored yet.
    pub async fn by_category(&self, category: Option<&str>) -> AppResult<Vec<Agent>> {
        let db = self.db.lock().await;
        let mut agents = db.list_agents_by_category(category)?;
        for builtin in builtin_agents() {
            let matches = builtin.enabled && category.is_none_or(|c| builtin.category == c);
            if matches && db.get_agent(&builtin.id)?.is_none() {
                agents.push(builtin);
            }
        }
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    pub async fn create(&self, new: NewAgent, user: &str) -> AppResult<Agent> {
        if [&new.id, &new.name, &new.description, &new.system_prompt]
            .iter()
            .any(|s| s.trim().is_empty())
        {
            return Err(AppError::BadRequest(
                "Missing required fields: agentId, name, description, systemPrompt".into(),
            ));
        }
        if !is_valid_agent_id(&new.id) {
            return Err(AppError::BadRequest(
                "Agent ID must be alphanumeric with underscores only".into(),
            ));
        }

        let agent = new.into_agent();
        let db = self.db.lock().await;
        // Built-ins not yet stored still own their id
        if defaults::is_builtin(&agent.id) || !db.insert_agent(&agent, user)? {
            return Err(AppError::Conflict(format!("Agent {} already exists", agent.id)));
        }
        info!("Created agent {} by {user}", agent.id);
        db.get_agent(&agent.id)?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("agent vanished after insert")))
    }

    /// Store a built-in under its own id if it is not stored yet.
    fn materialise(db: &Db, id: &str, user: &str) -> AppResult<bool> {
        if db.get_agent(id)?.is_some() {
            return Ok(true);
        }
        match builtin_agent(id) {
            Some(builtin) => {
                db.insert_agent(&builtin, user)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn update(&self, id: &str, patch: &AgentPatch, user: &str) -> AppResult<Agent> {
        if patch.is_empty() {
            return Err(AppError::BadRequest("No fields to update".into()));
        }
        let db = self.db.lock().await;
        if !Self::materialise(&db, id, user)? {
            return Err(AppError::NotFound("Agent not found".into()));
        }
        db.update_agent(id, patch, user)?;
        info!("Updated agent {id} by {user}");
        db.get_agent(id)?
            .ok_or_else(|| AppError::NotFound("Agent not found".into()))
    }

    /// Disable the agent, or remove it when `hard` is set.
    pub async fn delete(&self, id: &str, hard: bool, user: &str) -> AppResult<()> {
        let db = self.db.lock().await;
        if hard {
            if db.delete_agent(id)? {
                info!("Permanently deleted agent {id} by {user}");
                return Ok(());
            }
            if defaults::is_builtin(id) {
                return Err(AppError::BadRequest(
                    "Built-in agents can only be disabled".into(),
                ));
            }
            return Err(AppError::NotFound("Agent not found".into()));
        }

        if !Self::materialise(&db, id, user)? {
            return Err(AppError::NotFound("Agent not found".into()));
        }
        let patch = AgentPatch {
            enabled: Some(false),
            ..Default::default()
        };
        db.update_agent(id, &patch, user)?;
        info!("Disabled agent {id} by {user}");
        Ok(())
    }

    pub async fn validate_tools(&self, id: &str, available: &[String]) -> AppResult<ToolValidation> {
        let agent = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Agent not found".into()))?;
        let invalid_tools: Vec<String> = agent
            .tools
            .iter()
            .filter(|t| !available.contains(t))
            .cloned()
            .collect();
        Ok(ToolValidation {
            valid: invalid_tools.is_empty(),
            agent_tools: agent.tools,
            invalid_tools,
        })
    }

    /// Insert every agent whose id is not stored yet. Returns how many were
    /// inserted.
    pub async fn import(&self, agents: Vec<Agent>, user: &str) -> AppResult<usize> {
        let db = self.db.lock().await;
        let mut inserted = 0;
        for agent in agents {
            if db.get_agent(&agent.id)?.is_some() {
                info!("Agent {} already exists, skipping", agent.id);
                continue;
            }
            if db.insert_agent(&agent, user)? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Store legacy agent definitions under the `migrated` category.
    pub async fn migrate_legacy(&self, agents: Vec<Agent>) -> AppResult<usize> {
        let agents = agents
            .into_iter()
            .map(|agent| Agent {
                category: "migrated".to_string(),
                ..agent
            })
            .collect();
        let migrated = self.import(agents, MIGRATION_USER).await?;
        info!("Migrated {migrated} legacy agents");
        Ok(migrated)
    }

    /// Override the prompt and tools of a built-in agent.
    pub async fn update_config(
        &self,
        id: &str,
        system_prompt: Option<&str>,
        tools: &[String],
        user: &str,
    ) -> AppResult<()> {
        let Some(builtin) = builtin_agent(id) else {
            return Err(AppError::BadRequest("Invalid agent ID".into()));
        };
        self.db
            .lock()
            .await
            .upsert_agent_overrides(&builtin, system_prompt, tools, user)?;
        info!("Agent {id} configuration updated by {user}");
        Ok(())
    }

    /// Built-in agent configs with stored overrides applied, in the shape
    /// of the legacy `get_agent_configs` response.
    pub async fn configs_view(&self, is_admin: bool) -> AppResult<Value> {
        let mut configs = BTreeMap::new();
        for builtin in builtin_agents() {
            let stored = self.db.lock().await.get_agent(&builtin.id)?;
            let (system_prompt, tools) = match stored {
                Some(s) => (s.system_prompt, s.tools),
                None => (builtin.system_prompt.clone(), builtin.tools.clone()),
            };
            let mut entry = json!({
                "name": builtin.name,
                "description": builtin.description,
                "tools": tools,
                "context_type": builtin.context_type,
                "available_tools": catalog_json(builtin.tools.iter().filter_map(|t| catalog_entry(t))),
                "system_prompt": system_prompt,
            });
            if is_admin {
                entry["editable"] = json!(true);
                entry["available_tools_all"] = catalog_json(AVAILABLE_TOOLS);
            }
            configs.insert(builtin.id, entry);
        }
        Ok(json!({ "agents": configs }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::mock::mock_handlers;

    fn manager() -> AgentManager {
        AgentManager::new(Arc::new(Mutex::new(Db::open_in_memory().unwrap())))
    }

    fn new_agent(id: &str) -> NewAgent {
        NewAgent {
            id: id.into(),
            name: "Soporte".into(),
            description: "Ayuda con incidentes".into(),
            system_prompt: "Eres un agente de soporte.".into(),
            tools: vec!["jira".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_all_includes_builtins() {
        let m = manager();
        let ids: Vec<String> = m.all().await.unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["jiraAssistant", "minutaMaker", "posiAgent"]);
        assert!(m.get("posiAgent").await.unwrap().is_some());
        assert!(m.get("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_validates() {
        let m = manager();
        let agent = m.create(new_agent("soporte_1"), "admin@x").await.unwrap();
        assert_eq!(agent.category, "custom");
        assert_eq!(agent.created_by.as_deref(), Some("admin@x"));

        let dup = m.create(new_agent("soporte_1"), "admin@x").await;
        assert!(matches!(dup, Err(AppError::Conflict(_))));

        let builtin = m.create(new_agent("posiAgent"), "admin@x").await;
        assert!(matches!(builtin, Err(AppError::Conflict(_))));

        let bad_id = m.create(new_agent("no-dashes"), "admin@x").await;
        assert_eq!(
            bad_id.unwrap_err().to_string(),
            "Agent ID must be alphanumeric with underscores only"
        );

        let mut missing = new_agent("x");
        missing.system_prompt = " ".into();
        assert!(matches!(
            m.create(missing, "admin@x").await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_by_category_merges_store_and_builtins() {
        let m = manager();
        m.create(new_agent("soporte"), "admin").await.unwrap();
        let patch = AgentPatch {
            name: Some("Posi 2".into()),
            ..Default::default()
        };
        m.update("posiAgent", &patch, "admin").await.unwrap();

        let custom = m.by_category(Some("custom")).await.unwrap();
        assert_eq!(custom.len(), 1);
        assert_eq!(custom[0].id, "soporte");

        // Stored posiAgent replaces its built-in, never duplicated
        let general: Vec<Agent> = m.by_category(Some("general")).await.unwrap();
        let ids: Vec<&str> = general.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["jiraAssistant", "minutaMaker", "posiAgent"]);
        assert_eq!(general[2].name, "Posi 2");

        m.delete("soporte", false, "admin").await.unwrap();
        m.delete("minutaMaker", false, "admin").await.unwrap();
        assert!(m.by_category(Some("custom")).await.unwrap().is_empty());
        assert_eq!(m.by_category(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_materialises_builtin() {
        let m = manager();
        let patch = AgentPatch {
            name: Some("Posi 2".into()),
            ..Default::default()
        };
        let agent = m.update("posiAgent", &patch, "admin").await.unwrap();
        assert_eq!(agent.name, "Posi 2");
        assert_eq!(agent.system_prompt, builtin_agent("posiAgent").unwrap().system_prompt);

        assert!(matches!(
            m.update("ghost", &patch, "admin").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            m.update("posiAgent", &AgentPatch::default(), "admin").await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_soft_and_hard_delete() {
        let m = manager();
        m.delete("minutaMaker", false, "admin").await.unwrap();
        assert!(!m.get("minutaMaker").await.unwrap().unwrap().enabled);
        assert_eq!(m.enabled().await.unwrap().len(), 2);

        assert!(matches!(
            m.delete("jiraAssistant", true, "admin").await,
            Err(AppError::BadRequest(_))
        ));

        m.create(new_agent("temp"), "admin").await.unwrap();
        m.delete("temp", true, "admin").await.unwrap();
        assert!(m.get("temp").await.unwrap().is_none());
        assert!(matches!(
            m.delete("temp", false, "admin").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_migrate_legacy_skips_existing() {
        let m = manager();
        m.update_config("posiAgent", Some("custom"), &[], "admin")
            .await
            .unwrap();
        let migrated = m.migrate_legacy(builtin_agents()).await.unwrap();
        assert_eq!(migrated, 2);
        let minuta = m.get("minutaMaker").await.unwrap().unwrap();
        assert_eq!(minuta.category, "migrated");
        assert_eq!(minuta.created_by.as_deref(), Some(MIGRATION_USER));
        assert_eq!(m.migrate_legacy(builtin_agents()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_import_keeps_category() {
        let m = manager();
        let agents = parse_agents_yaml("- id: ventas\n  name: Ventas\n  category: sales\n").unwrap();
        assert_eq!(m.import(agents, "cli").await.unwrap(), 1);
        let stored = m.get("ventas").await.unwrap().unwrap();
        assert_eq!(stored.category, "sales");
        assert_eq!(stored.created_by.as_deref(), Some("cli"));
    }

    #[tokio::test]
    async fn test_configs_view() {
        let m = manager();
        m.update_config("posiAgent", Some("Prompt nuevo"), &["jira".to_string()], "admin")
            .await
            .unwrap();
        assert!(matches!(
            m.update_config("custom", None, &[], "admin").await,
            Err(AppError::BadRequest(_))
        ));

        let view = m.configs_view(false).await.unwrap();
        let posi = &view["agents"]["posiAgent"];
        assert_eq!(posi["system_prompt"], "Prompt nuevo");
        assert_eq!(posi["tools"], json!(["jira"]));
        assert!(posi.get("editable").is_none());

        let admin = m.configs_view(true).await.unwrap();
        assert_eq!(admin["agents"]["minutaMaker"]["editable"], true);
        assert!(admin["agents"]["minutaMaker"]["available_tools_all"]["email"].is_object());
    }

    #[tokio::test]
    async fn test_validate_tools() {
        let m = manager();
        let available = vec!["web_search".to_string()];
        let report = m.validate_tools("posiAgent", &available).await.unwrap();
        assert_eq!(report.valid, report.invalid_tools.is_empty());
        assert!(!report.agent_tools.is_empty());
    }

    #[test]
    fn test_allowed_tools_expand_categories() {
        let dispatcher = Dispatcher::new(mock_handlers());
        let mut agent = builtin_agent("jiraAssistant").unwrap();
        agent.tools = vec!["jira".into(), "send_email".into(), "bogus".into()];
        let allowed = allowed_tools(&agent, &dispatcher);
        assert!(allowed.contains(&"jira_create_issue".to_string()));
        assert!(allowed.contains(&"create_jira_issue".to_string()));
        assert!(allowed.contains(&"send_email".to_string()));
        assert!(!allowed.iter().any(|t| t == "bogus"));
        assert!(!allowed.iter().any(|t| t == "web_search"));
    }

    #[test]
    fn test_parse_agents_yaml() {
        let listed = "- id: soporte\n  name: Soporte\n  system_prompt: Hola\n";
        let agents = parse_agents_yaml(listed).unwrap();
        assert_eq!(agents[0].avatar, DEFAULT_AVATAR);
        assert!(agents[0].enabled);

        let wrapped = "agents:\n  - id: a1\n    name: A\n  - id: a2\n    name: B\n";
        assert_eq!(parse_agents_yaml(wrapped).unwrap().len(), 2);

        assert!(parse_agents_yaml("- id: bad id\n  name: X\n").is_err());
    }
}
