use super::{Db, models::*};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Result, Row, params};

const AGENT_COLUMNS: &str = "id, name, description, system_prompt, tools, context_type, enabled, avatar, category, version, created_at, updated_at, created_by, updated_by";

fn map_agent_row(row: &Row<'_>) -> Result<Agent> {
    let tools_json: String = row.get(4)?;
    let tools: Vec<String> = serde_json::from_str(&tools_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(Agent {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        system_prompt: row.get(3)?,
        tools,
        context_type: row.get(5)?,
        enabled: row.get(6)?,
        avatar: row.get(7)?,
        category: row.get(8)?,
        version: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        created_by: row.get(12)?,
        updated_by: row.get(13)?,
    })
}

fn tools_to_json(tools: &[String]) -> Result<String> {
    serde_json::to_string(tools).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

impl Db {
    /// All stored agents, ordered by id.
    pub fn list_agents(&self) -> Result<Vec<Agent>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY id"))?;
        let rows = stmt.query_map([], map_agent_row)?;
        rows.collect()
    }

    /// Enabled agents, optionally restricted to one category.
    pub fn list_agents_by_category(&self, category: Option<&str>) -> Result<Vec<Agent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE enabled = 1 AND (?1 IS NULL OR category = ?1) ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![category], map_agent_row)?;
        rows.collect()
    }

    pub fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        self.conn
            .query_row(
                &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?"),
                params![id],
                map_agent_row,
            )
            .optional()
    }

    /// Insert a new agent. Returns `false` if the id is already taken.
    pub fn insert_agent(&self, agent: &Agent, user: &str) -> Result<bool> {
        let now = Utc::now();
        let rows = self.conn.execute(
            r#"
            INSERT INTO agents (id, name, description, system_prompt, tools, context_type, enabled,
                                avatar, category, version, created_at, updated_at, created_by, updated_by)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11, ?12, ?12)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                agent.id,
                agent.name,
                agent.description,
                agent.system_prompt,
                tools_to_json(&agent.tools)?,
                agent.context_type,
                agent.enabled,
                agent.avatar,
                agent.category,
                agent.version,
                now,
                user,
            ],
        )?;
        Ok(rows > 0)
    }

    /// Apply a partial update. Returns `false` if the agent does not exist.
    pub fn update_agent(&self, id: &str, patch: &AgentPatch, user: &str) -> Result<bool> {
        let tools = patch.tools.as_deref().map(tools_to_json).transpose()?;
        let rows = self.conn.execute(
            r#"
            UPDATE agents SET
                name = COALESCE(?2, name),
                description = COALESCE(?3, description),
                system_prompt = COALESCE(?4, system_prompt),
                tools = COALESCE(?5, tools),
                context_type = COALESCE(?6, context_type),
                enabled = COALESCE(?7, enabled),
                avatar = COALESCE(?8, avatar),
                category = COALESCE(?9, category),
                updated_at = ?10,
                updated_by = ?11
            WHERE id = ?1
            "#,
            params![
                id,
                patch.name,
                patch.description,
                patch.system_prompt,
                tools,
                patch.context_type,
                patch.enabled,
                patch.avatar,
                patch.category,
                Utc::now(),
                user,
            ],
        )?;
        Ok(rows > 0)
    }

    /// Store prompt/tool overrides on top of `base`, creating the row if needed.
    pub fn upsert_agent_overrides(
        &self,
        base: &Agent,
        system_prompt: Option<&str>,
        tools: &[String],
        user: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let prompt = system_prompt.unwrap_or(&base.system_prompt);
        self.conn.execute(
            r#"
            INSERT INTO agents (id, name, description, system_prompt, tools, context_type, enabled,
                                avatar, category, version, created_at, updated_at, created_by, updated_by)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11, ?12, ?12)
            ON CONFLICT(id) DO UPDATE SET
                system_prompt = excluded.system_prompt,
                tools = excluded.tools,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by
            "#,
            params![
                base.id,
                base.name,
                base.description,
                prompt,
                tools_to_json(tools)?,
                base.context_type,
                base.enabled,
                base.avatar,
                base.category,
                base.version,
                now,
                user,
            ],
        )?;
        Ok(())
    }

    /// Permanently remove an agent.
    pub fn delete_agent(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM agents WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, category: &str) -> Agent {
        Agent {
            id: id.to_string(),
            name: format!("Agent {id}"),
            description: "desc".into(),
            system_prompt: "Eres un agente.".into(),
            tools: vec!["web_search".into()],
            context_type: "general".into(),
            enabled: true,
            avatar: DEFAULT_AVATAR.into(),
            category: category.into(),
            version: DEFAULT_VERSION.into(),
            created_at: None,
            updated_at: None,
            created_by: None,
            updated_by: None,
        }
    }

    #[test]
    fn test_agents_crud() {
        let db = Db::open_in_memory().unwrap();

        // 1. Insert
        assert!(db.insert_agent(&sample("alpha", "general"), "u1").unwrap());
        assert!(
            !db.insert_agent(&sample("alpha", "general"), "u1").unwrap(),
            "duplicate ids are rejected"
        );

        // 2. Read back
        let agent = db.get_agent("alpha").unwrap().unwrap();
        assert_eq!(agent.tools, vec!["web_search"]);
        assert_eq!(agent.created_by.as_deref(), Some("u1"));
        assert!(agent.created_at.is_some());

        // 3. Partial update keeps untouched fields
        let patch = AgentPatch {
            description: Some("nueva".into()),
            tools: Some(vec![]),
            ..Default::default()
        };
        assert!(db.update_agent("alpha", &patch, "u2").unwrap());
        let agent = db.get_agent("alpha").unwrap().unwrap();
        assert_eq!(agent.description, "nueva");
        assert_eq!(agent.name, "Agent alpha");
        assert!(agent.tools.is_empty());
        assert_eq!(agent.updated_by.as_deref(), Some("u2"));

        assert!(!db.update_agent("missing", &patch, "u2").unwrap());

        // 4. Delete
        assert!(db.delete_agent("alpha").unwrap());
        assert!(db.get_agent("alpha").unwrap().is_none());
        assert!(!db.delete_agent("alpha").unwrap());
    }

    #[test]
    fn test_list_by_category_only_enabled() {
        let db = Db::open_in_memory().unwrap();
        db.insert_agent(&sample("a", "productivity"), "u").unwrap();
        db.insert_agent(&sample("b", "productivity"), "u").unwrap();
        db.insert_agent(&sample("c", "general"), "u").unwrap();

        let disable = AgentPatch {
            enabled: Some(false),
            ..Default::default()
        };
        db.update_agent("b", &disable, "u").unwrap();

        let productivity = db.list_agents_by_category(Some("productivity")).unwrap();
        assert_eq!(productivity.len(), 1);
        assert_eq!(productivity[0].id, "a");

        let all_enabled = db.list_agents_by_category(None).unwrap();
        assert_eq!(all_enabled.len(), 2);
        assert_eq!(db.list_agents().unwrap().len(), 3);
    }

    #[test]
    fn test_upsert_overrides() {
        let db = Db::open_in_memory().unwrap();
        let base = sample("posiAgent", "general");

        db.upsert_agent_overrides(&base, Some("Nuevo prompt"), &["jira".to_string()], "admin")
            .unwrap();
        let stored = db.get_agent("posiAgent").unwrap().unwrap();
        assert_eq!(stored.system_prompt, "Nuevo prompt");
        assert_eq!(stored.tools, vec!["jira"]);

        // Second call only touches the overridden columns
        db.upsert_agent_overrides(&base, None, &[], "admin").unwrap();
        let stored = db.get_agent("posiAgent").unwrap().unwrap();
        assert_eq!(stored.system_prompt, base.system_prompt);
        assert!(stored.tools.is_empty());
        assert_eq!(stored.name, "Agent posiAgent");
    }
}
