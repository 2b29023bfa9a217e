use super::{Db, models::*};
use chrono::Utc;
use rusqlite::{OptionalExtension, Result, Row, params};

const CONVERSATION_SELECT: &str = r#"
SELECT c.id, c.user_id, c.agent_id, c.title, c.created_at, c.updated_at,
       (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
FROM conversations c
"#;

fn map_conversation_row(row: &Row<'_>) -> Result<Conversation> {
    let count: i64 = row.get(6)?;
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        agent_id: row.get(2)?,
        title: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        message_count: count as usize,
    })
}

impl Db {
    /// Create an empty conversation and return it.
    pub fn create_conversation(
        &self,
        user_id: &str,
        agent_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO conversations (id, user_id, agent_id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, user_id, agent_id, title, now],
        )?;
        Ok(Conversation {
            id,
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            title: title.map(str::to_string),
            created_at: now,
            updated_at: now,
            message_count: 0,
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.conn
            .query_row(
                &format!("{CONVERSATION_SELECT} WHERE c.id = ?"),
                params![id],
                map_conversation_row,
            )
            .optional()
    }

    /// Conversations of a user, most recently updated first.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CONVERSATION_SELECT} WHERE c.user_id = ? ORDER BY c.updated_at DESC, c.created_at DESC"
        ))?;
        let rows = stmt.query_map(params![user_id], map_conversation_row)?;
        rows.collect()
    }

    /// Append a message and return the conversation's new message count.
    pub fn append_message(&mut self, conversation_id: &str, role: Role, content: &str) -> Result<usize> {
        let now = Utc::now();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO messages (conversation_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![conversation_id, role.as_str(), content, now],
        )?;
        tx.execute(
            "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
            params![conversation_id, now],
        )?;
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?",
            params![conversation_id],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(count as usize)
    }

    /// Messages of a conversation in chronological order.
    pub fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, role, content, created_at FROM messages WHERE conversation_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            let role: String = row.get(1)?;
            Ok(Message {
                id: row.get(0)?,
                role: Role::parse(&role),
                content: row.get(2)?,
                timestamp: row.get(3)?,
            })
        })?;
        rows.collect()
    }

    pub fn set_title(&self, conversation_id: &str, title: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE conversations SET title = ?2 WHERE id = ?1",
            params![conversation_id, title],
        )?;
        Ok(rows > 0)
    }

    /// Delete a conversation; messages go with it.
    pub fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM conversations WHERE id = ?",
            params![conversation_id],
        )?;
        Ok(rows > 0)
    }
}
