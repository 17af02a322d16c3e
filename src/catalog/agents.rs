// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agents, skills, execution logs, conversations and knowledge documents.

use rusqlite::{params, OptionalExtension, Row};
use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::types::Role;

use super::models::conflict_or;
use super::types::{
    AgentConfig, ConversationMessage, KnowledgeDocument, NewSkillExecutionLog, SkillExecutionLog,
    SkillKind, SkillRecord,
};
use super::{now, CatalogStore};

/// Hex sha256 of a skill definition.
pub fn skill_content_hash(kind: &SkillKind) -> Result<String, StoreError> {
    let serialized = serde_json::to_vec(kind)?;
    let digest = Sha256::digest(&serialized);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

type SkillColumns = (i64, String, Option<String>, String, String, bool, i64);

fn skill_columns(row: &Row<'_>) -> rusqlite::Result<SkillColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn skill_from_columns(cols: SkillColumns) -> Result<SkillRecord, StoreError> {
    let (id, name, description, definition, content_hash, is_active, created_at) = cols;
    Ok(SkillRecord {
        id,
        name,
        description,
        kind: serde_json::from_str(&definition)?,
        content_hash,
        is_active,
        created_at,
    })
}

impl CatalogStore {
    // ========================================================================
    // Agents
    // ========================================================================

    /// Insert or replace an agent configuration.
    pub fn save_agent(&self, agent: &AgentConfig) -> Result<(), StoreError> {
        let config = serde_json::to_string(agent)?;
        let ts = now();
        self.conn.execute(
            "INSERT INTO agents (agent_id, config, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(agent_id) DO UPDATE SET config = excluded.config, updated_at = excluded.updated_at",
            params![agent.agent_id, config, ts],
        )?;
        Ok(())
    }

    pub fn get_agent(&self, agent_id: &str) -> Result<Option<AgentConfig>, StoreError> {
        let config: Option<String> = self
            .conn
            .query_row(
                "SELECT config FROM agents WHERE agent_id = ?",
                params![agent_id],
                |row| row.get(0),
            )
            .optional()?;
        config
            .map(|c| serde_json::from_str(&c).map_err(StoreError::from))
            .transpose()
    }

    pub fn list_agents(&self) -> Result<Vec<AgentConfig>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT config FROM agents ORDER BY agent_id")?;
        let configs = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        configs
            .iter()
            .map(|c| serde_json::from_str(c).map_err(StoreError::from))
            .collect()
    }

    // ========================================================================
    // Skills
    // ========================================================================

    /// Register a skill. Names are unique.
    pub fn create_skill(
        &self,
        name: &str,
        description: Option<&str>,
        kind: &SkillKind,
    ) -> Result<SkillRecord, StoreError> {
        let definition = serde_json::to_string(kind)?;
        let content_hash = skill_content_hash(kind)?;
        self.conn
            .execute(
                "INSERT INTO skills (name, description, definition, content_hash, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                params![name, description, definition, content_hash, now()],
            )
            .map_err(|e| conflict_or(e, "skill", name))?;

        self.get_skill(self.conn.last_insert_rowid())
    }

    pub fn get_skill(&self, id: i64) -> Result<SkillRecord, StoreError> {
        let cols = self
            .conn
            .query_row(
                "SELECT id, name, description, definition, content_hash, is_active, created_at
                 FROM skills WHERE id = ?",
                params![id],
                skill_columns,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("skill", id))?;
        skill_from_columns(cols)
    }

    /// Active skill by name.
    pub fn get_skill_by_name(&self, name: &str) -> Result<Option<SkillRecord>, StoreError> {
        let cols = self
            .conn
            .query_row(
                "SELECT id, name, description, definition, content_hash, is_active, created_at
                 FROM skills WHERE name = ? AND is_active = 1",
                params![name],
                skill_columns,
            )
            .optional()?;
        cols.map(skill_from_columns).transpose()
    }

    pub fn list_skills(&self, active_only: bool) -> Result<Vec<SkillRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, description, definition, content_hash, is_active, created_at
             FROM skills WHERE (?1 = 0 OR is_active = 1) ORDER BY name",
        )?;
        let rows = stmt
            .query_map(params![active_only], skill_columns)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(skill_from_columns).collect()
    }

    /// Soft-delete a skill.
    pub fn deactivate_skill(&self, id: i64) -> Result<(), StoreError> {
        let rows = self
            .conn
            .execute("UPDATE skills SET is_active = 0 WHERE id = ?", params![id])?;
        if rows == 0 {
            return Err(StoreError::not_found("skill", id));
        }
        Ok(())
    }

    // ========================================================================
    // Skill execution logs
    // ========================================================================

    pub fn append_skill_log(&self, log: &NewSkillExecutionLog) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO skill_execution_logs
                (skill_id, execution_id, agent_id, arguments, success, output, error, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                log.skill_id,
                log.execution_id,
                log.agent_id,
                log.arguments.to_string(),
                log.success,
                log.output,
                log.error,
                log.duration_ms as i64,
                now(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent log rows for a skill, newest first.
    pub fn list_skill_logs(
        &self,
        skill_id: i64,
        limit: usize,
    ) -> Result<Vec<SkillExecutionLog>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, skill_id, execution_id, agent_id, arguments, success, output, error,
                    duration_ms, created_at
             FROM skill_execution_logs WHERE skill_id = ? ORDER BY id DESC LIMIT ?",
        )?;
        let logs = stmt
            .query_map(params![skill_id, limit as i64], |row| {
                let arguments: String = row.get(4)?;
                Ok(SkillExecutionLog {
                    id: row.get(0)?,
                    skill_id: row.get(1)?,
                    execution_id: row.get(2)?,
                    agent_id: row.get(3)?,
                    arguments: serde_json::from_str(&arguments).unwrap_or(serde_json::Value::Null),
                    success: row.get(5)?,
                    output: row.get(6)?,
                    error: row.get(7)?,
                    duration_ms: row.get::<_, i64>(8)? as u64,
                    created_at: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    // ========================================================================
    // Conversations
    // ========================================================================

    pub fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO conversation_messages (conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![conversation_id, role.as_str(), content, now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// The last `limit` messages of a conversation, oldest first.
    pub fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, conversation_id, role, content, created_at FROM (
                SELECT id, conversation_id, role, content, created_at
                FROM conversation_messages WHERE conversation_id = ?
                ORDER BY id DESC LIMIT ?
             ) ORDER BY id ASC",
        )?;
        let messages = stmt
            .query_map(params![conversation_id, limit as i64], |row| {
                let role: String = row.get(2)?;
                Ok(ConversationMessage {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    role: role.parse().unwrap_or(Role::User),
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    // ========================================================================
    // Knowledge documents
    // ========================================================================

    pub fn add_document(
        &self,
        knowledge_base: &str,
        title: &str,
        content: &str,
    ) -> Result<KnowledgeDocument, StoreError> {
        let created_at = now();
        self.conn.execute(
            "INSERT INTO knowledge_documents (knowledge_base, title, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![knowledge_base, title, content, created_at],
        )?;
        Ok(KnowledgeDocument {
            id: self.conn.last_insert_rowid(),
            knowledge_base: knowledge_base.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            created_at,
        })
    }

    /// Documents of one knowledge base, or of all when `None`.
    pub fn list_documents(
        &self,
        knowledge_base: Option<&str>,
    ) -> Result<Vec<KnowledgeDocument>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, knowledge_base, title, content, created_at FROM knowledge_documents
             WHERE (?1 IS NULL OR knowledge_base = ?1) ORDER BY id",
        )?;
        let docs = stmt
            .query_map(params![knowledge_base], |row| {
                Ok(KnowledgeDocument {
                    id: row.get(0)?,
                    knowledge_base: row.get(1)?,
                    title: row.get(2)?,
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::{ModelBinding, ScriptLanguage};
    use serde_json::json;

    fn agent(id: &str) -> AgentConfig {
        AgentConfig {
            agent_id: id.to_string(),
            name: "Helper".to_string(),
            description: None,
            system_prompt: "You help.".to_string(),
            model: ModelBinding::Fixed { model_id: 1 },
            skills: Some(vec!["summarize".to_string()]),
            capabilities: None,
            params: Default::default(),
        }
    }

    #[test]
    fn test_agent_save_and_replace() {
        let store = CatalogStore::open_in_memory().unwrap();
        assert!(store.get_agent("a1").unwrap().is_none());

        let mut config = agent("a1");
        store.save_agent(&config).unwrap();
        config.system_prompt = "You help tersely.".to_string();
        store.save_agent(&config).unwrap();

        let loaded = store.get_agent("a1").unwrap().unwrap();
        assert_eq!(loaded.system_prompt, "You help tersely.");
        assert_eq!(store.list_agents().unwrap().len(), 1);
    }

    #[test]
    fn test_skills_and_logs() {
        let store = CatalogStore::open_in_memory().unwrap();
        let kind = SkillKind::Script {
            language: ScriptLanguage::Shell,
            source: "cat".to_string(),
        };
        let skill = store.create_skill("echo", Some("Echo input"), &kind).unwrap();
        assert_eq!(skill.content_hash.len(), 64);
        assert_eq!(skill.content_hash, skill_content_hash(&kind).unwrap());

        assert!(matches!(
            store.create_skill("echo", None, &kind),
            Err(StoreError::Conflict { .. })
        ));

        for success in [true, false] {
            store
                .append_skill_log(&NewSkillExecutionLog {
                    skill_id: skill.id,
                    execution_id: Some("exec-1".to_string()),
                    agent_id: None,
                    arguments: json!({"text": "hi"}),
                    success,
                    output: Some("hi".to_string()),
                    error: None,
                    duration_ms: 12,
                })
                .unwrap();
        }
        let logs = store.list_skill_logs(skill.id, 10).unwrap();
        assert_eq!(logs.len(), 2);
        assert!(!logs[0].success);
        assert_eq!(logs[1].arguments["text"], "hi");

        store.deactivate_skill(skill.id).unwrap();
        assert!(store.get_skill_by_name("echo").unwrap().is_none());
        assert!(store.list_skills(true).unwrap().is_empty());
    }

    #[test]
    fn test_recent_messages_are_chronological() {
        let store = CatalogStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .append_message("c1", Role::User, &format!("m{i}"))
                .unwrap();
        }
        store.append_message("c2", Role::User, "other").unwrap();

        let recent = store.recent_messages("c1", 3).unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_documents_filtered_by_base() {
        let store = CatalogStore::open_in_memory().unwrap();
        store.add_document("docs", "Intro", "Hello").unwrap();
        store.add_document("faq", "Q1", "Answer").unwrap();

        assert_eq!(store.list_documents(Some("docs")).unwrap().len(), 1);
        assert_eq!(store.list_documents(None).unwrap().len(), 2);
    }
}
