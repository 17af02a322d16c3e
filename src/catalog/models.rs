// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Suppliers, models, capabilities, default models and parameter templates.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension, Row};

#[cfg(feature = "telemetry")]
use tracing::debug;

use crate::error::StoreError;
use crate::types::GenerationParams;

use super::types::{
    CapabilityLink, CapabilityRecord, DefaultModelEntry, DefaultScope, ModelProfile, ModelRecord,
    ModelType, NewModel, NewSupplier, ParameterTemplate, Supplier,
};
use super::{now, CatalogStore};

/// Success-rate change applied after a successful call.
pub const SUCCESS_INCREMENT: f64 = 0.1;

/// Success-rate change applied after a failed call.
pub const FAILURE_PENALTY: f64 = 1.0;

const MODEL_COLUMNS: &str = "id, supplier_id, model_id, display_name, description, model_type, \
     context_window, is_active, success_rate, created_at, updated_at";

/// Translate a UNIQUE violation into a typed conflict.
pub(crate) fn conflict_or(err: rusqlite::Error, entity: &'static str, id: &str) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict {
                entity,
                id: id.to_string(),
            }
        }
        other => other.into(),
    }
}

fn supplier_from_row(row: &Row<'_>) -> rusqlite::Result<Supplier> {
    Ok(Supplier {
        id: row.get(0)?,
        name: row.get(1)?,
        provider_type: row.get(2)?,
        base_url: row.get(3)?,
        api_key_env: row.get(4)?,
        is_active: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn model_type_from_sql(value: String) -> ModelType {
    value.parse().unwrap_or(ModelType::Chat)
}

fn model_from_row(row: &Row<'_>) -> rusqlite::Result<ModelRecord> {
    Ok(ModelRecord {
        id: row.get(0)?,
        supplier_id: row.get(1)?,
        model_id: row.get(2)?,
        display_name: row.get(3)?,
        description: row.get(4)?,
        model_type: model_type_from_sql(row.get(5)?),
        context_window: row.get(6)?,
        is_active: row.get(7)?,
        success_rate: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl CatalogStore {
    // ========================================================================
    // Suppliers
    // ========================================================================

    /// Create a supplier. Names are unique.
    pub fn create_supplier(&self, new: &NewSupplier) -> Result<Supplier, StoreError> {
        let created_at = now();
        self.conn
            .execute(
                "INSERT INTO suppliers (name, provider_type, base_url, api_key_env, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                params![new.name, new.provider_type, new.base_url, new.api_key_env, created_at],
            )
            .map_err(|e| conflict_or(e, "supplier", &new.name))?;

        self.get_supplier(self.conn.last_insert_rowid())
    }

    pub fn get_supplier(&self, id: i64) -> Result<Supplier, StoreError> {
        self.conn
            .query_row(
                "SELECT id, name, provider_type, base_url, api_key_env, is_active, created_at
                 FROM suppliers WHERE id = ?",
                params![id],
                supplier_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("supplier", id))
    }

    /// Look a supplier up by name, case-insensitively.
    pub fn get_supplier_by_name(&self, name: &str) -> Result<Option<Supplier>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, provider_type, base_url, api_key_env, is_active, created_at
                 FROM suppliers WHERE LOWER(name) = LOWER(?)",
                params![name],
                supplier_from_row,
            )
            .optional()?)
    }

    pub fn list_suppliers(&self, active_only: bool) -> Result<Vec<Supplier>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, provider_type, base_url, api_key_env, is_active, created_at
             FROM suppliers WHERE (?1 = 0 OR is_active = 1) ORDER BY name",
        )?;
        let suppliers = stmt
            .query_map(params![active_only], supplier_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(suppliers)
    }

    /// Soft-delete a supplier. Its models drop out of scheduling.
    pub fn deactivate_supplier(&self, id: i64) -> Result<(), StoreError> {
        let rows = self
            .conn
            .execute("UPDATE suppliers SET is_active = 0 WHERE id = ?", params![id])?;
        if rows == 0 {
            return Err(StoreError::not_found("supplier", id));
        }
        Ok(())
    }

    // ========================================================================
    // Models
    // ========================================================================

    /// Create a model under an existing supplier.
    pub fn create_model(&self, new: &NewModel) -> Result<ModelRecord, StoreError> {
        self.get_supplier(new.supplier_id)?;

        let ts = now();
        let display_name = new
            .display_name
            .clone()
            .unwrap_or_else(|| new.model_id.clone());
        self.conn
            .execute(
                "INSERT INTO models (supplier_id, model_id, display_name, description, model_type,
                                     context_window, is_active, success_rate, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, 100.0, ?7, ?7)",
                params![
                    new.supplier_id,
                    new.model_id,
                    display_name,
                    new.description,
                    new.model_type.as_str(),
                    new.context_window,
                    ts,
                ],
            )
            .map_err(|e| conflict_or(e, "model", &new.model_id))?;

        self.get_model(self.conn.last_insert_rowid())
    }

    pub fn get_model(&self, id: i64) -> Result<ModelRecord, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {MODEL_COLUMNS} FROM models WHERE id = ?"),
                params![id],
                model_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("model", id))
    }

    pub fn get_model_by_model_id(
        &self,
        supplier_id: i64,
        model_id: &str,
    ) -> Result<Option<ModelRecord>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {MODEL_COLUMNS} FROM models WHERE supplier_id = ? AND model_id = ?"),
                params![supplier_id, model_id],
                model_from_row,
            )
            .optional()?)
    }

    /// Resolve a user-facing reference: a numeric catalog id, or a
    /// supplier model name (first active match).
    pub fn find_model(&self, reference: &str) -> Result<ModelRecord, StoreError> {
        if let Ok(id) = reference.parse::<i64>() {
            return self.get_model(id);
        }

        self.conn
            .query_row(
                &format!(
                    "SELECT {MODEL_COLUMNS} FROM models WHERE model_id = ?
                     ORDER BY is_active DESC, id LIMIT 1"
                ),
                params![reference],
                model_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("model", reference))
    }

    pub fn list_models(&self, active_only: bool) -> Result<Vec<ModelRecord>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MODEL_COLUMNS} FROM models WHERE (?1 = 0 OR is_active = 1) ORDER BY id"
        ))?;
        let models = stmt
            .query_map(params![active_only], model_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(models)
    }

    /// Soft-delete a model.
    pub fn deactivate_model(&self, id: i64) -> Result<(), StoreError> {
        let rows = self.conn.execute(
            "UPDATE models SET is_active = 0, updated_at = ? WHERE id = ?",
            params![now(), id],
        )?;
        if rows == 0 {
            return Err(StoreError::not_found("model", id));
        }
        Ok(())
    }

    /// Nudge a model's success rate after a call.
    ///
    /// Success adds [`SUCCESS_INCREMENT`], failure subtracts
    /// [`FAILURE_PENALTY`]; the result is clamped to 0..=100. Read and write
    /// happen in one transaction that rolls back on any error. Returns the
    /// new rate.
    pub fn update_model_performance(&mut self, id: i64, success: bool) -> Result<f64, StoreError> {
        let tx = self.conn.transaction()?;

        let current: f64 = tx
            .query_row(
                "SELECT success_rate FROM models WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("model", id))?;

        let delta = if success { SUCCESS_INCREMENT } else { -FAILURE_PENALTY };
        let updated = (current + delta).clamp(0.0, 100.0);

        tx.execute(
            "UPDATE models SET success_rate = ?, updated_at = ? WHERE id = ?",
            params![updated, now(), id],
        )?;
        tx.commit()?;

        #[cfg(feature = "telemetry")]
        debug!(model_id = id, success, success_rate = updated, "Updated model performance");

        Ok(updated)
    }

    // ========================================================================
    // Capabilities
    // ========================================================================

    /// Insert or update a capability by name, returning its id.
    pub fn upsert_capability(
        &self,
        name: &str,
        display_name: &str,
        category: &str,
        description: Option<&str>,
    ) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO capabilities (name, display_name, category, description)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                display_name = excluded.display_name,
                category = excluded.category,
                description = COALESCE(excluded.description, capabilities.description)",
            params![name, display_name, category, description],
        )?;

        Ok(self.conn.query_row(
            "SELECT id FROM capabilities WHERE name = ?",
            params![name],
            |row| row.get(0),
        )?)
    }

    pub fn list_capabilities(&self) -> Result<Vec<CapabilityRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, display_name, category, description FROM capabilities ORDER BY name",
        )?;
        let caps = stmt
            .query_map([], |row| {
                Ok(CapabilityRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    display_name: row.get(2)?,
                    category: row.get(3)?,
                    description: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(caps)
    }

    fn capability_id(&self, name: &str) -> Result<i64, StoreError> {
        self.conn
            .query_row(
                "SELECT id FROM capabilities WHERE name = ?",
                params![name],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("capability", name))
    }

    /// Link a model to a capability, replacing any existing link.
    /// Strength and confidence are clamped to 1..=5.
    pub fn link_capability(&self, link: &CapabilityLink) -> Result<(), StoreError> {
        self.get_model(link.model_id)?;
        let capability_id = self.capability_id(&link.capability)?;

        self.conn.execute(
            "INSERT OR REPLACE INTO model_capabilities
                (model_id, capability_id, strength, confidence, auto_tagged)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                link.model_id,
                capability_id,
                link.strength.clamp(1, 5),
                link.confidence.clamp(1, 5),
                link.auto_tagged,
            ],
        )?;
        Ok(())
    }

    /// Remove a model↔capability link. Returns whether a link existed.
    pub fn unlink_capability(&self, model_id: i64, capability: &str) -> Result<bool, StoreError> {
        let rows = self.conn.execute(
            "DELETE FROM model_capabilities
             WHERE model_id = ? AND capability_id = (SELECT id FROM capabilities WHERE name = ?)",
            params![model_id, capability],
        )?;
        Ok(rows > 0)
    }

    pub fn model_capabilities(&self, model_id: i64) -> Result<Vec<CapabilityLink>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT mc.model_id, c.name, mc.strength, mc.confidence, mc.auto_tagged
             FROM model_capabilities mc JOIN capabilities c ON c.id = mc.capability_id
             WHERE mc.model_id = ? ORDER BY c.name",
        )?;
        let links = stmt
            .query_map(params![model_id], |row| {
                Ok(CapabilityLink {
                    model_id: row.get(0)?,
                    capability: row.get(1)?,
                    strength: row.get(2)?,
                    confidence: row.get(3)?,
                    auto_tagged: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    /// Active models of active suppliers, with their capability maps.
    pub fn active_model_profiles(&self) -> Result<Vec<ModelProfile>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT m.id, m.supplier_id, m.model_id, m.display_name, m.description, m.model_type,
                    m.context_window, m.is_active, m.success_rate, m.created_at, m.updated_at,
                    s.name, s.provider_type
             FROM models m JOIN suppliers s ON s.id = m.supplier_id
             WHERE m.is_active = 1 AND s.is_active = 1
             ORDER BY m.id",
        )?;
        let mut profiles = stmt
            .query_map([], |row| {
                Ok(ModelProfile {
                    model: model_from_row(row)?,
                    supplier_name: row.get(11)?,
                    provider_type: row.get(12)?,
                    strengths: HashMap::new(),
                    confidence: HashMap::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT mc.model_id, c.name, mc.strength, mc.confidence
             FROM model_capabilities mc JOIN capabilities c ON c.id = mc.capability_id",
        )?;
        let links = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i32>(2)?,
                    row.get::<_, i32>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let index: HashMap<i64, usize> = profiles
            .iter()
            .enumerate()
            .map(|(i, p)| (p.model.id, i))
            .collect();
        for (model_id, capability, strength, confidence) in links {
            if let Some(&i) = index.get(&model_id) {
                profiles[i].strengths.insert(capability.clone(), strength);
                profiles[i].confidence.insert(capability, confidence);
            }
        }

        Ok(profiles)
    }

    // ========================================================================
    // Default models
    // ========================================================================

    /// Set the default model for a scope, replacing any previous entry.
    pub fn set_default_model(
        &self,
        scope: &DefaultScope,
        model_id: i64,
        priority: i32,
    ) -> Result<(), StoreError> {
        self.get_model(model_id)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO default_models (scope, model_id, priority) VALUES (?1, ?2, ?3)",
            params![scope.key(), model_id, priority],
        )?;
        Ok(())
    }

    pub fn get_default_model(
        &self,
        scope: &DefaultScope,
    ) -> Result<Option<DefaultModelEntry>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT model_id, priority FROM default_models WHERE scope = ?",
                params![scope.key()],
                |row| {
                    Ok(DefaultModelEntry {
                        scope: scope.clone(),
                        model_id: row.get(0)?,
                        priority: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn clear_default_model(&self, scope: &DefaultScope) -> Result<bool, StoreError> {
        let rows = self
            .conn
            .execute("DELETE FROM default_models WHERE scope = ?", params![scope.key()])?;
        Ok(rows > 0)
    }

    // ========================================================================
    // Parameter templates
    // ========================================================================

    /// Save a template by name. A new template starts at version 1; every
    /// later save bumps the version.
    pub fn save_parameter_template(
        &self,
        name: &str,
        model_type: ModelType,
        params: &GenerationParams,
    ) -> Result<ParameterTemplate, StoreError> {
        let json = serde_json::to_string(params)?;
        self.conn.execute(
            "INSERT INTO parameter_templates (name, model_type, params, version, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4)
             ON CONFLICT(name) DO UPDATE SET
                model_type = excluded.model_type,
                params = excluded.params,
                version = parameter_templates.version + 1,
                updated_at = excluded.updated_at",
            params![name, model_type.as_str(), json, now()],
        )?;

        self.get_parameter_template(name)?
            .ok_or_else(|| StoreError::not_found("parameter template", name))
    }

    pub fn get_parameter_template(
        &self,
        name: &str,
    ) -> Result<Option<ParameterTemplate>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, model_type, params, version, updated_at
                 FROM parameter_templates WHERE name = ?",
                params![name],
                template_columns,
            )
            .optional()?;
        row.map(template_from_columns).transpose()
    }

    pub fn list_parameter_templates(&self) -> Result<Vec<ParameterTemplate>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, model_type, params, version, updated_at
             FROM parameter_templates ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], template_columns)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(template_from_columns).collect()
    }
}

type TemplateColumns = (i64, String, String, String, i32, i64);

fn template_columns(row: &Row<'_>) -> rusqlite::Result<TemplateColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn template_from_columns(cols: TemplateColumns) -> Result<ParameterTemplate, StoreError> {
    let (id, name, model_type, params, version, updated_at) = cols;
    Ok(ParameterTemplate {
        id,
        name,
        model_type: model_type_from_sql(model_type),
        params: serde_json::from_str(&params)?,
        version,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_model() -> (CatalogStore, Supplier, ModelRecord) {
        let store = CatalogStore::open_in_memory().unwrap();
        let supplier = store
            .create_supplier(&NewSupplier {
                name: "OpenAI".to_string(),
                provider_type: "openai".to_string(),
                ..Default::default()
            })
            .unwrap();
        let model = store
            .create_model(&NewModel::chat(supplier.id, "gpt-4o").with_description("Flagship"))
            .unwrap();
        (store, supplier, model)
    }

    #[test]
    fn test_supplier_crud() {
        let (store, supplier, _) = store_with_model();
        assert_eq!(store.get_supplier(supplier.id).unwrap().name, "OpenAI");
        assert!(store.get_supplier_by_name("openai").unwrap().is_some());

        let dup = store.create_supplier(&NewSupplier {
            name: "OpenAI".to_string(),
            provider_type: "openai".to_string(),
            ..Default::default()
        });
        assert!(matches!(dup, Err(StoreError::Conflict { .. })));

        store.deactivate_supplier(supplier.id).unwrap();
        assert!(store.list_suppliers(true).unwrap().is_empty());
        assert_eq!(store.list_suppliers(false).unwrap().len(), 1);
        assert!(matches!(
            store.deactivate_supplier(999),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_model_unique_per_supplier() {
        let (store, supplier, model) = store_with_model();
        assert_eq!(model.display_name, "gpt-4o");
        assert_eq!(model.success_rate, 100.0);

        let dup = store.create_model(&NewModel::chat(supplier.id, "gpt-4o"));
        assert!(matches!(dup, Err(StoreError::Conflict { .. })));

        let other = store
            .create_supplier(&NewSupplier {
                name: "Proxy".to_string(),
                provider_type: "openai-compatible".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert!(store.create_model(&NewModel::chat(other.id, "gpt-4o")).is_ok());
    }

    #[test]
    fn test_find_model() {
        let (store, _, model) = store_with_model();
        assert_eq!(store.find_model("gpt-4o").unwrap().id, model.id);
        assert_eq!(store.find_model(&model.id.to_string()).unwrap().id, model.id);
        assert!(store.find_model("missing").is_err());
    }

    #[test]
    fn test_update_model_performance_clamps() {
        let (mut store, _, model) = store_with_model();

        // Already at the ceiling
        assert_eq!(store.update_model_performance(model.id, true).unwrap(), 100.0);

        let rate = store.update_model_performance(model.id, false).unwrap();
        assert!((rate - 99.0).abs() < 1e-9);
        let rate = store.update_model_performance(model.id, true).unwrap();
        assert!((rate - 99.1).abs() < 1e-9);

        for _ in 0..150 {
            store.update_model_performance(model.id, false).unwrap();
        }
        assert_eq!(store.get_model(model.id).unwrap().success_rate, 0.0);

        assert!(matches!(
            store.update_model_performance(12345, false),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_capability_links_and_profiles() {
        let (store, supplier, model) = store_with_model();
        store
            .upsert_capability("code_generation", "Code Generation", "code", None)
            .unwrap();

        store
            .link_capability(&CapabilityLink {
                model_id: model.id,
                capability: "code_generation".to_string(),
                strength: 9,
                confidence: 0,
                auto_tagged: false,
            })
            .unwrap();

        let links = store.model_capabilities(model.id).unwrap();
        assert_eq!(links[0].strength, 5);
        assert_eq!(links[0].confidence, 1);

        let unknown = store.link_capability(&CapabilityLink {
            model_id: model.id,
            capability: "telepathy".to_string(),
            strength: 3,
            confidence: 3,
            auto_tagged: true,
        });
        assert!(matches!(unknown, Err(StoreError::NotFound { .. })));

        let profiles = store.active_model_profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].supplier_name, "OpenAI");
        assert_eq!(profiles[0].strengths["code_generation"], 5);

        store.deactivate_supplier(supplier.id).unwrap();
        assert!(store.active_model_profiles().unwrap().is_empty());

        assert!(store.unlink_capability(model.id, "code_generation").unwrap());
        assert!(!store.unlink_capability(model.id, "code_generation").unwrap());
    }

    #[test]
    fn test_default_models() {
        let (store, _, model) = store_with_model();
        let scene = DefaultScope::Scene("code_generation".to_string());
        assert!(store.get_default_model(&scene).unwrap().is_none());

        store.set_default_model(&scene, model.id, 5).unwrap();
        let entry = store.get_default_model(&scene).unwrap().unwrap();
        assert_eq!(entry.model_id, model.id);
        assert_eq!(entry.priority, 5);

        assert!(store.set_default_model(&DefaultScope::Global, 404, 1).is_err());
        assert!(store.clear_default_model(&scene).unwrap());
    }

    #[test]
    fn test_parameter_template_versions() {
        let store = CatalogStore::open_in_memory().unwrap();
        let mut params = GenerationParams::new();
        params.insert("temperature".to_string(), json!(0.3));

        let first = store
            .save_parameter_template("precise", ModelType::Chat, &params)
            .unwrap();
        assert_eq!(first.version, 1);

        params.insert("max_tokens".to_string(), json!(256));
        let second = store
            .save_parameter_template("precise", ModelType::Chat, &params)
            .unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.id, first.id);
        assert_eq!(second.params["max_tokens"], 256);

        assert_eq!(store.list_parameter_templates().unwrap().len(), 1);
        assert!(store.get_parameter_template("missing").unwrap().is_none());
    }
}
