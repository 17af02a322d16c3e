// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Capability taxonomy and automatic model tagging.
//!
//! Models are tagged by matching taxonomy keywords against their names and
//! descriptions. A keyword found in the model name counts more than one found
//! only in the description; every chat model gets a `text_generation`
//! baseline.

pub mod taxonomy;

pub use taxonomy::{BuiltinCapability, CapabilitySpec, TAXONOMY};

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::catalog::{CapabilityLink, ModelRecord, ModelType, SharedCatalog};
use crate::error::StoreError;

/// A capability inferred for a model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredCapability {
    pub name: String,
    pub strength: i32,
    pub confidence: i32,
    pub matched_keywords: Vec<String>,
}

/// Result of tagging one model.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TagSummary {
    pub model_id: i64,
    pub model_name: String,
    pub added: Vec<String>,
    pub updated: Vec<String>,
    /// Manual links left untouched
    pub kept: Vec<String>,
}

/// Keyword match: short keywords must equal a whole token, longer ones may
/// appear anywhere.
fn keyword_matches(text: &str, tokens: &[&str], keyword: &str) -> bool {
    if keyword.len() <= 3 {
        tokens.iter().any(|t| *t == keyword)
    } else {
        text.contains(keyword)
    }
}

fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_ascii_alphanumeric() && c != '.')
        .filter(|t| !t.is_empty())
        .collect()
}

/// Infer capabilities from a model's name and description.
pub fn discover(model: &ModelRecord) -> Vec<DiscoveredCapability> {
    let name_text = format!("{} {}", model.model_id, model.display_name).to_lowercase();
    let desc_text = model.description.clone().unwrap_or_default().to_lowercase();
    let name_tokens = tokenize(&name_text);
    let desc_tokens = tokenize(&desc_text);

    let mut found: Vec<DiscoveredCapability> = Vec::new();
    for spec in TAXONOMY {
        let mut name_hits = 0;
        let mut desc_hits = 0;
        let mut matched = Vec::new();
        for keyword in spec.keywords {
            let in_name = keyword_matches(&name_text, &name_tokens, keyword);
            let in_desc = keyword_matches(&desc_text, &desc_tokens, keyword);
            if in_name {
                name_hits += 1;
            } else if in_desc {
                desc_hits += 1;
            }
            if in_name || in_desc {
                matched.push(keyword.to_string());
            }
        }

        if name_hits + desc_hits == 0 {
            continue;
        }

        let mut strength = spec.base_strength;
        if name_hits == 0 {
            strength -= 1;
        }
        if name_hits + desc_hits >= 3 {
            strength += 1;
        }

        found.push(DiscoveredCapability {
            name: spec.name.to_string(),
            strength: strength.clamp(1, 5),
            confidence: (1 + name_hits * 2 + desc_hits).clamp(1, 5),
            matched_keywords: matched,
        });
    }

    let baseline = match model.model_type {
        ModelType::Chat | ModelType::Completion => Some(BuiltinCapability::TextGeneration.as_str()),
        ModelType::Image => Some(BuiltinCapability::ImageGeneration.as_str()),
        ModelType::Embedding => Some("embedding"),
    };
    if let Some(name) = baseline {
        if !found.iter().any(|c| c.name == name) {
            found.push(DiscoveredCapability {
                name: name.to_string(),
                strength: 3,
                confidence: 2,
                matched_keywords: Vec::new(),
            });
        }
    }

    found
}

/// Keeps the capability taxonomy and model tags in the catalog.
pub struct CapabilityDiscoveryService {
    catalog: SharedCatalog,
}

impl CapabilityDiscoveryService {
    pub fn new(catalog: SharedCatalog) -> Self {
        Self { catalog }
    }

    /// Upsert every taxonomy entry. Returns the number of entries.
    pub async fn ensure_taxonomy(&self) -> Result<usize, StoreError> {
        let store = self.catalog.lock().await;
        for spec in TAXONOMY {
            store.upsert_capability(
                spec.name,
                spec.display_name,
                spec.category,
                Some(spec.description),
            )?;
        }
        Ok(TAXONOMY.len())
    }

    /// Tag one model with discovered capabilities.
    ///
    /// Links previously created by discovery are refreshed. Manual links are
    /// kept unless `overwrite` is set.
    pub async fn auto_tag_model(&self, id: i64, overwrite: bool) -> Result<TagSummary, StoreError> {
        self.ensure_taxonomy().await?;

        let store = self.catalog.lock().await;
        let model = store.get_model(id)?;
        let existing: HashMap<String, CapabilityLink> = store
            .model_capabilities(id)?
            .into_iter()
            .map(|l| (l.capability.clone(), l))
            .collect();

        let mut summary = TagSummary {
            model_id: model.id,
            model_name: model.model_id.clone(),
            ..Default::default()
        };

        for cap in discover(&model) {
            match existing.get(&cap.name) {
                Some(link) if !link.auto_tagged && !overwrite => {
                    summary.kept.push(cap.name);
                    continue;
                }
                Some(_) => summary.updated.push(cap.name.clone()),
                None => summary.added.push(cap.name.clone()),
            }

            store.link_capability(&CapabilityLink {
                model_id: model.id,
                capability: cap.name,
                strength: cap.strength,
                confidence: cap.confidence,
                auto_tagged: true,
            })?;
        }

        debug!(
            model_id = model.id,
            added = summary.added.len(),
            updated = summary.updated.len(),
            kept = summary.kept.len(),
            "Auto-tagged model"
        );
        Ok(summary)
    }

    /// Tag every active model.
    pub async fn auto_tag_all(&self, overwrite: bool) -> Result<Vec<TagSummary>, StoreError> {
        let ids: Vec<i64> = {
            let store = self.catalog.lock().await;
            store.list_models(true)?.into_iter().map(|m| m.id).collect()
        };

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            summaries.push(self.auto_tag_model(id, overwrite).await?);
        }

        info!(models = summaries.len(), "Capability discovery complete");
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogStore, NewModel, NewSupplier};

    fn record(model_id: &str, description: Option<&str>, model_type: ModelType) -> ModelRecord {
        ModelRecord {
            id: 1,
            supplier_id: 1,
            model_id: model_id.to_string(),
            display_name: model_id.to_string(),
            description: description.map(str::to_string),
            model_type,
            context_window: None,
            is_active: true,
            success_rate: 100.0,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn strength_of(caps: &[DiscoveredCapability], name: &str) -> Option<i32> {
        caps.iter().find(|c| c.name == name).map(|c| c.strength)
    }

    #[test]
    fn test_name_match_outweighs_description() {
        let by_name = discover(&record("deepseek-coder", None, ModelType::Chat));
        let by_desc = discover(&record(
            "mystery-7b",
            Some("Good at code completion"),
            ModelType::Chat,
        ));

        let name_strength = strength_of(&by_name, "code_generation").unwrap();
        let desc_strength = strength_of(&by_desc, "code_generation").unwrap();
        assert!(name_strength > desc_strength);
    }

    #[test]
    fn test_chat_models_get_text_baseline() {
        let caps = discover(&record("zz-unknown", None, ModelType::Chat));
        assert_eq!(strength_of(&caps, "text_generation"), Some(3));

        let caps = discover(&record("dall-e-3", None, ModelType::Image));
        assert!(strength_of(&caps, "image_generation").unwrap() >= 3);
        assert!(strength_of(&caps, "text_generation").is_none());
    }

    #[test]
    fn test_short_keywords_need_whole_tokens() {
        // "vl" must not match inside "devlin"
        let caps = discover(&record("devlin-chat", None, ModelType::Chat));
        assert!(strength_of(&caps, "image_understanding").is_none());

        let caps = discover(&record("qwen2-vl", None, ModelType::Chat));
        assert!(strength_of(&caps, "image_understanding").is_some());
    }

    #[test]
    fn test_values_clamped() {
        let caps = discover(&record(
            "code-coder-codex-starcoder",
            Some("programming code"),
            ModelType::Chat,
        ));
        for cap in caps {
            assert!((1..=5).contains(&cap.strength));
            assert!((1..=5).contains(&cap.confidence));
        }
    }

    #[tokio::test]
    async fn test_auto_tag_keeps_manual_links() {
        let store = CatalogStore::open_in_memory().unwrap();
        let supplier = store
            .create_supplier(&NewSupplier {
                name: "deepseek".to_string(),
                provider_type: "deepseek".to_string(),
                ..Default::default()
            })
            .unwrap();
        let model = store
            .create_model(&NewModel::chat(supplier.id, "deepseek-coder"))
            .unwrap();
        let catalog = store.into_shared();

        let service = CapabilityDiscoveryService::new(catalog.clone());
        service.ensure_taxonomy().await.unwrap();
        catalog
            .lock()
            .await
            .link_capability(&CapabilityLink {
                model_id: model.id,
                capability: "code_generation".to_string(),
                strength: 2,
                confidence: 5,
                auto_tagged: false,
            })
            .unwrap();

        let summary = service.auto_tag_model(model.id, false).await.unwrap();
        assert!(summary.kept.contains(&"code_generation".to_string()));
        assert!(summary.added.contains(&"text_generation".to_string()));

        let links = catalog.lock().await.model_capabilities(model.id).unwrap();
        let code = links.iter().find(|l| l.capability == "code_generation").unwrap();
        assert_eq!(code.strength, 2);

        let summary = service.auto_tag_model(model.id, true).await.unwrap();
        assert!(summary.updated.contains(&"code_generation".to_string()));

        let all = service.auto_tag_all(false).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
