// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Keyword retrieval over catalog knowledge documents.
//!
//! Documents are scored by how often the query terms occur, normalized by
//! document length, with a bonus for title matches.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

#[cfg(feature = "telemetry")]
use tracing::debug;

use crate::catalog::{KnowledgeDocument, SharedCatalog};
use crate::error::StoreError;
use crate::telemetry::ApiMonitor;

/// Default number of results.
pub const DEFAULT_TOP_K: usize = 3;

/// Characters of context kept around the first hit.
const SNIPPET_RADIUS: usize = 120;

const TITLE_WEIGHT: f64 = 2.0;

/// A scored document.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub document_id: i64,
    pub knowledge_base: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
}

pub struct KnowledgeBase {
    catalog: SharedCatalog,
    monitor: Arc<ApiMonitor>,
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

fn score_document(doc: &KnowledgeDocument, query_terms: &HashSet<String>) -> f64 {
    let body = terms(&doc.content);
    if body.is_empty() && doc.title.is_empty() {
        return 0.0;
    }

    let body_hits = body.iter().filter(|t| query_terms.contains(*t)).count() as f64;
    let title_hits = terms(&doc.title)
        .iter()
        .filter(|t| query_terms.contains(*t))
        .count() as f64;

    let length_norm = (body.len().max(1) as f64).sqrt();
    body_hits / length_norm + title_hits * TITLE_WEIGHT / length_norm.max(1.0)
}

/// Text around the first occurrence of any query term.
fn snippet(content: &str, query_terms: &HashSet<String>) -> String {
    // Lowercasing can change byte lengths, so remember where each lowered
    // byte came from in `content`.
    let mut lower = String::with_capacity(content.len());
    let mut origin = Vec::with_capacity(content.len());
    for (idx, ch) in content.char_indices() {
        lower.extend(ch.to_lowercase());
        origin.resize(lower.len(), idx);
    }

    let first_hit = query_terms
        .iter()
        .filter_map(|t| lower.find(t.as_str()))
        .min()
        .map(|i| origin[i])
        .unwrap_or(0);

    let start = floor_char_boundary(content, first_hit.saturating_sub(SNIPPET_RADIUS));
    let end = floor_char_boundary(content, (first_hit + SNIPPET_RADIUS).min(content.len()));

    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    out.push_str(content[start..end].trim());
    if end < content.len() {
        out.push_str("...");
    }
    out
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

impl KnowledgeBase {
    pub fn new(catalog: SharedCatalog, monitor: Arc<ApiMonitor>) -> Self {
        Self { catalog, monitor }
    }

    pub async fn add_document(
        &self,
        knowledge_base: &str,
        title: &str,
        content: &str,
    ) -> Result<KnowledgeDocument, StoreError> {
        let store = self.catalog.lock().await;
        store.add_document(knowledge_base, title, content)
    }

    /// Best `top_k` documents for a query, optionally within one base.
    pub async fn search(
        &self,
        knowledge_base: Option<&str>,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let start = Instant::now();
        let query_terms: HashSet<String> = terms(query).into_iter().collect();
        if query_terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let documents = {
            let store = self.catalog.lock().await;
            store.list_documents(knowledge_base)?
        };

        let mut hits: Vec<SearchHit> = documents
            .iter()
            .filter_map(|doc| {
                let score = score_document(doc, &query_terms);
                (score > 0.0).then(|| SearchHit {
                    document_id: doc.id,
                    knowledge_base: doc.knowledge_base.clone(),
                    title: doc.title.clone(),
                    snippet: snippet(&doc.content, &query_terms),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);

        self.monitor
            .record_operation("knowledge.search", start.elapsed(), true);

        #[cfg(feature = "telemetry")]
        debug!(
            knowledge_base = knowledge_base.unwrap_or("*"),
            candidates = documents.len(),
            hits = hits.len(),
            "Knowledge search"
        );

        Ok(hits)
    }
}

/// Render hits as a context block for a model prompt.
pub fn format_results(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No relevant documents found.".to_string();
    }

    let mut output = String::from("## Relevant Knowledge\n\n");
    for (i, hit) in hits.iter().enumerate() {
        output.push_str(&format!(
            "{}. {} [{}] (score: {:.2})\n{}\n\n",
            i + 1,
            hit.title,
            hit.knowledge_base,
            hit.score,
            hit.snippet
        ));
    }
    output.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogStore;

    async fn kb() -> KnowledgeBase {
        let catalog = CatalogStore::open_in_memory().unwrap().into_shared();
        KnowledgeBase::new(catalog, Arc::new(ApiMonitor::new()))
    }

    #[tokio::test]
    async fn test_search_ranks_by_term_frequency() {
        let kb = kb().await;
        kb.add_document("docs", "Rust ownership", "Ownership and borrowing in Rust. Ownership rules.")
            .await
            .unwrap();
        kb.add_document("docs", "Cooking", "How to bake bread with flour and water.")
            .await
            .unwrap();
        kb.add_document("faq", "Borrow checker", "The borrow checker enforces ownership.")
            .await
            .unwrap();

        let hits = kb.search(None, "rust ownership", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Rust ownership");

        let hits = kb.search(Some("faq"), "ownership", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].knowledge_base, "faq");

        assert!(kb.search(None, "?", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_top_k_and_format() {
        let kb = kb().await;
        for i in 0..4 {
            kb.add_document("docs", &format!("Doc {i}"), "tokio runtime notes")
                .await
                .unwrap();
        }
        let hits = kb.search(Some("docs"), "tokio", 2).await.unwrap();
        assert_eq!(hits.len(), 2);

        let text = format_results(&hits);
        assert!(text.starts_with("## Relevant Knowledge"));
        assert!(text.contains("1. Doc"));
        assert_eq!(format_results(&[]), "No relevant documents found.");
    }

    #[test]
    fn test_snippet_respects_char_boundaries() {
        let content = format!("{}needle{}", "é".repeat(200), "ü".repeat(200));
        let query: HashSet<String> = HashSet::from(["needle".to_string()]);
        let s = snippet(&content, &query);
        assert!(s.contains("needle"));
        assert!(s.starts_with("..."));
        assert!(s.ends_with("..."));
    }

    #[test]
    fn test_snippet_tracks_case_folding_growth() {
        // 'İ' is two bytes but lowercases to three
        let content = format!("{}needle{}", "İ".repeat(200), "x".repeat(300));
        let query: HashSet<String> = HashSet::from(["needle".to_string()]);
        let s = snippet(&content, &query);
        assert!(s.contains("needle"), "{s}");
    }
}
