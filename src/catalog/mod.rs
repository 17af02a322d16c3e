// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Relational catalog backed by SQLite.
//!
//! Holds suppliers, models, capabilities and their associations, default
//! model configuration, parameter templates, agents, skills with their
//! execution logs, conversation history and knowledge documents.
//!
//! The store is synchronous; async callers share it as a [`SharedCatalog`]
//! and hold the lock only for the duration of one query.

mod agents;
mod models;
mod schema;
pub mod types;

pub use schema::SCHEMA_VERSION;
pub use types::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

#[cfg(feature = "telemetry")]
use tracing::debug;

use crate::error::StoreError;

/// Catalog shared across async components.
pub type SharedCatalog = Arc<Mutex<CatalogStore>>;

/// SQLite-backed catalog.
pub struct CatalogStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl CatalogStore {
    /// Open or create a catalog database at a specific path.
    pub fn open_at(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;

        // WAL for concurrent readers
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;

        let mut store = Self {
            conn,
            path: Some(db_path.to_path_buf()),
        };
        store.init_schema()?;

        #[cfg(feature = "telemetry")]
        debug!(path = %db_path.display(), "Opened catalog");

        Ok(store)
    }

    /// Open a private in-memory catalog.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let mut store = Self { conn, path: None };
        store.init_schema()?;
        Ok(store)
    }

    /// Wrap the store for sharing across tasks.
    pub fn into_shared(self) -> SharedCatalog {
        Arc::new(Mutex::new(self))
    }

    /// Database file path; `None` for in-memory catalogs.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(schema::SCHEMA_SQL)?;

        let current_version: Option<u32> = self
            .conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        if current_version.is_none() {
            self.conn.execute(
                "INSERT INTO schema_version (version) VALUES (?)",
                params![SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    /// Schema version recorded in the database.
    pub fn schema_version(&self) -> Result<u32, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })?)
    }
}

/// Current time as unix seconds.
pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_in_memory() {
        let store = CatalogStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
        assert!(store.path().is_none());
    }

    #[test]
    fn test_open_at_creates_parent_and_reopens() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("catalog.db");

        {
            let store = CatalogStore::open_at(&path).unwrap();
            store
                .create_supplier(&NewSupplier {
                    name: "openai".to_string(),
                    provider_type: "openai".to_string(),
                    ..Default::default()
                })
                .unwrap();
        }

        let store = CatalogStore::open_at(&path).unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
        assert_eq!(store.list_suppliers(false).unwrap().len(), 1);
    }
}
