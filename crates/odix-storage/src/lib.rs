//! odix-storage: SQLite persistence layer for the odix index.
//!
//! Uses rusqlite with bundled SQLite, WAL mode, and versioned migrations.
//! File-backed stores keep a second, read-only connection so queries never
//! wait on the writer's lock and only ever observe committed transactions.

use odix_core::{
    AttrValue, Attributes, Entity, EntityKey, EntityKind, OdixError, Relationship,
    RelationshipKind, StorageConfig, TargetRef,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

mod entities;
mod migrations;
mod queries;

pub use entities::{
    split_depends, CommitBatch, CommitSummary, FileCommit, Resolution, SymbolEntry,
};
pub use queries::{AttributeQuery, SearchParams};

/// SQLite-backed store for entities, relationships, and file records.
///
/// The orchestrator is the only writer. Connections are wrapped in a
/// `Mutex` to satisfy `Send + Sync`.
pub struct Storage {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
}

impl Storage {
    /// Lock the write connection.
    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, OdixError> {
        self.writer
            .lock()
            .map_err(|e| OdixError::LockPoisoned(format!("storage writer: {e}")))
    }

    /// Lock the read connection, falling back to the writer for in-memory
    /// stores (which cannot share state across connections).
    pub(crate) fn reader(&self) -> Result<MutexGuard<'_, Connection>, OdixError> {
        match &self.reader {
            Some(reader) => reader
                .lock()
                .map_err(|e| OdixError::LockPoisoned(format!("storage reader: {e}"))),
            None => self.conn(),
        }
    }

    /// Open (or create) an index database at the given path with default tuning.
    pub fn open(path: &Path) -> Result<Self, OdixError> {
        Self::open_with(path, &StorageConfig::default())
    }

    /// Open (or create) an index database at the given path.
    pub fn open_with(path: &Path, config: &StorageConfig) -> Result<Self, OdixError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = Connection::open(path).map_err(|e| OdixError::Storage(e.to_string()))?;
        apply_pragmas(&writer, config)?;
        // WAL mode so the reader sees the last committed state during a run
        writer
            .pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        writer
            .pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        migrations::run_migrations(&writer)?;

        let reader = Connection::open(path).map_err(|e| OdixError::Storage(e.to_string()))?;
        apply_pragmas(&reader, config)?;
        reader
            .pragma_update(None, "query_only", "ON")
            .map_err(|e| OdixError::Storage(e.to_string()))?;

        tracing::debug!("Opened index store at {}", path.display());
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, OdixError> {
        let conn = Connection::open_in_memory().map_err(|e| OdixError::Storage(e.to_string()))?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            writer: Mutex::new(conn),
            reader: None,
        })
    }
}

fn apply_pragmas(conn: &Connection, config: &StorageConfig) -> Result<(), OdixError> {
    // Negative cache_size is in KiB
    conn.pragma_update(None, "cache_size", -(config.cache_size_mb as i64) * 1024)
        .map_err(|e| OdixError::Storage(e.to_string()))?;
    conn.pragma_update(None, "temp_store", "MEMORY")
        .map_err(|e| OdixError::Storage(e.to_string()))?;
    conn.busy_timeout(std::time::Duration::from_secs(config.busy_timeout_secs))
        .map_err(|e| OdixError::Storage(e.to_string()))?;
    Ok(())
}

// ── Row mapping ─────────────────────────────────────────────────────────────

/// Empty string stands in for "no parent" in key columns.
pub(crate) fn parent_to_sql(parent: &Option<String>) -> &str {
    parent.as_deref().unwrap_or("")
}

pub(crate) fn parent_from_sql(parent: String) -> Option<String> {
    if parent.is_empty() {
        None
    } else {
        Some(parent)
    }
}

fn line_from_sql(line: i64) -> Result<u32, OdixError> {
    u32::try_from(line).map_err(|_| OdixError::Storage(format!("line number {line} out of range")))
}

pub(crate) const ENTITY_COLUMNS: &str =
    "kind, name, parent_name, module, file_path, line_number, xml_id, attributes";

/// Internal row struct for entity deserialization.
pub(crate) struct EntityRow {
    pub(crate) kind: String,
    pub(crate) name: String,
    pub(crate) parent_name: String,
    pub(crate) module: String,
    pub(crate) file_path: String,
    pub(crate) line_number: i64,
    pub(crate) xml_id: Option<String>,
    pub(crate) attributes: String,
}

impl EntityRow {
    /// Read a row selected with [`ENTITY_COLUMNS`].
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            kind: row.get(0)?,
            name: row.get(1)?,
            parent_name: row.get(2)?,
            module: row.get(3)?,
            file_path: row.get(4)?,
            line_number: row.get(5)?,
            xml_id: row.get(6)?,
            attributes: row.get(7)?,
        })
    }

    pub(crate) fn into_entity(self) -> Result<Entity, OdixError> {
        let kind: EntityKind = self.kind.parse()?;
        let attributes: Attributes = serde_json::from_str(&self.attributes).map_err(|e| {
            OdixError::Storage(format!(
                "bad attributes for {} {}: {e}",
                self.kind, self.name
            ))
        })?;
        let line_number = line_from_sql(self.line_number)?;
        Ok(Entity {
            kind,
            name: self.name,
            parent_name: parent_from_sql(self.parent_name),
            module: self.module,
            file_path: self.file_path,
            line_number,
            xml_id: self.xml_id,
            attributes,
        })
    }
}

pub(crate) const RELATIONSHIP_COLUMNS: &str = "kind, source_kind, source_name, source_parent, \
     source_module, target_kind, target_name, target_parent, target_module, target_xml_id, \
     file_path, line_number";

/// Internal row struct for relationship deserialization.
pub(crate) struct RelationshipRow {
    pub(crate) kind: String,
    pub(crate) source_kind: String,
    pub(crate) source_name: String,
    pub(crate) source_parent: String,
    pub(crate) source_module: String,
    pub(crate) target_kind: String,
    pub(crate) target_name: String,
    pub(crate) target_parent: String,
    pub(crate) target_module: String,
    pub(crate) target_xml_id: Option<String>,
    pub(crate) file_path: String,
    pub(crate) line_number: i64,
}

impl RelationshipRow {
    /// Read a row selected with [`RELATIONSHIP_COLUMNS`], starting at `offset`.
    pub(crate) fn from_row_at(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            kind: row.get(offset)?,
            source_kind: row.get(offset + 1)?,
            source_name: row.get(offset + 2)?,
            source_parent: row.get(offset + 3)?,
            source_module: row.get(offset + 4)?,
            target_kind: row.get(offset + 5)?,
            target_name: row.get(offset + 6)?,
            target_parent: row.get(offset + 7)?,
            target_module: row.get(offset + 8)?,
            target_xml_id: row.get(offset + 9)?,
            file_path: row.get(offset + 10)?,
            line_number: row.get(offset + 11)?,
        })
    }

    pub(crate) fn into_relationship(self) -> Result<Relationship, OdixError> {
        let kind: RelationshipKind = self.kind.parse()?;
        let source = EntityKey {
            kind: self.source_kind.parse()?,
            name: self.source_name,
            parent_name: parent_from_sql(self.source_parent),
            module: self.source_module,
        };
        let target = TargetRef {
            kind: self.target_kind.parse()?,
            name: self.target_name,
            parent_name: parent_from_sql(self.target_parent),
            module: if self.target_module.is_empty() {
                None
            } else {
                Some(self.target_module)
            },
            xml_id: self.target_xml_id,
        };
        Ok(Relationship {
            kind,
            source,
            target,
            line_number: line_from_sql(self.line_number)?,
            file_path: self.file_path,
        })
    }
}

/// SQL value used to compare an attribute against `json_each` output.
pub(crate) fn attr_to_sql(value: &AttrValue) -> rusqlite::types::Value {
    match value {
        AttrValue::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        AttrValue::Int(i) => rusqlite::types::Value::Integer(*i),
        AttrValue::Float(f) => rusqlite::types::Value::Real(*f),
        AttrValue::Text(s) => rusqlite::types::Value::Text(s.clone()),
    }
}
