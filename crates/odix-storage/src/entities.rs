//! Write path: entity/relationship upserts, per-file replacement, and the
//! transactional batch commit used by indexing runs.

use crate::{parent_to_sql, RelationshipRow, Storage, RELATIONSHIP_COLUMNS};
use odix_core::{Entity, EntityKey, EntityKind, FileRecord, OdixError, Relationship};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};

/// Everything one successfully extracted file contributes.
#[derive(Debug, Clone)]
pub struct FileCommit {
    pub record: FileRecord,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

/// A unit of work committed in a single transaction.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub files: Vec<FileCommit>,
    /// Paths whose rows and file record are removed.
    pub deleted_files: Vec<String>,
    /// Turn resolved relationships whose target vanished back to dangling.
    /// Leave unset while later batches of the same run may still write
    /// those targets.
    pub check_targets: bool,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.deleted_files.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub files_written: usize,
    pub files_deleted: usize,
    pub entities_written: usize,
    pub relationships_written: usize,
    /// Resolved relationships whose target vanished and went back to dangling.
    pub relationships_invalidated: usize,
}

/// A committed entity as seen by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub key: EntityKey,
    pub xml_id: Option<String>,
    pub file_path: String,
}

/// Replacement of one stored dangling relationship by its resolved forms.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub dangling: Relationship,
    pub resolved: Vec<Relationship>,
}

impl Storage {
    // ── Entities ────────────────────────────────────────────────────────

    /// Record entities as defined by their files. Each natural key shows
    /// the definition with the greatest file path.
    pub fn upsert_entities(&self, entities: &[Entity]) -> Result<usize, OdixError> {
        let conn = self.conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        for entity in entities {
            define_entity(&tx, entity)?;
        }
        tx.commit()
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        Ok(entities.len())
    }

    /// Drop every definition made in `file_path`. Entities another file
    /// still defines stay, now located in that file.
    pub fn delete_entities_for_file(&self, file_path: &str) -> Result<usize, OdixError> {
        let conn = self.conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        let removed = remove_definitions(&tx, file_path)?;
        tx.commit()
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        Ok(removed)
    }

    // ── Relationships ───────────────────────────────────────────────────

    /// Insert relationships, ignoring exact duplicates. Returns the number
    /// of new rows.
    pub fn upsert_relationships(&self, relationships: &[Relationship]) -> Result<usize, OdixError> {
        let conn = self.conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        let mut written = 0;
        for rel in relationships {
            written += insert_relationship(&tx, rel)?;
        }
        tx.commit()
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        Ok(written)
    }

    /// Delete every relationship observed in `file_path`.
    pub fn delete_relationships_for_file(&self, file_path: &str) -> Result<usize, OdixError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM relationships WHERE file_path = ?1",
            params![file_path],
        )
        .map_err(|e| OdixError::Storage(e.to_string()))
    }

    /// All relationships whose target is still unresolved.
    pub fn dangling_relationships(&self) -> Result<Vec<Relationship>, OdixError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM relationships WHERE resolved = 0 ORDER BY id"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| RelationshipRow::from_row_at(row, 0))
            .map_err(|e| OdixError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        rows.into_iter()
            .map(RelationshipRow::into_relationship)
            .collect()
    }

    /// Swap dangling relationships for their resolved forms in one transaction.
    pub fn apply_resolutions(&self, resolutions: &[Resolution]) -> Result<usize, OdixError> {
        let conn = self.conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        let mut written = 0;
        for resolution in resolutions {
            delete_relationship(&tx, &resolution.dangling)?;
            for rel in &resolution.resolved {
                written += insert_relationship(&tx, rel)?;
            }
        }
        tx.commit()
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        Ok(written)
    }

    // ── File Records ────────────────────────────────────────────────────

    pub fn upsert_file_record(&self, record: &FileRecord) -> Result<(), OdixError> {
        let conn = self.conn()?;
        upsert_file_record(&conn, record)
    }

    pub fn delete_file_record(&self, file_path: &str) -> Result<(), OdixError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM file_records WHERE file_path = ?1",
            params![file_path],
        )
        .map_err(|e| OdixError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Stored file records, optionally limited to the given modules.
    pub fn file_records(&self, modules: Option<&[String]>) -> Result<Vec<FileRecord>, OdixError> {
        let conn = self.reader()?;
        let mut stmt = conn
            .prepare(
                "SELECT file_path, module, fingerprint, last_indexed_at FROM file_records ORDER BY file_path",
            )
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        let records = stmt
            .query_map([], |row| {
                Ok(FileRecord {
                    file_path: row.get(0)?,
                    module: row.get(1)?,
                    fingerprint: row.get(2)?,
                    last_indexed_at: row.get(3)?,
                })
            })
            .map_err(|e| OdixError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| OdixError::Storage(e.to_string()))?;

        Ok(match modules {
            Some(filter) => records
                .into_iter()
                .filter(|r| filter.iter().any(|m| m == &r.module))
                .collect(),
            None => records,
        })
    }

    // ── Batch Commit ────────────────────────────────────────────────────

    /// Replace the rows of every file in `batch` and remove deleted files,
    /// all in one transaction. With `clear_first`, the whole index is
    /// emptied inside the same transaction.
    pub fn commit_files(
        &self,
        batch: &CommitBatch,
        clear_first: bool,
    ) -> Result<CommitSummary, OdixError> {
        let conn = self.conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        let mut summary = CommitSummary::default();

        if clear_first {
            clear_tables(&tx)?;
        }

        for path in &batch.deleted_files {
            delete_file_rows(&tx, path)?;
            tx.execute(
                "DELETE FROM file_records WHERE file_path = ?1",
                params![path],
            )
            .map_err(|e| OdixError::Storage(e.to_string()))?;
            summary.files_deleted += 1;
        }

        for file in &batch.files {
            delete_file_rows(&tx, &file.record.file_path)?;
            for entity in &file.entities {
                define_entity(&tx, entity)?;
            }
            for rel in &file.relationships {
                summary.relationships_written += insert_relationship(&tx, rel)?;
            }
            upsert_file_record(&tx, &file.record)?;
            summary.entities_written += file.entities.len();
            summary.files_written += 1;
        }

        if batch.check_targets {
            summary.relationships_invalidated = invalidate_stale_targets(&tx)?;
        }

        tx.commit()
            .map_err(|e| OdixError::Storage(e.to_string()))?;

        tracing::debug!(
            "Committed {} files ({} deleted): {} entities, {} relationships, {} invalidated",
            summary.files_written,
            summary.files_deleted,
            summary.entities_written,
            summary.relationships_written,
            summary.relationships_invalidated
        );
        Ok(summary)
    }

    /// Remove all entities, relationships and file records.
    pub fn clear_all(&self) -> Result<(), OdixError> {
        let conn = self.conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        clear_tables(&tx)?;
        tx.commit()
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        Ok(())
    }

    // ── Resolver Support ────────────────────────────────────────────────

    /// Every committed entity key still defined outside `exclude_files`.
    /// A key defined by several files is listed once, located in the
    /// greatest remaining path.
    pub fn symbol_entries(
        &self,
        exclude_files: &HashSet<String>,
    ) -> Result<Vec<SymbolEntry>, OdixError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT kind, name, parent_name, module, xml_id, file_path FROM entity_definitions
                 ORDER BY file_path DESC",
            )
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(|e| OdixError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| OdixError::Storage(e.to_string()))?;

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(rows.len());
        for (kind, name, parent, module, xml_id, file_path) in rows {
            if exclude_files.contains(&file_path) {
                continue;
            }
            let kind: EntityKind = kind.parse()?;
            let key = EntityKey::new(kind, name, crate::parent_from_sql(parent), module);
            if !seen.insert(key.clone()) {
                continue;
            }
            entries.push(SymbolEntry {
                key,
                xml_id,
                file_path,
            });
        }
        Ok(entries)
    }

    /// Declared dependencies per module, from the manifest `depends` attribute.
    pub fn module_dependencies(&self) -> Result<HashMap<String, Vec<String>>, OdixError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT name, COALESCE(json_extract(attributes, '$.depends'), '') FROM entities WHERE kind = 'module'",
            )
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| OdixError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| OdixError::Storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(module, depends)| (module, split_depends(&depends)))
            .collect())
    }
}

/// Split a comma-joined `depends` attribute.
pub fn split_depends(depends: &str) -> Vec<String> {
    depends
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(String::from)
        .collect()
}

// ── Statement helpers shared by single operations and batch commits ────────

/// Natural key columns as stored: `(kind, name, parent_name, module)`.
type KeyColumns = (String, String, String, String);

fn define_entity(conn: &Connection, entity: &Entity) -> Result<(), OdixError> {
    let attributes = serde_json::to_string(&entity.attributes)?;
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO entity_definitions (kind, name, parent_name, module, file_path, line_number, xml_id, attributes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(kind, name, parent_name, module, file_path) DO UPDATE SET
                 line_number = excluded.line_number,
                 xml_id = excluded.xml_id,
                 attributes = excluded.attributes",
        )
        .map_err(|e| OdixError::Storage(e.to_string()))?;
    stmt.execute(params![
        entity.kind.as_str(),
        entity.name,
        parent_to_sql(&entity.parent_name),
        entity.module,
        entity.file_path,
        entity.line_number,
        entity.xml_id,
        attributes,
    ])
    .map_err(|e| OdixError::Storage(e.to_string()))?;
    refresh_entity(
        conn,
        &(
            entity.kind.as_str().to_string(),
            entity.name.clone(),
            parent_to_sql(&entity.parent_name).to_string(),
            entity.module.clone(),
        ),
    )
}

/// Remove the definitions made in `file_path` and refresh the keys they
/// covered. Returns the number of definitions removed.
fn remove_definitions(conn: &Connection, file_path: &str) -> Result<usize, OdixError> {
    let keys = {
        let mut stmt = conn
            .prepare_cached(
                "SELECT kind, name, parent_name, module FROM entity_definitions WHERE file_path = ?1",
            )
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![file_path], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        rows.collect::<Result<Vec<KeyColumns>, _>>()
            .map_err(|e| OdixError::Storage(e.to_string()))?
    };
    conn.execute(
        "DELETE FROM entity_definitions WHERE file_path = ?1",
        params![file_path],
    )
    .map_err(|e| OdixError::Storage(e.to_string()))?;
    for key in &keys {
        refresh_entity(conn, key)?;
    }
    Ok(keys.len())
}

/// Rebuild the visible row of one natural key from its definitions. The
/// greatest file path wins, which is also the last file a full run writes.
/// The row keeps its id while any definition remains.
fn refresh_entity(conn: &Connection, key: &KeyColumns) -> Result<(), OdixError> {
    let (kind, name, parent, module) = key;
    let winner = {
        let mut stmt = conn
            .prepare_cached(
                "SELECT file_path, line_number, xml_id, attributes FROM entity_definitions
                 WHERE kind = ?1 AND name = ?2 AND parent_name = ?3 AND module = ?4
                 ORDER BY file_path DESC LIMIT 1",
            )
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        stmt.query_row(params![kind, name, parent, module], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .optional()
        .map_err(|e| OdixError::Storage(e.to_string()))?
    };

    match winner {
        Some((file_path, line_number, xml_id, attributes)) => {
            let mut stmt = conn
                .prepare_cached(
                    "INSERT INTO entities (kind, name, parent_name, module, file_path, line_number, xml_id, attributes)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(kind, name, parent_name, module) DO UPDATE SET
                         file_path = excluded.file_path,
                         line_number = excluded.line_number,
                         xml_id = excluded.xml_id,
                         attributes = excluded.attributes",
                )
                .map_err(|e| OdixError::Storage(e.to_string()))?;
            stmt.execute(params![
                kind,
                name,
                parent,
                module,
                file_path,
                line_number,
                xml_id,
                attributes
            ])
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        }
        None => {
            conn.execute(
                "DELETE FROM entities WHERE kind = ?1 AND name = ?2 AND parent_name = ?3 AND module = ?4",
                params![kind, name, parent, module],
            )
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        }
    }
    Ok(())
}

fn insert_relationship(conn: &Connection, rel: &Relationship) -> Result<usize, OdixError> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO relationships (kind, source_kind, source_name, source_parent, source_module,
                 target_kind, target_name, target_parent, target_module, target_xml_id, resolved, file_path, line_number)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .map_err(|e| OdixError::Storage(e.to_string()))?;
    stmt.execute(params![
        rel.kind.as_str(),
        rel.source.kind.as_str(),
        rel.source.name,
        parent_to_sql(&rel.source.parent_name),
        rel.source.module,
        rel.target.kind.as_str(),
        rel.target.name,
        parent_to_sql(&rel.target.parent_name),
        rel.target.module.as_deref().unwrap_or(""),
        rel.target.xml_id,
        rel.is_resolved(),
        rel.file_path,
        rel.line_number,
    ])
    .map_err(|e| OdixError::Storage(e.to_string()))
}

fn delete_relationship(conn: &Connection, rel: &Relationship) -> Result<usize, OdixError> {
    conn.execute(
        "DELETE FROM relationships WHERE kind = ?1
             AND source_kind = ?2 AND source_name = ?3 AND source_parent = ?4 AND source_module = ?5
             AND target_kind = ?6 AND target_name = ?7 AND target_parent = ?8 AND target_module = ?9
             AND file_path = ?10 AND line_number = ?11",
        params![
            rel.kind.as_str(),
            rel.source.kind.as_str(),
            rel.source.name,
            parent_to_sql(&rel.source.parent_name),
            rel.source.module,
            rel.target.kind.as_str(),
            rel.target.name,
            parent_to_sql(&rel.target.parent_name),
            rel.target.module.as_deref().unwrap_or(""),
            rel.file_path,
            rel.line_number,
        ],
    )
    .map_err(|e| OdixError::Storage(e.to_string()))
}

fn upsert_file_record(conn: &Connection, record: &FileRecord) -> Result<(), OdixError> {
    conn.execute(
        "INSERT INTO file_records (file_path, module, fingerprint, last_indexed_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(file_path) DO UPDATE SET
             module = excluded.module,
             fingerprint = excluded.fingerprint,
             last_indexed_at = excluded.last_indexed_at",
        params![
            record.file_path,
            record.module,
            record.fingerprint,
            record.last_indexed_at
        ],
    )
    .map_err(|e| OdixError::Storage(e.to_string()))?;
    Ok(())
}

fn delete_file_rows(conn: &Connection, file_path: &str) -> Result<(), OdixError> {
    remove_definitions(conn, file_path)?;
    conn.execute(
        "DELETE FROM relationships WHERE file_path = ?1",
        params![file_path],
    )
    .map_err(|e| OdixError::Storage(e.to_string()))?;
    Ok(())
}

fn clear_tables(conn: &Connection) -> Result<(), OdixError> {
    conn.execute_batch(
        "DELETE FROM relationships;
         DELETE FROM entity_definitions;
         DELETE FROM entities;
         DELETE FROM file_records;",
    )
    .map_err(|e| OdixError::Storage(e.to_string()))
}

const STALE_TARGET: &str = "resolved = 1 AND NOT EXISTS (
    SELECT 1 FROM entities e
    WHERE e.kind = relationships.target_kind
      AND e.name = relationships.target_name
      AND e.parent_name = relationships.target_parent
      AND e.module = relationships.target_module
)";

/// Turn resolved relationships whose target entity is gone back into their
/// symbolic form. Rows that would duplicate an existing dangling row are
/// dropped instead.
fn invalidate_stale_targets(conn: &Connection) -> Result<usize, OdixError> {
    let updated = conn
        .execute(
            &format!(
                "UPDATE OR IGNORE relationships SET
                     target_kind = CASE WHEN target_xml_id IS NOT NULL THEN 'xml_id' ELSE target_kind END,
                     target_name = COALESCE(target_xml_id, target_name),
                     target_parent = CASE WHEN target_xml_id IS NOT NULL THEN '' ELSE target_parent END,
                     target_module = '',
                     resolved = 0
                 WHERE {STALE_TARGET}"
            ),
            [],
        )
        .map_err(|e| OdixError::Storage(e.to_string()))?;
    let dropped = conn
        .execute(&format!("DELETE FROM relationships WHERE {STALE_TARGET}"), [])
        .map_err(|e| OdixError::Storage(e.to_string()))?;
    Ok(updated + dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use odix_core::{RelationshipKind, TargetRef};

    fn count(storage: &Storage, table: &str) -> i64 {
        storage
            .conn()
            .unwrap()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .unwrap()
    }

    fn model(name: &str, module: &str, file: &str) -> Entity {
        Entity::new(EntityKind::Model, name, module, file, 5)
            .with_attr("model_type", "regular")
    }

    fn record(file: &str, module: &str) -> FileRecord {
        FileRecord {
            file_path: file.to_string(),
            module: module.to_string(),
            fingerprint: format!("hash-of-{file}"),
            last_indexed_at: 1_700_000_000,
        }
    }

    fn override_rel(file: &str, target_module: Option<&str>) -> Relationship {
        let source = EntityKey::new(
            EntityKind::Function,
            "action_confirm",
            Some("sale.order".into()),
            "sale_extra",
        );
        let mut target = TargetRef::unresolved(
            EntityKind::Function,
            "action_confirm",
            Some("sale.order".into()),
        );
        target.module = target_module.map(String::from);
        Relationship {
            kind: RelationshipKind::Override,
            source,
            target,
            file_path: file.to_string(),
            line_number: 12,
        }
    }

    #[test]
    fn upsert_overwrites_by_natural_key() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .upsert_entities(&[model("sale.order", "sale", "/a/sale/models/sale.py")])
            .unwrap();

        let mut updated = model("sale.order", "sale", "/a/sale/models/sale.py");
        updated.line_number = 40;
        updated.set_attr("description", "Sales Order");
        storage.upsert_entities(&[updated]).unwrap();

        assert_eq!(count(&storage, "entities"), 1);
        let line: i64 = storage
            .conn()
            .unwrap()
            .query_row("SELECT line_number FROM entities", [], |row| row.get(0))
            .unwrap();
        assert_eq!(line, 40);
    }

    #[test]
    fn same_name_in_other_module_is_a_distinct_entity() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .upsert_entities(&[
                model("res.partner", "base", "/a/base/models/res_partner.py"),
                model("res.partner", "contacts", "/a/contacts/models/res_partner.py"),
            ])
            .unwrap();
        assert_eq!(count(&storage, "entities"), 2);
    }

    #[test]
    fn delete_for_file_removes_only_that_file() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .upsert_entities(&[
                model("sale.order", "sale", "/a/sale/models/sale.py"),
                model("sale.order.line", "sale", "/a/sale/models/sale_line.py"),
            ])
            .unwrap();
        storage
            .upsert_relationships(&[override_rel("/a/sale/models/sale.py", None)])
            .unwrap();

        assert_eq!(
            storage
                .delete_entities_for_file("/a/sale/models/sale.py")
                .unwrap(),
            1
        );
        assert_eq!(
            storage
                .delete_relationships_for_file("/a/sale/models/sale.py")
                .unwrap(),
            1
        );
        assert_eq!(count(&storage, "entities"), 1);
        assert_eq!(count(&storage, "relationships"), 0);
    }

    fn confirm_in(file: &str, line: u32) -> Entity {
        Entity::new(EntityKind::Function, "action_confirm", "sale_custom", file, line)
            .with_parent("sale.order")
    }

    fn visible_file(storage: &Storage) -> Option<String> {
        storage
            .conn()
            .unwrap()
            .query_row(
                "SELECT file_path FROM entities WHERE name = 'action_confirm'",
                [],
                |row| row.get(0),
            )
            .optional()
            .unwrap()
    }

    #[test]
    fn entity_defined_by_two_files_survives_losing_one() {
        let storage = Storage::open_in_memory().unwrap();
        let a = "/a/sale_custom/models/a.py";
        let b = "/a/sale_custom/models/b.py";
        let file = |path: &str, entities| FileCommit {
            record: record(path, "sale_custom"),
            entities,
            relationships: vec![],
        };
        storage
            .commit_files(
                &CommitBatch {
                    files: vec![
                        file(b, vec![confirm_in(b, 9)]),
                        file(a, vec![confirm_in(a, 4)]),
                    ],
                    ..CommitBatch::default()
                },
                false,
            )
            .unwrap();
        assert_eq!(count(&storage, "entities"), 1);
        assert_eq!(count(&storage, "entity_definitions"), 2);
        assert_eq!(visible_file(&storage).as_deref(), Some(b));

        storage
            .commit_files(
                &CommitBatch {
                    deleted_files: vec![b.to_string()],
                    ..CommitBatch::default()
                },
                false,
            )
            .unwrap();
        assert_eq!(visible_file(&storage).as_deref(), Some(a));

        storage
            .commit_files(
                &CommitBatch {
                    files: vec![file(a, vec![])],
                    ..CommitBatch::default()
                },
                false,
            )
            .unwrap();
        assert_eq!(visible_file(&storage), None);
        assert_eq!(count(&storage, "entity_definitions"), 0);
    }

    #[test]
    fn delete_for_file_keeps_entities_other_files_define() {
        let storage = Storage::open_in_memory().unwrap();
        let a = "/a/sale_custom/models/a.py";
        let b = "/a/sale_custom/models/b.py";
        storage
            .upsert_entities(&[confirm_in(a, 4), confirm_in(b, 9)])
            .unwrap();
        assert_eq!(storage.delete_entities_for_file(b).unwrap(), 1);

        let line: i64 = storage
            .conn()
            .unwrap()
            .query_row("SELECT line_number FROM entities", [], |row| row.get(0))
            .unwrap();
        assert_eq!(line, 4);
        assert_eq!(visible_file(&storage).as_deref(), Some(a));
    }

    #[test]
    fn duplicate_relationships_are_ignored() {
        let storage = Storage::open_in_memory().unwrap();
        let rel = override_rel("/a/sale_extra/models/sale.py", None);
        assert_eq!(storage.upsert_relationships(&[rel.clone()]).unwrap(), 1);
        assert_eq!(storage.upsert_relationships(&[rel]).unwrap(), 0);
        assert_eq!(count(&storage, "relationships"), 1);
    }

    #[test]
    fn commit_files_replaces_and_deletes_in_one_batch() {
        let storage = Storage::open_in_memory().unwrap();
        let first = CommitBatch {
            files: vec![
                FileCommit {
                    record: record("/a/sale/models/sale.py", "sale"),
                    entities: vec![model("sale.order", "sale", "/a/sale/models/sale.py")],
                    relationships: vec![],
                },
                FileCommit {
                    record: record("/a/sale/models/old.py", "sale"),
                    entities: vec![model("sale.old", "sale", "/a/sale/models/old.py")],
                    relationships: vec![],
                },
            ],
            deleted_files: vec![],
            check_targets: true,
        };
        storage.commit_files(&first, false).unwrap();
        assert_eq!(count(&storage, "file_records"), 2);

        let second = CommitBatch {
            files: vec![FileCommit {
                record: record("/a/sale/models/sale.py", "sale"),
                entities: vec![model("sale.quotation", "sale", "/a/sale/models/sale.py")],
                relationships: vec![],
            }],
            deleted_files: vec!["/a/sale/models/old.py".to_string()],
            check_targets: true,
        };
        let summary = storage.commit_files(&second, false).unwrap();
        assert_eq!(summary.files_written, 1);
        assert_eq!(summary.files_deleted, 1);

        let names: Vec<String> = {
            let conn = storage.conn().unwrap();
            let mut stmt = conn.prepare("SELECT name FROM entities").unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap()
        };
        assert_eq!(names, vec!["sale.quotation".to_string()]);
        assert_eq!(count(&storage, "file_records"), 1);
    }

    #[test]
    fn removed_target_turns_relationship_dangling() {
        let storage = Storage::open_in_memory().unwrap();
        let base_fn = Entity::new(
            EntityKind::Function,
            "action_confirm",
            "sale",
            "/a/sale/models/sale.py",
            30,
        )
        .with_parent("sale.order");
        storage
            .commit_files(
                &CommitBatch {
                    files: vec![
                        FileCommit {
                            record: record("/a/sale/models/sale.py", "sale"),
                            entities: vec![base_fn],
                            relationships: vec![],
                        },
                        FileCommit {
                            record: record("/a/sale_extra/models/sale.py", "sale_extra"),
                            entities: vec![],
                            relationships: vec![override_rel(
                                "/a/sale_extra/models/sale.py",
                                Some("sale"),
                            )],
                        },
                    ],
                    deleted_files: vec![],
                    check_targets: true,
                },
                false,
            )
            .unwrap();
        assert!(storage.dangling_relationships().unwrap().is_empty());

        let summary = storage
            .commit_files(
                &CommitBatch {
                    files: vec![],
                    deleted_files: vec!["/a/sale/models/sale.py".to_string()],
                    check_targets: true,
                },
                false,
            )
            .unwrap();
        assert_eq!(summary.relationships_invalidated, 1);

        let dangling = storage.dangling_relationships().unwrap();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].kind, RelationshipKind::Override);
        assert_eq!(dangling[0].target.parent_name.as_deref(), Some("sale.order"));
        assert!(dangling[0].target.module.is_none());
    }

    #[test]
    fn unchecked_batch_leaves_resolved_rows_alone() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .upsert_relationships(&[override_rel("/a/sale_extra/models/sale.py", Some("sale"))])
            .unwrap();

        // The target is written by a batch that has not been committed yet.
        let summary = storage
            .commit_files(
                &CommitBatch {
                    files: vec![FileCommit {
                        record: record("/a/sale_extra/models/other.py", "sale_extra"),
                        entities: vec![],
                        relationships: vec![],
                    }],
                    ..CommitBatch::default()
                },
                false,
            )
            .unwrap();
        assert_eq!(summary.relationships_invalidated, 0);
        assert!(storage.dangling_relationships().unwrap().is_empty());
    }

    #[test]
    fn invalidated_xml_target_falls_back_to_xml_id() {
        let storage = Storage::open_in_memory().unwrap();
        let view = Entity::new(
            EntityKind::View,
            "view_order_form",
            "sale",
            "/a/sale/views/sale_views.xml",
            3,
        )
        .with_xml_id("sale.view_order_form");
        let key = view.key();
        let inherit = Relationship {
            kind: RelationshipKind::Inheritance,
            source: EntityKey::new(EntityKind::View, "view_order_form_extra", None, "sale_extra"),
            target: TargetRef::resolved_to(&key, Some("sale.view_order_form".into())),
            file_path: "/a/sale_extra/views/sale.xml".into(),
            line_number: 4,
        };
        storage.upsert_entities(&[view]).unwrap();
        storage.upsert_relationships(&[inherit]).unwrap();

        storage
            .commit_files(
                &CommitBatch {
                    files: vec![],
                    deleted_files: vec!["/a/sale/views/sale_views.xml".into()],
                    check_targets: true,
                },
                false,
            )
            .unwrap();

        let dangling = storage.dangling_relationships().unwrap();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].target.kind, EntityKind::XmlId);
        assert_eq!(dangling[0].target.name, "sale.view_order_form");
    }

    #[test]
    fn apply_resolutions_swaps_rows() {
        let storage = Storage::open_in_memory().unwrap();
        let dangling = override_rel("/a/sale_extra/models/sale.py", None);
        storage.upsert_relationships(&[dangling.clone()]).unwrap();

        let resolved = override_rel("/a/sale_extra/models/sale.py", Some("sale"));
        storage
            .apply_resolutions(&[Resolution {
                dangling,
                resolved: vec![resolved],
            }])
            .unwrap();
        assert!(storage.dangling_relationships().unwrap().is_empty());
        assert_eq!(count(&storage, "relationships"), 1);
    }

    #[test]
    fn clear_first_empties_index_inside_commit() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .upsert_entities(&[model("stale.model", "stale", "/a/stale/models.py")])
            .unwrap();
        storage
            .upsert_file_record(&record("/a/stale/models.py", "stale"))
            .unwrap();

        storage
            .commit_files(
                &CommitBatch {
                    files: vec![FileCommit {
                        record: record("/a/sale/models/sale.py", "sale"),
                        entities: vec![model("sale.order", "sale", "/a/sale/models/sale.py")],
                        relationships: vec![],
                    }],
                    deleted_files: vec![],
                    check_targets: true,
                },
                true,
            )
            .unwrap();
        assert_eq!(count(&storage, "entities"), 1);
        assert_eq!(
            storage.file_records(None).unwrap()[0].file_path,
            "/a/sale/models/sale.py"
        );
    }

    #[test]
    fn file_records_filter_by_module() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .upsert_file_record(&record("/a/sale/models/sale.py", "sale"))
            .unwrap();
        storage
            .upsert_file_record(&record("/a/stock/models/stock.py", "stock"))
            .unwrap();
        let filter = vec!["stock".to_string()];
        let records = storage.file_records(Some(&filter)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].module, "stock");

        storage.delete_file_record("/a/stock/models/stock.py").unwrap();
        assert_eq!(storage.file_records(None).unwrap().len(), 1);
    }

    #[test]
    fn symbol_entries_skip_excluded_files_and_deps_parse() {
        let storage = Storage::open_in_memory().unwrap();
        let manifest = Entity::new(
            EntityKind::Module,
            "sale_extra",
            "sale_extra",
            "/a/sale_extra/__manifest__.py",
            1,
        )
        .with_attr("depends", "sale, mail");
        storage
            .upsert_entities(&[
                manifest,
                model("sale.order", "sale", "/a/sale/models/sale.py"),
            ])
            .unwrap();

        let exclude: HashSet<String> = ["/a/sale/models/sale.py".to_string()].into();
        let entries = storage.symbol_entries(&exclude).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key.kind, EntityKind::Module);

        // A second definer keeps the key available while sale.py is replaced.
        storage
            .upsert_entities(&[model("sale.order", "sale", "/a/sale/models/sale_more.py")])
            .unwrap();
        let entries = storage.symbol_entries(&exclude).unwrap();
        let order = entries
            .iter()
            .find(|e| e.key.name == "sale.order")
            .unwrap();
        assert_eq!(order.file_path, "/a/sale/models/sale_more.py");
        assert_eq!(entries.len(), 2);

        let deps = storage.module_dependencies().unwrap();
        assert_eq!(deps["sale_extra"], vec!["sale".to_string(), "mail".to_string()]);
    }
}
