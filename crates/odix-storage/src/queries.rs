//! Read path: name search, attribute filters, entity details, references,
//! and aggregate statistics.

use crate::{
    attr_to_sql, EntityRow, RelationshipRow, Storage, ENTITY_COLUMNS, RELATIONSHIP_COLUMNS,
};
use odix_core::{
    AttrValue, Attributes, Direction, Entity, EntityDetails, EntityKind, IndexStats,
    ModuleStats, ModuleSummary, OdixError, Page, ReferenceHit, Relationship, RelationshipKind,
    TargetRef,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashSet};

/// Name search over entities.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    /// SQL LIKE pattern where only `%` is a wildcard. Without a `%` the
    /// pattern matches as a substring.
    pub pattern: String,
    pub kind: Option<EntityKind>,
    pub module: Option<String>,
    pub parent_name: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Exact-match conjunction over entity attributes.
#[derive(Debug, Clone)]
pub struct AttributeQuery {
    pub kind: EntityKind,
    pub filters: Attributes,
    pub module: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Collects WHERE clauses with positional parameters.
#[derive(Default)]
struct QueryBuilder {
    clauses: Vec<String>,
    values: Vec<Value>,
}

impl QueryBuilder {
    /// Bind a value and return its placeholder.
    fn bind(&mut self, value: Value) -> String {
        self.values.push(value);
        format!("?{}", self.values.len())
    }

    fn clause(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

/// Escape LIKE metacharacters other than `%`.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '\\' || c == '_' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Turn a user pattern into a LIKE pattern: `%` stays a wildcard, a
/// pattern without one becomes a substring match.
pub(crate) fn like_pattern(pattern: &str) -> String {
    let escaped = escape_like(pattern);
    if pattern.contains('%') {
        escaped
    } else {
        format!("%{escaped}%")
    }
}

fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

impl Storage {
    // ── Search ──────────────────────────────────────────────────────────

    /// Paginated name search ranked exact > prefix > substring, ties broken
    /// by module, name, kind and parent.
    pub fn search(&self, params: &SearchParams) -> Result<Page<Entity>, OdixError> {
        let mut q = QueryBuilder::default();
        let like = q.bind(text(like_pattern(&params.pattern)));
        q.clause(format!("name LIKE {like} ESCAPE '\\'"));
        if let Some(kind) = params.kind {
            let p = q.bind(text(kind.as_str()));
            q.clause(format!("kind = {p}"));
        }
        if let Some(module) = &params.module {
            let p = q.bind(text(module.as_str()));
            q.clause(format!("module = {p}"));
        }
        if let Some(parent) = &params.parent_name {
            let p = q.bind(text(parent.as_str()));
            q.clause(format!("parent_name = {p}"));
        }

        let filter_params = q.values.len();
        let core = params.pattern.trim_matches('%');
        let order = {
            let exact = q.bind(text(core));
            let prefix = q.bind(text(format!("{}%", escape_like(core))));
            format!(
                "CASE WHEN lower(name) = lower({exact}) THEN 0
                      WHEN name LIKE {prefix} ESCAPE '\\' THEN 1
                      ELSE 2 END,
                 module, name, kind, parent_name, id"
            )
        };

        let conn = self.reader()?;
        page_of_entities(&conn, &q, filter_params, &order, params.limit, params.offset)
    }

    /// Paginated search over fully qualified XML ids.
    pub fn search_xml_id(
        &self,
        pattern: &str,
        module: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Entity>, OdixError> {
        let mut q = QueryBuilder::default();
        q.clause("xml_id IS NOT NULL".to_string());
        let like = q.bind(text(like_pattern(pattern)));
        q.clause(format!("xml_id LIKE {like} ESCAPE '\\'"));
        if let Some(module) = module {
            let p = q.bind(text(module));
            q.clause(format!("module = {p}"));
        }

        let filter_params = q.values.len();
        let core = pattern.trim_matches('%');
        let order = {
            let exact = q.bind(text(core));
            let suffix = q.bind(text(format!(".{core}")));
            let prefix = q.bind(text(format!("{}%", escape_like(core))));
            format!(
                "CASE WHEN lower(xml_id) = lower({exact})
                           OR substr(xml_id, -length({suffix})) = {suffix} THEN 0
                      WHEN xml_id LIKE {prefix} ESCAPE '\\' THEN 1
                      ELSE 2 END,
                 xml_id, module, kind, id"
            )
        };

        let conn = self.reader()?;
        page_of_entities(&conn, &q, filter_params, &order, limit, offset)
    }

    /// Entities of `kind` whose attributes equal every filter value.
    /// Comparison is typed: `true` never matches `"true"` or `1`.
    pub fn search_by_attributes(&self, query: &AttributeQuery) -> Result<Page<Entity>, OdixError> {
        let mut q = QueryBuilder::default();
        let kind = q.bind(text(query.kind.as_str()));
        q.clause(format!("kind = {kind}"));
        if let Some(module) = &query.module {
            let p = q.bind(text(module.as_str()));
            q.clause(format!("module = {p}"));
        }
        for (key, value) in &query.filters {
            let key_p = q.bind(text(key.as_str()));
            let test = match value {
                AttrValue::Bool(true) => "j.type = 'true'".to_string(),
                AttrValue::Bool(false) => "j.type = 'false'".to_string(),
                AttrValue::Int(_) | AttrValue::Float(_) => {
                    let v = q.bind(attr_to_sql(value));
                    format!("j.type IN ('integer', 'real') AND j.value = {v}")
                }
                AttrValue::Text(_) => {
                    let v = q.bind(attr_to_sql(value));
                    format!("j.type = 'text' AND j.value = {v}")
                }
            };
            q.clause(format!(
                "EXISTS (SELECT 1 FROM json_each(entities.attributes) j WHERE j.key = {key_p} AND {test})"
            ));
        }

        let conn = self.reader()?;
        page_of_entities(
            &conn,
            &q,
            q.values.len(),
            "module, name, parent_name, id",
            query.limit,
            query.offset,
        )
    }

    // ── Details ─────────────────────────────────────────────────────────

    /// Look up one entity with its relationships, children and related
    /// markup. Fails with `NotFound` when nothing carries the key.
    pub fn get_entity(
        &self,
        kind: EntityKind,
        name: &str,
        parent_name: Option<&str>,
        module: Option<&str>,
    ) -> Result<EntityDetails, OdixError> {
        let conn = self.reader()?;

        let mut q = QueryBuilder::default();
        let k = q.bind(text(kind.as_str()));
        let n = q.bind(text(name));
        q.clause(format!("kind = {k} AND name = {n}"));
        if let Some(parent) = parent_name {
            let p = q.bind(text(parent));
            q.clause(format!("parent_name = {p}"));
        }
        if let Some(module) = module {
            let p = q.bind(text(module));
            q.clause(format!("module = {p}"));
        }
        let mut matches = select_entities(&conn, &q, "module, parent_name, id", None)?;
        if matches.is_empty() {
            return Err(OdixError::NotFound(match parent_name {
                Some(parent) => format!("{kind} '{name}' on '{parent}'"),
                None => format!("{kind} '{name}'"),
            }));
        }
        let entity = matches.remove(0);
        let other_definitions = matches;

        let relationships = entity_relationships(&conn, &entity)?;
        let (children, related) = if kind == EntityKind::Model {
            (model_children(&conn, name)?, model_related(&conn, name)?)
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(EntityDetails {
            entity,
            other_definitions,
            relationships,
            children,
            related,
        })
    }

    // ── References ──────────────────────────────────────────────────────

    /// Every place `(kind, name)` is defined, extended, overridden or used.
    /// Dangling relationships are included.
    pub fn find_references(
        &self,
        kind: EntityKind,
        name: &str,
        reference_kind: Option<RelationshipKind>,
    ) -> Result<Vec<ReferenceHit>, OdixError> {
        let conn = self.reader()?;
        let mut hits = Vec::new();

        if reference_kind.is_none() || reference_kind == Some(RelationshipKind::Definition) {
            let mut q = QueryBuilder::default();
            let k = q.bind(text(kind.as_str()));
            let n = q.bind(text(name));
            q.clause(format!("kind = {k} AND name = {n}"));
            for entity in select_entities(&conn, &q, "module, parent_name, id", None)? {
                hits.push(ReferenceHit {
                    relationship: definition_of(&entity),
                    direction: Direction::Incoming,
                });
            }
        }

        let kind_filter = reference_kind.filter(|k| *k != RelationshipKind::Definition);
        if reference_kind == Some(RelationshipKind::Definition) {
            return Ok(hits);
        }

        let mut incoming = QueryBuilder::default();
        let k = incoming.bind(text(kind.as_str()));
        let n = incoming.bind(text(name));
        if kind.is_markup() {
            let suffix = incoming.bind(text(format!(".{name}")));
            incoming.clause(format!(
                "((target_kind = {k} AND target_name = {n})
                  OR target_xml_id = {n}
                  OR substr(target_xml_id, -length({suffix})) = {suffix})"
            ));
        } else {
            incoming.clause(format!("target_kind = {k} AND target_name = {n}"));
        }
        let mut outgoing = QueryBuilder::default();
        let k = outgoing.bind(text(kind.as_str()));
        let n = outgoing.bind(text(name));
        outgoing.clause(format!("source_kind = {k} AND source_name = {n}"));

        for q in [&mut incoming, &mut outgoing] {
            if let Some(rk) = kind_filter {
                let p = q.bind(text(rk.as_str()));
                q.clause(format!("kind = {p}"));
            }
        }

        let mut seen = HashSet::new();
        collect_hits(&conn, &incoming, Direction::Incoming, &mut seen, &mut hits)?;
        collect_hits(&conn, &outgoing, Direction::Outgoing, &mut seen, &mut hits)?;
        Ok(hits)
    }

    // ── Aggregates ──────────────────────────────────────────────────────

    /// Modules with their entity counts, optionally filtered by a name pattern.
    pub fn list_modules(&self, pattern: Option<&str>) -> Result<Vec<ModuleSummary>, OdixError> {
        let conn = self.reader()?;
        let mut q = QueryBuilder::default();
        if let Some(pattern) = pattern.filter(|p| !p.is_empty()) {
            let p = q.bind(text(like_pattern(pattern)));
            q.clause(format!("module LIKE {p} ESCAPE '\\'"));
        }
        let sql = format!(
            "SELECT module, COUNT(*) FROM entities{} GROUP BY module ORDER BY module",
            q.where_sql()
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        let modules = stmt
            .query_map(params_from_iter(q.values.iter()), |row| {
                Ok(ModuleSummary {
                    module: row.get(0)?,
                    item_count: row.get::<_, i64>(1)? as usize,
                })
            })
            .map_err(|e| OdixError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        Ok(modules)
    }

    /// Per-kind counts for one module. `NotFound` when the module has no
    /// indexed files or entities.
    pub fn module_stats(&self, module: &str) -> Result<ModuleStats, OdixError> {
        let conn = self.reader()?;
        let counts_by_kind = grouped_counts(
            &conn,
            "SELECT kind, COUNT(*) FROM entities WHERE module = ?1 GROUP BY kind",
            module,
        )?;
        let relationships_by_kind = grouped_counts(
            &conn,
            "SELECT kind, COUNT(*) FROM relationships WHERE source_module = ?1 GROUP BY kind",
            module,
        )?;
        let files: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM file_records WHERE module = ?1",
                params![module],
                |row| row.get(0),
            )
            .map_err(|e| OdixError::Storage(e.to_string()))?;

        let total_items: usize = counts_by_kind.values().sum();
        if total_items == 0 && files == 0 {
            return Err(OdixError::NotFound(format!("module '{module}'")));
        }

        let manifest: Option<String> = conn
            .query_row(
                "SELECT attributes FROM entities WHERE kind = 'module' AND name = ?1 AND module = ?1",
                params![module],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        let manifest = manifest.and_then(|json| serde_json::from_str::<Attributes>(&json).ok());

        Ok(ModuleStats {
            module: module.to_string(),
            total_items,
            counts_by_kind,
            relationships_by_kind,
            files: files as usize,
            manifest,
        })
    }

    /// Whole-index counts.
    pub fn index_stats(&self) -> Result<IndexStats, OdixError> {
        let conn = self.reader()?;
        let scalar = |sql: &str| -> Result<usize, OdixError> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(|e| OdixError::Storage(e.to_string()))
        };

        let total_items = scalar("SELECT COUNT(*) FROM entities")?;
        let total_modules = scalar("SELECT COUNT(DISTINCT module) FROM entities")?;
        let total_files = scalar("SELECT COUNT(*) FROM file_records")?;
        let total_relationships = scalar("SELECT COUNT(*) FROM relationships")?;
        let dangling_relationships =
            scalar("SELECT COUNT(*) FROM relationships WHERE resolved = 0")?;

        let mut stmt = conn
            .prepare("SELECT kind, COUNT(*) FROM entities GROUP BY kind")
            .map_err(|e| OdixError::Storage(e.to_string()))?;
        let counts_by_kind = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })
            .map_err(|e| OdixError::Storage(e.to_string()))?
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map_err(|e| OdixError::Storage(e.to_string()))?;

        Ok(IndexStats {
            total_items,
            total_modules,
            total_files,
            total_relationships,
            dangling_relationships,
            counts_by_kind,
        })
    }

    /// True when nothing has ever been committed.
    pub fn is_empty(&self) -> Result<bool, OdixError> {
        let conn = self.reader()?;
        conn.query_row(
            "SELECT NOT EXISTS (SELECT 1 FROM entities) AND NOT EXISTS (SELECT 1 FROM file_records)",
            [],
            |row| row.get(0),
        )
        .map_err(|e| OdixError::Storage(e.to_string()))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn select_entities(
    conn: &Connection,
    q: &QueryBuilder,
    order_by: &str,
    window: Option<(usize, usize)>,
) -> Result<Vec<Entity>, OdixError> {
    let mut sql = format!(
        "SELECT {ENTITY_COLUMNS} FROM entities{} ORDER BY {order_by}",
        q.where_sql()
    );
    if let Some((limit, offset)) = window {
        sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
    }
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| OdixError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map(params_from_iter(q.values.iter()), EntityRow::from_row)
        .map_err(|e| OdixError::Storage(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| OdixError::Storage(e.to_string()))?;
    rows.into_iter().map(EntityRow::into_entity).collect()
}

/// Count matches for the filter part of `q`, then fetch one ordered page.
/// Values past `filter_params` are ranking terms used only by the page query.
fn page_of_entities(
    conn: &Connection,
    q: &QueryBuilder,
    filter_params: usize,
    order_by: &str,
    limit: usize,
    offset: usize,
) -> Result<Page<Entity>, OdixError> {
    let count_sql = format!("SELECT COUNT(*) FROM entities{}", q.where_sql());
    let total: i64 = conn
        .query_row(
            &count_sql,
            params_from_iter(q.values[..filter_params].iter()),
            |row| row.get(0),
        )
        .map_err(|e| OdixError::Storage(e.to_string()))?;

    let items = select_entities(conn, q, order_by, Some((limit, offset)))?;
    Ok(Page {
        total: total as usize,
        offset,
        items,
    })
}

fn collect_hits(
    conn: &Connection,
    q: &QueryBuilder,
    direction: Direction,
    seen: &mut HashSet<i64>,
    hits: &mut Vec<ReferenceHit>,
) -> Result<(), OdixError> {
    let sql = format!(
        "SELECT id, {RELATIONSHIP_COLUMNS} FROM relationships{}
         ORDER BY kind, source_module, file_path, line_number, id",
        q.where_sql()
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| OdixError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map(params_from_iter(q.values.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, RelationshipRow::from_row_at(row, 1)?))
        })
        .map_err(|e| OdixError::Storage(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| OdixError::Storage(e.to_string()))?;

    for (id, row) in rows {
        if seen.insert(id) {
            hits.push(ReferenceHit {
                relationship: row.into_relationship()?,
                direction,
            });
        }
    }
    Ok(())
}

/// Relationships touching `entity`; for models also those of its fields
/// and functions in every module.
fn entity_relationships(conn: &Connection, entity: &Entity) -> Result<Vec<ReferenceHit>, OdixError> {
    let parent = crate::parent_to_sql(&entity.parent_name);
    let is_model = entity.kind == EntityKind::Model;

    let mut outgoing = QueryBuilder::default();
    let k = outgoing.bind(text(entity.kind.as_str()));
    let n = outgoing.bind(text(entity.name.as_str()));
    let p = outgoing.bind(text(parent));
    let mut clause = format!("(source_kind = {k} AND source_name = {n} AND source_parent = {p})");
    if is_model {
        clause.push_str(&format!(
            " OR (source_parent = {n} AND source_kind IN ('field', 'function'))"
        ));
    }
    outgoing.clause(format!("({clause})"));

    let mut incoming = QueryBuilder::default();
    let k = incoming.bind(text(entity.kind.as_str()));
    let n = incoming.bind(text(entity.name.as_str()));
    let p = incoming.bind(text(parent));
    let mut clause = format!("(target_kind = {k} AND target_name = {n} AND target_parent = {p})");
    if let Some(xml_id) = &entity.xml_id {
        let x = incoming.bind(text(xml_id.as_str()));
        clause.push_str(&format!(" OR target_xml_id = {x}"));
    }
    if is_model {
        clause.push_str(&format!(
            " OR (target_parent = {n} AND target_kind IN ('field', 'function'))"
        ));
    }
    incoming.clause(format!("({clause})"));

    let mut seen = HashSet::new();
    let mut hits = Vec::new();
    collect_hits(conn, &outgoing, Direction::Outgoing, &mut seen, &mut hits)?;
    collect_hits(conn, &incoming, Direction::Incoming, &mut seen, &mut hits)?;
    Ok(hits)
}

fn model_children(conn: &Connection, model: &str) -> Result<Vec<Entity>, OdixError> {
    let mut q = QueryBuilder::default();
    let m = q.bind(text(model));
    q.clause(format!(
        "parent_name = {m} AND kind IN ('field', 'function', 'controller_route')"
    ));
    select_entities(conn, &q, "kind, module, name, id", None)
}

/// Markup entities pointing at `model`, plus menus opening one of the
/// related actions.
fn model_related(conn: &Connection, model: &str) -> Result<Vec<Entity>, OdixError> {
    let mut q = QueryBuilder::default();
    let m = q.bind(text(model));
    let model_ref = q.bind(text(format!(".model_{}", model.replace('.', "_"))));
    q.clause(format!(
        "kind IN ('view', 'action', 'report_template', 'record_rule', 'access_right', 'scheduled_action')
         AND (json_extract(attributes, '$.model') = {m}
              OR json_extract(attributes, '$.res_model') = {m}
              OR json_extract(attributes, '$.binding_model') = {m}
              OR substr(json_extract(attributes, '$.model_ref'), -length({model_ref})) = {model_ref})"
    ));
    let mut related = select_entities(conn, &q, "kind, module, name, id", None)?;

    let action_ids: Vec<String> = related
        .iter()
        .filter(|e| e.kind == EntityKind::Action)
        .filter_map(|e| e.xml_id.clone())
        .collect();
    if !action_ids.is_empty() {
        let mut menus = QueryBuilder::default();
        let placeholders: Vec<String> = action_ids
            .into_iter()
            .map(|id| menus.bind(Value::Text(id)))
            .collect();
        menus.clause(format!(
            "kind = 'menu' AND json_extract(attributes, '$.action') IN ({})",
            placeholders.join(", ")
        ));
        related.extend(select_entities(conn, &menus, "module, name, id", None)?);
    }
    Ok(related)
}

fn grouped_counts(
    conn: &Connection,
    sql: &str,
    module: &str,
) -> Result<BTreeMap<String, usize>, OdixError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| OdixError::Storage(e.to_string()))?;
    let counts = stmt
        .query_map(params![module], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })
        .map_err(|e| OdixError::Storage(e.to_string()))?
        .collect::<Result<BTreeMap<_, _>, _>>()
        .map_err(|e| OdixError::Storage(e.to_string()))?;
    Ok(counts)
}

/// Definitions are not stored; they are the entity rows themselves.
fn definition_of(entity: &Entity) -> Relationship {
    let key = entity.key();
    Relationship {
        kind: RelationshipKind::Definition,
        target: TargetRef::resolved_to(&key, entity.xml_id.clone()),
        source: key,
        file_path: entity.file_path.clone(),
        line_number: entity.line_number,
    }
}
