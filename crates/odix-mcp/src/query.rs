//! Query service: argument validation and response shaping over the index
//! store. Every operation either returns a JSON payload or a typed error;
//! nothing is rejected silently as an empty result.

use odix_core::{
    AttrValue, Attributes, Entity, EntityKind, OdixError, Page, ReferenceHit, RelationshipKind,
};
use odix_index::{RunCoordinator, RunParams};
use odix_storage::{AttributeQuery, SearchParams, Storage};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;

/// Read path over the store plus the indexing trigger.
pub struct QueryService {
    storage: Arc<Storage>,
    coordinator: Arc<RunCoordinator>,
}

impl QueryService {
    pub fn new(storage: Arc<Storage>, coordinator: Arc<RunCoordinator>) -> Self {
        Self {
            storage,
            coordinator,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    // ── Search ──────────────────────────────────────────────────────────

    pub fn search(&self, args: &Value) -> Result<Value, OdixError> {
        let pattern = required_str(args, "query")?;
        let (limit, offset) = pagination(args)?;
        let params = SearchParams {
            pattern: pattern.to_string(),
            kind: optional_kind(args, "item_type")?,
            module: optional_str(args, "module")?.map(str::to_string),
            parent_name: optional_str(args, "parent_name")?.map(str::to_string),
            limit,
            offset,
        };
        let page = self.storage.search(&params)?;
        Ok(envelope(&page, limit))
    }

    pub fn search_xml_id(&self, args: &Value) -> Result<Value, OdixError> {
        let pattern = required_str(args, "query")?;
        let module = optional_str(args, "module")?;
        let (limit, offset) = pagination(args)?;
        let page = self.storage.search_xml_id(pattern, module, limit, offset)?;
        Ok(envelope(&page, limit))
    }

    pub fn search_by_attribute(&self, args: &Value) -> Result<Value, OdixError> {
        let kind = required_kind(args, "item_type")?;
        let filters = attribute_filters(args.get("attribute_filters"))?;
        let (limit, offset) = pagination(args)?;
        let query = AttributeQuery {
            kind,
            filters,
            module: optional_str(args, "module")?.map(str::to_string),
            limit,
            offset,
        };
        let page = self.storage.search_by_attributes(&query)?;
        Ok(envelope(&page, limit))
    }

    // ── Lookup ──────────────────────────────────────────────────────────

    pub fn item_details(&self, args: &Value) -> Result<Value, OdixError> {
        let kind = required_kind(args, "item_type")?;
        let name = required_str(args, "name")?;
        let parent = optional_str(args, "parent_name")?;
        let module = optional_str(args, "module")?;
        let details = self.storage.get_entity(kind, name, parent, module)?;

        let mut body = json!({
            "item": entity_json(&details.entity),
            "relationships": details.relationships.iter().map(reference_json).collect::<Vec<_>>(),
        });
        if !details.other_definitions.is_empty() {
            body["other_definitions"] = Value::Array(details.other_definitions.iter().map(entity_json).collect());
        }
        if kind == EntityKind::Model {
            let (fields, methods): (Vec<&Entity>, Vec<&Entity>) = details
                .children
                .iter()
                .filter(|c| c.kind != EntityKind::ControllerRoute)
                .partition(|c| c.kind == EntityKind::Field);
            body["fields"] = Value::Array(fields.into_iter().map(entity_json).collect());
            body["methods"] = Value::Array(methods.into_iter().map(entity_json).collect());
            body["related"] = Value::Array(details.related.iter().map(entity_json).collect());
        }
        Ok(body)
    }

    pub fn find_references(&self, args: &Value) -> Result<Value, OdixError> {
        let kind = required_kind(args, "item_type")?;
        let name = required_str(args, "name")?;
        let reference_kind = match optional_str(args, "reference_type")? {
            Some(raw) => Some(raw.parse::<RelationshipKind>()?),
            None => None,
        };
        let hits = self.storage.find_references(kind, name, reference_kind)?;
        Ok(json!({
            "item_type": kind.as_str(),
            "name": name,
            "total": hits.len(),
            "references": hits.iter().map(reference_json).collect::<Vec<_>>(),
        }))
    }

    // ── Aggregates ──────────────────────────────────────────────────────

    pub fn list_modules(&self, args: &Value) -> Result<Value, OdixError> {
        let pattern = optional_str(args, "pattern")?;
        let modules = self.storage.list_modules(pattern)?;
        Ok(json!({
            "total": modules.len(),
            "modules": modules,
        }))
    }

    pub fn module_stats(&self, args: &Value) -> Result<Value, OdixError> {
        let module = required_str(args, "module")?;
        let stats = self.storage.module_stats(module)?;
        Ok(serde_json::to_value(stats)?)
    }

    // ── Indexing ────────────────────────────────────────────────────────

    pub fn update_index(&self, args: &Value) -> Result<Value, OdixError> {
        let params = RunParams {
            incremental: optional_bool(args, "incremental")?.unwrap_or(true),
            modules: module_list(args.get("modules"))?,
            clear_all: optional_bool(args, "clear_db")?.unwrap_or(false),
        };
        let scope = match &params.modules {
            Some(modules) => modules.join(", "),
            None => "all modules".to_string(),
        };
        let mode = if params.clear_all {
            "full rebuild"
        } else if params.incremental {
            "incremental"
        } else {
            "full"
        };

        match self.coordinator.trigger(params) {
            Ok(()) => Ok(json!({
                "started": true,
                "message": format!("Started {mode} indexing of {scope}. Poll get_index_status for progress."),
            })),
            Err(err @ OdixError::ConcurrentRunRejected { .. }) => Ok(json!({
                "started": false,
                "error": err.code(),
                "message": err.to_string(),
            })),
            Err(err) => Err(err),
        }
    }

    pub fn index_status(&self) -> Result<Value, OdixError> {
        let stats = self.storage.index_stats()?;
        let status = self.coordinator.status()?;

        let mut indexing = json!({
            "is_running": status.is_running,
        });
        if status.is_running {
            indexing["phase"] = serde_json::to_value(status.phase)?;
            indexing["elapsed_seconds"] = json!(status.elapsed_seconds);
            indexing["incremental"] = json!(status.incremental);
            indexing["modules"] = json!(status.modules);
            indexing["files_done"] = json!(status.files_done);
            indexing["files_total"] = json!(status.files_total);
        }
        if let Some(err) = &status.last_error {
            indexing["last_error"] = json!(err);
        }

        let mut body = json!({
            "total_items": stats.total_items,
            "total_modules": stats.total_modules,
            "total_files": stats.total_files,
            "total_relationships": stats.total_relationships,
            "dangling_relationships": stats.dangling_relationships,
            "counts_by_kind": stats.counts_by_kind,
            "indexing": indexing,
        });
        if let Some(last) = &status.last_run {
            body["last_run"] = serde_json::to_value(last)?;
        }
        Ok(body)
    }
}

// ── Shaping ─────────────────────────────────────────────────────────────────

fn envelope(page: &Page<Entity>, limit: usize) -> Value {
    json!({
        "total": page.total,
        "returned": page.returned(),
        "has_more": page.has_more(),
        "next_offset": page.next_offset(),
        "offset": page.offset,
        "limit": limit,
        "results": page.items.iter().map(entity_json).collect::<Vec<_>>(),
    })
}

fn entity_json(entity: &Entity) -> Value {
    json!({
        "item_type": entity.kind.as_str(),
        "name": entity.name,
        "parent_name": entity.parent_name,
        "module": entity.module,
        "xml_id": entity.xml_id,
        "file_path": entity.file_path,
        "line_number": entity.line_number,
        "attributes": entity.attributes,
    })
}

fn reference_json(hit: &ReferenceHit) -> Value {
    let rel = &hit.relationship;
    json!({
        "reference_type": rel.kind.as_str(),
        "direction": hit.direction,
        "source": {
            "item_type": rel.source.kind.as_str(),
            "name": rel.source.name,
            "parent_name": rel.source.parent_name,
            "module": rel.source.module,
        },
        "target": {
            "item_type": rel.target.kind.as_str(),
            "name": rel.target.name,
            "parent_name": rel.target.parent_name,
            "module": rel.target.module,
            "xml_id": rel.target.xml_id,
            "resolved": rel.target.is_resolved(),
        },
        "module": rel.source.module,
        "file_path": rel.file_path,
        "line_number": rel.line_number,
    })
}

// ── Validation ──────────────────────────────────────────────────────────────

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, OdixError> {
    match optional_str(args, key)? {
        Some(v) => Ok(v),
        None => Err(OdixError::Validation(format!("'{key}' is required and must not be empty"))),
    }
}

/// A string argument; empty strings count as absent.
fn optional_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>, OdixError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then_some(s))
        }
        Some(_) => Err(OdixError::Validation(format!("'{key}' must be a string"))),
    }
}

fn optional_bool(args: &Value, key: &str) -> Result<Option<bool>, OdixError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(OdixError::Validation(format!("'{key}' must be a boolean"))),
    }
}

fn required_kind(args: &Value, key: &str) -> Result<EntityKind, OdixError> {
    required_str(args, key)?.parse()
}

fn optional_kind(args: &Value, key: &str) -> Result<Option<EntityKind>, OdixError> {
    optional_str(args, key)?.map(str::parse).transpose()
}

/// `(limit, offset)`: limit clamped to `1..=MAX_LIMIT`, offset non-negative.
pub(crate) fn pagination(args: &Value) -> Result<(usize, usize), OdixError> {
    let limit = match args.get("limit") {
        None | Some(Value::Null) => DEFAULT_LIMIT,
        Some(v) => match v.as_i64() {
            Some(n) => n.clamp(1, MAX_LIMIT as i64) as usize,
            None => return Err(OdixError::Validation("'limit' must be an integer".to_string())),
        },
    };
    let offset = match args.get("offset") {
        None | Some(Value::Null) => 0,
        Some(v) => match v.as_i64() {
            Some(n) if n >= 0 => n as usize,
            _ => {
                return Err(OdixError::Validation(
                    "'offset' must be a non-negative integer".to_string(),
                ))
            }
        },
    };
    Ok((limit, offset))
}

/// A JSON object of scalars. Unknown keys are fine; they match nothing.
pub(crate) fn attribute_filters(value: Option<&Value>) -> Result<Attributes, OdixError> {
    let object: &Map<String, Value> = match value {
        Some(Value::Object(map)) => map,
        Some(Value::String(raw)) => {
            // Some clients send the filter object pre-serialized.
            return match serde_json::from_str::<Value>(raw) {
                Ok(parsed @ Value::Object(_)) => attribute_filters(Some(&parsed)),
                _ => Err(OdixError::Validation(
                    "'attribute_filters' must be a JSON object".to_string(),
                )),
            };
        }
        None | Some(Value::Null) => {
            return Err(OdixError::Validation("'attribute_filters' is required".to_string()))
        }
        Some(_) => {
            return Err(OdixError::Validation(
                "'attribute_filters' must be a JSON object".to_string(),
            ))
        }
    };
    if object.is_empty() {
        return Err(OdixError::Validation(
            "'attribute_filters' must name at least one attribute".to_string(),
        ));
    }
    object
        .iter()
        .map(|(key, value)| {
            AttrValue::from_json(value)
                .map(|v| (key.clone(), v))
                .ok_or_else(|| {
                    OdixError::Validation(format!(
                        "attribute filter '{key}' must be a string, number or boolean"
                    ))
                })
        })
        .collect()
}

/// Module filter as an array of names or a comma-separated string.
pub(crate) fn module_list(value: Option<&Value>) -> Result<Option<Vec<String>>, OdixError> {
    let modules: Vec<String> = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s.split(',').map(|m| m.trim().to_string()).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(|s| s.trim().to_string()).ok_or_else(|| {
                    OdixError::Validation("'modules' entries must be strings".to_string())
                })
            })
            .collect::<Result<_, _>>()?,
        Some(_) => {
            return Err(OdixError::Validation(
                "'modules' must be a list of module names".to_string(),
            ))
        }
    };
    let modules: Vec<String> = modules.into_iter().filter(|m| !m.is_empty()).collect();
    Ok((!modules.is_empty()).then_some(modules))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped_and_defaulted() {
        assert_eq!(pagination(&json!({})).unwrap(), (DEFAULT_LIMIT, 0));
        assert_eq!(pagination(&json!({"limit": 500})).unwrap(), (MAX_LIMIT, 0));
        assert_eq!(pagination(&json!({"limit": 0, "offset": 4})).unwrap(), (1, 4));
    }

    #[test]
    fn negative_offset_is_rejected() {
        let err = pagination(&json!({"offset": -1})).unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert!(pagination(&json!({"limit": "ten"})).is_err());
    }

    #[test]
    fn filters_must_be_scalar_object() {
        let filters = attribute_filters(Some(&json!({"field_type": "Many2one", "required": true})))
            .unwrap();
        assert_eq!(filters.get("required"), Some(&AttrValue::Bool(true)));

        assert!(attribute_filters(Some(&json!(["field_type"]))).is_err());
        assert!(attribute_filters(Some(&json!({"groups": ["a"]}))).is_err());
        assert!(attribute_filters(Some(&json!({}))).is_err());
        assert!(attribute_filters(None).is_err());
    }

    #[test]
    fn filters_accept_serialized_object() {
        let filters = attribute_filters(Some(&json!("{\"view_type\": \"form\"}"))).unwrap();
        assert_eq!(filters.get("view_type"), Some(&AttrValue::from("form")));
    }

    #[test]
    fn module_list_accepts_array_or_csv() {
        assert_eq!(
            module_list(Some(&json!(["sale", " stock "]))).unwrap(),
            Some(vec!["sale".to_string(), "stock".to_string()])
        );
        assert_eq!(
            module_list(Some(&json!("sale, stock"))).unwrap(),
            Some(vec!["sale".to_string(), "stock".to_string()])
        );
        assert_eq!(module_list(Some(&json!(""))).unwrap(), None);
        assert!(module_list(Some(&json!(3))).is_err());
    }

    #[test]
    fn empty_strings_are_absent() {
        let args = json!({"query": "  ", "module": ""});
        assert_eq!(optional_str(&args, "module").unwrap(), None);
        assert!(required_str(&args, "query").is_err());
        assert!(optional_str(&json!({"module": 4}), "module").is_err());
    }

    #[test]
    fn unknown_kind_is_validation_error() {
        let err = required_kind(&json!({"item_type": "widget"}), "item_type").unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert_eq!(
            optional_kind(&json!({"item_type": "model"}), "item_type").unwrap(),
            Some(EntityKind::Model)
        );
    }
}
