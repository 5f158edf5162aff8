use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::OdixError;

// ── Entity Kinds ────────────────────────────────────────────────────────────

/// The 13 kinds of indexed Odoo artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Model,
    Field,
    Function,
    View,
    Menu,
    Action,
    ControllerRoute,
    AccessRight,
    RecordRule,
    ScheduledAction,
    ReportTemplate,
    Module,
    /// A markup record that is none of the more specific kinds
    /// (groups, sequences, mail templates, demo data, ...).
    XmlId,
}

impl EntityKind {
    pub const ALL: [EntityKind; 13] = [
        Self::Model,
        Self::Field,
        Self::Function,
        Self::View,
        Self::Menu,
        Self::Action,
        Self::ControllerRoute,
        Self::AccessRight,
        Self::RecordRule,
        Self::ScheduledAction,
        Self::ReportTemplate,
        Self::Module,
        Self::XmlId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Field => "field",
            Self::Function => "function",
            Self::View => "view",
            Self::Menu => "menu",
            Self::Action => "action",
            Self::ControllerRoute => "controller_route",
            Self::AccessRight => "access_right",
            Self::RecordRule => "record_rule",
            Self::ScheduledAction => "scheduled_action",
            Self::ReportTemplate => "report_template",
            Self::Module => "module",
            Self::XmlId => "xml_id",
        }
    }

    /// Kinds that are declared in markup and identified by an XML id.
    pub fn is_markup(&self) -> bool {
        matches!(
            self,
            Self::View
                | Self::Menu
                | Self::Action
                | Self::AccessRight
                | Self::RecordRule
                | Self::ScheduledAction
                | Self::ReportTemplate
                | Self::XmlId
        )
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = OdixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "model" => Ok(Self::Model),
            "field" => Ok(Self::Field),
            "function" | "method" => Ok(Self::Function),
            "view" => Ok(Self::View),
            "menu" => Ok(Self::Menu),
            "action" => Ok(Self::Action),
            "controller_route" | "route" => Ok(Self::ControllerRoute),
            "access_right" => Ok(Self::AccessRight),
            "record_rule" => Ok(Self::RecordRule),
            "scheduled_action" | "cron" => Ok(Self::ScheduledAction),
            "report_template" | "report" => Ok(Self::ReportTemplate),
            "module" => Ok(Self::Module),
            "xml_id" => Ok(Self::XmlId),
            _ => Err(OdixError::InvalidEntityKind(s.to_string())),
        }
    }
}

// ── Relationship Kinds ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Definition,
    /// `_inherit` / `_inherits` on a new model, `inherit_id` on a view.
    Inheritance,
    /// A method that calls its super implementation.
    Override,
    /// Plain usage: comodels, `env[...]`, menu parents, group refs.
    Reference,
    /// In-place extension of an object owned by another module.
    Modification,
}

impl RelationshipKind {
    pub const ALL: [RelationshipKind; 5] = [
        Self::Definition,
        Self::Inheritance,
        Self::Override,
        Self::Reference,
        Self::Modification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Definition => "definition",
            Self::Inheritance => "inheritance",
            Self::Override => "override",
            Self::Reference => "reference",
            Self::Modification => "modification",
        }
    }
}

impl std::fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationshipKind {
    type Err = OdixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "definition" => Ok(Self::Definition),
            "inheritance" => Ok(Self::Inheritance),
            "override" => Ok(Self::Override),
            "reference" => Ok(Self::Reference),
            "modification" => Ok(Self::Modification),
            _ => Err(OdixError::InvalidRelationshipKind(s.to_string())),
        }
    }
}

// ── Attributes ──────────────────────────────────────────────────────────────

/// A scalar attribute value. Attributes form an open map per entity so that
/// filtering is a uniform key/value equality test regardless of kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert a JSON scalar into an attribute value. Arrays, objects and
    /// null have no attribute representation.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for AttrValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

/// Ordered so that serialized attributes are byte-identical across runs.
pub type Attributes = BTreeMap<String, AttrValue>;

// ── Entities ────────────────────────────────────────────────────────────────

/// Natural key of an entity: `(kind, name, parent_name, module)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub name: String,
    pub parent_name: Option<String>,
    pub module: String,
}

impl EntityKey {
    pub fn new(
        kind: EntityKind,
        name: impl Into<String>,
        parent_name: Option<String>,
        module: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            parent_name,
            module: module.into(),
        }
    }

    pub fn module_key(module: &str) -> Self {
        Self::new(EntityKind::Module, module, None, module)
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.parent_name {
            Some(parent) => write!(f, "{}:{}/{}@{}", self.kind, parent, self.name, self.module),
            None => write!(f, "{}:{}@{}", self.kind, self.name, self.module),
        }
    }
}

/// One indexed artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub name: String,
    pub parent_name: Option<String>,
    pub module: String,
    pub file_path: String,
    /// 1-based line of the defining occurrence.
    pub line_number: u32,
    /// Fully qualified `module.local_id` for markup-identified entities.
    pub xml_id: Option<String>,
    pub attributes: Attributes,
}

impl Entity {
    pub fn new(
        kind: EntityKind,
        name: impl Into<String>,
        module: impl Into<String>,
        file_path: impl Into<String>,
        line_number: u32,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            parent_name: None,
            module: module.into(),
            file_path: file_path.into(),
            line_number,
            xml_id: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_name = Some(parent.into());
        self
    }

    pub fn with_xml_id(mut self, xml_id: impl Into<String>) -> Self {
        self.xml_id = Some(xml_id.into());
        self
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<AttrValue>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    pub fn key(&self) -> EntityKey {
        EntityKey {
            kind: self.kind,
            name: self.name.clone(),
            parent_name: self.parent_name.clone(),
            module: self.module.clone(),
        }
    }
}

// ── Relationships ───────────────────────────────────────────────────────────

/// Target side of a relationship. `module` is `None` while the target is
/// unresolved (dangling).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    pub kind: EntityKind,
    pub name: String,
    pub parent_name: Option<String>,
    pub module: Option<String>,
    /// The markup id the reference was written with, kept so a resolved
    /// target can fall back to its symbolic form if the entity disappears.
    pub xml_id: Option<String>,
}

impl TargetRef {
    pub fn unresolved(kind: EntityKind, name: impl Into<String>, parent_name: Option<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            parent_name,
            module: None,
            xml_id: None,
        }
    }

    /// A reference written as a markup id (`module.local_id`), kind unknown.
    pub fn xml_ref(xml_id: impl Into<String>) -> Self {
        let xml_id = xml_id.into();
        Self {
            kind: EntityKind::XmlId,
            name: xml_id.clone(),
            parent_name: None,
            module: None,
            xml_id: Some(xml_id),
        }
    }

    pub fn resolved_to(key: &EntityKey, xml_id: Option<String>) -> Self {
        Self {
            kind: key.kind,
            name: key.name.clone(),
            parent_name: key.parent_name.clone(),
            module: Some(key.module.clone()),
            xml_id,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.module.is_some()
    }

    /// The symbolic (unresolved) form of this target.
    pub fn unresolve(&self) -> Self {
        match &self.xml_id {
            Some(xml_id) => Self::xml_ref(xml_id.clone()),
            None => Self::unresolved(self.kind, self.name.clone(), self.parent_name.clone()),
        }
    }
}

/// A directed, typed edge observed at `file_path:line_number`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub kind: RelationshipKind,
    pub source: EntityKey,
    pub target: TargetRef,
    pub file_path: String,
    pub line_number: u32,
}

impl Relationship {
    pub fn is_resolved(&self) -> bool {
        self.target.is_resolved()
    }
}

// ── Incremental State ───────────────────────────────────────────────────────

/// Fingerprint of one indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_path: String,
    pub module: String,
    /// Lowercase hex SHA-256 of the file content.
    pub fingerprint: String,
    /// Unix seconds.
    pub last_indexed_at: i64,
}

// ── Query Results ───────────────────────────────────────────────────────────

/// One page of a paginated query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub total: usize,
    pub offset: usize,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn returned(&self) -> usize {
        self.items.len()
    }

    pub fn has_more(&self) -> bool {
        self.offset + self.items.len() < self.total
    }

    pub fn next_offset(&self) -> Option<usize> {
        self.has_more().then(|| self.offset + self.items.len())
    }
}

/// Which side of a relationship the queried entity sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The queried entity is the target.
    Incoming,
    /// The queried entity is the source.
    Outgoing,
}

/// Relationship as returned by reference queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceHit {
    pub relationship: Relationship,
    pub direction: Direction,
}

/// Full detail view of one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDetails {
    /// The defining entity. When several modules carry the same key, the
    /// first by module name wins.
    pub entity: Entity,
    /// Same kind, name and parent in other modules.
    pub other_definitions: Vec<Entity>,
    pub relationships: Vec<ReferenceHit>,
    /// Fields and functions of a model, from every module.
    pub children: Vec<Entity>,
    /// Views, actions, menus, reports, rules and access rights that point
    /// at a model.
    pub related: Vec<Entity>,
}

/// One row of a module listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub module: String,
    pub item_count: usize,
}

/// Aggregate counts for one module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleStats {
    pub module: String,
    pub total_items: usize,
    pub counts_by_kind: BTreeMap<String, usize>,
    pub relationships_by_kind: BTreeMap<String, usize>,
    pub files: usize,
    pub manifest: Option<Attributes>,
}

/// Whole-index aggregate counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_items: usize,
    pub total_modules: usize,
    pub total_files: usize,
    pub total_relationships: usize,
    pub dangling_relationships: usize,
    pub counts_by_kind: BTreeMap<String, usize>,
}
